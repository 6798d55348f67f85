pub mod config;
pub mod logging;

pub mod control;
pub mod driver;
pub mod lease_store;
pub mod listing;
pub mod presence;
pub mod product;
pub mod retry;
pub mod session;
pub mod token;
pub mod transport;
pub mod worker;
