//! Session admission: which account downloads which product.
//!
//! Every in-flight download holds one numbered session slot of its account,
//! durably recorded in the lease store. The manager hands out slots in
//! batches, picking uniformly at random among accounts that still have a free
//! slot, and blacklists accounts that keep failing.

mod account;
mod manager;

pub use account::Account;
pub use manager::{Batch, Grant, LeaseManager, SessionLease};

/// Upper bound on concurrent sessions per account imposed by the API.
pub const MAX_SESSIONS_PER_ACCOUNT: usize = 4;
