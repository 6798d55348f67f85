//! Authentication failure taxonomy.

use crate::lease_store::LeaseError;

/// Why a bearer token could not be obtained. Every variant counts as an
/// authentication failure against the account.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The identity endpoint answered with a non-success status
    /// (typically 401 for bad credentials).
    #[error("identity endpoint returned HTTP {status}: {detail}")]
    Rejected { status: u32, detail: String },
    /// The identity endpoint could not be reached.
    #[error("identity request failed: {0}")]
    Network(String),
    /// The response body was not the expected JSON document.
    #[error("malformed identity response: {0}")]
    Malformed(String),
    /// Well-formed response without an `access_token` field.
    #[error("identity response has no access_token")]
    MissingAccessToken,
    /// The token was issued but its record could not be persisted.
    #[error("cannot persist token record: {0}")]
    Store(#[from] LeaseError),
}

impl From<curl::Error> for AuthError {
    fn from(e: curl::Error) -> Self {
        AuthError::Network(e.to_string())
    }
}
