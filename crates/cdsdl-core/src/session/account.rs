//! Accounts: interchangeable credentials of one account group.

use std::collections::BTreeMap;

/// One set of credentials plus this run's view of its load and health.
#[derive(Clone)]
pub struct Account {
    pub login: String,
    secret: String,
    /// Slots currently leased by any process, as of the last batch scan.
    pub active_lease_count: usize,
    pub consecutive_errors: u32,
    pub blacklisted: bool,
}

impl Account {
    pub fn new(login: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            secret: secret.into(),
            active_lease_count: 0,
            consecutive_errors: 0,
            blacklisted: false,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Build the accounts of a group from its `login -> secret` table.
    pub fn from_group(group: &BTreeMap<String, String>) -> Vec<Account> {
        group
            .iter()
            .map(|(login, secret)| Account::new(login.clone(), secret.clone()))
            .collect()
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("login", &self.login)
            .field("secret", &"<redacted>")
            .field("active_lease_count", &self.active_lease_count)
            .field("consecutive_errors", &self.consecutive_errors)
            .field("blacklisted", &self.blacklisted)
            .finish()
    }
}
