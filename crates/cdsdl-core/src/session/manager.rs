use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use super::account::Account;
use super::MAX_SESSIONS_PER_ACCOUNT;
use crate::lease_store::{LeaseError, LeaseKey, LeaseKind, LeaseRecord, LeaseStore};
use crate::product::Product;
use crate::token::{AuthError, Token, TokenStore};

/// A held session slot: "this account has a download in flight for this product".
#[derive(Debug, Clone)]
pub struct SessionLease {
    pub account: String,
    pub product_id: String,
    pub product_name: String,
    pub slot: usize,
    pub key: LeaseKey,
}

/// One admitted download: pending product `index`, its account, token and slot.
#[derive(Debug, Clone)]
pub struct Grant {
    /// Position of the product in the slice passed to `acquire_batch`.
    pub index: usize,
    pub account: String,
    pub token: Token,
    pub lease: SessionLease,
}

/// Result of one admission round.
#[derive(Debug, Default)]
pub struct Batch {
    pub grants: Vec<Grant>,
    /// Accounts that could not authenticate this round.
    pub auth_failures: Vec<(String, AuthError)>,
}

/// Grants session slots across an account group.
pub struct LeaseManager {
    store: Arc<dyn LeaseStore>,
    tokens: TokenStore,
    accounts: Mutex<Vec<Account>>,
    max_sessions: usize,
    blacklist_after: u32,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn LeaseStore>, tokens: TokenStore, accounts: Vec<Account>) -> Self {
        Self {
            store,
            tokens,
            accounts: Mutex::new(accounts),
            max_sessions: MAX_SESSIONS_PER_ACCOUNT,
            blacklist_after: MAX_SESSIONS_PER_ACCOUNT as u32,
        }
    }

    /// Per-account slot bound. The blacklist threshold follows it unless set
    /// explicitly afterwards.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max.max(1);
        self.blacklist_after = self.max_sessions as u32;
        self
    }

    pub fn with_blacklist_after(mut self, errors: u32) -> Self {
        self.blacklist_after = errors.max(1);
        self
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Account>> {
        self.accounts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admit as many of `pending` as free slots allow, in input order.
    ///
    /// Accounts that are blacklisted (here or in `blacklist`) are never
    /// picked. An account whose authentication fails gets its slot back, a
    /// failure on its record, and no further grants this round. The batch
    /// ends at the first product for which no eligible account remains.
    ///
    /// On a store error the grants already made in this call are rolled
    /// back before the error is returned.
    pub fn acquire_batch(
        &self,
        pending: &[Product],
        blacklist: &HashSet<String>,
    ) -> Result<Batch, LeaseError> {
        let mut accounts = self.lock();
        let mut batch = Batch::default();
        match self.fill_batch(&mut accounts, pending, blacklist, &mut batch) {
            Ok(()) => Ok(batch),
            Err(e) => {
                for grant in &batch.grants {
                    if let Err(undo) = self.drop_grant_records(grant) {
                        tracing::warn!(
                            account = %grant.account,
                            slot = grant.lease.slot,
                            "failed to roll back session grant: {}",
                            undo
                        );
                    }
                }
                Err(e)
            }
        }
    }

    fn fill_batch(
        &self,
        accounts: &mut [Account],
        pending: &[Product],
        blacklist: &HashSet<String>,
        batch: &mut Batch,
    ) -> Result<(), LeaseError> {
        self.refresh_counts(accounts)?;

        let mut exhausted: HashSet<String> = HashSet::new();
        let mut rng = rand::thread_rng();

        'products: for (index, product) in pending.iter().enumerate() {
            loop {
                let eligible: Vec<usize> = accounts
                    .iter()
                    .enumerate()
                    .filter(|(_, a)| {
                        !a.blacklisted
                            && !blacklist.contains(&a.login)
                            && !exhausted.contains(&a.login)
                            && a.active_lease_count < self.max_sessions
                    })
                    .map(|(i, _)| i)
                    .collect();
                let Some(&i) = eligible.choose(&mut rng) else {
                    break 'products;
                };

                let Some(lease) = self.claim_slot(&accounts[i].login, product)? else {
                    // Another process filled the remaining slots since the scan.
                    accounts[i].active_lease_count = self.max_sessions;
                    continue;
                };
                accounts[i].active_lease_count += 1;

                match self.tokens.ensure_token(&accounts[i], false) {
                    Ok(token) => {
                        tracing::debug!(
                            account = %lease.account,
                            product = %product.name,
                            slot = lease.slot,
                            "session granted"
                        );
                        batch.grants.push(Grant {
                            index,
                            account: accounts[i].login.clone(),
                            token,
                            lease,
                        });
                        continue 'products;
                    }
                    Err(e) => {
                        self.store.remove(&lease.key)?;
                        let account = &mut accounts[i];
                        account.active_lease_count = account.active_lease_count.saturating_sub(1);
                        exhausted.insert(account.login.clone());
                        note_outcome(account, false, self.blacklist_after);
                        batch.auth_failures.push((account.login.clone(), e));
                    }
                }
            }
        }
        Ok(())
    }

    /// Re-derive every account's load from the session records of all processes.
    fn refresh_counts(&self, accounts: &mut [Account]) -> Result<(), LeaseError> {
        let sessions = self.store.list(LeaseKind::Session, None)?;
        for account in accounts.iter_mut() {
            account.active_lease_count = sessions
                .iter()
                .filter(|(key, _)| key.account == account.login)
                .count();
        }
        Ok(())
    }

    /// Take the lowest free slot of `login`, if any.
    fn claim_slot(&self, login: &str, product: &Product) -> Result<Option<SessionLease>, LeaseError> {
        for slot in 0..self.max_sessions {
            let key = LeaseKey::session(login, slot);
            let record = LeaseRecord::new(login, product.name.clone());
            if self.store.try_create(&key, &record)? {
                return Ok(Some(SessionLease {
                    account: login.to_string(),
                    product_id: product.id.clone(),
                    product_name: product.name.clone(),
                    slot,
                    key,
                }));
            }
        }
        Ok(None)
    }

    /// Give back a grant's slot and drop its token record if this process
    /// issued it. Idempotent.
    pub fn release_lease(&self, grant: &Grant) -> Result<(), LeaseError> {
        self.drop_grant_records(grant)?;
        let mut accounts = self.lock();
        if let Some(account) = accounts.iter_mut().find(|a| a.login == grant.account) {
            account.active_lease_count = account.active_lease_count.saturating_sub(1);
        }
        Ok(())
    }

    fn drop_grant_records(&self, grant: &Grant) -> Result<(), LeaseError> {
        self.store.remove(&grant.lease.key)?;
        self.tokens.release_own_token(&grant.token)?;
        Ok(())
    }

    /// Record a download outcome for `login`.
    /// Returns true if this call blacklisted the account.
    pub fn record_outcome(&self, login: &str, succeeded: bool) -> bool {
        let mut accounts = self.lock();
        match accounts.iter_mut().find(|a| a.login == login) {
            Some(account) => note_outcome(account, succeeded, self.blacklist_after),
            None => false,
        }
    }

    pub fn blacklist(&self) -> HashSet<String> {
        self.lock()
            .iter()
            .filter(|a| a.blacklisted)
            .map(|a| a.login.clone())
            .collect()
    }

    pub fn has_usable_account(&self) -> bool {
        self.lock().iter().any(|a| !a.blacklisted)
    }

    pub fn accounts_snapshot(&self) -> Vec<Account> {
        self.lock().clone()
    }

    /// Remove every record this process still holds (interrupt cleanup).
    pub fn release_process_records(&self) -> Result<usize, LeaseError> {
        let mut removed = 0;
        for kind in [LeaseKind::Session, LeaseKind::Token] {
            for (key, record) in self.store.list(kind, None)? {
                if record.is_owned_by_current_process() {
                    self.store.remove(&key)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

fn note_outcome(account: &mut Account, succeeded: bool, threshold: u32) -> bool {
    if succeeded {
        account.consecutive_errors = 0;
        return false;
    }
    account.consecutive_errors += 1;
    if !account.blacklisted && account.consecutive_errors >= threshold {
        account.blacklisted = true;
        tracing::warn!(
            account = %account.login,
            errors = account.consecutive_errors,
            "account blacklisted for the rest of the run"
        );
        return true;
    }
    false
}
