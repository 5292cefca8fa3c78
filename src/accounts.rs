//! Account pool — round-robin credential rotation.
//!
//! Accounts are created once at startup from configuration and never
//! destroyed during a run, only disabled (after unrecoverable auth failures
//! or failed startup connects). Exactly one account is current at any
//! instant; `current()` on an empty pool is fatal.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::platform::PlatformClient;

/// One credential and its live connection.
pub struct Account {
    pub name: String,
    pub client: Arc<dyn PlatformClient>,
    enabled: AtomicBool,
    forward_count: AtomicU32,
    last_used_at: Mutex<Option<DateTime<Utc>>>,
}

impl Account {
    pub fn new(name: impl Into<String>, client: Arc<dyn PlatformClient>) -> Self {
        Self {
            name: name.into(),
            client,
            enabled: AtomicBool::new(true),
            forward_count: AtomicU32::new(0),
            last_used_at: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn forward_count(&self) -> u32 {
        self.forward_count.load(Ordering::Relaxed)
    }

    pub fn last_used_at(&self) -> Option<DateTime<Utc>> {
        *self.last_used_at.lock().expect("account lock poisoned")
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }
}

/// Ordered pool of accounts with a current-index pointer.
pub struct AccountPool {
    accounts: Vec<Arc<Account>>,
    current: AtomicUsize,
}

impl AccountPool {
    pub fn new(accounts: Vec<Arc<Account>>) -> Self {
        Self {
            accounts,
            current: AtomicUsize::new(0),
        }
    }

    /// The active account. Fails when no enabled account remains.
    ///
    /// If the pointed-at account has been disabled since the last call, the
    /// pointer slides forward to the next enabled one.
    pub fn current(&self) -> Result<Arc<Account>, ConfigError> {
        let len = self.accounts.len();
        if len == 0 {
            return Err(ConfigError::NoEnabledAccounts);
        }
        let start = self.current.load(Ordering::Relaxed) % len;
        for offset in 0..len {
            let idx = (start + offset) % len;
            if self.accounts[idx].is_enabled() {
                self.current.store(idx, Ordering::Relaxed);
                return Ok(Arc::clone(&self.accounts[idx]));
            }
        }
        Err(ConfigError::NoEnabledAccounts)
    }

    /// Move the pointer to the next enabled account, wrapping. No-op when
    /// fewer than two enabled accounts exist.
    pub fn advance(&self) -> bool {
        if self.enabled_count() < 2 {
            return false;
        }
        let len = self.accounts.len();
        let start = self.current.load(Ordering::Relaxed) % len;
        for offset in 1..=len {
            let idx = (start + offset) % len;
            if self.accounts[idx].is_enabled() {
                self.current.store(idx, Ordering::Relaxed);
                info!(
                    from = %self.accounts[start].name,
                    to = %self.accounts[idx].name,
                    "Switched account"
                );
                return true;
            }
        }
        false
    }

    pub fn accounts(&self) -> &[Arc<Account>] {
        &self.accounts
    }

    pub fn enabled_count(&self) -> usize {
        self.accounts.iter().filter(|a| a.is_enabled()).count()
    }

    /// Increment the current account's forward counter and stamp its
    /// last-used time.
    pub fn record_forward(&self) {
        if let Ok(account) = self.current() {
            account.forward_count.fetch_add(1, Ordering::Relaxed);
            *account.last_used_at.lock().expect("account lock poisoned") = Some(Utc::now());
        }
    }

    /// Zero the current account's forward counter.
    pub fn reset_counter(&self) {
        if let Ok(account) = self.current() {
            account.forward_count.store(0, Ordering::Relaxed);
        }
    }

    /// Mark an account unusable after an unrecoverable auth failure and drop
    /// it from rotation. Emptying the pool makes subsequent `current()` calls
    /// fail fatally.
    pub fn disable(&self, name: &str) {
        if let Some(account) = self.accounts.iter().find(|a| a.name == name) {
            account.disable();
            warn!(account = %name, remaining = self.enabled_count(), "Account disabled");
        }
    }

    /// True once the current account's counter reaches the threshold, and
    /// there is another enabled account to rotate to.
    pub fn should_rotate(&self, threshold: u32) -> bool {
        if self.enabled_count() < 2 {
            return false;
        }
        self.current()
            .map(|a| a.forward_count() >= threshold)
            .unwrap_or(false)
    }
}
