//! Per-account fetch cache.
//!
//! Each account has its own `AccountCache` behind a reader/writer lock, so
//! accounts never contend with each other. `MailCache` groups them and
//! carries the cache policy.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use dkl_core::config::CacheConfig;
use dkl_core::types::EmailMessage;

#[derive(Default)]
struct CacheEntry {
    emails: Vec<EmailMessage>,
    fetched_at: Option<Instant>,
}

/// A copy of one account's cached list.
#[derive(Clone, Debug, Default)]
pub struct CacheSnapshot {
    pub emails: Vec<EmailMessage>,
    /// Time since the last successful fetch, `None` if never fetched.
    pub age: Option<Duration>,
}

/// The most recently fetched list for one account.
pub struct AccountCache {
    entry: RwLock<CacheEntry>,
    max_entries: usize,
}

impl AccountCache {
    /// Create an empty cache holding at most `max_entries` messages
    /// (0 disables the cap).
    pub fn new(max_entries: usize) -> Self {
        Self {
            entry: RwLock::new(CacheEntry::default()),
            max_entries,
        }
    }

    pub async fn read(&self) -> CacheSnapshot {
        let entry = self.entry.read().await;
        CacheSnapshot {
            emails: entry.emails.clone(),
            age: entry.fetched_at.map(|t| t.elapsed()),
        }
    }

    /// Non-empty and fetched less than `validity` ago.
    pub async fn is_fresh(&self, validity: Duration) -> bool {
        let entry = self.entry.read().await;
        !entry.emails.is_empty() && entry.fetched_at.is_some_and(|t| t.elapsed() < validity)
    }

    /// Swap in a freshly fetched list and reset the fetch time.
    ///
    /// Lists longer than the cap keep their tail, which holds the
    /// highest sequence numbers.
    pub async fn replace(&self, mut emails: Vec<EmailMessage>) {
        if self.max_entries > 0 && emails.len() > self.max_entries {
            let excess = emails.len() - self.max_entries;
            debug!(dropped = excess, cap = self.max_entries, "cache cap reached, dropping oldest");
            emails.drain(..excess);
        }
        let mut entry = self.entry.write().await;
        entry.emails = emails;
        entry.fetched_at = Some(Instant::now());
    }

    /// Flag a cached message as read. Returns whether it was cached.
    pub async fn mark_read(&self, id: &str) -> bool {
        let mut entry = self.entry.write().await;
        match entry.emails.iter_mut().find(|e| e.id == id) {
            Some(email) => {
                email.read = true;
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.entry.read().await.emails.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// The caches of all configured accounts plus the cache policy.
pub struct MailCache {
    accounts: HashMap<String, AccountCache>,
    policy: CacheConfig,
}

impl MailCache {
    /// One empty cache per account name.
    pub fn new<I, S>(account_names: I, policy: CacheConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let accounts = account_names
            .into_iter()
            .map(|name| (name.into(), AccountCache::new(policy.max_entries)))
            .collect();
        Self { accounts, policy }
    }

    pub fn enabled(&self) -> bool {
        self.policy.enabled
    }

    pub fn validity(&self) -> Duration {
        self.policy.duration()
    }

    pub fn account(&self, name: &str) -> Option<&AccountCache> {
        self.accounts.get(name)
    }

    /// Whether every account's cache is non-empty and within validity.
    pub async fn all_fresh(&self) -> bool {
        if self.accounts.is_empty() {
            return false;
        }
        let validity = self.validity();
        for cache in self.accounts.values() {
            if !cache.is_fresh(validity).await {
                return false;
            }
        }
        true
    }

    /// Concatenate the cached lists of `names`, in that order.
    pub async fn collect(&self, names: &[String]) -> Vec<EmailMessage> {
        let mut emails = Vec::new();
        for name in names {
            if let Some(cache) = self.accounts.get(name) {
                emails.extend(cache.read().await.emails);
            }
        }
        emails
    }
}


