//! Fetch orchestrator: concurrent multi-account retrieval with a
//! per-account cache in front.
//!
//! When every account's cache is fresh the cached lists are served as is.
//! Otherwise all accounts are refetched, one task each, under a single
//! deadline. One account failing does not fail the call; all of them
//! failing does.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use dkl_core::config::AccountConfig;
use dkl_core::types::{EmailMessage, FetchOptions};

use crate::base::MailboxSource;
use crate::cache::MailCache;
use crate::error::{AccountFailure, MailError, Result};

/// Outcome of one account within a fetch cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum AccountStatus {
    /// Served from the cache, no server contact.
    Cached,
    Fetched { count: usize },
    Failed { error: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AccountReport {
    pub account: String,
    #[serde(flatten)]
    pub status: AccountStatus,
}

/// Messages plus the per-account outcome of the cycle that produced them.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FetchReport {
    pub emails: Vec<EmailMessage>,
    /// In configuration order.
    pub accounts: Vec<AccountReport>,
}

impl FetchReport {
    pub fn failed_accounts(&self) -> impl Iterator<Item = &AccountReport> {
        self.accounts
            .iter()
            .filter(|r| matches!(r.status, AccountStatus::Failed { .. }))
    }
}

pub struct Fetcher {
    accounts: Vec<AccountConfig>,
    source: Arc<dyn MailboxSource>,
    cache: Arc<MailCache>,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(
        accounts: Vec<AccountConfig>,
        source: Arc<dyn MailboxSource>,
        cache: Arc<MailCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            accounts,
            source,
            cache,
            timeout,
        }
    }

    pub fn cache(&self) -> &MailCache {
        &self.cache
    }

    /// Fetch from every account and apply the read filter, offset and
    /// limit to the merged list.
    pub async fn fetch_all(&self, options: FetchOptions) -> Result<Vec<EmailMessage>> {
        self.fetch_all_detailed(options).await.map(|report| report.emails)
    }

    /// Like [`fetch_all`](Self::fetch_all), also reporting what happened
    /// to each account.
    pub async fn fetch_all_detailed(&self, options: FetchOptions) -> Result<FetchReport> {
        let names: Vec<String> = self.accounts.iter().map(|a| a.name.clone()).collect();

        if self.cache.enabled() && self.cache.all_fresh().await {
            let emails = self.cache.collect(&names).await;
            debug!(count = emails.len(), "serving fetch from cache");
            return Ok(FetchReport {
                emails: filter_emails(emails, options),
                accounts: names
                    .into_iter()
                    .map(|account| AccountReport {
                        account,
                        status: AccountStatus::Cached,
                    })
                    .collect(),
            });
        }

        let (emails, statuses) = self.fetch_accounts(options).await;

        let failures: Vec<AccountFailure> = statuses
            .iter()
            .filter_map(|(account, status)| match status {
                AccountStatus::Failed { error } => Some(AccountFailure {
                    account: account.clone(),
                    error: error.clone(),
                }),
                _ => None,
            })
            .collect();
        if !self.accounts.is_empty() && failures.len() == self.accounts.len() {
            let failures = ordered(&names, failures, |f| &f.account);
            error!(accounts = failures.len(), "all accounts failed to fetch");
            return Err(MailError::AllAccountsFailed(failures));
        }
        if !failures.is_empty() {
            warn!(failed = failures.len(), total = self.accounts.len(), "some accounts failed to fetch");
        }

        let accounts = names
            .iter()
            .filter_map(|name| {
                statuses.get(name).map(|status| AccountReport {
                    account: name.clone(),
                    status: status.clone(),
                })
            })
            .collect();

        Ok(FetchReport {
            emails: filter_emails(emails, options),
            accounts,
        })
    }

    /// Run one task per account against a shared deadline. Messages are
    /// merged in completion order.
    async fn fetch_accounts(
        &self,
        options: FetchOptions,
    ) -> (Vec<EmailMessage>, HashMap<String, AccountStatus>) {
        let deadline = Instant::now() + self.timeout;
        let merged = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = JoinSet::new();
        let mut task_accounts = HashMap::new();

        info!(accounts = self.accounts.len(), timeout_secs = self.timeout.as_secs(), "fetching all accounts");

        for account in &self.accounts {
            let account = account.clone();
            let name = account.name.clone();
            let source = Arc::clone(&self.source);
            let cache = Arc::clone(&self.cache);
            let merged = Arc::clone(&merged);

            let handle = tasks.spawn(async move {
                let fetched = tokio::time::timeout_at(deadline, source.fetch(&account, options))
                    .await
                    .unwrap_or_else(|_| {
                        Err(MailError::Timeout {
                            account: account.name.clone(),
                        })
                    })?;

                let count = fetched.len();
                if cache.enabled() {
                    if let Some(entry) = cache.account(&account.name) {
                        entry.replace(fetched.clone()).await;
                    }
                }
                merged.lock().await.extend(fetched);
                debug!(account = %account.name, count, "account fetched");
                Ok::<usize, MailError>(count)
            });
            task_accounts.insert(handle.id(), name);
        }

        let mut statuses = HashMap::new();
        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, status) = match joined {
                Ok((id, Ok(count))) => (id, AccountStatus::Fetched { count }),
                Ok((id, Err(e))) => (id, AccountStatus::Failed { error: e.to_string() }),
                Err(e) => (e.id(), AccountStatus::Failed { error: format!("fetch task failed: {e}") }),
            };
            let account = task_accounts.remove(&id).unwrap_or_default();
            if let AccountStatus::Failed { error } = &status {
                warn!(account = %account, error = %error, "account fetch failed");
            }
            statuses.insert(account, status);
        }

        let emails = std::mem::take(&mut *merged.lock().await);
        (emails, statuses)
    }

    /// Flag a message as read on its server and in the cache.
    ///
    /// `id` is `"<account>:<sequence>"`. Format and account errors are
    /// reported before any server contact.
    pub async fn mark_as_read(&self, id: &str) -> Result<()> {
        let (account_name, sequence) = parse_message_id(id)?;
        let account = self
            .accounts
            .iter()
            .find(|a| a.name == account_name)
            .ok_or_else(|| MailError::UnknownAccount(account_name.to_string()))?;

        self.source.mark_seen(account, sequence).await?;
        if let Some(cache) = self.cache.account(account_name) {
            cache.mark_read(id).await;
        }
        info!(id, "message marked as read");
        Ok(())
    }
}

/// Split an `"<account>:<sequence>"` identifier.
pub fn parse_message_id(id: &str) -> Result<(&str, u32)> {
    let mut parts = id.split(':');
    let (Some(account), Some(sequence), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(MailError::InvalidIdFormat);
    };
    match sequence.parse::<u32>() {
        Ok(n) if n > 0 => Ok((account, n)),
        _ => Err(MailError::InvalidMessageNumber),
    }
}

/// Read filter first, then offset, then limit (0 = no limit).
pub fn filter_emails(emails: Vec<EmailMessage>, options: FetchOptions) -> Vec<EmailMessage> {
    let filtered = emails
        .into_iter()
        .filter(|e| options.read.map_or(true, |read| e.read == read))
        .skip(options.offset);
    if options.limit > 0 {
        filtered.take(options.limit).collect()
    } else {
        filtered.collect()
    }
}

fn ordered<T>(names: &[String], mut items: Vec<T>, key: impl Fn(&T) -> &String) -> Vec<T> {
    items.sort_by_key(|item| names.iter().position(|n| n == key(item)).unwrap_or(usize::MAX));
    items
}


