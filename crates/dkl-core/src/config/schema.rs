//! Configuration schema: typed settings for the mail backend.
//!
//! Hierarchy: `Config` → `EmailConfig` → `AccountConfig`, `CacheConfig`,
//! `DeliveryConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! We use `#[serde(rename_all = "camelCase")]` to handle the conversion.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration: loaded from `~/.dkl/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub email: EmailConfig,
}

// ─────────────────────────────────────────────
// Email
// ─────────────────────────────────────────────

/// Default IMAP host for every built-in account.
pub const DEFAULT_IMAP_HOST: &str = "imap.hostnet.nl";
/// Default IMAP port (implicit TLS).
pub const DEFAULT_IMAP_PORT: u16 = 993;
/// Default SMTP host.
pub const DEFAULT_SMTP_HOST: &str = "smtp.hostnet.nl";
/// Default SMTP port (STARTTLS).
pub const DEFAULT_SMTP_PORT: u16 = 587;
/// SMTP port that implies implicit TLS.
pub const IMPLICIT_TLS_PORT: u16 = 465;

/// Email subsystem configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailConfig {
    /// Mailboxes the service fetches from and sends through, in a stable order.
    pub accounts: Vec<AccountConfig>,
    /// Account whose address is the fixed From header for outbound mail.
    pub sender_account: String,
    /// Recipient of admin notifications.
    pub admin_email: String,
    pub cache: CacheConfig,
    /// Shared deadline for one fetch cycle, in seconds.
    pub fetch_timeout_secs: u64,
    /// Development mode: only allow-listed domains receive real mail.
    pub dev_mode: bool,
    /// Domain suffixes that still get real delivery in development mode.
    pub dev_allowed_domains: Vec<String>,
    /// Address suffixes that are always simulated outside development mode.
    pub test_domains: Vec<String>,
    /// Accept server certificates without chain validation (IMAP and SMTP).
    pub accept_invalid_certs: bool,
    /// Directory holding the HTML templates.
    pub templates_dir: String,
    pub delivery: DeliveryConfig,
}

impl EmailConfig {
    /// Look up an account by name.
    pub fn account(&self, name: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.name == name)
    }

    /// Names of all configured accounts, in configuration order.
    pub fn account_names(&self) -> Vec<String> {
        self.accounts.iter().map(|a| a.name.clone()).collect()
    }

    /// The fetch-cycle deadline as a `Duration`.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            accounts: default_accounts(),
            sender_account: "info".to_string(),
            admin_email: String::new(),
            cache: CacheConfig::default(),
            fetch_timeout_secs: 120,
            dev_mode: false,
            dev_allowed_domains: vec![
                "dekoninklijkeloop.nl".to_string(),
                "localhost".to_string(),
                "127.0.0.1".to_string(),
            ],
            test_domains: vec![
                "@example.com".to_string(),
                "@test.com".to_string(),
                "@example.org".to_string(),
            ],
            accept_invalid_certs: true,
            templates_dir: "templates".to_string(),
            delivery: DeliveryConfig::default(),
        }
    }
}

/// The three built-in mailboxes. Passwords come from the environment.
fn default_accounts() -> Vec<AccountConfig> {
    vec![
        AccountConfig::new("info", ""),
        AccountConfig::new("inschrijving", "inschrijving@dekoninklijkeloop.nl"),
        AccountConfig::new("noreply", "noreply@dekoninklijkeloop.nl"),
    ]
}

/// One mailbox: IMAP/SMTP endpoints plus credentials.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountConfig {
    /// Short account name, used as the prefix of message identifiers.
    pub name: String,
    /// Login and From address.
    pub address: String,
    pub password: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
}

impl AccountConfig {
    /// Create an account with the default hosts and ports.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            password: String::new(),
            imap_host: DEFAULT_IMAP_HOST.to_string(),
            imap_port: DEFAULT_IMAP_PORT,
            smtp_host: DEFAULT_SMTP_HOST.to_string(),
            smtp_port: DEFAULT_SMTP_PORT,
        }
    }

    /// Whether the SMTP port implies implicit TLS rather than STARTTLS.
    pub fn smtp_implicit_tls(&self) -> bool {
        self.smtp_port == IMPLICIT_TLS_PORT
    }
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

/// Per-account fetch cache policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// How long a fetched list stays valid, in seconds.
    pub duration_secs: u64,
    /// Upper bound on cached messages per account (newest kept).
    pub max_entries: usize,
}

impl CacheConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_secs: 300,
            max_entries: 1000,
        }
    }
}

/// Retry/backoff policy for outbound delivery.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliveryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Linear backoff step: attempt `i` (0-based) waits `(i + 1) * step`.
    pub backoff_step_secs: u64,
    /// Cap on a single backoff wait.
    pub max_backoff_secs: u64,
}

impl DeliveryConfig {
    /// Wait before the attempt following the (0-based) failed attempt `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = (u64::from(attempt) + 1) * self.backoff_step_secs;
        Duration::from_secs(secs.min(self.max_backoff_secs))
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step_secs: 2,
            max_backoff_secs: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_accounts() {
        let cfg = EmailConfig::default();
        assert_eq!(cfg.account_names(), vec!["info", "inschrijving", "noreply"]);
        let acc = cfg.account("noreply").unwrap();
        assert_eq!(acc.imap_host, "imap.hostnet.nl");
        assert_eq!(acc.imap_port, 993);
        assert_eq!(acc.smtp_port, 587);
    }

    #[test]
    fn test_unknown_account() {
        assert!(EmailConfig::default().account("marketing").is_none());
    }

    #[test]
    fn test_backoff_linear_with_cap() {
        let d = DeliveryConfig::default();
        assert_eq!(d.backoff(0), Duration::from_secs(2));
        assert_eq!(d.backoff(1), Duration::from_secs(4));
        assert_eq!(d.backoff(2), Duration::from_secs(5));
        assert_eq!(d.backoff(10), Duration::from_secs(5));
    }

    #[test]
    fn test_implicit_tls_port() {
        let mut acc = AccountConfig::new("info", "info@dekoninklijkeloop.nl");
        assert!(!acc.smtp_implicit_tls());
        acc.smtp_port = 465;
        assert!(acc.smtp_implicit_tls());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: Config = serde_json::from_str(r#"{"email": {"devMode": true}}"#).unwrap();
        assert!(cfg.email.dev_mode);
        assert_eq!(cfg.email.fetch_timeout_secs, 120);
        assert_eq!(cfg.email.cache.max_entries, 1000);
        assert_eq!(cfg.email.accounts.len(), 3);
    }

    #[test]
    fn test_account_json_camel_case() {
        let acc: AccountConfig =
            serde_json::from_str(r#"{"name": "info", "imapHost": "imap.local", "smtpPort": 465}"#)
                .unwrap();
        assert_eq!(acc.imap_host, "imap.local");
        assert_eq!(acc.imap_port, 993);
        assert!(acc.smtp_implicit_tls());
    }
}
