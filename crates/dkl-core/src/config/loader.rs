//! Config loader: reads `~/.dkl/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.dkl/config.json` (or an explicit path)
//! 3. Environment variables (override JSON)

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info, warn};

use super::schema::{Config, IMPLICIT_TLS_PORT};

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    let config = apply_env_overrides(load_config_from_path(&config_path));
    log_smtp_mode(&config);
    config
}

/// Load config from a specific file path, without env overrides.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return Config::default();
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return Config::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config JSON: {}", e);
            Config::default()
        }
    }
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply environment variable overrides from the process environment.
pub fn apply_env_overrides(config: Config) -> Config {
    apply_overrides_from(config, |key| std::env::var(key).ok())
}

/// Apply overrides using an arbitrary variable lookup.
///
/// Supported variables:
/// - `SMTP_HOST`, `SMTP_PORT` → every account's SMTP endpoint
/// - `IMAP_HOST`, `IMAP_PORT` → every account's IMAP endpoint
/// - `SMTP_USER`, `SMTP_PASSWORD` → the `info` account
/// - `INSCHRIJVING_EMAIL_PASSWORD` → the `inschrijving` account
/// - `NOREPLY_EMAIL_PASSWORD` → the `noreply` account
/// - `ADMIN_EMAIL`, `DEV_MODE`
/// - `EMAIL_CACHE_ENABLED`, `EMAIL_CACHE_DURATION_SECS`, `EMAIL_CACHE_MAX_ENTRIES`
/// - `EMAIL_FETCH_TIMEOUT_SECS`, `EMAIL_ACCEPT_INVALID_CERTS`, `EMAIL_TEMPLATES_DIR`
pub fn apply_overrides_from<F>(mut config: Config, lookup: F) -> Config
where
    F: Fn(&str) -> Option<String>,
{
    let email = &mut config.email;

    if let Some(host) = lookup("SMTP_HOST").filter(|v| !v.is_empty()) {
        for account in &mut email.accounts {
            account.smtp_host = host.clone();
        }
    }
    if let Some(port) = parse_var::<u16, _>(&lookup, "SMTP_PORT") {
        for account in &mut email.accounts {
            account.smtp_port = port;
        }
    }
    if let Some(host) = lookup("IMAP_HOST").filter(|v| !v.is_empty()) {
        for account in &mut email.accounts {
            account.imap_host = host.clone();
        }
    }
    if let Some(port) = parse_var::<u16, _>(&lookup, "IMAP_PORT") {
        for account in &mut email.accounts {
            account.imap_port = port;
        }
    }

    // Per-account credentials
    for account in &mut email.accounts {
        match account.name.as_str() {
            "info" => {
                if let Some(user) = lookup("SMTP_USER") {
                    account.address = user;
                }
                if let Some(pass) = lookup("SMTP_PASSWORD") {
                    account.password = pass;
                }
            }
            "inschrijving" => {
                if let Some(pass) = lookup("INSCHRIJVING_EMAIL_PASSWORD") {
                    account.password = pass;
                }
            }
            "noreply" => {
                if let Some(pass) = lookup("NOREPLY_EMAIL_PASSWORD") {
                    account.password = pass;
                }
            }
            _ => {}
        }
    }

    if let Some(admin) = lookup("ADMIN_EMAIL") {
        email.admin_email = admin;
    }
    if let Some(val) = lookup("DEV_MODE") {
        email.dev_mode = is_truthy(&val);
        if email.dev_mode {
            info!("Running in DEVELOPMENT mode - emails to external domains will be simulated");
        }
    }

    // Cache
    if let Some(val) = lookup("EMAIL_CACHE_ENABLED") {
        email.cache.enabled = is_truthy(&val);
    }
    if let Some(secs) = parse_var(&lookup, "EMAIL_CACHE_DURATION_SECS") {
        email.cache.duration_secs = secs;
    }
    if let Some(max) = parse_var(&lookup, "EMAIL_CACHE_MAX_ENTRIES") {
        email.cache.max_entries = max;
    }

    if let Some(secs) = parse_var(&lookup, "EMAIL_FETCH_TIMEOUT_SECS") {
        email.fetch_timeout_secs = secs;
    }
    if let Some(val) = lookup("EMAIL_ACCEPT_INVALID_CERTS") {
        email.accept_invalid_certs = is_truthy(&val);
    }
    if let Some(dir) = lookup("EMAIL_TEMPLATES_DIR").filter(|v| !v.is_empty()) {
        email.templates_dir = dir;
    }

    config
}

/// Parse a numeric variable, warning and ignoring it when malformed.
fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = key, value = %raw, "ignoring unparseable environment variable");
            None
        }
    }
}

fn is_truthy(val: &str) -> bool {
    val == "true" || val == "1"
}

/// Log which SMTP TLS mode each distinct port implies.
fn log_smtp_mode(config: &Config) {
    let Some(sender) = config.email.account(&config.email.sender_account) else {
        warn!(account = %config.email.sender_account, "sender account not configured");
        return;
    };
    info!(host = %sender.smtp_host, port = sender.smtp_port, "using SMTP configuration");
    match sender.smtp_port {
        IMPLICIT_TLS_PORT => info!("using implicit SSL/TLS for SMTP"),
        587 => info!("using STARTTLS for SMTP"),
        port => warn!(port, "unusual SMTP port, please verify configuration"),
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────


