//! `dkl-mail status`: show the resolved configuration, secrets masked.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use dkl_core::config::{get_config_path, AccountConfig, Config};
use dkl_core::utils::{expand_home, mask_secret};
use dkl_mail::templates::TEMPLATE_NAMES;

/// Run the status command.
pub fn run(config: &Config, explicit_path: Option<&Path>) -> Result<()> {
    let email = &config.email;
    let config_path = explicit_path
        .map(Path::to_path_buf)
        .unwrap_or_else(get_config_path);

    println!();
    println!("{}", "DKL Mail Status".cyan().bold());
    println!();

    println!(
        "  {:<18} {} {}",
        "Config:".bold(),
        config_path.display(),
        found_marker(config_path.exists())
    );
    println!("  {:<18} {}", "Sender account:".bold(), email.sender_account);
    println!(
        "  {:<18} {}",
        "Admin email:".bold(),
        if email.admin_email.is_empty() {
            "(not set)".red().to_string()
        } else {
            email.admin_email.clone()
        }
    );
    println!(
        "  {:<18} {}",
        "Mode:".bold(),
        if email.dev_mode {
            format!("development (sends only to {})", email.dev_allowed_domains.join(", "))
                .yellow()
                .to_string()
        } else {
            "production".green().to_string()
        }
    );
    println!(
        "  {:<18} {}",
        "Cache:".bold(),
        if email.cache.enabled {
            format!(
                "{}s validity, max {} per account",
                email.cache.duration_secs, email.cache.max_entries
            )
        } else {
            "disabled".dimmed().to_string()
        }
    );
    println!("  {:<18} {}s", "Fetch timeout:".bold(), email.fetch_timeout_secs);
    println!(
        "  {:<18} {}",
        "Certificates:".bold(),
        if email.accept_invalid_certs {
            "not validated".yellow().to_string()
        } else {
            "validated".green().to_string()
        }
    );

    // Accounts
    println!();
    println!("  {}", "Accounts:".bold());
    for account in &email.accounts {
        println!("    {}", account_line(account));
    }

    // Templates
    println!();
    let templates_dir = expand_home(&email.templates_dir);
    println!("  {} {}", "Templates:".bold(), templates_dir.display().to_string().dimmed());
    for name in TEMPLATE_NAMES {
        println!("    {:<30} {}", name, found_marker(templates_dir.join(name).exists()));
    }

    println!();
    Ok(())
}

fn found_marker(exists: bool) -> String {
    if exists {
        "✓".green().to_string()
    } else {
        "(not found)".red().to_string()
    }
}

fn account_line(account: &AccountConfig) -> String {
    let tls = if account.smtp_implicit_tls() { "SSL" } else { "STARTTLS" };
    format!(
        "{:<14} {:<36} imap {}:{}  smtp {}:{} ({})  password {}",
        account.name,
        if account.address.is_empty() { "(no address)" } else { account.address.as_str() },
        account.imap_host,
        account.imap_port,
        account.smtp_host,
        account.smtp_port,
        tls,
        mask_secret(&account.password),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_line_masks_password() {
        let mut account = AccountConfig::new("info", "info@dekoninklijkeloop.nl");
        account.password = "supersecret42".into();
        let line = account_line(&account);
        assert!(!line.contains("supersecret42"));
        assert!(line.contains("42"));
        assert!(line.contains("STARTTLS"));
    }

    #[test]
    fn account_line_without_address() {
        let line = account_line(&AccountConfig::new("info", ""));
        assert!(line.contains("(no address)"));
        assert!(line.contains("(not set)"));
    }
}
