//! DKL mail CLI: entry point.
//!
//! # Commands
//!
//! - `dkl-mail fetch [--limit N] [--offset N] [--read BOOL] [--detailed]`: fetch all inboxes as JSON
//! - `dkl-mail stats`: total and unread counts
//! - `dkl-mail mark-read <account:seq>`: set the `\Seen` flag
//! - `dkl-mail send-contact ...` / `send-registration ...`: send a notification
//! - `dkl-mail normalize-html <file|->`: run the HTML normalizer and field extractor
//! - `dkl-mail status`: show the resolved configuration
//! - `dkl-mail init [--force]`: write a default config file

mod helpers;
mod status;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use dkl_core::config::{get_config_path, load_config, save_config, Config};
use dkl_core::types::{ContactForm, FetchOptions, RegistrationForm};
use dkl_mail::{forms, html, EmailService};

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// DKL mail backend: fetch, inspect and send email from the terminal
#[derive(Parser)]
#[command(name = "dkl-mail", version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.dkl/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true, default_value_t = false)]
    logs: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch messages from every configured account
    Fetch {
        /// Maximum number of messages (0 = all)
        #[arg(short, long, default_value_t = 0)]
        limit: usize,

        /// Skip the newest N messages
        #[arg(short, long, default_value_t = 0)]
        offset: usize,

        /// Only messages with this read status
        #[arg(long)]
        read: Option<bool>,

        /// Include the per-account outcome
        #[arg(long, default_value_t = false)]
        detailed: bool,
    },

    /// Show total and unread message counts
    Stats,

    /// Mark a message as read ("account:sequence")
    MarkRead { id: String },

    /// Send a contact-form notification
    SendContact {
        #[arg(long)]
        naam: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        bericht: String,
        #[arg(long, default_value_t = false)]
        privacy_akkoord: bool,
        /// Send to the admin address instead of the submitter
        #[arg(long, default_value_t = false)]
        to_admin: bool,
    },

    /// Send a registration notification
    SendRegistration {
        #[arg(long)]
        naam: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        telefoon: String,
        #[arg(long)]
        rol: String,
        #[arg(long)]
        afstand: String,
        #[arg(long, default_value = "")]
        ondersteuning: String,
        #[arg(long, default_value = "")]
        bijzonderheden: String,
        #[arg(long, default_value_t = false)]
        terms: bool,
        /// Send to the admin address instead of the submitter
        #[arg(long, default_value_t = false)]
        to_admin: bool,
    },

    /// Convert an HTML body to text and list its form fields
    NormalizeHtml {
        /// HTML file, or "-" for stdin
        input: String,
    },

    /// Show the resolved configuration
    Status,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.logs, cli.json_logs);

    if let Err(e) = run(cli).await {
        eprintln!("{} {e:#}", "error:".red().bold());
        std::process::exit(helpers::exit_code(&e));
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref());

    match cli.command {
        Commands::Fetch {
            limit,
            offset,
            read,
            detailed,
        } => {
            let mut options = FetchOptions::new(limit, offset);
            if let Some(read) = read {
                options = options.with_read(read);
            }
            let service = build_service(&config)?;
            if detailed {
                let report = service.fetch_all_detailed(options).await?;
                helpers::print_json(&report)
            } else {
                let emails = service.fetch_all(options).await?;
                helpers::print_json(&emails)
            }
        }
        Commands::Stats => {
            let stats = build_service(&config)?.stats().await?;
            helpers::print_json(&stats)
        }
        Commands::MarkRead { id } => {
            build_service(&config)?.mark_as_read(&id).await?;
            helpers::print_success(&format!("marked {id} as read"));
            Ok(())
        }
        Commands::SendContact {
            naam,
            email,
            bericht,
            privacy_akkoord,
            to_admin,
        } => {
            let form = ContactForm {
                naam,
                email,
                bericht,
                privacy_akkoord,
            };
            build_service(&config)?
                .send_contact_email(form, to_admin)
                .await?;
            helpers::print_success("contact email sent");
            Ok(())
        }
        Commands::SendRegistration {
            naam,
            email,
            telefoon,
            rol,
            afstand,
            ondersteuning,
            bijzonderheden,
            terms,
            to_admin,
        } => {
            let form = RegistrationForm {
                naam,
                email,
                telefoon,
                rol,
                afstand,
                ondersteuning,
                bijzonderheden,
                terms,
            };
            build_service(&config)?
                .send_registration_email(form, to_admin)
                .await?;
            helpers::print_success("registration email sent");
            Ok(())
        }
        Commands::NormalizeHtml { input } => {
            let source = helpers::read_input(&input)?;
            let text = html::html_to_text(&source);
            println!("{text}");

            let fields = forms::extract_form_fields(&text);
            if !fields.is_empty() {
                println!();
                println!("{}", format!("Form fields ({}):", fields.len()).bold());
                println!("{}", forms::format_form_fields(&fields));
            }
            Ok(())
        }
        Commands::Status => status::run(&config, cli.config.as_deref()),
        Commands::Init { force } => {
            let path = cli.config.unwrap_or_else(get_config_path);
            if path.exists() && !force {
                println!("{} {} already exists (use --force to overwrite)", "·".dimmed(), path.display());
                return Ok(());
            }
            save_config(&Config::default(), Some(&path))
                .with_context(|| format!("failed to write {}", path.display()))?;
            helpers::print_success(&format!("wrote {}", path.display()));
            Ok(())
        }
    }
}

fn build_service(config: &Config) -> Result<EmailService> {
    let service = EmailService::new(&config.email).context("failed to initialize email service")?;
    info!("email service ready");
    Ok(service)
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("dkl=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}


