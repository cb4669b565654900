//! DKL Core: configuration, domain types, and shared helpers.
//!
//! This crate provides:
//! - **config**: typed settings loaded from JSON + environment variables
//! - **types**: `EmailMessage`, `EmailAttachment`, `FetchOptions`, form payloads
//! - **utils**: path resolution and string helpers

pub mod config;
pub mod types;
pub mod utils;

pub use config::Config;
pub use types::{
    ContactForm, EmailAttachment, EmailMessage, EmailTarget, FetchOptions, MailboxStats,
    OutboundEmail, RegistrationForm,
};
