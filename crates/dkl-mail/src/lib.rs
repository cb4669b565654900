//! DKL Mail: multi-account IMAP retrieval and templated SMTP delivery.
//!
//! This crate provides:
//! - **charset**, **html**, **forms**, **parser**: turning raw RFC 822 bytes
//!   into a normalized `EmailMessage`
//! - **imap**, **tls**: a minimal IMAP client over rustls
//! - **cache**, **fetcher**: concurrent fetching with per-account caches
//! - **templates**, **sender**: rendering and delivering notifications
//! - **service**: `EmailService`, the facade used by the HTTP layer

pub mod base;
pub mod cache;
pub mod charset;
pub mod error;
pub mod fetcher;
pub mod forms;
pub mod html;
pub mod imap;
pub mod parser;
pub mod sender;
pub mod service;
pub mod templates;
pub mod tls;

pub use base::{MailTransport, MailboxSource};
pub use error::{MailError, Result};
pub use fetcher::{AccountStatus, FetchReport};
pub use service::EmailService;
