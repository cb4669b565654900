//! Network seams: the traits the fetcher and the delivery engine talk to.
//!
//! - `MailboxSource` reads messages from one account's mailbox and flags
//!   them as seen (production: `ImapMailboxSource`).
//! - `MailTransport` hands one rendered message to a mail server
//!   (production: `SmtpTransport`).
//!
//! Both are held as `Arc<dyn ...>` so tests can substitute in-memory fakes.

use async_trait::async_trait;

use dkl_core::config::AccountConfig;
use dkl_core::types::{EmailMessage, FetchOptions};

use crate::error::{Result, TransportError};

/// Reads one account's mailbox.
#[async_trait]
pub trait MailboxSource: Send + Sync {
    /// Fetch the range of messages selected by `options.limit` and
    /// `options.offset`, newest last.
    async fn fetch(&self, account: &AccountConfig, options: FetchOptions) -> Result<Vec<EmailMessage>>;

    /// Set the `\Seen` flag on one message by sequence number.
    async fn mark_seen(&self, account: &AccountConfig, sequence: u32) -> Result<()>;
}

/// A fully rendered outbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Transmits one message; called once per delivery attempt.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> std::result::Result<(), TransportError>;
}
