//! Error types for the mail subsystem.
//!
//! `ImapError` and `TransportError` are produced at the network seams;
//! `MailError` is what the service surfaces to its callers.

use std::fmt;

use thiserror::Error;

/// Failures of the minimal IMAP client.
#[derive(Debug, Error)]
pub enum ImapError {
    #[error("IMAP I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("IMAP connection closed unexpectedly")]
    ConnectionClosed,

    #[error("unexpected IMAP greeting: {0}")]
    Greeting(String),

    /// A tagged command completed with NO or BAD.
    #[error("IMAP {command} failed: {status}")]
    Command { command: String, status: String },
}

/// Coarse classification of a delivery failure, used for logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    Tls,
    Authentication,
    Protocol,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Network => "network",
            FailureKind::Tls => "tls",
            FailureKind::Authentication => "authentication",
            FailureKind::Protocol => "protocol",
        };
        f.write_str(s)
    }
}

/// A single failed transmission attempt.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a transport failure from its rendered message.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let kind = if lower.contains("auth") || lower.contains("535") || lower.contains("credentials")
        {
            FailureKind::Authentication
        } else if lower.contains("tls") || lower.contains("certificate") || lower.contains("handshake")
        {
            FailureKind::Tls
        } else if lower.contains("connection")
            || lower.contains("timed out")
            || lower.contains("dns")
            || lower.contains("resolve")
            || lower.contains("network")
        {
            FailureKind::Network
        } else {
            FailureKind::Protocol
        };
        Self { kind, message }
    }
}

/// One account's failure inside an aggregate fetch error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountFailure {
    pub account: String,
    pub error: String,
}

impl fmt::Display for AccountFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.account, self.error)
    }
}

fn join_failures(failures: &[AccountFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors surfaced by the email service.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid email ID format")]
    InvalidIdFormat,

    #[error("invalid message number")]
    InvalidMessageNumber,

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("failed to render template {name}: {reason}")]
    TemplateRender { name: String, reason: String },

    #[error("invalid email address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("sender account {0:?} is not configured")]
    MissingSenderAccount(String),

    #[error("timeout fetching account {account}")]
    Timeout { account: String },

    #[error("account {account}: {source}")]
    Imap {
        account: String,
        #[source]
        source: ImapError,
    },

    #[error("all accounts failed: {}", join_failures(.0))]
    AllAccountsFailed(Vec<AccountFailure>),

    #[error("failed to send email after {attempts} attempts: {last}")]
    DeliveryFailed {
        attempts: u32,
        #[source]
        last: TransportError,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl MailError {
    /// Whether the error was caused by the caller's input rather than
    /// the mail infrastructure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            MailError::InvalidIdFormat
                | MailError::InvalidMessageNumber
                | MailError::UnknownAccount(_)
                | MailError::InvalidAddress { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MailError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors() {
        assert!(MailError::InvalidIdFormat.is_client_error());
        assert!(MailError::UnknownAccount("x".into()).is_client_error());
        assert!(!MailError::Timeout { account: "info".into() }.is_client_error());
        assert!(!MailError::TemplateNotFound("a.html".into()).is_client_error());
    }

    #[test]
    fn test_all_accounts_failed_names_each_account() {
        let err = MailError::AllAccountsFailed(vec![
            AccountFailure {
                account: "info".into(),
                error: "connection refused".into(),
            },
            AccountFailure {
                account: "noreply".into(),
                error: "timeout".into(),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("all accounts failed"));
        assert!(msg.contains("info: connection refused"));
        assert!(msg.contains("noreply: timeout"));
    }

    #[test]
    fn test_delivery_failed_mentions_attempts() {
        let err = MailError::DeliveryFailed {
            attempts: 3,
            last: TransportError::new(FailureKind::Network, "refused"),
        };
        assert!(err.to_string().contains("after 3 attempts"));
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            TransportError::classify("535 5.7.8 Authentication failed").kind,
            FailureKind::Authentication
        );
        assert_eq!(
            TransportError::classify("invalid peer certificate").kind,
            FailureKind::Tls
        );
        assert_eq!(
            TransportError::classify("Connection refused (os error 111)").kind,
            FailureKind::Network
        );
        assert_eq!(
            TransportError::classify("554 message rejected").kind,
            FailureKind::Protocol
        );
    }
}
