//! Core types for the mail backend: decoded mailbox items, fetch options,
//! and the form payloads that drive outbound notifications.
//!
//! JSON field names follow the public API (`snake_case`), so handlers can
//! serialize these types directly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Inbound mail
// ─────────────────────────────────────────────

/// One decoded mailbox item.
///
/// `id` is `"<account>:<sequence>"` and is unique across all accounts for
/// the lifetime of a cache entry. `read` mirrors the `\Seen` flag as of the
/// last fetch or mark-as-read, not the server's live state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: String,
    pub sender: String,
    pub subject: String,
    /// Plain-text body (normalized, possibly a reformatted field listing).
    pub body: String,
    /// HTML body, empty when the message had no HTML part.
    pub html: String,
    pub account: String,
    pub message_id: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
    pub read: bool,
    pub metadata: HashMap<String, String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub reply_to: Vec<String>,
    pub in_reply_to: String,
    pub references: Vec<String>,
    pub attachments: Vec<EmailAttachment>,
    pub headers: HashMap<String, String>,
}

impl EmailMessage {
    /// Build the account-qualified identifier.
    pub fn make_id(account: &str, sequence: u32) -> String {
        format!("{account}:{sequence}")
    }

    /// Attachments that are referenced inline from the HTML body.
    pub fn inline_images(&self) -> impl Iterator<Item = &EmailAttachment> {
        self.attachments.iter().filter(|a| a.is_inline())
    }
}

/// An attachment or inline image. Owned by exactly one `EmailMessage`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    /// Non-empty for resources embedded via `cid:` references.
    pub content_id: String,
}

impl EmailAttachment {
    pub fn is_inline(&self) -> bool {
        !self.content_id.is_empty()
    }
}

/// Raw attachment bytes travel as base64 in JSON.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Paging and filtering for a fetch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOptions {
    /// Maximum number of messages; 0 means no limit.
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    /// Exact-match filter on the read flag.
    #[serde(default)]
    pub read: Option<bool>,
}

impl FetchOptions {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit,
            offset,
            read: None,
        }
    }

    pub fn with_read(mut self, read: bool) -> Self {
        self.read = Some(read);
        self
    }
}

/// Counters returned by the stats operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxStats {
    pub total: usize,
    pub unread: usize,
}

// ─────────────────────────────────────────────
// Form payloads (outbound)
// ─────────────────────────────────────────────

/// A contact-form submission.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactForm {
    pub naam: String,
    pub email: String,
    pub bericht: String,
    #[serde(default)]
    pub privacy_akkoord: bool,
}

/// A volunteer registration ("aanmelding") submission.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationForm {
    pub naam: String,
    pub email: String,
    pub telefoon: String,
    pub rol: String,
    pub afstand: String,
    #[serde(default)]
    pub ondersteuning: String,
    #[serde(default)]
    pub bijzonderheden: String,
    #[serde(default)]
    pub terms: bool,
}

/// Who an outbound email is addressed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmailTarget {
    /// The admin notification address.
    Admin { address: String },
    /// The person who submitted the form; the address comes from the payload.
    Submitter,
}

/// An outbound notification: a target plus the form that triggered it.
/// Built per send and never stored.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundEmail<T> {
    pub target: EmailTarget,
    pub payload: T,
}

impl<T> OutboundEmail<T> {
    pub fn to_admin(address: impl Into<String>, payload: T) -> Self {
        Self {
            target: EmailTarget::Admin {
                address: address.into(),
            },
            payload,
        }
    }

    pub fn to_submitter(payload: T) -> Self {
        Self {
            target: EmailTarget::Submitter,
            payload,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.target, EmailTarget::Admin { .. })
    }
}


