//! Message decomposition: one fetched IMAP message into an `EmailMessage`.
//!
//! Structured messages are walked part by part with `mailparse`: text parts
//! are charset-decoded into the plain/HTML bodies, everything flagged as an
//! attachment (or an inline image) is collected with its raw bytes.
//! Unparseable messages degrade to a best-effort text body instead of
//! failing the batch.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mailparse::{MailAddr, MailHeader, MailHeaderMap, ParsedMail};
use tracing::{debug, warn};

use dkl_core::types::{EmailAttachment, EmailMessage};
use dkl_core::utils::rfc3339_from_unix;

use crate::charset;
use crate::forms::{extract_form_fields, format_form_fields};
use crate::html::{html_to_text, normalize_text};

/// Mailbox every fetch reads from.
pub const MAILBOX: &str = "INBOX";

/// Filename used when neither header names the attachment.
pub const UNNAMED_ATTACHMENT: &str = "unnamed-attachment";

/// Headers copied into `EmailMessage::headers` when present and non-empty.
const HEADER_ALLOW_LIST: [&str; 19] = [
    "From",
    "To",
    "Cc",
    "Bcc",
    "Subject",
    "Date",
    "Message-ID",
    "In-Reply-To",
    "References",
    "Content-Type",
    "Content-Transfer-Encoding",
    "MIME-Version",
    "Received",
    "Return-Path",
    "Delivered-To",
    "Reply-To",
    "Sender",
    "Authentication-Results",
    "DKIM-Signature",
];

/// One message as returned by `FETCH (UID FLAGS INTERNALDATE BODY.PEEK[])`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawMessage {
    /// Mailbox sequence number.
    pub sequence: u32,
    pub uid: Option<u32>,
    pub flags: Vec<String>,
    /// `INTERNALDATE` as sent by the server, e.g. `17-Jul-1996 02:44:25 -0700`.
    pub internal_date: Option<String>,
    /// The full RFC 5322 message.
    pub body: Vec<u8>,
}

impl RawMessage {
    pub fn is_seen(&self) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case("\\Seen"))
    }

    /// `INTERNALDATE` as RFC 3339, if present and well-formed.
    fn internal_date_rfc3339(&self) -> Option<String> {
        let raw = self.internal_date.as_deref()?.trim();
        DateTime::parse_from_str(raw, "%d-%b-%Y %H:%M:%S %z")
            .ok()
            .map(|dt| dt.with_timezone(&Utc).to_rfc3339())
    }
}

// ─────────────────────────────────────────────
// Decomposition
// ─────────────────────────────────────────────

/// Text bodies and attachments collected while walking the MIME tree.
#[derive(Default)]
struct Parts {
    plain: Option<String>,
    html: Option<String>,
    /// Charset of the first text part found.
    charset: Option<String>,
    attachments: Vec<EmailAttachment>,
}

/// Turn a fetched message into an `EmailMessage` owned by `account`.
pub fn decompose(raw: RawMessage, account: &str) -> EmailMessage {
    match mailparse::parse_mail(&raw.body) {
        Ok(parsed) => decompose_parsed(&raw, &parsed, account),
        Err(e) => {
            warn!(account, seqnum = raw.sequence, error = %e, "unparseable message, recovering raw text");
            recover_unparsed(raw, account)
        }
    }
}

fn decompose_parsed(raw: &RawMessage, parsed: &ParsedMail, account: &str) -> EmailMessage {
    let headers = &parsed.headers;

    let mut parts = Parts::default();
    walk_parts(parsed, &mut parts);

    let mut metadata = base_metadata(raw);
    metadata.insert("content_type".into(), parsed.ctype.mimetype.clone());
    metadata.insert(
        "attachment_count".into(),
        parts.attachments.len().to_string(),
    );
    if let Some(charset) = &parts.charset {
        metadata.insert("charset".into(), charset.clone());
    }

    let mut body = match (&parts.plain, &parts.html) {
        (Some(plain), _) => normalize_text(plain),
        (None, Some(html)) => html_to_text(html),
        (None, None) => String::new(),
    };

    let fields = extract_form_fields(&body);
    if !fields.is_empty() {
        body = format_form_fields(&fields);
        metadata.insert("form_fields".into(), fields.len().to_string());
    }

    let mut message = EmailMessage {
        id: EmailMessage::make_id(account, raw.sequence),
        sender: addresses(headers, "From")
            .into_iter()
            .next()
            .unwrap_or_default()
            .to_lowercase(),
        subject: header_value(headers, "Subject").unwrap_or_default(),
        body,
        html: parts.html.unwrap_or_default(),
        account: account.to_string(),
        message_id: header_value(headers, "Message-ID").unwrap_or_default(),
        created_at: resolve_date(raw, header_value(headers, "Date").as_deref()),
        read: raw.is_seen(),
        metadata,
        to: addresses(headers, "To"),
        cc: addresses(headers, "Cc"),
        bcc: addresses(headers, "Bcc"),
        reply_to: addresses(headers, "Reply-To"),
        in_reply_to: header_value(headers, "In-Reply-To").unwrap_or_default(),
        references: header_value(headers, "References")
            .map(|r| r.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
        attachments: parts.attachments,
        headers: header_map(headers),
    };

    let inline = message.inline_images().count();
    if inline > 0 {
        message.metadata.insert("inline_image_count".into(), inline.to_string());
    }
    if !message.attachments.is_empty() {
        debug!(
            account,
            seqnum = raw.sequence,
            count = message.attachments.len(),
            inline,
            "found attachments"
        );
    }
    message
}

/// Best-effort message for bytes `mailparse` could not structure.
fn recover_unparsed(raw: RawMessage, account: &str) -> EmailMessage {
    let mut metadata = base_metadata(&raw);
    let created_at = resolve_date(&raw, None);
    let read = raw.is_seen();

    let body = match String::from_utf8(raw.body) {
        Ok(text) => text,
        Err(e) => {
            metadata.insert("charset".into(), "iso-8859-1".into());
            charset::decode_latin1(e.as_bytes())
        }
    };

    EmailMessage {
        id: EmailMessage::make_id(account, raw.sequence),
        body,
        account: account.to_string(),
        created_at,
        read,
        metadata,
        ..Default::default()
    }
}

fn base_metadata(raw: &RawMessage) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    if let Some(uid) = raw.uid {
        metadata.insert("uid".into(), uid.to_string());
    }
    metadata.insert("sequence".into(), raw.sequence.to_string());
    metadata.insert("mailbox".into(), MAILBOX.into());
    metadata.insert("size".into(), raw.body.len().to_string());
    metadata
}

/// `Date` header, then `INTERNALDATE`, then the epoch.
fn resolve_date(raw: &RawMessage, date_header: Option<&str>) -> String {
    date_header
        .and_then(|value| mailparse::dateparse(value).ok())
        .map(rfc3339_from_unix)
        .or_else(|| raw.internal_date_rfc3339())
        .unwrap_or_else(|| rfc3339_from_unix(0))
}

// ─────────────────────────────────────────────
// MIME walk
// ─────────────────────────────────────────────

fn walk_parts(part: &ParsedMail, parts: &mut Parts) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            walk_parts(sub, parts);
        }
        return;
    }

    let mimetype = part.ctype.mimetype.to_lowercase();
    let disposition = header_value(&part.headers, "Content-Disposition").unwrap_or_default();
    let content_id = header_value(&part.headers, "Content-ID")
        .map(|id| id.trim_matches(|c| c == '<' || c == '>').to_string())
        .unwrap_or_default();

    let is_attachment = disposition.to_lowercase().contains("attachment");
    let is_inline_image = !content_id.is_empty() && mimetype.starts_with("image/");

    let bytes = match part.get_body_raw() {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(mimetype = %mimetype, error = %e, "skipping undecodable part");
            return;
        }
    };

    if is_attachment || is_inline_image {
        let content_type = header_value(&part.headers, "Content-Type").unwrap_or_default();
        parts.attachments.push(EmailAttachment {
            filename: extract_filename(&disposition, &content_type),
            content_type: mimetype,
            size: bytes.len() as u64,
            content: bytes,
            content_id,
        });
        return;
    }

    let slot = match mimetype.as_str() {
        "text/html" => &mut parts.html,
        "text/plain" => &mut parts.plain,
        _ => {
            debug!(mimetype = %mimetype, "ignoring non-text part");
            return;
        }
    };
    if slot.is_none() {
        let label = part.ctype.charset.as_str();
        *slot = Some(charset::decode(&bytes, label));
        parts.charset.get_or_insert_with(|| label.to_lowercase());
    }
}

/// Attachment filename from `Content-Disposition: ...; filename=`, else
/// `Content-Type: ...; name=`, else the unnamed sentinel.
pub fn extract_filename(disposition: &str, content_type: &str) -> String {
    param_value(disposition, "filename=")
        .or_else(|| param_value(content_type, "name="))
        .unwrap_or_else(|| UNNAMED_ATTACHMENT.to_string())
}

/// Value following `key` in a header: quoted up to the closing quote,
/// otherwise up to the next `;`.
fn param_value(header: &str, key: &str) -> Option<String> {
    let start = header.to_ascii_lowercase().find(key)? + key.len();
    let rest = header[start..].trim_start();

    let value = match rest.strip_prefix('"') {
        Some(quoted) => quoted.split('"').next().unwrap_or(quoted),
        None => rest.split(';').next().unwrap_or(rest),
    };
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

// ─────────────────────────────────────────────
// Header helpers
// ─────────────────────────────────────────────

fn header_value(headers: &[MailHeader], name: &str) -> Option<String> {
    headers
        .get_first_value(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn header_map(headers: &[MailHeader]) -> HashMap<String, String> {
    HEADER_ALLOW_LIST
        .iter()
        .filter_map(|name| header_value(headers, name).map(|v| (name.to_string(), v)))
        .collect()
}

/// Every mailbox address in an address-list header, groups flattened.
fn addresses(headers: &[MailHeader], name: &str) -> Vec<String> {
    let Some(header) = headers.get_first_header(name) else {
        return Vec::new();
    };
    match mailparse::addrparse_header(header) {
        Ok(list) => list
            .iter()
            .flat_map(|addr| match addr {
                MailAddr::Single(info) => vec![info.addr.clone()],
                MailAddr::Group(group) => group.addrs.iter().map(|i| i.addr.clone()).collect(),
            })
            .collect(),
        Err(_) => {
            let value = header.get_value();
            let value = value.trim();
            if value.is_empty() {
                Vec::new()
            } else {
                vec![value.to_string()]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(body: &[u8]) -> RawMessage {
        RawMessage {
            sequence: 7,
            uid: Some(1007),
            flags: vec!["\\Seen".into()],
            internal_date: Some("02-Mar-2024 10:15:00 +0100".into()),
            body: body.to_vec(),
        }
    }

    #[test]
    fn test_simple_plain_message() {
        let msg = decompose(
            raw(b"From: \"Jan Jansen\" <Jan@Example.nl>\r\n\
                  To: info@dekoninklijkeloop.nl, Piet <piet@dkl.nl>\r\n\
                  Subject: Vraag over de route\r\n\
                  Date: Mon, 1 Jan 2024 12:00:00 +0000\r\n\
                  Message-ID: <abc123@example.nl>\r\n\
                  Content-Type: text/plain; charset=utf-8\r\n\
                  \r\n\
                  Hallo,   waar is de start?\r\n"),
            "info",
        );
        assert_eq!(msg.id, "info:7");
        assert_eq!(msg.account, "info");
        assert_eq!(msg.sender, "jan@example.nl");
        assert_eq!(msg.subject, "Vraag over de route");
        assert_eq!(msg.message_id, "<abc123@example.nl>");
        assert_eq!(msg.to, vec!["info@dekoninklijkeloop.nl", "piet@dkl.nl"]);
        assert_eq!(msg.created_at, "2024-01-01T12:00:00+00:00");
        assert_eq!(msg.body, "Hallo, waar is de start?");
        assert!(msg.read);
        assert_eq!(msg.metadata["uid"], "1007");
        assert_eq!(msg.metadata["mailbox"], "INBOX");
        assert_eq!(msg.headers["Subject"], "Vraag over de route");
        assert!(!msg.headers.contains_key("Cc"));
    }

    #[test]
    fn test_date_falls_back_to_internal_date() {
        let msg = decompose(raw(b"Subject: x\r\n\r\nbody\r\n"), "info");
        assert_eq!(msg.created_at, "2024-03-02T09:15:00+00:00");

        let mut no_dates = raw(b"Subject: x\r\n\r\nbody\r\n");
        no_dates.internal_date = None;
        assert_eq!(
            decompose(no_dates, "info").created_at,
            "1970-01-01T00:00:00+00:00"
        );
    }

    #[test]
    fn test_html_only_message() {
        let msg = decompose(
            raw(b"Subject: Nieuwsbrief\r\n\
                  Content-Type: text/html; charset=utf-8\r\n\
                  \r\n\
                  <p>Hallo <b>lopers</b></p><p>Tot zondag</p>\r\n"),
            "noreply",
        );
        assert_eq!(msg.body, "Hallo *lopers*\n\nTot zondag");
        assert!(msg.html.contains("<b>lopers</b>"));
    }

    #[test]
    fn test_multipart_plain_preferred_for_body() {
        let msg = decompose(
            raw(b"Subject: Alt\r\n\
                  MIME-Version: 1.0\r\n\
                  Content-Type: multipart/alternative; boundary=\"XX\"\r\n\
                  \r\n\
                  --XX\r\n\
                  Content-Type: text/plain; charset=iso-8859-1\r\n\
                  Content-Transfer-Encoding: quoted-printable\r\n\
                  \r\n\
                  Caf=E9 open\r\n\
                  --XX\r\n\
                  Content-Type: text/html; charset=utf-8\r\n\
                  \r\n\
                  <p>HTML versie</p>\r\n\
                  --XX--\r\n"),
            "info",
        );
        assert_eq!(msg.body, "Café open");
        assert_eq!(msg.html.trim(), "<p>HTML versie</p>");
        assert_eq!(msg.metadata["charset"], "iso-8859-1");
        assert_eq!(msg.metadata["content_type"], "multipart/alternative");
    }

    #[test]
    fn test_attachment_and_inline_image() {
        let msg = decompose(
            raw(b"Subject: Bijlagen\r\n\
                  Content-Type: multipart/mixed; boundary=\"B\"\r\n\
                  \r\n\
                  --B\r\n\
                  Content-Type: text/plain\r\n\
                  \r\n\
                  Zie bijlage\r\n\
                  --B\r\n\
                  Content-Type: application/pdf; name=\"route.pdf\"\r\n\
                  Content-Disposition: attachment; filename=\"route kaart.pdf\"\r\n\
                  Content-Transfer-Encoding: base64\r\n\
                  \r\n\
                  SGVsbG8=\r\n\
                  --B\r\n\
                  Content-Type: image/png\r\n\
                  Content-ID: <logo@dkl>\r\n\
                  Content-Transfer-Encoding: base64\r\n\
                  \r\n\
                  iVBORw==\r\n\
                  --B--\r\n"),
            "info",
        );
        assert_eq!(msg.body, "Zie bijlage");
        assert_eq!(msg.attachments.len(), 2);

        let pdf = &msg.attachments[0];
        assert_eq!(pdf.filename, "route kaart.pdf");
        assert_eq!(pdf.content_type, "application/pdf");
        assert_eq!(pdf.content, b"Hello");
        assert_eq!(pdf.size, 5);
        assert!(!pdf.is_inline());

        let logo = &msg.attachments[1];
        assert_eq!(logo.content_id, "logo@dkl");
        assert_eq!(logo.filename, UNNAMED_ATTACHMENT);
        assert!(logo.is_inline());
        assert_eq!(msg.metadata["attachment_count"], "2");
        assert_eq!(msg.metadata["inline_image_count"], "1");
    }

    #[test]
    fn test_form_fields_replace_body() {
        let msg = decompose(
            raw(b"Subject: Nieuwe inschrijving\r\n\
                  Content-Type: text/plain\r\n\
                  \r\n\
                  Woonplaats: Apeldoorn\r\n\
                  Naam: Jan\r\n\
                  E-mail: jan@test.nl\r\n"),
            "inschrijving",
        );
        assert_eq!(
            msg.body,
            "Naam : Jan\nE-mail : jan@test.nl\nWoonplaats : Apeldoorn"
        );
        assert_eq!(msg.metadata["form_fields"], "3");
    }

    #[test]
    fn test_references_split() {
        let msg = decompose(
            raw(b"Subject: Re: x\r\n\
                  In-Reply-To: <a@x>\r\n\
                  References: <a@x> <b@x>\r\n\
                  \r\n\
                  ok\r\n"),
            "info",
        );
        assert_eq!(msg.in_reply_to, "<a@x>");
        assert_eq!(msg.references, vec!["<a@x>", "<b@x>"]);
    }

    #[test]
    fn test_recover_unparsed_latin1() {
        let mut message = raw(b"");
        message.body = b"caf\xe9".to_vec();
        let msg = recover_unparsed(message, "info");
        assert_eq!(msg.body, "café");
        assert_eq!(msg.id, "info:7");
        assert!(msg.read);
    }

    #[test]
    fn test_recover_unparsed_utf8() {
        let mut message = raw(b"");
        message.body = "gewone tekst".as_bytes().to_vec();
        message.flags.clear();
        let msg = recover_unparsed(message, "noreply");
        assert_eq!(msg.body, "gewone tekst");
        assert!(!msg.read);
    }

    #[test]
    fn test_extract_filename() {
        assert_eq!(
            extract_filename("attachment; filename=\"a b.pdf\"; size=3", ""),
            "a b.pdf"
        );
        assert_eq!(
            extract_filename("attachment; filename=plain.txt; size=3", ""),
            "plain.txt"
        );
        assert_eq!(extract_filename("attachment; FILENAME=x.csv", ""), "x.csv");
        assert_eq!(
            extract_filename("attachment", "image/jpeg; name=\"foto.jpg\""),
            "foto.jpg"
        );
        assert_eq!(extract_filename("", "application/octet-stream"), UNNAMED_ATTACHMENT);
    }
}
