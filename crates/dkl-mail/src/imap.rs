//! Minimal async IMAP client and the production `MailboxSource`.
//!
//! Supports only what a fetch cycle and mark-as-read need: LOGIN, SELECT,
//! range FETCH, STORE and LOGOUT. A new connection is opened per
//! operation.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use dkl_core::config::AccountConfig;
use dkl_core::types::{EmailMessage, FetchOptions};

use crate::base::MailboxSource;
use crate::error::{ImapError, MailError, Result};
use crate::parser::{self, RawMessage, MAILBOX};
use crate::tls;

type ImapResult<T> = std::result::Result<T, ImapError>;

// ─────────────────────────────────────────────
// Sequence range
// ─────────────────────────────────────────────

/// Sequence numbers to fetch from a mailbox holding `total` messages:
/// the newest `limit` after skipping the newest `offset`. With no limit
/// the whole mailbox is fetched and the offset is left to the caller.
pub fn sequence_range(total: u32, limit: usize, offset: usize) -> Option<(u32, u32)> {
    if total == 0 {
        return None;
    }
    if limit == 0 {
        return Some((1, total));
    }
    let offset = u32::try_from(offset).unwrap_or(u32::MAX);
    if offset >= total {
        return None;
    }
    let to = total - offset;
    let limit = u32::try_from(limit).unwrap_or(u32::MAX);
    let from = to.saturating_sub(limit - 1).max(1);
    Some((from, to))
}

// ─────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────

/// Async read+write stream marker.
pub(crate) trait ImapStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ImapStream for T {}

pub struct ImapClient {
    reader: BufReader<ReadHalf<Box<dyn ImapStream>>>,
    writer: WriteHalf<Box<dyn ImapStream>>,
    tag_counter: u32,
}

impl ImapClient {
    /// Connect over implicit TLS and read the greeting.
    pub async fn connect(host: &str, port: u16, accept_invalid_certs: bool) -> ImapResult<Self> {
        let tcp = TcpStream::connect((host, port)).await?;

        let config = tls::client_config(accept_invalid_certs)?;
        let connector = tokio_rustls::TlsConnector::from(config);
        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|e| ImapError::Tls(format!("invalid server name '{host}': {e}")))?;
        let stream = connector.connect(server_name, tcp).await?;

        Self::from_stream(Box::new(stream)).await
    }

    /// Wrap an established stream and read the greeting.
    pub(crate) async fn from_stream(stream: Box<dyn ImapStream>) -> ImapResult<Self> {
        let (read, write) = tokio::io::split(stream);
        let mut client = Self {
            reader: BufReader::new(read),
            writer: write,
            tag_counter: 0,
        };

        let greeting = client.read_line().await?;
        if !greeting.to_ascii_uppercase().starts_with("* OK") {
            return Err(ImapError::Greeting(greeting));
        }
        debug!(greeting = %greeting, "IMAP connected");
        Ok(client)
    }

    /// Read a single CRLF-terminated line.
    async fn read_line(&mut self) -> ImapResult<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(ImapError::ConnectionClosed);
        }
        Ok(line
            .trim_end_matches("\r\n")
            .trim_end_matches('\n')
            .to_string())
    }

    /// Read exactly `n` bytes.
    async fn read_exact(&mut self, n: usize) -> ImapResult<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.reader.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Send a tagged command. Returns the tag.
    async fn send_command(&mut self, cmd: &str) -> ImapResult<String> {
        self.tag_counter += 1;
        let tag = format!("A{:04}", self.tag_counter);
        let line = format!("{tag} {cmd}\r\n");
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(tag)
    }

    /// Read until the tagged completion line; fail unless it is OK.
    async fn read_response(&mut self, tag: &str, command: &str) -> ImapResult<Vec<String>> {
        let mut untagged = Vec::new();
        loop {
            let line = self.read_line().await?;
            if let Some(status) = tagged_status(&line, tag) {
                check_ok(command, status)?;
                return Ok(untagged);
            }
            untagged.push(line);
        }
    }

    pub async fn login(&mut self, user: &str, pass: &str) -> ImapResult<()> {
        let cmd = format!("LOGIN {} {}", quote(user), quote(pass));
        let tag = self.send_command(&cmd).await?;
        self.read_response(&tag, "LOGIN").await?;
        Ok(())
    }

    /// SELECT a mailbox, returning its message count.
    pub async fn select(&mut self, mailbox: &str) -> ImapResult<u32> {
        let tag = self.send_command(&format!("SELECT {}", quote(mailbox))).await?;
        let lines = self.read_response(&tag, "SELECT").await?;
        let exists = lines
            .iter()
            .find_map(|line| {
                let rest = line.strip_prefix("* ")?;
                let (count, keyword) = rest.split_once(' ')?;
                keyword
                    .eq_ignore_ascii_case("EXISTS")
                    .then(|| count.parse::<u32>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        Ok(exists)
    }

    /// FETCH `from:to` with UID, flags, internal date and the full body.
    pub async fn fetch_range(&mut self, from: u32, to: u32) -> ImapResult<Vec<RawMessage>> {
        let cmd = format!("FETCH {from}:{to} (UID FLAGS INTERNALDATE BODY.PEEK[])");
        let tag = self.send_command(&cmd).await?;

        let mut messages = Vec::new();
        loop {
            let line = self.read_line().await?;
            if let Some(status) = tagged_status(&line, &tag) {
                check_ok("FETCH", status)?;
                break;
            }

            // * N FETCH (UID u FLAGS (...) INTERNALDATE "..." BODY[] {size}
            if !line.starts_with("* ") || !line.to_ascii_uppercase().contains(" FETCH ") {
                continue;
            }
            let Some(size) = literal_size(&line) else {
                debug!(line = %line, "ignoring FETCH response without body");
                continue;
            };

            let mut raw = RawMessage::default();
            apply_fetch_attributes(&line, &mut raw);
            raw.body = self.read_exact(size).await?;

            // Remaining attributes may follow the literal: ` FLAGS (\Seen))`
            let closing = self.read_line().await?;
            apply_fetch_attributes(&closing, &mut raw);

            messages.push(raw);
        }
        Ok(messages)
    }

    /// STORE +FLAGS (\Seen)
    pub async fn store_seen(&mut self, seqnum: u32) -> ImapResult<()> {
        let cmd = format!("STORE {seqnum} +FLAGS (\\Seen)");
        let tag = self.send_command(&cmd).await?;
        self.read_response(&tag, "STORE").await?;
        Ok(())
    }

    pub async fn logout(&mut self) -> ImapResult<()> {
        let tag = self.send_command("LOGOUT").await?;
        // Server may send * BYE before the tagged OK
        let _ = self.read_response(&tag, "LOGOUT").await;
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Response parsing helpers
// ─────────────────────────────────────────────

/// The status part of `line` if it completes `tag`.
fn tagged_status<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    line.strip_prefix(tag)?.strip_prefix(' ')
}

fn check_ok(command: &str, status: &str) -> ImapResult<()> {
    if status.get(..2).is_some_and(|s| s.eq_ignore_ascii_case("OK")) {
        Ok(())
    } else {
        Err(ImapError::Command {
            command: command.to_string(),
            status: status.to_string(),
        })
    }
}

/// Quote a string argument.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Size of a trailing `{N}` literal announcement.
fn literal_size(line: &str) -> Option<usize> {
    let inner = line.strip_suffix('}')?;
    let start = inner.rfind('{')?;
    inner[start + 1..].parse().ok()
}

/// Digits following `key` (case-insensitive) in `line`.
fn number_after(line: &str, upper: &str, key: &str) -> Option<u32> {
    let start = upper.find(key)? + key.len();
    let rest = &line[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// Pick sequence number, UID, FLAGS and INTERNALDATE out of a FETCH line.
fn apply_fetch_attributes(line: &str, raw: &mut RawMessage) {
    let upper = line.to_ascii_uppercase();

    if let Some(seq) = number_after(line, &upper, "* ") {
        raw.sequence = seq;
    }
    if let Some(uid) = number_after(line, &upper, "UID ") {
        raw.uid = Some(uid);
    }
    if let Some(start) = upper.find("FLAGS (") {
        let rest = &line[start + "FLAGS (".len()..];
        if let Some(end) = rest.find(')') {
            raw.flags = rest[..end].split_whitespace().map(str::to_string).collect();
        }
    }
    if let Some(start) = upper.find("INTERNALDATE \"") {
        let rest = &line[start + "INTERNALDATE \"".len()..];
        if let Some(end) = rest.find('"') {
            raw.internal_date = Some(rest[..end].to_string());
        }
    }
}

// ─────────────────────────────────────────────
// MailboxSource over IMAP
// ─────────────────────────────────────────────

/// Fetches over IMAP with implicit TLS, one connection per call.
pub struct ImapMailboxSource {
    accept_invalid_certs: bool,
}

impl ImapMailboxSource {
    pub fn new(accept_invalid_certs: bool) -> Self {
        if accept_invalid_certs {
            warn!("IMAP certificate validation is disabled");
        }
        Self {
            accept_invalid_certs,
        }
    }

    async fn open(&self, account: &AccountConfig) -> ImapResult<ImapClient> {
        debug!(
            account = %account.name,
            host = %account.imap_host,
            port = account.imap_port,
            password_len = account.password.len(),
            "connecting to IMAP"
        );
        let mut client = ImapClient::connect(
            &account.imap_host,
            account.imap_port,
            self.accept_invalid_certs,
        )
        .await?;
        client.login(&account.address, &account.password).await?;
        Ok(client)
    }

    async fn fetch_inner(&self, account: &AccountConfig, options: FetchOptions) -> ImapResult<Vec<EmailMessage>> {
        let mut client = self.open(account).await?;
        let total = client.select(MAILBOX).await?;

        let Some((from, to)) = sequence_range(total, options.limit, options.offset) else {
            debug!(account = %account.name, total, "nothing to fetch");
            client.logout().await?;
            return Ok(Vec::new());
        };

        let raw = client.fetch_range(from, to).await?;
        if let Err(e) = client.logout().await {
            debug!(error = %e, "IMAP logout error (non-fatal)");
        }

        let emails: Vec<EmailMessage> = raw
            .into_iter()
            .map(|message| parser::decompose(message, &account.name))
            .collect();
        info!(account = %account.name, total, from, to, fetched = emails.len(), "fetched messages");
        Ok(emails)
    }

    async fn mark_seen_inner(&self, account: &AccountConfig, sequence: u32) -> ImapResult<()> {
        let mut client = self.open(account).await?;
        client.select(MAILBOX).await?;
        client.store_seen(sequence).await?;
        if let Err(e) = client.logout().await {
            debug!(error = %e, "IMAP logout error (non-fatal)");
        }
        Ok(())
    }
}

#[async_trait]
impl MailboxSource for ImapMailboxSource {
    async fn fetch(&self, account: &AccountConfig, options: FetchOptions) -> Result<Vec<EmailMessage>> {
        self.fetch_inner(account, options)
            .await
            .map_err(|source| MailError::Imap {
                account: account.name.clone(),
                source,
            })
    }

    async fn mark_seen(&self, account: &AccountConfig, sequence: u32) -> Result<()> {
        self.mark_seen_inner(account, sequence)
            .await
            .map_err(|source| MailError::Imap {
                account: account.name.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    /// Run a scripted server: for each `(expected command suffix, reply)`
    /// read one command line and write the reply (tags are filled in).
    fn scripted_server(script: Vec<(&'static str, Vec<u8>)>) -> DuplexStream {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut reader = BufReader::new(read);
            write.write_all(b"* OK IMAP4rev1 ready\r\n").await.unwrap();
            for (expected, reply) in script {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    return;
                }
                let (tag, command) = line.trim_end().split_once(' ').unwrap();
                assert!(
                    command.starts_with(expected),
                    "expected {expected:?}, got {command:?}"
                );
                let reply = String::from_utf8_lossy(&reply).replace("{TAG}", tag);
                write.write_all(reply.as_bytes()).await.unwrap();
            }
        });
        client
    }

    async fn client_for(script: Vec<(&'static str, Vec<u8>)>) -> ImapClient {
        ImapClient::from_stream(Box::new(scripted_server(script)))
            .await
            .unwrap()
    }

    #[test]
    fn test_sequence_range() {
        assert_eq!(sequence_range(100, 10, 0), Some((91, 100)));
        assert_eq!(sequence_range(100, 10, 5), Some((86, 95)));
        assert_eq!(sequence_range(5, 10, 0), Some((1, 5)));
        assert_eq!(sequence_range(5, 0, 0), Some((1, 5)));
        assert_eq!(sequence_range(5, 0, 2), Some((1, 5)));
        assert_eq!(sequence_range(5, 0, 9), Some((1, 5)));
        assert_eq!(sequence_range(0, 0, 0), None);
        assert_eq!(sequence_range(5, 1, 0), Some((5, 5)));
        assert_eq!(sequence_range(5, 10, 5), None);
        assert_eq!(sequence_range(5, 10, 7), None);
        assert_eq!(sequence_range(0, 10, 0), None);
    }

    #[test]
    fn test_literal_size() {
        assert_eq!(literal_size("* 1 FETCH (UID 5 BODY[] {342}"), Some(342));
        assert_eq!(literal_size("* 1 FETCH (FLAGS (\\Seen))"), None);
    }

    #[test]
    fn test_apply_fetch_attributes() {
        let mut raw = RawMessage::default();
        apply_fetch_attributes(
            r#"* 12 FETCH (UID 4012 FLAGS (\Seen \Answered) INTERNALDATE "02-Mar-2024 10:15:00 +0100" BODY[] {10}"#,
            &mut raw,
        );
        assert_eq!(raw.sequence, 12);
        assert_eq!(raw.uid, Some(4012));
        assert_eq!(raw.flags, vec!["\\Seen", "\\Answered"]);
        assert_eq!(raw.internal_date.as_deref(), Some("02-Mar-2024 10:15:00 +0100"));
    }

    #[test]
    fn test_check_ok() {
        assert!(check_ok("LOGIN", "OK LOGIN completed").is_ok());
        assert!(check_ok("LOGIN", "ok done").is_ok());
        let err = check_ok("LOGIN", "NO [AUTHENTICATIONFAILED] Invalid credentials").unwrap_err();
        assert!(err.to_string().contains("IMAP LOGIN failed"));
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
    }

    #[tokio::test]
    async fn test_bad_greeting() {
        let (client, server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let (_, mut write) = tokio::io::split(server);
            write.write_all(b"* BYE go away\r\n").await.unwrap();
        });
        let err = ImapClient::from_stream(Box::new(client)).await.err().unwrap();
        assert!(matches!(err, ImapError::Greeting(_)));
    }

    #[tokio::test]
    async fn test_login_and_select() {
        let mut client = client_for(vec![
            ("LOGIN", b"{TAG} OK LOGIN completed\r\n".to_vec()),
            (
                "SELECT \"INBOX\"",
                b"* FLAGS (\\Seen \\Answered)\r\n* 42 EXISTS\r\n* 0 RECENT\r\n{TAG} OK [READ-WRITE] SELECT completed\r\n"
                    .to_vec(),
            ),
        ])
        .await;
        client.login("info@dekoninklijkeloop.nl", "secret").await.unwrap();
        assert_eq!(client.select("INBOX").await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let mut client = client_for(vec![(
            "LOGIN",
            b"{TAG} NO [AUTHENTICATIONFAILED] Invalid credentials\r\n".to_vec(),
        )])
        .await;
        let err = client.login("x", "y").await.unwrap_err();
        assert!(matches!(err, ImapError::Command { ref command, .. } if command == "LOGIN"));
    }

    #[tokio::test]
    async fn test_fetch_range_reads_literals() {
        let first = b"Subject: Een\r\n\r\nEerste\r\n";
        let second = b"Subject: Twee\r\n\r\nTweede\r\n";
        let mut reply = Vec::new();
        reply.extend_from_slice(
            format!(
                "* 1 FETCH (UID 101 FLAGS (\\Seen) INTERNALDATE \"01-Mar-2024 08:00:00 +0000\" BODY[] {{{}}}\r\n",
                first.len()
            )
            .as_bytes(),
        );
        reply.extend_from_slice(first);
        reply.extend_from_slice(b")\r\n");
        reply.extend_from_slice(
            format!("* 2 FETCH (UID 102 BODY[] {{{}}}\r\n", second.len()).as_bytes(),
        );
        reply.extend_from_slice(second);
        reply.extend_from_slice(b" FLAGS ())\r\n");
        reply.extend_from_slice(b"* 2 FETCH (FLAGS (\\Recent))\r\n");
        reply.extend_from_slice(b"{TAG} OK FETCH completed\r\n");

        let mut client = client_for(vec![("FETCH 1:2 (UID FLAGS INTERNALDATE BODY.PEEK[])", reply)]).await;
        let messages = client.fetch_range(1, 2).await.unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sequence, 1);
        assert_eq!(messages[0].uid, Some(101));
        assert!(messages[0].is_seen());
        assert_eq!(messages[0].body, first);
        assert_eq!(messages[1].sequence, 2);
        assert_eq!(messages[1].uid, Some(102));
        assert!(!messages[1].is_seen());
        assert_eq!(messages[1].body, second);
    }

    #[tokio::test]
    async fn test_store_seen_and_logout() {
        let mut client = client_for(vec![
            (
                "STORE 7 +FLAGS (\\Seen)",
                b"* 7 FETCH (FLAGS (\\Seen))\r\n{TAG} OK STORE completed\r\n".to_vec(),
            ),
            ("LOGOUT", b"* BYE logging out\r\n{TAG} OK LOGOUT completed\r\n".to_vec()),
        ])
        .await;
        client.store_seen(7).await.unwrap();
        client.logout().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_closed_mid_response() {
        let mut client = client_for(vec![("LOGIN", b"* CAPABILITY IMAP4rev1\r\n".to_vec())]).await;
        let err = client.login("x", "y").await.unwrap_err();
        assert!(matches!(err, ImapError::ConnectionClosed));
    }
}
