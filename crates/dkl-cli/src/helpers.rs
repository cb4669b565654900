//! Shared CLI helpers: input reading, output printing, exit codes.

use std::io::Read;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;

use dkl_mail::MailError;

/// Exit code for errors caused by bad input (malformed id, unknown
/// account, invalid address).
pub const EXIT_USAGE: i32 = 2;

/// Read a file, or stdin when `path` is `-`.
pub fn read_input(path: &str) -> Result<String> {
    if path == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))
}

/// Pretty-print a value as JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{json}");
    Ok(())
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// 2 for caller errors, 1 for everything else.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    let client_error = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<MailError>())
        .any(MailError::is_client_error);
    if client_error {
        EXIT_USAGE
    } else {
        1
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_input_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body.html");
        std::fs::write(&path, "<p>Naam: Jan</p>").unwrap();
        assert_eq!(read_input(path.to_str().unwrap()).unwrap(), "<p>Naam: Jan</p>");
    }

    #[test]
    fn read_input_missing_file() {
        let err = read_input("/nonexistent/body.html").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/body.html"));
    }

    #[test]
    fn exit_code_for_client_errors() {
        let err = anyhow::Error::new(MailError::InvalidIdFormat);
        assert_eq!(exit_code(&err), EXIT_USAGE);

        let err = anyhow::Error::new(MailError::UnknownAccount("marketing".into())).context("mark-read");
        assert_eq!(exit_code(&err), EXIT_USAGE);
    }

    #[test]
    fn exit_code_for_server_errors() {
        let err = anyhow::Error::new(MailError::AllAccountsFailed(Vec::new()));
        assert_eq!(exit_code(&err), 1);
        assert_eq!(exit_code(&anyhow::anyhow!("boom")), 1);
    }
}
