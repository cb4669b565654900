//! Charset decoding for MIME part bodies.
//!
//! Maps a declared charset label to a decoder from a fixed table. UTF-8 and
//! US-ASCII are passed through, ISO-8859-1 is mapped byte-for-byte, and the
//! remaining single- and multi-byte charsets go through `encoding_rs`.
//! Decoding never fails: unknown labels and malformed input yield
//! best-effort text.

use std::borrow::Cow;

use encoding_rs::Encoding;
use tracing::debug;

/// How a recognized label is decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Decoder {
    Utf8,
    Latin1,
    Table(&'static Encoding),
}

/// Normalize a label as it appears in a `charset=` parameter.
fn normalize_label(label: &str) -> String {
    label
        .trim()
        .trim_matches('"')
        .trim()
        .to_ascii_lowercase()
        .replace('_', "-")
}

fn lookup(label: &str) -> Option<Decoder> {
    let label = normalize_label(label);

    let decoder = match label.as_str() {
        "" | "utf-8" | "utf8" | "us-ascii" | "ascii" => Decoder::Utf8,
        "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" | "l1" => Decoder::Latin1,
        "windows-1250" | "cp1250" => Decoder::Table(encoding_rs::WINDOWS_1250),
        "windows-1251" | "cp1251" => Decoder::Table(encoding_rs::WINDOWS_1251),
        "windows-1252" | "cp1252" => Decoder::Table(encoding_rs::WINDOWS_1252),
        "windows-1253" | "cp1253" => Decoder::Table(encoding_rs::WINDOWS_1253),
        "windows-1254" | "cp1254" => Decoder::Table(encoding_rs::WINDOWS_1254),
        "windows-1255" | "cp1255" => Decoder::Table(encoding_rs::WINDOWS_1255),
        "windows-1256" | "cp1256" => Decoder::Table(encoding_rs::WINDOWS_1256),
        "windows-1257" | "cp1257" => Decoder::Table(encoding_rs::WINDOWS_1257),
        "windows-1258" | "cp1258" => Decoder::Table(encoding_rs::WINDOWS_1258),
        "koi8-r" => Decoder::Table(encoding_rs::KOI8_R),
        "koi8-u" => Decoder::Table(encoding_rs::KOI8_U),
        "gbk" | "gb2312" | "cp936" => Decoder::Table(encoding_rs::GBK),
        "gb18030" => Decoder::Table(encoding_rs::GB18030),
        "big5" | "big5-hkscs" => Decoder::Table(encoding_rs::BIG5),
        "euc-jp" => Decoder::Table(encoding_rs::EUC_JP),
        "iso-2022-jp" => Decoder::Table(encoding_rs::ISO_2022_JP),
        "shift-jis" | "sjis" | "ms932" | "windows-31j" => Decoder::Table(encoding_rs::SHIFT_JIS),
        "euc-kr" | "ks-c-5601-1987" => Decoder::Table(encoding_rs::EUC_KR),
        "utf-16be" => Decoder::Table(encoding_rs::UTF_16BE),
        "utf-16le" => Decoder::Table(encoding_rs::UTF_16LE),
        other => return iso_8859_part(other),
    };
    Some(decoder)
}

/// `iso-8859-N` / `iso8859-N` for the parts not matched above.
fn iso_8859_part(label: &str) -> Option<Decoder> {
    let part = label
        .strip_prefix("iso-8859-")
        .or_else(|| label.strip_prefix("iso8859-"))?;
    let encoding = match part.parse::<u8>().ok()? {
        1 => return Some(Decoder::Latin1),
        2 => encoding_rs::ISO_8859_2,
        3 => encoding_rs::ISO_8859_3,
        4 => encoding_rs::ISO_8859_4,
        5 => encoding_rs::ISO_8859_5,
        6 => encoding_rs::ISO_8859_6,
        7 => encoding_rs::ISO_8859_7,
        8 => encoding_rs::ISO_8859_8,
        // Latin-5 and Thai decode through their Windows supersets.
        9 => encoding_rs::WINDOWS_1254,
        10 => encoding_rs::ISO_8859_10,
        11 => encoding_rs::WINDOWS_874,
        13 => encoding_rs::ISO_8859_13,
        14 => encoding_rs::ISO_8859_14,
        15 => encoding_rs::ISO_8859_15,
        16 => encoding_rs::ISO_8859_16,
        _ => return None,
    };
    Some(Decoder::Table(encoding))
}

/// Decode `bytes` declared as `label` into a `String`.
pub fn decode(bytes: &[u8], label: &str) -> String {
    match lookup(label) {
        Some(Decoder::Utf8) => utf8_lossy(bytes, label),
        Some(Decoder::Latin1) => decode_latin1(bytes),
        Some(Decoder::Table(encoding)) => {
            let (text, had_errors) = encoding.decode_with_bom_removal(bytes);
            if had_errors {
                debug!(charset = %label, "malformed input, replaced invalid sequences");
            }
            text.into_owned()
        }
        None => {
            debug!(charset = %label, "unknown charset, passing content through");
            utf8_lossy(bytes, label)
        }
    }
}

/// Map every byte to the code point of the same value.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn utf8_lossy(bytes: &[u8], label: &str) -> String {
    match String::from_utf8_lossy(bytes) {
        Cow::Borrowed(s) => s.to_string(),
        Cow::Owned(s) => {
            debug!(charset = %label, "invalid UTF-8, replaced invalid sequences");
            s
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_is_identity() {
        let text = "Inschrijving voor de 15 km, café ☕";
        assert_eq!(decode(text.as_bytes(), "utf-8"), text);
        assert_eq!(decode(text.as_bytes(), "UTF-8"), text);
    }

    #[test]
    fn test_us_ascii_passthrough() {
        assert_eq!(decode(b"plain", "us-ascii"), "plain");
    }

    #[test]
    fn test_latin1() {
        assert_eq!(decode(b"caf\xe9", "ISO-8859-1"), "café");
        assert_eq!(decode(b"\x80", "latin1"), "\u{80}");
    }

    #[test]
    fn test_windows_1252_euro() {
        assert_eq!(decode(b"\x80 5", "windows-1252"), "€ 5");
    }

    #[test]
    fn test_iso_8859_15_euro() {
        assert_eq!(decode(b"\xa4", "iso-8859-15"), "€");
    }

    #[test]
    fn test_koi8_r() {
        // "Привет"
        assert_eq!(decode(b"\xf0\xd2\xc9\xd7\xc5\xd4", "koi8-r"), "Привет");
    }

    #[test]
    fn test_shift_jis_label_variants() {
        // "日本"
        let bytes = b"\x93\xfa\x96\x7b";
        assert_eq!(decode(bytes, "Shift_JIS"), "日本");
        assert_eq!(decode(bytes, "shift-jis"), "日本");
    }

    #[test]
    fn test_utf16le() {
        assert_eq!(decode(b"h\x00i\x00", "utf-16le"), "hi");
    }

    #[test]
    fn test_quoted_label() {
        assert_eq!(decode(b"caf\xe9", "\"iso-8859-1\""), "café");
    }

    #[test]
    fn test_unknown_charset_passes_through() {
        assert!(lookup("x-made-up").is_none());
        assert_eq!(decode(b"hello", "x-made-up"), "hello");
    }

    #[test]
    fn test_invalid_utf8_never_fails() {
        let out = decode(b"ok \xff\xfe end", "utf-8");
        assert!(out.starts_with("ok "));
        assert!(out.ends_with(" end"));
    }

    #[test]
    fn test_iso_8859_12_does_not_exist() {
        assert!(lookup("iso-8859-12").is_none());
        assert!(lookup("iso-8859-16").is_some());
        assert_eq!(lookup("ISO8859-2"), Some(Decoder::Table(encoding_rs::ISO_8859_2)));
    }
}
