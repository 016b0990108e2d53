//! Format Sniffer Module
//!
//! Determines the [`ContainerKind`] of a byte buffer from its content alone.
//! File names are never consulted: report attachments are routinely renamed or
//! arrive without an extension. Anything truncated or ambiguous resolves to
//! `BinaryUnknown` so classification can deal with it later.

use crate::models::ContainerKind;

const ZIP_MAGICS: [&[u8]; 3] = [b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];
const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];
const CFB_MAGIC: [u8; 8] = [0xd0, 0xcf, 0x11, 0xe0, 0xa1, 0xb1, 0x1a, 0xe1];
const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

const TAR_BLOCK_LEN: usize = 512;
const USTAR_MAGIC_OFFSET: usize = 257;
const TAR_CHECKSUM_RANGE: std::ops::Range<usize> = 148..156;

/// How much of the buffer is inspected for text-based formats.
const HEAD_LEN: usize = 1024;
const HEADER_BLOCK_LEN: usize = 8192;

/// Header fields that only appear in real messages. Two of them are required
/// so that key/value text (e.g. an RFC 6591 feedback report) is not taken for mail.
const MESSAGE_HEADERS: &[&str] = &[
    "from",
    "to",
    "cc",
    "subject",
    "date",
    "received",
    "message-id",
    "mime-version",
    "content-type",
    "return-path",
    "delivered-to",
    "reply-to",
    "x-mailer",
];

/// Returns the container kind of `bytes`. Identical input always yields the same kind.
pub fn sniff(bytes: &[u8]) -> ContainerKind {
    if ZIP_MAGICS.iter().any(|m| bytes.starts_with(m)) {
        return ContainerKind::Zip;
    }
    if bytes.starts_with(&GZIP_MAGIC) {
        return ContainerKind::Gzip;
    }
    if bytes.starts_with(&CFB_MAGIC) {
        return ContainerKind::ProprietaryMail;
    }
    if is_tar_header(bytes) {
        return ContainerKind::Tar;
    }
    if let Some(kind) = sniff_markup(bytes) {
        return kind;
    }
    if looks_like_message(bytes) {
        return ContainerKind::Eml;
    }
    if has_embedded_html(bytes) {
        return ContainerKind::Html;
    }
    ContainerKind::BinaryUnknown
}

/// Whether the buffer looks like text rather than binary data.
pub fn is_probably_text(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(HEAD_LEN)];
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // A multi-byte character cut at the end of the window is still text.
        Err(e) => e.error_len().is_none(),
    }
}

fn is_tar_header(bytes: &[u8]) -> bool {
    if bytes.len() < TAR_BLOCK_LEN {
        return false;
    }
    let header = &bytes[..TAR_BLOCK_LEN];
    if &header[USTAR_MAGIC_OFFSET..USTAR_MAGIC_OFFSET + 5] == b"ustar" {
        return true;
    }
    // Pre-POSIX archives carry no magic; fall back to the header checksum.
    if header[0] == 0 {
        return false;
    }
    let Some(stored) = parse_octal(&header[TAR_CHECKSUM_RANGE]) else {
        return false;
    };
    let computed: u64 = header
        .iter()
        .enumerate()
        .map(|(i, &b)| if TAR_CHECKSUM_RANGE.contains(&i) { 0x20 } else { b as u64 })
        .sum();
    stored == computed
}

fn parse_octal(field: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(field).ok()?;
    let digits = text.trim_matches(|c: char| c == ' ' || c == '\0');
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 8).ok()
}

/// Elements that only open an HTML document or fragment, never a report schema.
const HTML_ELEMENTS: &[&str] = &[
    "html", "head", "body", "meta", "title", "table", "div", "p", "span", "br", "pre", "h1", "h2", "h3",
];

/// Lowercased text head of the buffer, BOM removed. `None` for binary data.
fn text_head(bytes: &[u8]) -> Option<String> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if !is_probably_text(bytes) {
        return None;
    }
    Some(String::from_utf8_lossy(&bytes[..bytes.len().min(HEAD_LEN)]).to_lowercase())
}

fn has_html_marker(head: &str) -> bool {
    head.contains("<!doctype html") || head.contains("<html")
}

fn sniff_markup(bytes: &[u8]) -> Option<ContainerKind> {
    let head = text_head(bytes)?;
    let lower = head.trim_start();
    if !lower.starts_with('<') {
        return None;
    }
    if has_html_marker(lower) {
        return Some(ContainerKind::Html);
    }
    if lower.starts_with("<?xml") {
        return Some(ContainerKind::Xml);
    }
    if lower.starts_with("<!--") || lower.starts_with("<!doctype") {
        return Some(ContainerKind::Xml);
    }
    // A bare root element without prologue, e.g. `<feedback>` or `<table>`.
    let name: String = lower[1..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'))
        .collect();
    match name.chars().next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            if HTML_ELEMENTS.contains(&name.as_str()) {
                Some(ContainerKind::Html)
            } else {
                Some(ContainerKind::Xml)
            }
        }
        _ => None,
    }
}

/// HTML preceded by a line or two of prose, as pasted into mail bodies.
fn has_embedded_html(bytes: &[u8]) -> bool {
    text_head(bytes).is_some_and(|head| has_html_marker(&head))
}

fn looks_like_message(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(HEADER_BLOCK_LEN)];
    if !is_probably_text(window) {
        return false;
    }
    let text = String::from_utf8_lossy(window);
    let mut known = 0;
    let mut seen_field = false;
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            // Folded continuation needs a field to continue.
            if !seen_field {
                return false;
            }
            continue;
        }
        let Some((name, _)) = line.split_once(':') else {
            return false;
        };
        if name.is_empty() || !name.bytes().all(|b| (33..=126).contains(&b) && b != b':') {
            return false;
        }
        seen_field = true;
        if MESSAGE_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            known += 1;
        }
    }
    known >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_magics() {
        assert_eq!(sniff(b"PK\x03\x04rest"), ContainerKind::Zip);
        assert_eq!(sniff(b"PK\x05\x06"), ContainerKind::Zip);
        assert_eq!(sniff(&[0x1f, 0x8b, 0x08, 0x00]), ContainerKind::Gzip);
        assert_eq!(sniff(&CFB_MAGIC), ContainerKind::ProprietaryMail);
    }

    #[test]
    fn test_ustar_header() {
        let mut block = vec![0u8; 1024];
        block[..8].copy_from_slice(b"test.xml");
        block[257..263].copy_from_slice(b"ustar\0");
        assert_eq!(sniff(&block), ContainerKind::Tar);
    }

    #[test]
    fn test_v7_tar_checksum() {
        let mut block = vec![0u8; 512];
        block[..5].copy_from_slice(b"a.xml");
        let sum: u64 = block
            .iter()
            .enumerate()
            .map(|(i, &b)| if (148..156).contains(&i) { 0x20 } else { b as u64 })
            .sum();
        let field = format!("{:06o}\0 ", sum);
        block[148..156].copy_from_slice(field.as_bytes());
        assert_eq!(sniff(&block), ContainerKind::Tar);
        // Same block with a broken checksum is not a tar.
        block[0] = b'b';
        assert_eq!(sniff(&block), ContainerKind::BinaryUnknown);
    }

    #[test]
    fn test_markup() {
        assert_eq!(sniff(b"<?xml version=\"1.0\"?><feedback/>"), ContainerKind::Xml);
        assert_eq!(sniff(b"\xef\xbb\xbf  <feedback></feedback>"), ContainerKind::Xml);
        assert_eq!(sniff(b"<!DOCTYPE html><html><body/></html>"), ContainerKind::Html);
        assert_eq!(sniff(b"\n<HTML><body>report</body></HTML>"), ContainerKind::Html);
        assert_eq!(sniff(b"<!DOCTYPE feedback><feedback/>"), ContainerKind::Xml);
        assert_eq!(sniff(b"< not markup"), ContainerKind::BinaryUnknown);
    }

    #[test]
    fn test_html_after_preamble() {
        let body = b"Report below:\r\n<html><body><table><tr><td>1</td></tr></table></body></html>";
        assert_eq!(sniff(body), ContainerKind::Html);
        let doctype = b"Forwarded report\n\n<!DOCTYPE HTML PUBLIC \"-//W3C//DTD HTML 4.01//EN\">";
        assert_eq!(sniff(doctype), ContainerKind::Html);
        // Mail whose body is HTML is still mail.
        let eml = b"From: a@example.com\r\nSubject: x\r\n\r\n<html><body>hi</body></html>";
        assert_eq!(sniff(eml), ContainerKind::Eml);
    }

    #[test]
    fn test_html_fragments() {
        assert_eq!(sniff(b"<table><tr><td>192.0.2.1</td></tr></table>"), ContainerKind::Html);
        assert_eq!(sniff(b"  <div class=\"report\"><p>x</p></div>"), ContainerKind::Html);
        assert_eq!(sniff(b"<META charset=\"utf-8\"><p>x</p>"), ContainerKind::Html);
        // Report schema roots that share a prefix with an HTML element stay XML.
        assert_eq!(sniff(b"<policy_published/>"), ContainerKind::Xml);
        assert_eq!(sniff(b"<feedback><record/></feedback>"), ContainerKind::Xml);
    }

    #[test]
    fn test_message_header_block() {
        let eml = b"From: a@example.com\r\nTo: b@example.com\r\nSubject: Report\r\n\tcontinued\r\n\r\nbody";
        assert_eq!(sniff(eml), ContainerKind::Eml);
        let arf = b"Feedback-Type: auth-failure\r\nUser-Agent: x\r\nVersion: 1\r\n";
        assert_eq!(sniff(arf), ContainerKind::BinaryUnknown);
        let prose = b"From: somewhere\r\nthis line is prose\r\nSubject: x\r\n";
        assert_eq!(sniff(prose), ContainerKind::BinaryUnknown);
    }

    #[test]
    fn test_unknown_and_empty() {
        assert_eq!(sniff(b""), ContainerKind::BinaryUnknown);
        assert_eq!(sniff(&[0x00, 0xff, 0x10, 0x20]), ContainerKind::BinaryUnknown);
        assert_eq!(sniff(b"PK"), ContainerKind::BinaryUnknown);
    }

    #[test]
    fn test_sniff_is_deterministic() {
        let data = b"Received: from mx\r\nFrom: a@b\r\n\r\nx".to_vec();
        assert_eq!(sniff(&data), sniff(&data.clone()));
    }
}
