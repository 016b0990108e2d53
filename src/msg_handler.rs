//! MSG Handler Module
//!
//! Extraction strategy for Outlook `.msg` files. A message is an OLE compound
//! file whose properties live in `__substg1.0_<tag><type>` streams; every
//! attachment is a `__attach_version1.0_#NNNNNNNN` storage holding its data and
//! file name. Other compound documents (Word, Excel) carry no message
//! properties and are reported as an unsupported variant.
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};

use cfb::CompoundFile;

use crate::config::Config;
use crate::file_handlers::{read_bounded, Extraction};
use crate::models::{RawNode, Warning, WarningKind};

const PROPERTY_PREFIX: &str = "__substg1.0_";
const ATTACHMENT_PREFIX: &str = "__attach_version1.0_#";

// Property tags.
const PR_SUBJECT: &str = "0037";
const PR_SENDER_EMAIL: &str = "0C1F";
const PR_SENDER_NAME: &str = "0C1A";
const PR_DISPLAY_TO: &str = "0E04";
const PR_BODY: &str = "1000";
const PR_HTML: &str = "1013";
const PR_ATTACH_DATA: &str = "3701";
const PR_ATTACH_FILENAME: &str = "3704";
const PR_ATTACH_LONG_FILENAME: &str = "3707";

// Property types.
const PT_UNICODE: &str = "001F";
const PT_STRING8: &str = "001E";
const PT_BINARY: &str = "0102";

/// Envelope fields of a message.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MsgEnvelope {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub html_body: Option<Vec<u8>>,
}

impl MsgEnvelope {
    /// The body worth emitting as a document: an HTML body carrying a table,
    /// or a plain body into which an HTML table was pasted.
    fn report_body(&self) -> Option<Vec<u8>> {
        if let Some(html) = &self.html_body {
            if contains_table(html) {
                return Some(html.clone());
            }
        }
        self.body
            .as_ref()
            .filter(|body| contains_table(body.as_bytes()))
            .map(|body| body.as_bytes().to_vec())
    }
}

fn contains_table(bytes: &[u8]) -> bool {
    String::from_utf8_lossy(bytes).to_lowercase().contains("<table")
}

/// Extracts the attachments (and a report-like body) of an Outlook message.
pub fn extract_msg(node: &RawNode, config: &Config) -> Extraction {
    let mut out = Extraction::default();
    let location = node.location();

    let mut comp = match CompoundFile::open(Cursor::new(node.bytes.as_slice())) {
        Ok(comp) => comp,
        Err(e) => {
            out.warn(Warning::new(
                WarningKind::UnreadableContainer,
                location,
                format!("invalid compound file: {}", e),
            ));
            return out;
        }
    };
    let root = match storage_children(&comp, Path::new("/")) {
        Ok(children) => children,
        Err(e) => {
            out.warn(Warning::new(
                WarningKind::UnreadableContainer,
                location,
                format!("unreadable root storage: {}", e),
            ));
            return out;
        }
    };
    if !root.iter().any(|(name, _)| name.starts_with(PROPERTY_PREFIX)) {
        out.warn(Warning::new(
            WarningKind::UnreadableContainer,
            location,
            "unsupported compound file variant: no message properties",
        ));
        return out;
    }

    let limit = config.max_decompressed_size;
    let (envelope, unreadable) = read_envelope(&mut comp, Path::new("/"), limit);
    for reason in unreadable {
        out.warn(Warning::for_member(
            WarningKind::PartialMemberFailure,
            location.clone(),
            "body.html",
            reason,
        ));
    }
    log::info!(
        "Processing MSG: {} (subject: {})",
        node.name,
        envelope.subject.as_deref().unwrap_or("")
    );
    log::debug!(
        "MSG envelope from={:?} to={:?}",
        envelope.from,
        envelope.to
    );
    if let Some(body) = envelope.report_body() {
        out.children.push(node.child("body.html", body));
    }

    let mut attachments: Vec<&(String, PathBuf)> = root
        .iter()
        .filter(|(name, _)| name.starts_with(ATTACHMENT_PREFIX))
        .collect();
    attachments.sort_by(|a, b| a.0.cmp(&b.0));
    if attachments.len() > config.max_members_per_container {
        out.warn(Warning::new(
            WarningKind::PartialMemberFailure,
            location.clone(),
            format!("too many attachments ({}); extra ones skipped", attachments.len()),
        ));
        attachments.truncate(config.max_members_per_container);
    }

    for (index, (storage_name, path)) in attachments.into_iter().enumerate() {
        let file_name = string_property(&mut comp, path, PR_ATTACH_LONG_FILENAME, limit)
            .or_else(|| string_property(&mut comp, path, PR_ATTACH_FILENAME, limit))
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("attachment-{}.bin", index + 1));
        let data_path = property_path(path, PR_ATTACH_DATA, PT_BINARY);
        if !comp.is_stream(&data_path) {
            // Embedded messages and OLE objects are storages, not data streams.
            out.warn(Warning::for_member(
                WarningKind::PartialMemberFailure,
                location.clone(),
                file_name,
                format!("{} has no attachment data stream", storage_name),
            ));
            continue;
        }
        match read_stream(&mut comp, &data_path, limit) {
            Ok(Some(data)) => out.children.push(node.child(file_name, data)),
            Ok(None) => out.warn(Warning::for_member(
                WarningKind::PartialMemberFailure,
                location.clone(),
                file_name,
                "attachment size exceeds limit",
            )),
            Err(e) => out.warn(Warning::for_member(
                WarningKind::PartialMemberFailure,
                location.clone(),
                file_name,
                format!("could not read attachment: {}", e),
            )),
        }
    }
    out
}

/// Reads the envelope properties stored directly under `dir`.
///
/// Also returns why a plain or HTML body that is present could not be read.
pub fn read_envelope<F: Read + Seek>(
    comp: &mut CompoundFile<F>,
    dir: &Path,
    limit: usize,
) -> (MsgEnvelope, Vec<String>) {
    let mut unreadable = Vec::new();
    let html_body = body_property(comp, dir, PR_HTML, limit).unwrap_or_else(|reason| {
        unreadable.push(reason);
        None
    });
    let body = body_property(comp, dir, PR_BODY, limit)
        .unwrap_or_else(|reason| {
            unreadable.push(reason);
            None
        })
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
    let from = string_property(comp, dir, PR_SENDER_EMAIL, limit)
        .or_else(|| string_property(comp, dir, PR_SENDER_NAME, limit));
    let envelope = MsgEnvelope {
        from,
        to: string_property(comp, dir, PR_DISPLAY_TO, limit),
        subject: string_property(comp, dir, PR_SUBJECT, limit),
        body,
        html_body,
    };
    (envelope, unreadable)
}

/// Reads a body property in whichever of the binary, UTF-16LE or 8-bit forms
/// is present. `Err` carries the reason a present stream could not be read.
fn body_property<F: Read + Seek>(
    comp: &mut CompoundFile<F>,
    dir: &Path,
    tag: &str,
    limit: usize,
) -> std::result::Result<Option<Vec<u8>>, String> {
    for kind in [PT_BINARY, PT_UNICODE, PT_STRING8] {
        let path = property_path(dir, tag, kind);
        if !comp.is_stream(&path) {
            continue;
        }
        return match read_stream(comp, &path, limit) {
            Ok(Some(bytes)) if kind == PT_UNICODE => Ok(Some(decode_utf16le(&bytes).into_bytes())),
            Ok(Some(bytes)) if kind == PT_STRING8 => {
                Ok(Some(String::from_utf8_lossy(&bytes).trim_end_matches('\0').as_bytes().to_vec()))
            }
            Ok(Some(bytes)) => Ok(Some(bytes)),
            Ok(None) => Err(format!("message body exceeds size limit ({} bytes)", limit)),
            Err(e) => Err(format!("could not read message body: {}", e)),
        };
    }
    Ok(None)
}

fn storage_children<F: Read + Seek>(comp: &CompoundFile<F>, dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    Ok(comp
        .read_storage(dir)?
        .map(|entry| (entry.name().to_string(), entry.path().to_path_buf()))
        .collect())
}

fn property_path(dir: &Path, tag: &str, kind: &str) -> PathBuf {
    dir.join(format!("{}{}{}", PROPERTY_PREFIX, tag, kind))
}

fn read_stream<F: Read + Seek>(
    comp: &mut CompoundFile<F>,
    path: &Path,
    limit: usize,
) -> std::io::Result<Option<Vec<u8>>> {
    let stream = comp.open_stream(path)?;
    read_bounded(stream, limit)
}

/// Reads a string property, preferring the UTF-16LE form over the 8-bit one.
fn string_property<F: Read + Seek>(
    comp: &mut CompoundFile<F>,
    dir: &Path,
    tag: &str,
    limit: usize,
) -> Option<String> {
    let unicode = property_path(dir, tag, PT_UNICODE);
    if comp.is_stream(&unicode) {
        let bytes = read_stream(comp, &unicode, limit).ok().flatten()?;
        return Some(decode_utf16le(&bytes));
    }
    let ansi = property_path(dir, tag, PT_STRING8);
    if comp.is_stream(&ansi) {
        let bytes = read_stream(comp, &ansi, limit).ok().flatten()?;
        return Some(String::from_utf8_lossy(&bytes).trim_end_matches('\0').to_string());
    }
    None
}

fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    fn build_msg(subject: &str, attachments: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
        let mut comp = CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        comp.create_stream("/__substg1.0_0037001F")
            .unwrap()
            .write_all(&utf16(subject))
            .unwrap();
        for (i, (name, data)) in attachments.iter().enumerate() {
            let dir = format!("/{}{:08X}", ATTACHMENT_PREFIX, i);
            comp.create_storage(&dir).unwrap();
            comp.create_stream(format!("{}/__substg1.0_3707001F", dir))
                .unwrap()
                .write_all(&utf16(name))
                .unwrap();
            if let Some(data) = data {
                comp.create_stream(format!("{}/__substg1.0_37010102", dir))
                    .unwrap()
                    .write_all(data)
                    .unwrap();
            } else {
                comp.create_storage(format!("{}/__substg1.0_3701000D", dir)).unwrap();
            }
        }
        comp.flush().unwrap();
        comp.into_inner().into_inner()
    }

    #[test]
    fn test_attachments_become_children() {
        let bytes = build_msg(
            "Report domain: example.com",
            &[("a.xml", Some(b"<feedback/>")), ("b.zip", Some(b"PK\x05\x06"))],
        );
        let out = extract_msg(&RawNode::root("mail.msg", bytes), &Config::default());
        assert!(out.warnings.is_empty());
        let names: Vec<_> = out.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a.xml", "b.zip"]);
        assert_eq!(out.children[0].bytes, b"<feedback/>");
    }

    #[test]
    fn test_embedded_object_is_partial_failure() {
        let bytes = build_msg("x", &[("inner.msg", None), ("a.xml", Some(b"<feedback/>"))]);
        let out = extract_msg(&RawNode::root("mail.msg", bytes), &Config::default());
        assert_eq!(out.children.len(), 1);
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].kind, WarningKind::PartialMemberFailure);
        assert_eq!(out.warnings[0].member.as_deref(), Some("inner.msg"));
    }

    #[test]
    fn test_html_body_with_table_is_emitted() {
        let mut comp = CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        comp.create_stream("/__substg1.0_0037001F")
            .unwrap()
            .write_all(&utf16("Aggregate"))
            .unwrap();
        comp.create_stream("/__substg1.0_10130102")
            .unwrap()
            .write_all(b"<html><table><tr><td>1.2.3.4</td></tr></table></html>")
            .unwrap();
        comp.flush().unwrap();
        let bytes = comp.into_inner().into_inner();
        let out = extract_msg(&RawNode::root("body.msg", bytes), &Config::default());
        assert_eq!(out.children.len(), 1);
        assert_eq!(out.children[0].name, "body.html");
    }

    #[test]
    fn test_oversized_html_body_is_reported() {
        let mut comp = CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        comp.create_stream("/__substg1.0_0037001F")
            .unwrap()
            .write_all(&utf16("Aggregate"))
            .unwrap();
        let mut html = b"<html><table>".to_vec();
        html.extend(std::iter::repeat(b"<tr><td>192.0.2.1</td></tr>".as_slice()).take(20).flatten());
        html.extend_from_slice(b"</table></html>");
        comp.create_stream("/__substg1.0_10130102")
            .unwrap()
            .write_all(&html)
            .unwrap();
        let dir = format!("/{}{:08X}", ATTACHMENT_PREFIX, 0);
        comp.create_storage(&dir).unwrap();
        comp.create_stream(format!("{}/__substg1.0_3707001F", dir))
            .unwrap()
            .write_all(&utf16("a.xml"))
            .unwrap();
        comp.create_stream(format!("{}/__substg1.0_37010102", dir))
            .unwrap()
            .write_all(b"<feedback/>")
            .unwrap();
        comp.flush().unwrap();
        let bytes = comp.into_inner().into_inner();

        let config = Config {
            max_decompressed_size: 64,
            ..Config::default()
        };
        let out = extract_msg(&RawNode::root("big.msg", bytes), &config);
        assert_eq!(out.children.len(), 1);
        assert_eq!(out.children[0].name, "a.xml");
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].kind, WarningKind::PartialMemberFailure);
        assert_eq!(out.warnings[0].member.as_deref(), Some("body.html"));
    }

    #[test]
    fn test_non_message_compound_file_is_unreadable() {
        let mut comp = CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        comp.create_stream("/WordDocument").unwrap().write_all(b"doc").unwrap();
        comp.flush().unwrap();
        let bytes = comp.into_inner().into_inner();
        let out = extract_msg(&RawNode::root("x.doc", bytes), &Config::default());
        assert!(out.children.is_empty());
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].kind, WarningKind::UnreadableContainer);
    }

    #[test]
    fn test_envelope_strings() {
        assert_eq!(decode_utf16le(&utf16("Hi\0")), "Hi");
    }
}
