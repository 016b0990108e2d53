//! Mail Handler Module
//!
//! Extraction strategy for RFC 5322 messages. Every non-multipart MIME part that
//! carries content becomes a child, inline bodies included, because some
//! providers paste the report into an HTML body instead of attaching it.
use mailparse::{MailHeaderMap, ParsedMail};

use crate::config::Config;
use crate::file_handlers::Extraction;
use crate::models::{RawNode, Warning, WarningKind};

/// Extracts the MIME parts of a message.
pub fn extract_eml(node: &RawNode, config: &Config) -> Extraction {
    let mut out = Extraction::default();
    let parsed = match mailparse::parse_mail(&node.bytes) {
        Ok(parsed) => parsed,
        Err(e) => {
            out.warn(Warning::new(
                WarningKind::UnreadableContainer,
                node.location(),
                format!("could not parse message: {}", e),
            ));
            return out;
        }
    };
    let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
    log::info!("Processing EML: {} ({})", node.name, subject);

    let mut walker = PartWalker {
        node,
        max_parts: config.max_members_per_container,
        index: 0,
        out: &mut out,
    };
    walker.visit(&parsed);
    out
}

struct PartWalker<'a> {
    node: &'a RawNode,
    max_parts: usize,
    index: usize,
    out: &'a mut Extraction,
}

impl PartWalker<'_> {
    fn visit(&mut self, part: &ParsedMail<'_>) {
        if part.ctype.mimetype.starts_with("multipart/") && !part.subparts.is_empty() {
            for sub in &part.subparts {
                self.visit(sub);
            }
            return;
        }

        self.index += 1;
        if self.index > self.max_parts {
            if self.index == self.max_parts + 1 {
                self.out.warn(Warning::new(
                    WarningKind::PartialMemberFailure,
                    self.node.location(),
                    "too many MIME parts; remaining parts skipped",
                ));
            }
            return;
        }
        let name = part_name(part, self.index);
        if part.ctype.mimetype.starts_with("multipart/") {
            // A multipart container whose boundary never matched.
            self.out.warn(Warning::for_member(
                WarningKind::PartialMemberFailure,
                self.node.location(),
                name,
                "multipart body without recognizable parts",
            ));
            return;
        }
        match part.get_body_raw() {
            Ok(body) => {
                if body.iter().all(|b| b.is_ascii_whitespace()) {
                    return;
                }
                log::debug!("MIME part {} ({}, {} bytes)", name, part.ctype.mimetype, body.len());
                self.out.children.push(self.node.child(name, body));
            }
            Err(e) => self.out.warn(Warning::for_member(
                WarningKind::PartialMemberFailure,
                self.node.location(),
                name,
                format!("could not decode part: {}", e),
            )),
        }
    }
}

/// The part's declared file name, or `part-N.<ext>` derived from its MIME type.
fn part_name(part: &ParsedMail<'_>, index: usize) -> String {
    let disposition = part.get_content_disposition();
    let declared = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if let Some(name) = declared {
        return name;
    }
    let ext = match part.ctype.mimetype.as_str() {
        "text/html" => "html",
        "text/plain" => "txt",
        "text/xml" | "application/xml" => "xml",
        "message/feedback-report" => "arf",
        "message/rfc822" => "eml",
        "application/zip" | "application/x-zip-compressed" => "zip",
        "application/gzip" | "application/x-gzip" => "gz",
        _ => "bin",
    };
    format!("part-{}.{}", index, ext)
}
