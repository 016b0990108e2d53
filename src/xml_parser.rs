//! XML Parser Module
//!
//! This module reads an XML document far enough to tell what kind of report it
//! is: the root element, the set of element names present and the text content.
//! It enforces a nesting depth limit to protect against attacks such as the
//! Billion Laughs attack. Moreover, it completely disables the processing of
//! DOCTYPE declarations (and hence external/internal entities) by removing any
//! DOCTYPE block from the input. If a DOCTYPE block contains two or more entity
//! definitions, the XML is rejected.

use crate::error::{DmarcError, Result};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::collections::BTreeSet;

const MAX_DEPTH: u32 = 20;

/// Structural outline of an XML document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlShape {
    /// Local name of the root element, lowercased.
    pub root: String,
    /// Local names of every element seen, lowercased.
    pub elements: BTreeSet<String>,
    /// Text nodes joined with single spaces.
    pub text: String,
}

impl XmlShape {
    pub fn has(&self, element: &str) -> bool {
        self.elements.contains(element)
    }

    /// Element names (underscores read as spaces) followed by the text content,
    /// lowercased, for vocabulary scoring.
    pub fn searchable_text(&self) -> String {
        let mut out = String::new();
        for name in &self.elements {
            out.push_str(&name.replace('_', " "));
            out.push(' ');
        }
        out.push_str(&self.text.to_lowercase());
        out
    }
}

/// Removes a DOCTYPE block, rejecting ones that define recursive entities.
fn strip_doctype(xml_content: &str) -> Result<String> {
    let Some(start) = xml_content.find("<!DOCTYPE") else {
        return Ok(xml_content.to_string());
    };
    let rest = &xml_content[start..];
    // Internal subsets end with "]>", plain declarations with ">".
    let end = match rest.find('[') {
        Some(open) if open < rest.find('>').unwrap_or(usize::MAX) => rest.find("]>").map(|e| e + 2),
        _ => rest.find('>').map(|e| e + 1),
    };
    let Some(end) = end else {
        // If we cannot find the end of the DOCTYPE, use the original XML.
        return Ok(xml_content.to_string());
    };
    let doctype = &rest[..end];
    if doctype.matches("<!ENTITY").count() >= 2 {
        return Err(DmarcError::Format("Recursive entities detected".into()));
    }
    Ok(format!("{}{}", &xml_content[..start], &rest[end..]))
}

/// Reads the document and returns its outline.
///
/// # Errors
///
/// Returns an error if the XML is not well formed, if the nesting depth limit is
/// exceeded, if the DOCTYPE defines two or more entities, or if there is no root element.
pub fn probe_xml(xml_content: &str) -> Result<XmlShape> {
    let cleaned_xml = strip_doctype(xml_content)?;

    let mut reader = Reader::from_str(&cleaned_xml);
    reader.config_mut().trim_text(true);

    let mut shape = XmlShape::default();
    let mut texts: Vec<String> = Vec::new();
    let mut depth: u32 = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                depth += 1;
                if depth > MAX_DEPTH {
                    return Err(DmarcError::Format("XML nesting depth limit exceeded".into()));
                }
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase();
                if shape.root.is_empty() {
                    shape.root = name.clone();
                }
                shape.elements.insert(name);
            }
            Ok(Event::Empty(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase();
                if shape.root.is_empty() {
                    shape.root = name.clone();
                }
                shape.elements.insert(name);
            }
            Ok(Event::Text(ref e)) => {
                let text = match e.unescape() {
                    Ok(text) => text.into_owned(),
                    Err(_) => String::from_utf8_lossy(e).into_owned(),
                };
                if !text.is_empty() {
                    texts.push(text);
                }
            }
            Ok(Event::CData(ref e)) => {
                texts.push(String::from_utf8_lossy(e).trim().to_string());
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(DmarcError::Xml(e)),
            _ => (),
        }
    }

    if shape.root.is_empty() {
        return Err(DmarcError::Format("No root element".into()));
    }
    shape.text = texts.join(" ");
    Ok(shape)
}
