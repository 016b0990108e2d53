//! Data Models Module
//!
//! This module defines the core data structures shared by the extraction and
//! classification stages: container kinds, nodes produced while unpacking,
//! leaf documents, classification labels, warnings and the manifest handed to
//! downstream analyzers.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Content-derived kind of a byte source.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerKind {
    Zip,
    Gzip,
    Tar,
    Eml,
    ProprietaryMail,
    Xml,
    Html,
    BinaryUnknown,
}

impl ContainerKind {
    /// Whether this kind bundles other units and has to be expanded.
    pub const fn is_container(self) -> bool {
        matches!(
            self,
            ContainerKind::Zip
                | ContainerKind::Gzip
                | ContainerKind::Tar
                | ContainerKind::Eml
                | ContainerKind::ProprietaryMail
        )
    }

    /// Extension used when a leaf of this kind has to be named from scratch.
    pub const fn default_extension(self) -> &'static str {
        match self {
            ContainerKind::Zip => "zip",
            ContainerKind::Gzip => "gz",
            ContainerKind::Tar => "tar",
            ContainerKind::Eml => "eml",
            ContainerKind::ProprietaryMail => "msg",
            ContainerKind::Xml => "xml",
            ContainerKind::Html => "html",
            ContainerKind::BinaryUnknown => "bin",
        }
    }
}

/// A byte source discovered during traversal, not yet sniffed.
#[derive(Debug, Clone)]
pub struct RawNode {
    pub name: String,
    pub bytes: Vec<u8>,
    /// Container names this node was unpacked from, root first.
    pub provenance: Vec<String>,
    pub depth: usize,
}

impl RawNode {
    pub fn root(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        RawNode {
            name: name.into(),
            bytes,
            provenance: Vec::new(),
            depth: 0,
        }
    }

    /// Creates a child of this node; the child's chain is this node's chain plus its name.
    pub fn child(&self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let mut provenance = self.provenance.clone();
        provenance.push(self.name.clone());
        RawNode {
            name: name.into(),
            bytes,
            provenance,
            depth: self.depth + 1,
        }
    }

    /// Full chain identifying this node: provenance followed by its own name.
    pub fn location(&self) -> Vec<String> {
        let mut location = self.provenance.clone();
        location.push(self.name.clone());
        location
    }
}

/// A terminal unit surfaced by traversal, candidate for classification.
#[derive(Debug, Clone)]
pub struct LeafDocument {
    pub name: String,
    pub kind: ContainerKind,
    pub content: Vec<u8>,
    pub provenance: Vec<String>,
    pub depth: usize,
    pub warnings: Vec<Warning>,
}

impl LeafDocument {
    pub fn from_node(node: RawNode, kind: ContainerKind, warnings: Vec<Warning>) -> Self {
        LeafDocument {
            name: node.name,
            kind,
            content: node.bytes,
            provenance: node.provenance,
            depth: node.depth,
            warnings,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassificationLabel {
    #[serde(rename = "RUA")]
    Rua,
    #[serde(rename = "RUF")]
    Ruf,
    Unclassified,
}

impl ClassificationLabel {
    /// Name of the destination area for this label.
    pub const fn dir_name(self) -> &'static str {
        match self {
            ClassificationLabel::Rua => "rua",
            ClassificationLabel::Ruf => "ruf",
            ClassificationLabel::Unclassified => "unclassified",
        }
    }
}

/// Which classifier layer produced a label.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Structural,
    Heuristic,
    None,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    UnreadableContainer,
    PartialMemberFailure,
    DepthExceeded,
    ClassificationAmbiguous,
    RouteFailed,
}

/// A non-fatal problem recorded during a run.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    /// Chain of the container (or leaf) the warning concerns.
    pub path: Vec<String>,
    pub member: Option<String>,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, path: Vec<String>, message: impl Into<String>) -> Self {
        Warning {
            kind,
            path,
            member: None,
            message: message.into(),
        }
    }

    pub fn for_member(
        kind: WarningKind,
        path: Vec<String>,
        member: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Warning {
            kind,
            path,
            member: Some(member.into()),
            message: message.into(),
        }
    }

    /// Whether this warning stands for content that could not be recovered.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self.kind,
            WarningKind::UnreadableContainer | WarningKind::PartialMemberFailure
        )
    }
}

/// The record handed to downstream analyzers for each leaf.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ManifestEntry {
    pub provenance: Vec<String>,
    pub name: String,
    pub kind: ContainerKind,
    pub size: u64,
    pub label: ClassificationLabel,
    pub confidence: Confidence,
    pub rua_score: u32,
    pub ruf_score: u32,
    pub destination: Option<PathBuf>,
    pub warnings: Vec<Warning>,
}

impl ManifestEntry {
    /// Provenance and name joined for display, e.g. `inbox.eml > report.zip > a.xml`.
    pub fn source(&self) -> String {
        let mut parts: Vec<&str> = self.provenance.iter().map(String::as_str).collect();
        parts.push(&self.name);
        parts.join(" > ")
    }
}

/// Flat, CSV-friendly view of a manifest entry.
#[derive(Debug, Serialize)]
pub struct ManifestRow {
    pub source: String,
    pub kind: String,
    pub size: u64,
    pub label: String,
    pub confidence: String,
    pub rua_score: u32,
    pub ruf_score: u32,
    pub destination: String,
    pub warnings: usize,
}

impl From<&ManifestEntry> for ManifestRow {
    fn from(entry: &ManifestEntry) -> Self {
        ManifestRow {
            source: entry.source(),
            kind: entry.kind.to_string(),
            size: entry.size,
            label: entry.label.to_string(),
            confidence: entry.confidence.to_string(),
            rua_score: entry.rua_score,
            ruf_score: entry.ruf_score,
            destination: entry
                .destination
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            warnings: entry.warnings.len(),
        }
    }
}

/// Every classified leaf of a run plus the run-level audit trail.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct LabelCounts {
    pub rua: usize,
    pub ruf: usize,
    pub unclassified: usize,
}

impl Manifest {
    pub fn counts(&self) -> LabelCounts {
        let mut counts = LabelCounts::default();
        for entry in &self.entries {
            match entry.label {
                ClassificationLabel::Rua => counts.rua += 1,
                ClassificationLabel::Ruf => counts.ruf += 1,
                ClassificationLabel::Unclassified => counts.unclassified += 1,
            }
        }
        counts
    }

    pub fn entries_with_label(&self, label: ClassificationLabel) -> impl Iterator<Item = &ManifestEntry> + '_ {
        self.entries.iter().filter(move |e| e.label == label)
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Zip => write!(f, "zip"),
            ContainerKind::Gzip => write!(f, "gzip"),
            ContainerKind::Tar => write!(f, "tar"),
            ContainerKind::Eml => write!(f, "eml"),
            ContainerKind::ProprietaryMail => write!(f, "proprietary-mail"),
            ContainerKind::Xml => write!(f, "xml"),
            ContainerKind::Html => write!(f, "html"),
            ContainerKind::BinaryUnknown => write!(f, "binary-unknown"),
        }
    }
}
impl fmt::Display for ClassificationLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassificationLabel::Rua => write!(f, "RUA"),
            ClassificationLabel::Ruf => write!(f, "RUF"),
            ClassificationLabel::Unclassified => write!(f, "Unclassified"),
        }
    }
}
impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Structural => write!(f, "structural"),
            Confidence::Heuristic => write!(f, "heuristic"),
            Confidence::None => write!(f, "none"),
        }
    }
}
impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningKind::UnreadableContainer => write!(f, "unreadable container"),
            WarningKind::PartialMemberFailure => write!(f, "partial member failure"),
            WarningKind::DepthExceeded => write!(f, "depth exceeded"),
            WarningKind::ClassificationAmbiguous => write!(f, "classification ambiguous"),
            WarningKind::RouteFailed => write!(f, "route failed"),
        }
    }
}
impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.path.join(" > "))?;
        if let Some(member) = &self.member {
            write!(f, " [{}]", member)?;
        }
        write!(f, ": {}", self.message)
    }
}
impl FromStr for ClassificationLabel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rua" | "aggregate" => Ok(ClassificationLabel::Rua),
            "ruf" | "forensic" | "failure" => Ok(ClassificationLabel::Ruf),
            "unclassified" => Ok(ClassificationLabel::Unclassified),
            _ => Err(format!("Invalid classification label: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_extends_provenance() {
        let root = RawNode::root("inbox.eml", Vec::new());
        let zip = root.child("report.zip", Vec::new());
        let xml = zip.child("report.xml", b"<feedback/>".to_vec());
        assert_eq!(xml.provenance, vec!["inbox.eml", "report.zip"]);
        assert_eq!(xml.depth, 2);
        assert_eq!(xml.location(), vec!["inbox.eml", "report.zip", "report.xml"]);
        // Parent chains are untouched.
        assert!(root.provenance.is_empty());
    }

    #[test]
    fn test_label_parsing() {
        assert_eq!("RUA".parse::<ClassificationLabel>(), Ok(ClassificationLabel::Rua));
        assert_eq!("forensic".parse::<ClassificationLabel>(), Ok(ClassificationLabel::Ruf));
        assert!("bogus".parse::<ClassificationLabel>().is_err());
    }

    #[test]
    fn test_manifest_counts() {
        let entry = |label| ManifestEntry {
            provenance: vec!["a.zip".into()],
            name: "x.xml".into(),
            kind: ContainerKind::Xml,
            size: 1,
            label,
            confidence: Confidence::Structural,
            rua_score: 0,
            ruf_score: 0,
            destination: None,
            warnings: Vec::new(),
        };
        let manifest = Manifest {
            entries: vec![
                entry(ClassificationLabel::Rua),
                entry(ClassificationLabel::Rua),
                entry(ClassificationLabel::Unclassified),
            ],
            warnings: Vec::new(),
        };
        assert_eq!(
            manifest.counts(),
            LabelCounts { rua: 2, ruf: 0, unclassified: 1 }
        );
        assert_eq!(manifest.entries[0].source(), "a.zip > x.xml");
    }

    #[test]
    fn test_label_serializes_as_acronym() {
        let json = serde_json::to_string(&ClassificationLabel::Ruf).unwrap();
        assert_eq!(json, "\"RUF\"");
        let json = serde_json::to_string(&ContainerKind::ProprietaryMail).unwrap();
        assert_eq!(json, "\"proprietary-mail\"");
    }
}
