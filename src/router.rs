//! Output Router Module
//!
//! Copies classified leaves into one destination area per label
//! (`rua/`, `ruf/`, `unclassified/`) under the output directory and builds the
//! manifest entry for each. Member names coming out of archives and mail are
//! untrusted, so only a sanitised final component is ever used on disk.
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use crate::classifier::Classification;
use crate::config::Config;
use crate::error::Result;
use crate::models::{ClassificationLabel, LeafDocument, ManifestEntry, Warning, WarningKind};

const LABELS: [ClassificationLabel; 3] = [
    ClassificationLabel::Rua,
    ClassificationLabel::Ruf,
    ClassificationLabel::Unclassified,
];

#[derive(Debug)]
pub struct OutputRouter {
    root: PathBuf,
    max_filename_length: usize,
    stage_only: bool,
    /// File names handed out during this run, per area.
    taken: HashMap<ClassificationLabel, HashSet<String>>,
}

impl OutputRouter {
    pub fn new(root: impl Into<PathBuf>, config: &Config) -> Self {
        Self {
            root: root.into(),
            max_filename_length: config.max_filename_length,
            stage_only: false,
            taken: HashMap::new(),
        }
    }

    /// Plans destinations without writing anything.
    pub fn stage_only(mut self, stage_only: bool) -> Self {
        self.stage_only = stage_only;
        self
    }

    /// Creates the destination areas.
    ///
    /// # Errors
    ///
    /// Returns an error if a destination directory cannot be created.
    pub fn prepare(&self) -> Result<()> {
        if self.stage_only {
            return Ok(());
        }
        for label in LABELS {
            fs::create_dir_all(self.area(label))?;
        }
        Ok(())
    }

    pub fn area(&self, label: ClassificationLabel) -> PathBuf {
        self.root.join(label.dir_name())
    }

    /// Places one leaf in its label's area and returns its manifest entry.
    ///
    /// A file left over from an earlier run under the same name is replaced, so
    /// routing the same inputs twice leaves the same tree behind.
    pub fn route(&mut self, doc: &LeafDocument, classification: Classification) -> ManifestEntry {
        let mut warnings = doc.warnings.clone();
        warnings.extend(classification.warnings);

        let file_name = self.reserve(classification.label, &sanitize_file_name(doc, self.max_filename_length));
        let target = self.area(classification.label).join(file_name);
        let destination = if self.stage_only {
            Some(target)
        } else {
            match fs::write(&target, &doc.content) {
                Ok(()) => {
                    log::debug!("Routed {} -> {}", doc.name, target.display());
                    Some(target)
                }
                Err(e) => {
                    let mut path = doc.provenance.clone();
                    path.push(doc.name.clone());
                    let warning = Warning::new(
                        WarningKind::RouteFailed,
                        path,
                        format!("could not write {}: {}", target.display(), e),
                    );
                    log::warn!("{}", warning);
                    warnings.push(warning);
                    None
                }
            }
        };

        ManifestEntry {
            provenance: doc.provenance.clone(),
            name: doc.name.clone(),
            kind: doc.kind,
            size: doc.content.len() as u64,
            label: classification.label,
            confidence: classification.confidence,
            rua_score: classification.rua_score,
            ruf_score: classification.ruf_score,
            destination,
            warnings,
        }
    }

    /// First free variant of `name` in the area: `name`, `stem_1.ext`, `stem_2.ext`, ...
    fn reserve(&mut self, label: ClassificationLabel, name: &str) -> String {
        let taken = self.taken.entry(label).or_default();
        if taken.insert(name.to_string()) {
            return name.to_string();
        }
        let (stem, ext) = split_extension(name);
        let mut counter = 1;
        loop {
            let candidate = match ext {
                Some(ext) => format!("{}_{}.{}", stem, counter, ext),
                None => format!("{}_{}", stem, counter),
            };
            if taken.insert(candidate.clone()) {
                return candidate;
            }
            counter += 1;
        }
    }
}

/// A file name safe to create inside a destination area.
///
/// Keeps only the final path component of the leaf's name, drops the `#n`
/// suffix added for duplicate members, replaces unusual characters, adds an
/// extension from the content kind when there is none, and caps the length.
pub fn sanitize_file_name(doc: &LeafDocument, max_len: usize) -> String {
    let last = doc
        .name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let last = strip_duplicate_suffix(last);

    let mut name: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '!' | '@' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect();
    name = name.trim_start_matches('.').to_string();
    if name.is_empty() {
        name = "document".to_string();
    }
    if split_extension(&name).1.is_none() {
        name = format!("{}.{}", name, doc.kind.default_extension());
    }

    if name.len() > max_len {
        let (stem, ext) = split_extension(&name);
        let ext = match ext {
            // The stem must keep at least one character.
            Some(ext) if ext.len() + 2 <= max_len => ext,
            _ => doc.kind.default_extension(),
        };
        let keep = max_len.saturating_sub(ext.len() + 1).max(1);
        name = format!("{}.{}", &stem[..keep.min(stem.len())], ext);
    }
    name
}

fn strip_duplicate_suffix(name: &str) -> &str {
    match name.rsplit_once('#') {
        Some((base, n)) if !base.is_empty() && !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => base,
        _ => name,
    }
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}
