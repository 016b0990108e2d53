//! Recursive Walker Module
//!
//! Depth-first traversal over nested containers. Each node is sniffed; container
//! kinds are expanded through the [`FileHandler`], everything else becomes a
//! [`LeafDocument`]. Traversal is pre-order with children in extraction order,
//! so repeated runs over the same inputs produce the same leaf sequence.
//!
//! Roots are independent: each is walked on a rayon worker with its own
//! [`RunContext`], and the contexts are merged in input order afterwards.
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{DmarcError, Result};
use crate::file_handlers::FileHandler;
use crate::models::{LeafDocument, RawNode, Warning, WarningKind};
use crate::sniffer::sniff;

/// Everything a traversal produced: the leaves and the run-level warnings.
#[derive(Debug, Default)]
pub struct RunContext {
    pub leaves: Vec<LeafDocument>,
    pub warnings: Vec<Warning>,
}

impl RunContext {
    fn warn(&mut self, warning: Warning) {
        log::warn!("{}", warning);
        self.warnings.push(warning);
    }

    /// Appends another context's results after this one's.
    pub fn merge(&mut self, other: RunContext) {
        self.leaves.extend(other.leaves);
        self.warnings.extend(other.warnings);
    }
}

pub struct Walker {
    handler: FileHandler,
}

impl Walker {
    pub fn new(config: Config) -> Self {
        Self {
            handler: FileHandler::new(config),
        }
    }

    /// Walks every root path. Directories are enumerated recursively.
    ///
    /// # Errors
    ///
    /// Fails only when a root path does not exist; this is checked before any
    /// traversal starts.
    pub fn walk(&self, roots: &[PathBuf]) -> Result<RunContext> {
        if let Some(missing) = roots.iter().find(|root| !root.exists()) {
            return Err(DmarcError::MissingInput(missing.clone()));
        }

        let mut ctx = RunContext::default();
        let mut files = Vec::new();
        let mut seen = HashSet::new();
        for root in roots {
            self.collect_files(root, &mut files, &mut seen, &mut ctx);
        }
        log::info!("Walking {} input file(s)", files.len());

        let per_root: Vec<RunContext> = files.par_iter().map(|path| self.walk_file(path)).collect();
        for root_ctx in per_root {
            ctx.merge(root_ctx);
        }
        Ok(ctx)
    }

    /// Walks a single file from disk.
    pub fn walk_file(&self, path: &Path) -> RunContext {
        match self.handler.read_root(path) {
            Ok(node) => self.walk_node(node),
            Err(e) => {
                let mut ctx = RunContext::default();
                ctx.warn(Warning::new(
                    WarningKind::UnreadableContainer,
                    vec![path.display().to_string()],
                    e.to_string(),
                ));
                ctx
            }
        }
    }

    /// Walks an in-memory node and everything nested inside it.
    pub fn walk_node(&self, node: RawNode) -> RunContext {
        let mut ctx = RunContext::default();
        self.visit(node, &[], &mut ctx);
        ctx
    }

    fn visit(&self, node: RawNode, inherited: &[Warning], ctx: &mut RunContext) {
        let kind = sniff(&node.bytes);
        if !kind.is_container() {
            log::debug!("Leaf {} ({}, depth {})", node.name, kind, node.depth);
            ctx.leaves.push(LeafDocument::from_node(node, kind, inherited.to_vec()));
            return;
        }

        let max_depth = self.handler.config().max_depth;
        if node.depth >= max_depth {
            let warning = Warning::new(
                WarningKind::DepthExceeded,
                node.location(),
                format!("{} not expanded: depth ceiling {} reached", kind, max_depth),
            );
            ctx.warn(warning.clone());
            let mut warnings = inherited.to_vec();
            warnings.push(warning);
            ctx.leaves.push(LeafDocument::from_node(node, kind, warnings));
            return;
        }

        let extraction = self.handler.children_of(&node, kind);
        ctx.warnings.extend(extraction.warnings.iter().cloned());
        let mut passed_down = inherited.to_vec();
        passed_down.extend(extraction.warnings);
        for child in extraction.children {
            self.visit(child, &passed_down, ctx);
        }
    }

    /// Expands a root into files, skipping ones already listed. `seen` holds the
    /// canonical paths of everything in `files`.
    fn collect_files(
        &self,
        root: &Path,
        files: &mut Vec<PathBuf>,
        seen: &mut HashSet<PathBuf>,
        ctx: &mut RunContext,
    ) {
        if root.is_file() {
            if seen.insert(canonical(root)) {
                files.push(root.to_path_buf());
            }
            return;
        }
        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    if seen.insert(canonical(entry.path())) {
                        files.push(entry.into_path());
                    }
                }
                Ok(_) => {}
                Err(e) => ctx.warn(Warning::new(
                    WarningKind::UnreadableContainer,
                    vec![e
                        .path()
                        .unwrap_or(root)
                        .display()
                        .to_string()],
                    format!("could not enumerate: {}", e),
                )),
            }
        }
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContainerKind;
    use std::io::{Cursor, Write};
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn zip_of(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in members {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_nested_archives_flatten_in_order() {
        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(b"<feedback/>").unwrap();
        let inner = zip_of(&[("inner.xml.gz", gz.finish().unwrap())]);
        let outer = zip_of(&[("first.html", b"<html></html>".to_vec()), ("inner.zip", inner)]);

        let walker = Walker::new(Config::default());
        let ctx = walker.walk_node(RawNode::root("outer.zip", outer));
        assert!(ctx.warnings.is_empty());
        assert_eq!(ctx.leaves.len(), 2);
        assert_eq!(ctx.leaves[0].name, "first.html");
        assert_eq!(ctx.leaves[0].kind, ContainerKind::Html);
        assert_eq!(ctx.leaves[1].name, "inner.xml");
        assert_eq!(ctx.leaves[1].kind, ContainerKind::Xml);
        assert_eq!(
            ctx.leaves[1].provenance,
            vec!["outer.zip", "inner.zip", "inner.xml.gz"]
        );
    }

    #[test]
    fn test_depth_ceiling_makes_container_terminal() {
        // Three levels of zip around the document, ceiling of two.
        let mut bytes = b"<feedback/>".to_vec();
        for level in (0..3).rev() {
            bytes = zip_of(&[(&format!("level{}", level), bytes)]);
        }
        let config = Config {
            max_depth: 2,
            ..Config::default()
        };
        let ctx = Walker::new(config).walk_node(RawNode::root("root.zip", bytes));
        assert_eq!(ctx.leaves.len(), 1);
        let leaf = &ctx.leaves[0];
        assert_eq!(leaf.depth, 2);
        assert_eq!(leaf.kind, ContainerKind::Zip);
        assert_eq!(ctx.warnings.len(), 1);
        assert_eq!(ctx.warnings[0].kind, WarningKind::DepthExceeded);
        assert_eq!(leaf.warnings, ctx.warnings);
    }

    #[test]
    fn test_unreadable_child_does_not_taint_siblings() {
        let outer = zip_of(&[
            ("bad.zip", b"PK\x03\x04not really".to_vec()),
            ("good.xml", b"<feedback/>".to_vec()),
        ]);
        let ctx = Walker::new(Config::default()).walk_node(RawNode::root("o.zip", outer));
        assert_eq!(ctx.leaves.len(), 1);
        assert_eq!(ctx.warnings.len(), 1);
        assert_eq!(ctx.warnings[0].kind, WarningKind::UnreadableContainer);
        // The unreadable sibling was its own container, so the good leaf is clean.
        assert!(ctx.leaves[0].warnings.is_empty());
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let walker = Walker::new(Config::default());
        let result = walker.walk(&[PathBuf::from("/no/such/input")]);
        assert!(matches!(result, Err(DmarcError::MissingInput(_))));
    }

    #[test]
    fn test_directory_roots_are_sorted_and_deduplicated() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("b.xml"), b"<feedback/>")?;
        std::fs::write(dir.path().join("a.bin"), [0u8, 1, 2])?;
        let walker = Walker::new(Config::default());
        let ctx = walker.walk(&[dir.path().to_path_buf(), dir.path().join("b.xml")])?;
        let names: Vec<_> = ctx.leaves.iter().map(|l| l.name.clone()).collect();
        assert_eq!(
            names,
            vec![
                dir.path().join("a.bin").display().to_string(),
                dir.path().join("b.xml").display().to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_overlapping_roots_keep_first_occurrence() -> Result<()> {
        let dir = tempdir()?;
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub)?;
        std::fs::write(sub.join("a.xml"), b"<feedback/>")?;
        std::fs::write(dir.path().join("b.xml"), b"<feedback/>")?;
        let walker = Walker::new(Config::default());
        let ctx = walker.walk(&[
            sub.join("a.xml"),
            dir.path().to_path_buf(),
            sub.clone(),
            dir.path().join("b.xml"),
        ])?;
        let names: Vec<_> = ctx.leaves.iter().map(|l| l.name.clone()).collect();
        assert_eq!(
            names,
            vec![
                sub.join("a.xml").display().to_string(),
                dir.path().join("b.xml").display().to_string(),
            ]
        );
        Ok(())
    }
}
