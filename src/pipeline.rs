//! Pipeline Module
//!
//! Runs walk, classify and route over a set of input paths and assembles the
//! manifest. Leaves are classified in parallel with rayon; routing runs in leaf
//! order so destination names are assigned the same way on every run.
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::classifier::{Classification, ReportClassifier};
use crate::config::Config;
use crate::error::Result;
use crate::models::{Manifest, WarningKind};
use crate::router::OutputRouter;
use crate::walker::Walker;

pub struct Pipeline {
    config: Config,
    classifier: ReportClassifier,
    stage_only: bool,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            classifier: ReportClassifier::default(),
            stage_only: false,
        }
    }

    /// Replaces the default classifier.
    pub fn with_classifier(mut self, classifier: ReportClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Plans destinations without copying any file.
    pub fn stage_only(mut self, stage_only: bool) -> Self {
        self.stage_only = stage_only;
        self
    }

    /// Processes `roots` and returns the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if a root path does not exist or the output areas cannot
    /// be created. Every other problem ends up as a warning in the manifest.
    pub fn run(&self, roots: &[PathBuf]) -> Result<Manifest> {
        let walked = Walker::new(self.config.clone()).walk(roots)?;

        let mut router = OutputRouter::new(&self.config.output_dir, &self.config).stage_only(self.stage_only);
        router.prepare()?;

        let classifications: Vec<Classification> = walked
            .leaves
            .par_iter()
            .map(|leaf| self.classifier.classify(leaf))
            .collect();

        let mut manifest = Manifest {
            entries: Vec::with_capacity(walked.leaves.len()),
            warnings: walked.warnings,
        };
        for (leaf, classification) in walked.leaves.iter().zip(classifications) {
            let entry = router.route(leaf, classification);
            manifest.warnings.extend(
                entry
                    .warnings
                    .iter()
                    .filter(|w| w.kind == WarningKind::RouteFailed)
                    .cloned(),
            );
            manifest.entries.push(entry);
        }

        let counts = manifest.counts();
        log::info!(
            "Sorted {} document(s): {} RUA, {} RUF, {} unclassified, {} warning(s)",
            manifest.entries.len(),
            counts.rua,
            counts.ruf,
            counts.unclassified,
            manifest.warnings.len()
        );
        Ok(manifest)
    }
}

/// Writes the manifest as pretty-printed JSON.
pub fn write_manifest(manifest: &Manifest, path: &Path) -> anyhow::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), manifest)?;
    Ok(())
}
