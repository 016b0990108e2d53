//! File Handlers Module
//!
//! This module dispatches a node to the extraction strategy of its container
//! kind and provides the shared plumbing used by the strategies: bounded reads,
//! reading root files with the size limit applied, and making member names
//! unique within their container.
use std::collections::HashSet;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::config::Config;
use crate::error::{DmarcError, Result};
use crate::mail_handler::extract_eml;
use crate::models::{ContainerKind, RawNode, Warning};
use crate::msg_handler::extract_msg;
use crate::zip_handler::{extract_gzip, extract_tar, extract_zip};

const BUFFER_SIZE: usize = 8192; // 8KB buffer

/// Children recovered from one container plus the problems met on the way.
#[derive(Debug, Default)]
pub struct Extraction {
    pub children: Vec<RawNode>,
    pub warnings: Vec<Warning>,
}

impl Extraction {
    /// Records a warning and logs it.
    pub fn warn(&mut self, warning: Warning) {
        log::warn!("{}", warning);
        self.warnings.push(warning);
    }
}

/// FileHandler yields the immediate children of container nodes.
#[derive(Debug, Clone)]
pub struct FileHandler {
    config: Config,
}

impl FileHandler {
    /// Creates a new FileHandler with the given configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reads a root input file, applying the file size limit.
    pub fn read_root(&self, path: &Path) -> Result<RawNode> {
        if !path.exists() {
            return Err(DmarcError::MissingInput(path.to_path_buf()));
        }
        let metadata = std::fs::metadata(path)?;
        if metadata.len() > self.config.max_file_size as u64 {
            return Err(DmarcError::FileTooLarge(format!(
                "File size {} bytes exceeds limit of {} bytes",
                metadata.len(),
                self.config.max_file_size
            )));
        }
        let file = std::fs::File::open(path)?;
        let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
        let mut bytes = Vec::with_capacity(metadata.len() as usize);
        reader.read_to_end(&mut bytes)?;
        Ok(RawNode::root(path.display().to_string(), bytes))
    }

    /// Returns the immediate children of `node`, which sniffed as `kind`.
    /// Terminal kinds have no children.
    pub fn children_of(&self, node: &RawNode, kind: ContainerKind) -> Extraction {
        let mut out = match kind {
            ContainerKind::Zip => {
                log::info!("Extracting ZIP: {}", node.name);
                extract_zip(node, &self.config)
            }
            ContainerKind::Gzip => {
                log::info!("Extracting GZ: {}", node.name);
                extract_gzip(node, &self.config)
            }
            ContainerKind::Tar => {
                log::info!("Extracting TAR: {}", node.name);
                extract_tar(node, &self.config)
            }
            ContainerKind::Eml => extract_eml(node, &self.config),
            ContainerKind::ProprietaryMail => extract_msg(node, &self.config),
            ContainerKind::Xml | ContainerKind::Html | ContainerKind::BinaryUnknown => {
                Extraction::default()
            }
        };
        disambiguate_names(&mut out.children);
        out
    }
}

/// Reads at most `limit` bytes. Returns `None` when the source holds more.
pub(crate) fn read_bounded<R: Read>(reader: R, limit: usize) -> io::Result<Option<Vec<u8>>> {
    let mut contents = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut contents)?;
    if contents.len() > limit {
        return Ok(None);
    }
    Ok(Some(contents))
}

/// Appends `#n` to repeated names so that every child of a container is unique.
fn disambiguate_names(children: &mut [RawNode]) {
    let mut taken: HashSet<String> = HashSet::new();
    for child in children.iter_mut() {
        if taken.insert(child.name.clone()) {
            continue;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}#{}", child.name, n);
            if taken.insert(candidate.clone()) {
                child.name = candidate;
                break;
            }
            n += 1;
        }
    }
}
