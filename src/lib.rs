//! DMARC Sorter Library
//!
//! This library recursively unpacks mailbox exports and report archives (ZIP,
//! GZIP, TAR, RFC 5322 mail, Outlook .msg) down to individual documents, labels
//! each one as an aggregate (RUA) or failure (RUF) DMARC report, copies it into
//! the matching destination area and records everything in a manifest.

pub mod classifier;
pub mod config;
pub mod error;
pub mod file_handlers;
pub mod mail_handler;
pub mod models;
pub mod msg_handler;
pub mod pipeline;
pub mod router;
pub mod sniffer;
pub mod walker;
pub mod webhook;
pub mod xml_parser;
pub mod zip_handler;

pub use classifier::{Classification, ReportClassifier};
pub use config::Config;
pub use error::{DmarcError, Result};
pub use models::{ClassificationLabel, ContainerKind, Manifest, ManifestEntry, Warning, WarningKind};
pub use pipeline::{write_manifest, Pipeline};
pub use sniffer::sniff;
pub use walker::Walker;
