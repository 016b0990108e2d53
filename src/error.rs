//! Error Handling Module
//!
//! This module defines custom error types for the sorter using the `thiserror` crate.
//! Only run-level failures surface as errors; everything that goes wrong while
//! unpacking a single container is recorded as a [`crate::models::Warning`] instead.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DmarcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("File too large: {0}")]
    FileTooLarge(String),

    #[error("Input not found: {}", .0.display())]
    MissingInput(PathBuf),
}

pub type Result<T> = std::result::Result<T, DmarcError>;
