//! Configuration Module
//!
//! This module reads configuration values from environment variables, provides
//! sensible defaults, and validates key safety parameters such as maximum file
//! sizes, decompression limits and the nesting depth ceiling.

use anyhow::Result;
use std::env;
use std::path::PathBuf;

/// Hard upper bound for the depth ceiling; deeper nesting is never legitimate.
pub const MAX_DEPTH_LIMIT: usize = 64;

#[derive(Debug, Clone)]
pub struct Config {
    pub webhook_url: Option<String>,
    pub webhook_timeout: u64,
    /// Largest root file that will be read from disk.
    pub max_file_size: usize,
    /// Largest decompressed size of a single archive member.
    pub max_decompressed_size: usize,
    pub max_members_per_container: usize,
    pub max_compression_ratio: f64,
    pub max_filename_length: usize,
    /// Containers at this depth are not expanded (roots are depth 0).
    pub max_depth: usize,
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            webhook_url: None,
            webhook_timeout: 30,
            max_file_size: 10 * 1024 * 1024,
            max_decompressed_size: 100 * 1024 * 1024,
            max_members_per_container: 1000,
            max_compression_ratio: 1000.0,
            max_filename_length: 256,
            max_depth: 10,
            output_dir: PathBuf::from("reports"),
        }
    }
}

impl Config {
    /// Creates a new configuration by reading environment variables.
    /// If a variable is missing or empty, a default value is used.
    pub fn new() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<usize>().ok());

        let max_file_size = parsed("DMARC_MAX_FILE_SIZE").unwrap_or(defaults.max_file_size);
        if max_file_size > 500_000_000 {
            return Err(anyhow::anyhow!("Max file size too large (500MB limit)"));
        }

        // For webhook_timeout, try DMARC_WEBHOOK_TIMEOUT_SECS then DMARC_WEBHOOK_TIMEOUT.
        let webhook_timeout = lookup("DMARC_WEBHOOK_TIMEOUT_SECS")
            .or_else(|| lookup("DMARC_WEBHOOK_TIMEOUT"))
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.webhook_timeout);

        let max_decompressed_size =
            parsed("DMARC_MAX_DECOMPRESSED_SIZE").unwrap_or(defaults.max_decompressed_size);

        let max_members_per_container =
            parsed("DMARC_MAX_MEMBERS").unwrap_or(defaults.max_members_per_container);

        let max_compression_ratio = lookup("DMARC_MAX_COMPRESSION_RATIO")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.max_compression_ratio);

        let max_filename_length =
            parsed("DMARC_MAX_FILENAME_LENGTH").unwrap_or(defaults.max_filename_length);

        let max_depth = parsed("DMARC_MAX_DEPTH").unwrap_or(defaults.max_depth);

        let output_dir = lookup("DMARC_OUTPUT_DIR")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);

        // Trim the webhook URL before checking for emptiness.
        let webhook_url = lookup("DMARC_WEBHOOK_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let config = Config {
            webhook_url,
            webhook_timeout,
            max_file_size,
            max_decompressed_size,
            max_members_per_container,
            max_compression_ratio,
            max_filename_length,
            max_depth,
            output_dir,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects limits that would make extraction unsafe or pointless.
    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 || self.max_depth > MAX_DEPTH_LIMIT {
            return Err(anyhow::anyhow!(
                "Max depth must be between 1 and {}",
                MAX_DEPTH_LIMIT
            ));
        }
        if self.max_filename_length < 8 {
            return Err(anyhow::anyhow!("Max filename length too small"));
        }
        if self.max_compression_ratio <= 1.0 {
            return Err(anyhow::anyhow!("Max compression ratio must exceed 1.0"));
        }
        Ok(())
    }
}
