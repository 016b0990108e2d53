//! DMARC Sorter - Recursive DMARC Report Extractor
//!
//! This tool unpacks mailbox exports and report archives, finds every DMARC
//! report inside them and sorts the reports into aggregate (RUA), failure (RUF)
//! and unclassified areas under the output directory.
//!
//! The manifest is written to `manifest.json` in the output directory and
//! printed in one of three formats: Table, CSV, or JSON.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use dmarc_sorter::config::{Config, MAX_DEPTH_LIMIT};
use dmarc_sorter::models::{ClassificationLabel, Manifest, ManifestRow};
use dmarc_sorter::pipeline::{write_manifest, Pipeline};
use dmarc_sorter::webhook::WebhookHandler;
use prettytable::{row, Cell, Row, Table};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const WEBHOOK_RETRIES: u32 = 3;

/// CLI arguments for the DMARC sorter.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Recursive DMARC report extractor and RUA/RUF sorter",
    long_about = "dmarc-sorter walks files and directories, unpacks ZIP, GZIP, TAR, \
                  e-mail and Outlook .msg containers at any depth, and sorts every DMARC \
                  report it finds into rua/, ruf/ and unclassified/ folders.\n\n\
                  USAGE:\n  dmarc-sorter <INPUT>... [--out-dir <DIR>] [--output <table|csv|json>] [--stage] [--verbose]",
    override_usage = "dmarc-sorter <INPUT>... [OPTIONS]"
)]
struct Cli {
    /// Files or directories to process
    #[arg(value_parser, required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory (overrides DMARC_OUTPUT_DIR)
    #[arg(short = 'd', long)]
    out_dir: Option<PathBuf>,

    /// Output format: table, csv, json
    #[arg(short, long, default_value = "table")]
    output: OutputFormat,

    /// Maximum container nesting depth (overrides DMARC_MAX_DEPTH)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=MAX_DEPTH_LIMIT as i64))]
    max_depth: Option<u32>,

    /// Compute destinations without copying any file
    #[arg(long)]
    stage: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Supported output formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OutputFormat {
    Table,
    Csv,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid output format: {}", s)),
        }
    }
}

/// Colours a label the way the summary shows it.
fn format_label(label: ClassificationLabel) -> ColoredString {
    match label {
        ClassificationLabel::Rua => label.to_string().green(),
        ClassificationLabel::Ruf => label.to_string().red(),
        ClassificationLabel::Unclassified => label.to_string().yellow(),
    }
}

fn print_table(manifest: &Manifest) {
    let counts = manifest.counts();
    println!("{}", "Sorting Summary".bold().blue());
    println!("{}", "----------------------------".dimmed());
    println!("{}: {}", "RUA reports".bold(), counts.rua);
    println!("{}: {}", "RUF reports".bold(), counts.ruf);
    println!("{}: {}", "Unclassified".bold(), counts.unclassified);
    println!("{}: {}\n", "Warnings".bold(), manifest.warnings.len());

    if manifest.entries.is_empty() {
        println!("{}", "No documents found.".yellow());
    } else {
        let mut table = Table::new();
        table.add_row(row!["Source", "Kind", "Label", "Confidence", "Scores", "Destination"]);
        for entry in &manifest.entries {
            let destination = entry
                .destination
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string());
            table.add_row(Row::new(vec![
                Cell::new(&entry.source()),
                Cell::new(&entry.kind.to_string()),
                Cell::new(&format_label(entry.label).to_string()),
                Cell::new(&entry.confidence.to_string()),
                Cell::new(&format!("{}/{}", entry.rua_score, entry.ruf_score)),
                Cell::new(&destination),
            ]));
        }
        table.printstd();
    }

    if !manifest.warnings.is_empty() {
        println!("\n{}", "Warnings".bold().yellow());
        for warning in &manifest.warnings {
            println!("  {} {}", "!".yellow(), warning);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity.
    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(if cli.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info })
        .init();

    println!(
        "{}\n{}\n",
        "DMARC Sorter - Recursive DMARC Report Extractor".bold().green(),
        "Unpacking, classifying & routing DMARC reports".dimmed()
    );

    let mut config = Config::new().context("Failed to load configuration")?;
    if let Some(dir) = cli.out_dir {
        config.output_dir = dir;
    }
    if let Some(depth) = cli.max_depth {
        config.max_depth = depth as usize;
    }
    config.validate().context("Invalid configuration")?;

    log::info!(
        "Processing {} input(s) into {}",
        cli.inputs.len(),
        config.output_dir.display()
    );
    let pipeline = Pipeline::new(config.clone()).stage_only(cli.stage);
    let inputs = cli.inputs;
    let manifest = tokio::task::spawn_blocking(move || pipeline.run(&inputs))
        .await
        .context("Sorting task panicked")?
        .context("Failed to process inputs")?;

    if !cli.stage {
        let manifest_path = config.output_dir.join("manifest.json");
        write_manifest(&manifest, &manifest_path)
            .with_context(|| format!("Failed to write {}", manifest_path.display()))?;
        log::info!("Manifest written to {}", manifest_path.display());
    }

    match cli.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        OutputFormat::Csv => {
            let mut wtr = csv::Writer::from_writer(std::io::stdout());
            for entry in &manifest.entries {
                wtr.serialize(ManifestRow::from(entry))?;
            }
            wtr.flush()?;
        }
        OutputFormat::Table => print_table(&manifest),
    }

    if let Some(url) = &config.webhook_url {
        let handler = WebhookHandler::new(url, Duration::from_secs(config.webhook_timeout), WEBHOOK_RETRIES)?;
        log::info!("Sending manifest to webhook: {} (timeout {:?})", url, handler.timeout());
        handler.send(&manifest).await?;
    }

    log::info!("{}", "Sorting complete!".bold().cyan());
    Ok(())
}
