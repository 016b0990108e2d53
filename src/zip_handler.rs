//! ZIP Handler Module
//!
//! Extraction strategies for the archive kinds: ZIP, GZIP and TAR. Every strategy
//! works on an in-memory node and returns whatever members it could recover,
//! enforcing the configured limits (member count, decompressed size, compression
//! ratio) per member. A member that trips a limit or fails to decompress is
//! recorded as a partial failure; its siblings are still extracted.
use std::io::Cursor;

use flate2::read::MultiGzDecoder;
use zip::ZipArchive;

use crate::config::Config;
use crate::file_handlers::{read_bounded, Extraction};
use crate::models::{RawNode, Warning, WarningKind};

/// Extracts every file member of a ZIP archive.
///
/// # Security Checks
///
/// - Verifies the number of members against `max_members_per_container`.
/// - Checks each member's compression ratio and decompressed size, and caps the
///   bytes actually read so a lying size field cannot inflate past the limit.
/// - Member names are only used as labels, never as filesystem paths.
pub fn extract_zip(node: &RawNode, config: &Config) -> Extraction {
    let mut out = Extraction::default();
    let location = node.location();

    let mut archive = match ZipArchive::new(Cursor::new(node.bytes.as_slice())) {
        Ok(archive) => archive,
        Err(e) => {
            out.warn(Warning::new(
                WarningKind::UnreadableContainer,
                location,
                format!("invalid ZIP archive: {}", e),
            ));
            return out;
        }
    };
    if archive.len() > config.max_members_per_container {
        out.warn(Warning::new(
            WarningKind::UnreadableContainer,
            location,
            format!("too many files in archive ({})", archive.len()),
        ));
        return out;
    }

    // An archive whose every file is encrypted cannot be read at all.
    let mut files = 0;
    let mut encrypted = 0;
    for i in 0..archive.len() {
        if let Ok(raw) = archive.by_index_raw(i) {
            if !raw.is_dir() {
                files += 1;
                if raw.encrypted() {
                    encrypted += 1;
                }
            }
        }
    }
    if files > 0 && encrypted == files {
        out.warn(Warning::new(
            WarningKind::UnreadableContainer,
            location,
            "encrypted archive",
        ));
        return out;
    }

    let limit = config.max_decompressed_size;
    for i in 0..archive.len() {
        let mut file_in_zip = match archive.by_index(i) {
            Ok(file) => file,
            Err(e) => {
                out.warn(Warning::for_member(
                    WarningKind::PartialMemberFailure,
                    location.clone(),
                    format!("#{}", i),
                    e.to_string(),
                ));
                continue;
            }
        };
        if file_in_zip.is_dir() {
            continue;
        }
        let inner_name = file_in_zip.name().to_string();
        let fail = |message: String| {
            Warning::for_member(
                WarningKind::PartialMemberFailure,
                location.clone(),
                inner_name.clone(),
                message,
            )
        };

        let compressed_size = file_in_zip.compressed_size();
        let uncompressed_size = file_in_zip.size();
        if compressed_size > 0 {
            let compression_ratio = uncompressed_size as f64 / compressed_size as f64;
            if compression_ratio > config.max_compression_ratio {
                out.warn(fail(format!("suspicious compression ratio: {:.2}", compression_ratio)));
                continue;
            }
        }
        if uncompressed_size > limit as u64 {
            out.warn(fail(format!("decompressed size {} exceeds limit", uncompressed_size)));
            continue;
        }
        match read_bounded(&mut file_in_zip, limit) {
            Ok(Some(contents)) => {
                log::debug!("ZIP member {} ({} bytes)", inner_name, contents.len());
                out.children.push(node.child(inner_name.clone(), contents));
            }
            Ok(None) => out.warn(fail("decompressed size exceeds limit".to_string())),
            Err(e) => out.warn(fail(format!("decompression failed: {}", e))),
        }
    }
    out
}

/// Decompresses a GZIP stream (all concatenated members) into a single child.
pub fn extract_gzip(node: &RawNode, config: &Config) -> Extraction {
    let mut out = Extraction::default();
    let decoder = MultiGzDecoder::new(node.bytes.as_slice());
    match read_bounded(decoder, config.max_decompressed_size) {
        Ok(Some(contents)) => {
            out.children.push(node.child(gunzipped_name(&node.name), contents));
        }
        Ok(None) => out.warn(Warning::new(
            WarningKind::UnreadableContainer,
            node.location(),
            "decompressed size too large",
        )),
        Err(e) => out.warn(Warning::new(
            WarningKind::UnreadableContainer,
            node.location(),
            format!("invalid GZIP stream: {}", e),
        )),
    }
    out
}

/// Extracts the regular files of a TAR archive.
///
/// Entry headers are read sequentially; a corrupt header ends the walk since
/// nothing after it can be located reliably.
pub fn extract_tar(node: &RawNode, config: &Config) -> Extraction {
    let mut out = Extraction::default();
    let location = node.location();
    let mut archive = tar::Archive::new(Cursor::new(node.bytes.as_slice()));
    let entries = match archive.entries() {
        Ok(entries) => entries,
        Err(e) => {
            out.warn(Warning::new(
                WarningKind::UnreadableContainer,
                location,
                format!("invalid TAR archive: {}", e),
            ));
            return out;
        }
    };

    let mut seen = 0usize;
    for (index, entry) in entries.enumerate() {
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                out.warn(Warning::for_member(
                    WarningKind::PartialMemberFailure,
                    location.clone(),
                    format!("#{}", index),
                    format!("corrupt entry header: {}", e),
                ));
                break;
            }
        };
        if !entry.header().entry_type().is_file() {
            continue;
        }
        seen += 1;
        if seen > config.max_members_per_container {
            out.warn(Warning::new(
                WarningKind::PartialMemberFailure,
                location.clone(),
                "too many files in archive; remaining entries skipped",
            ));
            break;
        }
        let inner_name = entry
            .path()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| format!("entry-{}", index));
        match read_bounded(&mut entry, config.max_decompressed_size) {
            Ok(Some(contents)) => out.children.push(node.child(inner_name, contents)),
            Ok(None) => out.warn(Warning::for_member(
                WarningKind::PartialMemberFailure,
                location.clone(),
                inner_name,
                "entry size exceeds limit",
            )),
            Err(e) => out.warn(Warning::for_member(
                WarningKind::PartialMemberFailure,
                location.clone(),
                inner_name,
                format!("read failed: {}", e),
            )),
        }
    }
    out
}

/// Name of the stream inside `name`: `x.xml.gz` -> `x.xml`, `x.tgz` -> `x.tar`.
/// Only the final path component is kept.
fn gunzipped_name(name: &str) -> String {
    let name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let lower = name.to_lowercase();
    if lower.ends_with(".tgz") {
        format!("{}.tar", &name[..name.len() - 4])
    } else if lower.ends_with(".gz") && name.len() > 3 {
        name[..name.len() - 3].to_string()
    } else {
        format!("{}.out", name)
    }
}
