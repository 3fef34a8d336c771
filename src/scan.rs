//! Input discovery and batch fingerprinting

use crate::extract::Extractor;
use crate::report::ModuleReport;
use rayon::prelude::*;
use std::path::PathBuf;
use walkdir::WalkDir;

/// Directory listings that sit next to module archives
const SKIPPED_EXTENSION: &str = "listing";

/// Expand directories into the files below them, in file name order.
///
/// Plain paths are kept as given so that a missing file still shows up in the
/// reports. `*.listing` files found while walking are skipped.
pub fn collect_inputs(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let skipped = entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(SKIPPED_EXTENSION));
            if !skipped {
                files.push(entry.into_path());
            }
        }
    }
    tracing::debug!(files = files.len(), "collected inputs");
    files
}

/// Fingerprint every input in parallel; reports keep the input order
pub fn scan(paths: &[PathBuf], extractor: &Extractor) -> Vec<ModuleReport> {
    collect_inputs(paths)
        .par_iter()
        .map(|path| ModuleReport::from_file(path, extractor))
        .collect()
}
