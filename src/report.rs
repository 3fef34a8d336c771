//! JSON reports for the command line tool

use crate::error::{Error, Result};
use crate::extract::{Extraction, Extractor, Outcome};
use crate::metadata::MetadataBundle;
use crate::module::{unwrap_gzip, Format, ModuleSource};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Result kind of one input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Ok,
    Sentinel,
    /// The file could not be read or is not a supported module
    Error,
}

impl From<Outcome> for ReportStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Normal => ReportStatus::Ok,
            Outcome::Sentinel => ReportStatus::Sentinel,
        }
    }
}

/// Everything known about one input file
#[derive(Debug, Clone, Serialize)]
pub struct ModuleReport {
    pub path: String,
    /// SHA-256 of the file as stored on disk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub status: ReportStatus,
    /// Pattern fingerprint as 16 hex digits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subsongs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataBundle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModuleReport {
    /// Read, fingerprint and describe one file. Failures end up in the report.
    pub fn from_file(path: &Path, extractor: &Extractor) -> Self {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(err) => return Self::failed(path, None, &Error::from(err)),
        };
        let sha256 = sha256_hex(&raw);
        let result = unwrap_gzip(raw)
            .map_err(Error::from)
            .and_then(|data| extractor.extract_bytes(&data));
        Self::new(path, sha256, result)
    }

    /// Build a report from an extraction result
    pub fn new(path: &Path, sha256: String, result: Result<Extraction>) -> Self {
        match result {
            Ok(extraction) => {
                let module = extraction.module();
                Self {
                    path: path.display().to_string(),
                    sha256: Some(sha256),
                    status: extraction.outcome.into(),
                    fingerprint: Some(format!("{:016x}", extraction.fingerprint())),
                    format: module.map(|m| m.format),
                    subsongs: module.map(|m| m.num_subsongs()),
                    metadata: Some(extraction.bundle),
                    error: None,
                }
            }
            Err(err) => Self::failed(path, Some(sha256), &err),
        }
    }

    fn failed(path: &Path, sha256: Option<String>, err: &Error) -> Self {
        tracing::warn!(path = %path.display(), error = %err, "no fingerprint");
        Self {
            path: path.display().to_string(),
            sha256,
            status: ReportStatus::Error,
            fingerprint: None,
            format: None,
            subsongs: None,
            metadata: None,
            error: Some(err.to_string()),
        }
    }
}

/// Lowercase hex SHA-256 digest
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractOptions;
    use std::path::PathBuf;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_missing_file_report() {
        let dir = tempfile::tempdir().unwrap();
        let report = ModuleReport::from_file(&dir.path().join("gone.xm"), &Extractor::default());
        assert_eq!(report.status, ReportStatus::Error);
        assert!(report.sha256.is_none());
        assert!(report.error.unwrap().starts_with("IO error"));
    }

    #[test]
    fn test_undecodable_report_keeps_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zeros.mod");
        fs::write(&path, [0u8; 64]).unwrap();

        let report = ModuleReport::from_file(&path, &Extractor::new(ExtractOptions::extended()));
        assert_eq!(report.status, ReportStatus::Error);
        assert_eq!(report.sha256.as_deref(), Some(sha256_hex(&[0u8; 64]).as_str()));
        assert!(report.fingerprint.is_none());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "error");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_success_report_json() {
        let bundle = MetadataBundle {
            fingerprint: 0xaf63dc4c8601ec8c,
            channel_count: 4,
            ..MetadataBundle::default()
        };
        let extraction = Extraction::from_parts(Outcome::Normal, bundle, None);
        let report = ModuleReport::new(&PathBuf::from("a.mod"), "00".into(), Ok(extraction));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["fingerprint"], "af63dc4c8601ec8c");
        assert_eq!(json["metadata"]["channel_count"], 4);
        assert!(json.get("error").is_none());
    }
}
