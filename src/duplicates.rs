//! Grouping of reports that share a file digest or a pattern fingerprint

use crate::report::{ModuleReport, ReportStatus};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Which report field two files agree on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKey {
    /// Same SHA-256 over the stored bytes
    Hash,
    /// Same pattern fingerprint
    PatternHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Match {
    pub path: String,
    pub keys: Vec<MatchKey>,
}

/// One file and every other file it matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateEntry {
    pub path: String,
    pub matches: Vec<Match>,
}

/// List, for each report, the other reports with the same digest or fingerprint.
///
/// Only `ok` reports take part in fingerprint matching: sentinel and error
/// reports carry no usable pattern hash. Files without matches are left out.
pub fn find_duplicates(reports: &[ModuleReport]) -> Vec<DuplicateEntry> {
    let mut by_hash: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut by_pattern: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, report) in reports.iter().enumerate() {
        if let Some(digest) = report.sha256.as_deref() {
            by_hash.entry(digest).or_default().push(index);
        }
        if report.status == ReportStatus::Ok {
            if let Some(fingerprint) = report.fingerprint.as_deref() {
                by_pattern.entry(fingerprint).or_default().push(index);
            }
        }
    }

    let mut matches: Vec<BTreeMap<usize, Vec<MatchKey>>> = vec![BTreeMap::new(); reports.len()];
    for (key, groups) in [(MatchKey::Hash, &by_hash), (MatchKey::PatternHash, &by_pattern)] {
        for group in groups.values().filter(|group| group.len() > 1) {
            for &index in group {
                for &other in group.iter().filter(|&&other| other != index) {
                    matches[index].entry(other).or_default().push(key);
                }
            }
        }
    }

    reports
        .iter()
        .zip(matches)
        .filter(|(_, found)| !found.is_empty())
        .map(|(report, found)| DuplicateEntry {
            path: report.path.clone(),
            matches: found
                .into_iter()
                .map(|(other, keys)| Match {
                    path: reports[other].path.clone(),
                    keys,
                })
                .collect(),
        })
        .collect()
}
