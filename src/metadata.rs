//! Descriptive metadata collected alongside the fingerprint

use crate::module::{key, AutoVibrato, ModuleSource, Sample, SampleFlags, Tuning};
use serde::Serialize;
use std::sync::Arc;

/// Per-sample attributes
#[derive(Debug, Clone, Serialize)]
pub struct SampleRecord {
    /// 1-based sample number
    pub id: u32,
    pub name: String,
    /// Length in frames
    pub length: u32,
    /// Length in bytes of the full payload
    pub length_bytes: u64,
    /// Global volume (0-64)
    pub global_volume: u8,
    /// 8 or 16
    pub bits: u8,
    pub stereo: bool,
    /// Default panning (0-256), `None` when the sample does not set one
    pub panning: Option<u16>,
    /// Default volume (0-256)
    pub volume: u16,
    pub tuning: Tuning,
    pub vibrato: AutoVibrato,
    /// Raw payload; empty when sample data was not loaded
    #[serde(skip)]
    pub data: Arc<[u8]>,
}

impl SampleRecord {
    pub fn from_sample(id: u32, sample: &Sample) -> Self {
        Self {
            id,
            name: sample.name.clone(),
            length: sample.length,
            length_bytes: sample.length_bytes(),
            global_volume: sample.global_volume.min(64),
            bits: sample.bits(),
            stereo: sample.is_stereo(),
            panning: sample
                .flags
                .contains(SampleFlags::PANNING)
                .then_some(sample.panning.min(256)),
            volume: sample.volume.min(256),
            tuning: sample.tuning,
            vibrato: sample.vibrato,
            data: Arc::clone(&sample.data),
        }
    }
}

/// Everything handed back for one module
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetadataBundle {
    pub fingerprint: u64,
    pub channel_count: usize,
    pub sample_count: usize,
    pub instrument_count: usize,
    /// Instrument names then sample names, one per line (basic mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_names: Option<String>,
    /// Structured sample records (extended mode)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<SampleRecord>,
    /// Instrument names by 0-based slot (extended mode)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub instrument_names: Vec<String>,
    pub title: String,
    pub artist: String,
    pub comments: String,
}

impl MetadataBundle {
    /// Bundle for a sentinel hit: fixed fingerprint and channel count only
    pub fn sentinel(fingerprint: u64, channel_count: usize) -> Self {
        Self {
            fingerprint,
            channel_count,
            ..Self::default()
        }
    }
}

/// Look up a text field; absent keys read as empty
pub fn text_field<M: ModuleSource + ?Sized>(module: &M, key: &str) -> String {
    module.metadata(key).unwrap_or_default().to_string()
}

/// Every instrument name followed by every sample name, each newline-terminated.
///
/// Blank entries are kept so that slot positions survive in the text.
pub fn name_blob<M: ModuleSource + ?Sized>(module: &M) -> String {
    let mut out = String::new();
    for index in 0..module.num_instruments() {
        out.push_str(module.instrument_name(index).unwrap_or_default());
        out.push('\n');
    }
    for index in 1..=module.num_samples() {
        out.push_str(module.sample(index).map_or("", |s| s.name.as_str()));
        out.push('\n');
    }
    out
}

/// Structured records for every sample in 1-based order
pub fn sample_records<M: ModuleSource + ?Sized>(module: &M) -> Vec<SampleRecord> {
    (1..=module.num_samples())
        .filter_map(|index| {
            let sample = module.sample(index)?;
            Some(SampleRecord::from_sample(index as u32, sample))
        })
        .collect()
}

/// Instrument names in 0-based slot order
pub fn instrument_names<M: ModuleSource + ?Sized>(module: &M) -> Vec<String> {
    (0..module.num_instruments())
        .map(|index| module.instrument_name(index).unwrap_or_default().to_string())
        .collect()
}

/// Fill the text fields shared by every extraction mode
pub(crate) fn fill_text_fields<M: ModuleSource + ?Sized>(bundle: &mut MetadataBundle, module: &M) {
    bundle.title = text_field(module, key::TITLE);
    bundle.artist = text_field(module, key::ARTIST);
    bundle.comments = text_field(module, key::MESSAGE_RAW);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Format, Instrument, Module};

    fn module() -> Module {
        let mut module = Module::new(Format::Xm, 2);
        module.instruments = vec![
            Instrument {
                name: "lead".into(),
                ..Instrument::default()
            },
            Instrument::default(),
        ];
        module.samples = vec![
            Sample {
                name: "saw".into(),
                length: 10,
                flags: SampleFlags::SIXTEEN_BIT | SampleFlags::PANNING,
                panning: 300,
                ..Sample::default()
            },
            Sample {
                name: "".into(),
                length: 3,
                ..Sample::default()
            },
        ];
        module.set_metadata(key::ARTIST, "someone");
        module
    }

    #[test]
    fn test_name_blob_keeps_blanks() {
        assert_eq!(name_blob(&module()), "lead\n\nsaw\n\n");
    }

    #[test]
    fn test_text_fields() {
        let module = module();
        assert_eq!(text_field(&module, key::ARTIST), "someone");
        assert_eq!(text_field(&module, key::MESSAGE_RAW), "");
        assert_eq!(text_field(&module, key::TYPE), "xm");
    }

    #[test]
    fn test_sample_records() {
        let records = sample_records(&module());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 1);
        assert_eq!(records[0].bits, 16);
        assert_eq!(records[0].length_bytes, 20);
        assert_eq!(records[0].panning, Some(256));
        assert_eq!(records[1].id, 2);
        assert_eq!(records[1].bits, 8);
        assert_eq!(records[1].panning, None);
        assert!(!records[1].stereo);
    }

    #[test]
    fn test_instrument_names() {
        assert_eq!(instrument_names(&module()), vec!["lead".to_string(), String::new()]);
    }
}
