//! Fingerprint and metadata extraction

use crate::error::Result;
use crate::fingerprint::{fingerprint, Fingerprint, TraversalOptions};
use crate::metadata::{self, MetadataBundle};
use crate::module::{self, DecodeOptions, Module, ModuleSource};
use serde::Serialize;
use std::path::Path;

/// Which parts of the metadata are collected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractMode {
    /// Name blob and text fields; notes only are read during traversal
    #[default]
    Basic,
    /// Sample records and instrument names; effect-aware traversal with the
    /// sentinel short-circuit
    Extended,
}

/// Extraction settings
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    pub mode: ExtractMode,
    /// Per-cell diagnostics on target `modhash::cells`
    pub verbose: bool,
}

impl ExtractOptions {
    pub fn basic() -> Self {
        Self::default()
    }

    pub fn extended() -> Self {
        Self {
            mode: ExtractMode::Extended,
            ..Self::default()
        }
    }

    fn traversal(&self) -> TraversalOptions {
        TraversalOptions {
            effect_aware: self.mode == ExtractMode::Extended,
            verbose: self.verbose,
        }
    }

    /// Basic mode never needs sample payloads
    fn decode(&self) -> DecodeOptions {
        DecodeOptions {
            skip_samples: self.mode == ExtractMode::Basic,
        }
    }
}

/// How an extraction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Normal,
    /// The sentinel cell was met; the fingerprint is fixed at 1
    Sentinel,
}

/// Owned result of one extraction.
///
/// When produced from bytes it also owns the decoded module, so sample payloads
/// referenced by the bundle stay alive exactly as long as the extraction.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub outcome: Outcome,
    pub bundle: MetadataBundle,
    module: Option<Module>,
}

impl Extraction {
    pub fn from_parts(outcome: Outcome, bundle: MetadataBundle, module: Option<Module>) -> Self {
        Self {
            outcome,
            bundle,
            module,
        }
    }

    pub fn fingerprint(&self) -> u64 {
        self.bundle.fingerprint
    }

    pub fn is_sentinel(&self) -> bool {
        self.outcome == Outcome::Sentinel
    }

    /// Decoded module, when this extraction owns it
    pub fn module(&self) -> Option<&Module> {
        self.module.as_ref()
    }

    pub fn into_parts(self) -> (Outcome, MetadataBundle, Option<Module>) {
        (self.outcome, self.bundle, self.module)
    }
}

/// Runs the traversal and metadata collection with fixed options
#[derive(Debug, Clone, Copy, Default)]
pub struct Extractor {
    options: ExtractOptions,
}

impl Extractor {
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> ExtractOptions {
        self.options
    }

    /// Extract from an already decoded module.
    ///
    /// Only the subsong cursor of `module` is touched; it ends on subsong 0.
    pub fn extract<M: ModuleSource + ?Sized>(&self, module: &mut M) -> Extraction {
        let (outcome, bundle) = self.collect(module);
        Extraction {
            outcome,
            bundle,
            module: None,
        }
    }

    /// Decode `data` and extract from it; the extraction takes the decoded module
    pub fn extract_bytes(&self, data: &[u8]) -> Result<Extraction> {
        let mut module = module::decode_with(data, self.options.decode())?;
        let (outcome, bundle) = self.collect(&mut module);
        Ok(Extraction {
            outcome,
            bundle,
            module: Some(module),
        })
    }

    /// Read (and gunzip if needed) a file, then extract from it
    pub fn extract_file(&self, path: &Path) -> Result<Extraction> {
        let data = module::read_file(path)?;
        self.extract_bytes(&data)
    }

    fn collect<M: ModuleSource + ?Sized>(&self, module: &mut M) -> (Outcome, MetadataBundle) {
        let channel_count = module.num_channels();

        let hash = match fingerprint(module, self.options.traversal()) {
            Fingerprint::Content(hash) => hash,
            sentinel @ Fingerprint::Sentinel => {
                return (
                    Outcome::Sentinel,
                    MetadataBundle::sentinel(sentinel.value(), channel_count),
                );
            }
        };

        let mut bundle = MetadataBundle {
            fingerprint: hash,
            channel_count,
            sample_count: module.num_samples(),
            instrument_count: module.num_instruments(),
            ..MetadataBundle::default()
        };
        metadata::fill_text_fields(&mut bundle, module);

        match self.options.mode {
            ExtractMode::Basic => {
                bundle.sample_names = Some(metadata::name_blob(module));
            }
            ExtractMode::Extended => {
                bundle.samples = metadata::sample_records(module);
                bundle.instrument_names = metadata::instrument_names(module);
            }
        }

        (Outcome::Normal, bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::hash_notes;
    use crate::module::{key, Cell, Effect, Format, Instrument, Pattern, Sample, Sequence};

    fn module() -> Module {
        let mut module = Module::new(Format::Xm, 4);
        let mut pattern = Pattern::empty(2, 4);
        pattern.set(0, 0, Cell::note(60));
        module.add_pattern(pattern);
        module.sequences = vec![Sequence::new(vec![0])];
        module.instruments.push(Instrument {
            name: "bass".into(),
            samples: vec![1],
            ..Instrument::default()
        });
        module.samples.push(Sample {
            name: "bass.wav".into(),
            length: 16,
            ..Sample::default()
        });
        module.set_metadata(key::ARTIST, "artist");
        module.set_metadata(key::MESSAGE_RAW, "hello");
        module
    }

    #[test]
    fn test_basic_mode() {
        let mut module = module();
        let extraction = Extractor::new(ExtractOptions::basic()).extract(&mut module);
        assert_eq!(extraction.outcome, Outcome::Normal);
        let bundle = &extraction.bundle;
        assert_eq!(bundle.fingerprint, hash_notes([60]));
        assert_eq!(bundle.channel_count, 4);
        assert_eq!(bundle.sample_count, 1);
        assert_eq!(bundle.instrument_count, 1);
        assert_eq!(bundle.sample_names.as_deref(), Some("bass\nbass.wav\n"));
        assert!(bundle.samples.is_empty());
        assert!(bundle.instrument_names.is_empty());
        assert_eq!(bundle.artist, "artist");
        assert_eq!(bundle.comments, "hello");
        assert!(extraction.module().is_none());
    }

    #[test]
    fn test_extended_mode() {
        let mut module = module();
        let extraction = Extractor::new(ExtractOptions::extended()).extract(&mut module);
        let bundle = &extraction.bundle;
        assert_eq!(bundle.fingerprint, hash_notes([60]));
        assert!(bundle.sample_names.is_none());
        assert_eq!(bundle.samples.len(), 1);
        assert_eq!(bundle.samples[0].name, "bass.wav");
        assert_eq!(bundle.instrument_names, vec!["bass".to_string()]);
    }

    #[test]
    fn test_sentinel_keeps_channel_count_only() {
        let mut module = module();
        module.patterns[0].set(1, 2, Cell::default().with_effect(Effect::Arpeggio, 0xFF));

        let extraction = Extractor::new(ExtractOptions::extended()).extract(&mut module);
        assert!(extraction.is_sentinel());
        assert_eq!(extraction.fingerprint(), 1);
        assert_eq!(extraction.bundle.channel_count, 4);
        assert_eq!(extraction.bundle.sample_count, 0);
        assert!(extraction.bundle.samples.is_empty());
        assert!(extraction.bundle.artist.is_empty());

        // basic mode does not look at effects
        let basic = Extractor::new(ExtractOptions::basic()).extract(&mut module);
        assert_eq!(basic.outcome, Outcome::Normal);
        assert_eq!(basic.fingerprint(), hash_notes([60]));
    }

    #[test]
    fn test_extract_bytes_rejects_garbage() {
        let err = Extractor::default().extract_bytes(&[0u8; 64]).unwrap_err();
        assert!(err.is_decode_failure());
    }
}
