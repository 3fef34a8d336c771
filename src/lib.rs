pub mod duplicates;
pub mod error;
pub mod extract;
pub mod ffi;
pub mod fingerprint;
pub mod metadata;
pub mod module;
pub mod report;
pub mod scan;

pub use error::Error;
pub use extract::{ExtractMode, ExtractOptions, Extraction, Extractor, Outcome};
pub use fingerprint::{fingerprint, Fingerprint, TraversalOptions};
pub use metadata::MetadataBundle;
pub use module::{decode, Module, ModuleSource};
