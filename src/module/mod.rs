//! Decoded tracker modules and the query interface the extractor consumes

pub mod effects;
pub mod file;
pub mod protracker;
pub mod reader;
pub mod subsong;
pub mod xm;

pub use effects::Effect;
pub use file::{read_file, unwrap_gzip};
pub use subsong::detect_subsongs;

use crate::error::{Error, Result};
use bitflags::bitflags;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Well-known metadata keys
pub mod key {
    pub const TYPE: &str = "type";
    pub const TYPE_LONG: &str = "type_long";
    pub const TITLE: &str = "title";
    pub const ARTIST: &str = "artist";
    pub const TRACKER: &str = "tracker";
    /// Song message exactly as stored in the file
    pub const MESSAGE_RAW: &str = "message_raw";
}

/// Read-only view of a decoded module, plus the subsong cursor.
///
/// This is the whole surface the fingerprint and metadata extraction rely on; any
/// decoder can feed the extractor by implementing it.
pub trait ModuleSource {
    fn num_subsongs(&self) -> usize;

    fn num_channels(&self) -> usize;

    /// Move the cursor to a subsong. Out of range indices are ignored.
    fn select_subsong(&mut self, index: usize);

    /// Order position the cursor currently points at
    fn current_order(&self) -> usize;

    /// Length of the order list of the selected subsong's sequence
    fn num_orders(&self) -> usize;

    /// Pattern referenced by an order of the selected sequence
    fn order_pattern(&self, order: usize) -> Option<usize>;

    /// Row count of a pattern, 0 when it does not exist
    fn pattern_num_rows(&self, pattern: usize) -> usize;

    /// Cell content; empty for out of range coordinates
    fn cell(&self, pattern: usize, row: usize, channel: usize) -> Cell;

    fn cell_note(&self, pattern: usize, row: usize, channel: usize) -> u8 {
        self.cell(pattern, row, channel).note
    }

    fn cell_effect(&self, pattern: usize, row: usize, channel: usize) -> u8 {
        self.cell(pattern, row, channel).effect
    }

    fn cell_effect_param(&self, pattern: usize, row: usize, channel: usize) -> u8 {
        self.cell(pattern, row, channel).param
    }

    /// Free-text metadata by key; absent keys are `None`
    fn metadata(&self, key: &str) -> Option<&str>;

    fn num_samples(&self) -> usize;

    /// Sample by 1-based index
    fn sample(&self, index: usize) -> Option<&Sample>;

    fn num_instruments(&self) -> usize;

    /// Instrument name by 0-based index
    fn instrument_name(&self, index: usize) -> Option<&str>;
}

/// Supported container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Mod,
    Xm,
}

impl Format {
    /// File extension style short name
    pub fn short_name(self) -> &'static str {
        match self {
            Format::Mod => "mod",
            Format::Xm => "xm",
        }
    }

    pub fn long_name(self) -> &'static str {
        match self {
            Format::Mod => "ProTracker",
            Format::Xm => "FastTracker II",
        }
    }
}

/// One pattern slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cell {
    pub note: u8,
    pub instrument: u8,
    pub effect: u8,
    pub param: u8,
}

impl Cell {
    pub fn note(note: u8) -> Self {
        Self {
            note,
            ..Self::default()
        }
    }

    pub fn with_effect(mut self, effect: Effect, param: u8) -> Self {
        self.effect = effect.code();
        self.param = param;
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let ins = if self.instrument == 0 {
            "..".to_owned()
        } else {
            format!("{:02}", self.instrument)
        };
        write!(
            f,
            "{} {} {:02X}{:02X}",
            effects::note_name(self.note),
            ins,
            self.effect,
            self.param
        )
    }
}

/// Row-major grid of cells
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    rows: usize,
    channels: usize,
    cells: Vec<Cell>,
}

impl Pattern {
    /// Create an empty pattern with the given dimensions
    pub fn empty(rows: usize, channels: usize) -> Self {
        Self {
            rows,
            channels,
            cells: vec![Cell::default(); rows * channels],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn get(&self, row: usize, channel: usize) -> Option<&Cell> {
        if row < self.rows && channel < self.channels {
            self.cells.get(row * self.channels + channel)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, row: usize, channel: usize) -> Option<&mut Cell> {
        if row < self.rows && channel < self.channels {
            self.cells.get_mut(row * self.channels + channel)
        } else {
            None
        }
    }

    /// Replace a cell; out of range coordinates are ignored
    pub fn set(&mut self, row: usize, channel: usize, cell: Cell) {
        if let Some(slot) = self.get_mut(row, channel) {
            *slot = cell;
        }
    }

    /// Iterate rows as channel slices
    pub fn row_cells(&self, row: usize) -> &[Cell] {
        if row < self.rows {
            &self.cells[row * self.channels..(row + 1) * self.channels]
        } else {
            &[]
        }
    }
}

/// An order list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sequence {
    pub orders: Vec<usize>,
}

impl Sequence {
    pub fn new(orders: Vec<usize>) -> Self {
        Self { orders }
    }
}

/// Entry point into a sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Subsong {
    pub sequence: usize,
    pub start_order: usize,
}

bitflags! {
    /// Sample format and playback flags
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct SampleFlags: u32 {
        const SIXTEEN_BIT = 0x01;
        const STEREO = 0x02;
        const LOOP = 0x04;
        const PING_PONG = 0x08;
        const SUSTAIN_LOOP = 0x10;
        const PANNING = 0x20;
    }
}

/// How a sample's pitch is defined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tuning {
    /// Playback rate of middle C in Hz
    Frequency(u32),
    /// Semitone offset plus 1/128th-semitone fine tune
    Relative { relative_tone: i8, fine_tune: i8 },
}

impl Default for Tuning {
    fn default() -> Self {
        Tuning::Relative {
            relative_tone: 0,
            fine_tune: 0,
        }
    }
}

/// Auto-vibrato settings (0=sine, 1=square, 2=ramp up, 3=ramp down, 4=random)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AutoVibrato {
    #[serde(rename = "type")]
    pub kind: u8,
    pub sweep: u8,
    pub depth: u8,
    pub rate: u8,
}

/// Decoded sample header and payload
#[derive(Debug, Clone)]
pub struct Sample {
    pub name: String,
    /// Length in frames
    pub length: u32,
    pub loop_start: u32,
    pub loop_end: u32,
    /// Global volume (0-64)
    pub global_volume: u8,
    /// Default volume (0-256)
    pub volume: u16,
    /// Default panning (0-256), meaningful when `SampleFlags::PANNING` is set
    pub panning: u16,
    pub flags: SampleFlags,
    pub tuning: Tuning,
    pub vibrato: AutoVibrato,
    /// Raw payload as decoded (signed PCM, little-endian for 16-bit)
    pub data: Arc<[u8]>,
}

impl Default for Sample {
    fn default() -> Self {
        Self {
            name: String::new(),
            length: 0,
            loop_start: 0,
            loop_end: 0,
            global_volume: 64,
            volume: 256,
            panning: 128,
            flags: SampleFlags::empty(),
            tuning: Tuning::default(),
            vibrato: AutoVibrato::default(),
            data: Arc::from(Vec::new()),
        }
    }
}

impl Sample {
    pub fn bits(&self) -> u8 {
        if self.flags.contains(SampleFlags::SIXTEEN_BIT) {
            16
        } else {
            8
        }
    }

    pub fn is_stereo(&self) -> bool {
        self.flags.contains(SampleFlags::STEREO)
    }

    /// Bytes per frame for this sample's format
    pub fn frame_size(&self) -> usize {
        let channels = if self.is_stereo() { 2 } else { 1 };
        channels * (self.bits() as usize / 8)
    }

    /// Size of a full payload in bytes, whether or not it was loaded
    pub fn length_bytes(&self) -> u64 {
        self.length as u64 * self.frame_size() as u64
    }
}

/// Decoded instrument header
#[derive(Debug, Clone, Default)]
pub struct Instrument {
    pub name: String,
    pub vibrato: AutoVibrato,
    /// 1-based indices of the samples this instrument owns
    pub samples: Vec<usize>,
}

/// Decoder settings
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// Read sample headers only; payloads are left empty
    pub skip_samples: bool,
}

/// A decoded module
#[derive(Debug, Clone)]
pub struct Module {
    pub format: Format,
    pub channels: usize,
    pub patterns: Vec<Pattern>,
    pub sequences: Vec<Sequence>,
    pub subsongs: Vec<Subsong>,
    pub samples: Vec<Sample>,
    pub instruments: Vec<Instrument>,
    pub metadata: BTreeMap<String, String>,
    cursor: Subsong,
}

impl Module {
    /// Create an empty module with one empty sequence and one subsong at order 0
    pub fn new(format: Format, channels: usize) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(key::TYPE.to_string(), format.short_name().to_string());
        metadata.insert(key::TYPE_LONG.to_string(), format.long_name().to_string());
        Self {
            format,
            channels,
            patterns: Vec::new(),
            sequences: vec![Sequence::default()],
            subsongs: vec![Subsong::default()],
            samples: Vec::new(),
            instruments: Vec::new(),
            metadata,
            cursor: Subsong::default(),
        }
    }

    pub fn set_metadata(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    /// Append a pattern and return its index
    pub fn add_pattern(&mut self, pattern: Pattern) -> usize {
        self.patterns.push(pattern);
        self.patterns.len() - 1
    }

    /// Subsong the cursor is on
    pub fn selected(&self) -> Subsong {
        self.cursor
    }

    fn selected_sequence(&self) -> Option<&Sequence> {
        self.sequences.get(self.cursor.sequence)
    }
}

impl ModuleSource for Module {
    fn num_subsongs(&self) -> usize {
        self.subsongs.len()
    }

    fn num_channels(&self) -> usize {
        self.channels
    }

    fn select_subsong(&mut self, index: usize) {
        if let Some(subsong) = self.subsongs.get(index) {
            self.cursor = *subsong;
        }
    }

    fn current_order(&self) -> usize {
        self.cursor.start_order
    }

    fn num_orders(&self) -> usize {
        self.selected_sequence().map_or(0, |seq| seq.orders.len())
    }

    fn order_pattern(&self, order: usize) -> Option<usize> {
        self.selected_sequence()?.orders.get(order).copied()
    }

    fn pattern_num_rows(&self, pattern: usize) -> usize {
        self.patterns.get(pattern).map_or(0, Pattern::rows)
    }

    fn cell(&self, pattern: usize, row: usize, channel: usize) -> Cell {
        self.patterns
            .get(pattern)
            .and_then(|p| p.get(row, channel))
            .copied()
            .unwrap_or_default()
    }

    fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    fn num_samples(&self) -> usize {
        self.samples.len()
    }

    fn sample(&self, index: usize) -> Option<&Sample> {
        index.checked_sub(1).and_then(|i| self.samples.get(i))
    }

    fn num_instruments(&self) -> usize {
        self.instruments.len()
    }

    fn instrument_name(&self, index: usize) -> Option<&str> {
        self.instruments.get(index).map(|ins| ins.name.as_str())
    }
}

/// Decode module bytes with default options
pub fn decode(data: &[u8]) -> Result<Module> {
    decode_with(data, DecodeOptions::default())
}

/// Try every supported format and decode with the first that accepts the data
pub fn decode_with(data: &[u8], options: DecodeOptions) -> Result<Module> {
    let mut module = if xm::detect(data) {
        xm::load(data, options)?
    } else if protracker::detect(data) {
        protracker::load(data, options)?
    } else {
        return Err(Error::UnsupportedFormat);
    };

    detect_subsongs(&mut module);
    tracing::debug!(
        format = module.format.short_name(),
        channels = module.channels,
        patterns = module.patterns.len(),
        orders = module.sequences.first().map_or(0, |s| s.orders.len()),
        subsongs = module.subsongs.len(),
        samples = module.samples.len(),
        instruments = module.instruments.len(),
        "decoded module"
    );
    Ok(module)
}
