//! FastTracker II XM loader

use super::effects::{convert_mod_effect, note};
use super::reader::{decode_text, ByteReader};
use super::{
    key, AutoVibrato, Cell, DecodeOptions, Format, Instrument, Module, Pattern, Sample,
    SampleFlags, Sequence, Tuning,
};
use crate::error::{Error, Result};
use std::sync::Arc;

const MAGIC: &[u8; 17] = b"Extended Module: ";

/// XM header offsets (in bytes)
mod offset {
    pub const TITLE: usize = 17;
    pub const TRACKER: usize = 38;
    pub const VERSION: usize = 58;
    /// Header size, counted from this offset
    pub const HEADER_SIZE: usize = 60;
    pub const SONG_LENGTH: usize = 64;
    pub const CHANNELS: usize = 68;
    pub const PATTERNS: usize = 70;
    pub const INSTRUMENTS: usize = 72;
    pub const ORDERS: usize = 80;
}

/// Instrument header offsets (relative to the instrument start)
mod instrument_offset {
    pub const NAME: usize = 4;
    pub const NUM_SAMPLES: usize = 27;
    pub const SAMPLE_HEADER_SIZE: usize = 29;
    pub const VIBRATO: usize = 235;
}

const NAME_LEN: usize = 22;
const MAX_CHANNELS: usize = 128;
const MAX_ORDERS: usize = 256;
const MAX_ROWS: usize = 256;
const XM_KEY_OFF: u8 = 97;
/// Smallest instrument header that still carries a sample count
const MIN_INSTRUMENT_HEADER: usize = instrument_offset::SAMPLE_HEADER_SIZE;
/// ModPlug ADPCM packing marker in the reserved sample header byte
const ADPCM_MARKER: u8 = 0xAD;

/// Check for the XM signature
pub fn detect(data: &[u8]) -> bool {
    data.len() > offset::ORDERS && data.starts_with(MAGIC)
}

/// Map an XM note byte to the normalized scale
fn convert_note(value: u8) -> u8 {
    match value {
        1..=96 => value + 12,
        XM_KEY_OFF => note::KEY_OFF,
        _ => note::NONE,
    }
}

/// Load an XM file
pub fn load(data: &[u8], options: DecodeOptions) -> Result<Module> {
    if !detect(data) {
        return Err(Error::UnsupportedFormat);
    }

    let mut reader = ByteReader::new(data);
    reader.seek(offset::TITLE)?;
    let title = reader.read_string(20)?;
    reader.seek(offset::TRACKER)?;
    let tracker = reader.read_string(20)?;
    reader.seek(offset::VERSION)?;
    let version = reader.read_u16_le()?;
    if version < 0x0104 {
        tracing::debug!(version, "old XM version, reading as 1.04");
    }

    reader.seek(offset::HEADER_SIZE)?;
    let header_size = reader.read_u32_le()? as usize;
    reader.seek(offset::SONG_LENGTH)?;
    let song_length = (reader.read_u16_le()? as usize).min(MAX_ORDERS);
    reader.seek(offset::CHANNELS)?;
    let channels = reader.read_u16_le()? as usize;
    if channels == 0 || channels > MAX_CHANNELS {
        return Err(Error::decode(format!("Invalid channel count {channels}")));
    }
    reader.seek(offset::PATTERNS)?;
    let num_patterns = reader.read_u16_le()? as usize;
    reader.seek(offset::INSTRUMENTS)?;
    let num_instruments = reader.read_u16_le()? as usize;
    let orders = reader.peek_slice_at(offset::ORDERS, song_length)?;

    let mut module = Module::new(Format::Xm, channels);
    module.set_metadata(key::TITLE, title);
    module.set_metadata(key::TRACKER, tracker);
    module.sequences = vec![Sequence::new(orders.iter().map(|&p| p as usize).collect())];

    reader.seek(
        offset::HEADER_SIZE
            .checked_add(header_size)
            .ok_or_else(|| Error::decode("Header size overflow"))?,
    )?;

    for index in 0..num_patterns {
        let pattern = read_pattern(&mut reader, channels)
            .map_err(|e| Error::decode(format!("Pattern {index}: {e}")))?;
        module.add_pattern(pattern);
    }

    for index in 0..num_instruments {
        read_instrument(&mut reader, &mut module, options)
            .map_err(|e| Error::decode(format!("Instrument {}: {e}", index + 1)))?;
    }

    Ok(module)
}

fn read_pattern(reader: &mut ByteReader, channels: usize) -> Result<Pattern> {
    let start = reader.position();
    let header_len = reader.read_u32_le()? as usize;
    let _packing = reader.read_u8()?;
    let rows = reader.read_u16_le()? as usize;
    let packed_size = reader.read_u16_le()? as usize;
    if rows > MAX_ROWS {
        return Err(Error::decode(format!("Invalid row count {rows}")));
    }
    reader.seek(start.saturating_add(header_len))?;
    let packed = reader.read_slice(packed_size)?;

    let mut pattern = Pattern::empty(rows, channels);
    let mut data = ByteReader::new(packed);
    'rows: for row in 0..rows {
        for channel in 0..channels {
            if data.remaining() == 0 {
                break 'rows;
            }
            let cell = unpack_cell(&mut data)?;
            pattern.set(row, channel, cell);
        }
    }
    Ok(pattern)
}

/// Unpack one cell. A set high bit means a mask byte selects the fields present;
/// otherwise the byte is the note and all four other fields follow.
fn unpack_cell(data: &mut ByteReader) -> Result<Cell> {
    let first = data.read_u8()?;
    let (mask, note) = if first & 0x80 != 0 {
        let note = if first & 0x01 != 0 { data.read_u8()? } else { 0 };
        (first, note)
    } else {
        (0x1E, first)
    };
    let instrument = if mask & 0x02 != 0 { data.read_u8()? } else { 0 };
    let _volume = if mask & 0x04 != 0 { data.read_u8()? } else { 0 };
    let command = if mask & 0x08 != 0 { data.read_u8()? } else { 0 };
    let param = if mask & 0x10 != 0 { data.read_u8()? } else { 0 };

    let (effect, param) = convert_mod_effect(command, param, true);
    Ok(Cell {
        note: convert_note(note),
        instrument,
        effect: effect.code(),
        param,
    })
}

struct SampleHeader {
    length: u32,
    loop_start: u32,
    loop_length: u32,
    volume: u8,
    fine_tune: i8,
    kind: u8,
    panning: u8,
    relative_tone: i8,
    packing: u8,
    name: String,
}

impl SampleHeader {
    fn read(raw: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(raw);
        Ok(Self {
            length: reader.read_u32_le()?,
            loop_start: reader.read_u32_le()?,
            loop_length: reader.read_u32_le()?,
            volume: reader.read_u8()?,
            fine_tune: reader.read_i8()?,
            kind: reader.read_u8()?,
            panning: reader.read_u8()?,
            relative_tone: reader.read_i8()?,
            packing: reader.read_u8()?,
            name: reader.read_string(NAME_LEN)?,
        })
    }

    fn is_16bit(&self) -> bool {
        self.kind & 0x10 != 0
    }

    /// ModPlug extension: left channel data followed by right channel data
    fn is_stereo(&self) -> bool {
        self.kind & 0x20 != 0
    }

    fn width(&self) -> usize {
        if self.is_16bit() {
            2
        } else {
            1
        }
    }

    /// Delta-decode the stored payload; stereo halves are decoded separately and
    /// interleaved into frames
    fn decode(&self, bytes: &[u8]) -> Vec<u8> {
        let undelta = |raw: &[u8]| {
            if self.is_16bit() {
                undelta_16(raw)
            } else {
                undelta_8(raw)
            }
        };
        if !self.is_stereo() {
            return undelta(bytes);
        }

        let width = self.width();
        let channel_len = (self.length as usize / 2) / width * width;
        let split = channel_len.min(bytes.len());
        let left = undelta(&bytes[..split]);
        let right = undelta(&bytes[split..(2 * channel_len).min(bytes.len())]);
        left.chunks_exact(width)
            .zip(right.chunks_exact(width))
            .flat_map(|(l, r)| l.iter().chain(r).copied())
            .collect()
    }

    /// Number of payload bytes stored in the file
    fn stored_size(&self) -> usize {
        if self.packing == ADPCM_MARKER {
            // 16-entry delta table followed by two samples per byte
            (self.length as usize).div_ceil(2) + 16
        } else {
            self.length as usize
        }
    }

    fn into_sample(self, vibrato: AutoVibrato, data: Arc<[u8]>) -> Sample {
        let mut flags = SampleFlags::PANNING;
        if self.is_16bit() {
            flags |= SampleFlags::SIXTEEN_BIT;
        }
        if self.is_stereo() {
            flags |= SampleFlags::STEREO;
        }
        let frame = (self.width() * if self.is_stereo() { 2 } else { 1 }) as u32;
        match self.kind & 0x03 {
            1 => flags |= SampleFlags::LOOP,
            2 | 3 => flags |= SampleFlags::LOOP | SampleFlags::PING_PONG,
            _ => {}
        }
        let length = self.length / frame;
        let (loop_start, loop_end) = if flags.contains(SampleFlags::LOOP) {
            let start = (self.loop_start / frame).min(length);
            (start, (start + self.loop_length / frame).min(length))
        } else {
            (0, 0)
        };
        Sample {
            name: self.name,
            length,
            loop_start,
            loop_end,
            volume: self.volume.min(64) as u16 * 4,
            panning: self.panning as u16,
            flags,
            tuning: Tuning::Relative {
                relative_tone: self.relative_tone,
                fine_tune: self.fine_tune,
            },
            vibrato,
            data,
            ..Sample::default()
        }
    }
}

fn read_instrument(reader: &mut ByteReader, module: &mut Module, options: DecodeOptions) -> Result<()> {
    let start = reader.position();
    let header_len = reader.read_u32_le()? as usize;
    if header_len < MIN_INSTRUMENT_HEADER {
        return Err(Error::decode(format!("Header too small ({header_len} bytes)")));
    }
    let header = reader.read_slice_truncated(header_len - 4);
    let field = |at: usize, len: usize| header.get(at - 4..at - 4 + len);

    let name = field(instrument_offset::NAME, NAME_LEN)
        .map(decode_text)
        .unwrap_or_default();
    let num_samples = field(instrument_offset::NUM_SAMPLES, 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)
        .unwrap_or(0);
    if header.len() < header_len - 4 {
        return Err(Error::decode("Header truncated"));
    }

    let mut instrument = Instrument {
        name,
        ..Instrument::default()
    };
    if num_samples == 0 {
        module.instruments.push(instrument);
        return Ok(());
    }

    let sample_header_size = field(instrument_offset::SAMPLE_HEADER_SIZE, 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
        .unwrap_or(40)
        .max(40);
    if let Some(v) = field(instrument_offset::VIBRATO, 4) {
        instrument.vibrato = AutoVibrato {
            kind: v[0],
            sweep: v[1],
            depth: v[2],
            rate: v[3],
        };
    }
    reader.seek(start + header_len)?;

    let mut headers = Vec::with_capacity(num_samples);
    for _ in 0..num_samples {
        headers.push(SampleHeader::read(reader.read_slice(sample_header_size)?)?);
    }

    for header in headers {
        let stored = header.stored_size();
        let payload: Arc<[u8]> = if options.skip_samples {
            reader.skip(stored.min(reader.remaining()))?;
            Arc::from(Vec::new())
        } else if header.packing == ADPCM_MARKER {
            tracing::warn!(sample = %header.name, "ADPCM sample payload not decoded");
            reader.skip(stored.min(reader.remaining()))?;
            Arc::from(Vec::new())
        } else {
            let bytes = reader.read_slice_truncated(stored);
            if bytes.len() < stored {
                tracing::warn!(
                    sample = %header.name,
                    expected = stored,
                    available = bytes.len(),
                    "sample data truncated"
                );
            }
            Arc::from(header.decode(bytes))
        };
        module.samples.push(header.into_sample(instrument.vibrato, payload));
        instrument.samples.push(module.samples.len());
    }

    module.instruments.push(instrument);
    Ok(())
}

/// Delta-decode 8-bit sample data
fn undelta_8(raw: &[u8]) -> Vec<u8> {
    let mut acc = 0u8;
    raw.iter()
        .map(|&d| {
            acc = acc.wrapping_add(d);
            acc
        })
        .collect()
}

/// Delta-decode 16-bit little-endian sample data; a trailing odd byte is dropped
fn undelta_16(raw: &[u8]) -> Vec<u8> {
    let mut acc = 0u16;
    let mut out = Vec::with_capacity(raw.len() & !1);
    for pair in raw.chunks_exact(2) {
        acc = acc.wrapping_add(u16::from_le_bytes([pair[0], pair[1]]));
        out.extend_from_slice(&acc.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Effect, ModuleSource};

    /// Minimal XM: 2 channels, one 4-row pattern, one instrument with one
    /// 16-bit sample of two frames.
    fn build_xm() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(MAGIC);
        data.extend_from_slice(b"xm title\0\0\0\0\0\0\0\0\0\0\0\0");
        data.push(0x1A);
        data.extend_from_slice(b"FastTracker v2.00   ");
        data.extend_from_slice(&0x0104u16.to_le_bytes());
        data.extend_from_slice(&276u32.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes()); // song length
        data.extend_from_slice(&0u16.to_le_bytes()); // restart
        data.extend_from_slice(&2u16.to_le_bytes()); // channels
        data.extend_from_slice(&1u16.to_le_bytes()); // patterns
        data.extend_from_slice(&1u16.to_le_bytes()); // instruments
        data.extend_from_slice(&1u16.to_le_bytes()); // flags
        data.extend_from_slice(&6u16.to_le_bytes());
        data.extend_from_slice(&125u16.to_le_bytes());
        data.extend_from_slice(&[0u8; 256]);

        // row 0: C-4 ins 1 on ch0 (unpacked), ch1 empty; row 1: key off + Cxx on ch1
        let packed: Vec<u8> = vec![
            49, 1, 0, 0, 0, //
            0x80, //
            0x80, //
            0x80 | 0x01 | 0x08 | 0x10, 97, 0x0C, 0x20,
        ];
        data.extend_from_slice(&9u32.to_le_bytes());
        data.push(0);
        data.extend_from_slice(&4u16.to_le_bytes());
        data.extend_from_slice(&(packed.len() as u16).to_le_bytes());
        data.extend_from_slice(&packed);

        let mut instrument = vec![0u8; 263];
        instrument[..4].copy_from_slice(&263u32.to_le_bytes());
        instrument[4..9].copy_from_slice(b"piano");
        instrument[27..29].copy_from_slice(&1u16.to_le_bytes());
        instrument[29..33].copy_from_slice(&40u32.to_le_bytes());
        instrument[235..239].copy_from_slice(&[1, 2, 3, 4]);
        data.extend_from_slice(&instrument);

        let mut sample = vec![0u8; 40];
        sample[..4].copy_from_slice(&4u32.to_le_bytes());
        sample[12] = 40; // volume
        sample[13] = (-8i8) as u8; // finetune
        sample[14] = 0x10; // 16-bit, no loop
        sample[15] = 0x80; // panning
        sample[16] = 12; // relative note
        sample[18..22].copy_from_slice(b"tone");
        data.extend_from_slice(&sample);
        // delta-encoded frames 0x0100, 0x0300
        data.extend_from_slice(&[0x00, 0x01, 0x00, 0x02]);
        data
    }

    #[test]
    fn test_detect() {
        assert!(detect(&build_xm()));
        assert!(!detect(b"Extended Module: "));
        assert!(!detect(&[0u8; 64]));
    }

    #[test]
    fn test_load_patterns() {
        let module = load(&build_xm(), DecodeOptions::default()).unwrap();
        assert_eq!(module.channels, 2);
        assert_eq!(module.pattern_num_rows(0), 4);
        assert_eq!(module.sequences[0].orders, vec![0]);
        assert_eq!(module.metadata(key::TITLE), Some("xm title"));
        assert_eq!(module.metadata(key::TRACKER), Some("FastTracker v2.00"));

        let first = module.cell(0, 0, 0);
        assert_eq!(first.note, note::MIDDLE_C);
        assert_eq!(first.instrument, 1);
        assert!(module.cell(0, 0, 1).is_empty());
        assert!(module.cell(0, 1, 0).is_empty());

        let off = module.cell(0, 1, 1);
        assert_eq!(off.note, note::KEY_OFF);
        assert_eq!(off.effect, Effect::Volume.code());
        assert_eq!(off.param, 0x20);
        // rows past the packed data stay empty
        assert!(module.cell(0, 3, 1).is_empty());
    }

    #[test]
    fn test_load_instruments() {
        let module = load(&build_xm(), DecodeOptions::default()).unwrap();
        assert_eq!(module.num_instruments(), 1);
        assert_eq!(module.instrument_name(0), Some("piano"));
        assert_eq!(module.instruments[0].samples, vec![1]);

        let sample = module.sample(1).unwrap();
        assert_eq!(sample.name, "tone");
        assert_eq!(sample.bits(), 16);
        assert_eq!(sample.length, 2);
        assert_eq!(sample.volume, 160);
        assert_eq!(sample.panning, 0x80);
        assert_eq!(
            sample.tuning,
            Tuning::Relative {
                relative_tone: 12,
                fine_tune: -8
            }
        );
        assert_eq!(
            sample.vibrato,
            AutoVibrato {
                kind: 1,
                sweep: 2,
                depth: 3,
                rate: 4
            }
        );
        assert_eq!(&*sample.data, &[0x00, 0x01, 0x00, 0x03]);
    }

    #[test]
    fn test_zero_channels_rejected() {
        let mut data = build_xm();
        data[offset::CHANNELS] = 0;
        assert!(matches!(
            load(&data, DecodeOptions::default()),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_truncated_pattern_rejected() {
        let data = build_xm();
        let cut = offset::HEADER_SIZE + 276 + 12;
        assert!(load(&data[..cut], DecodeOptions::default()).is_err());
    }

    #[test]
    fn test_oversized_pattern_rejected() {
        let mut data = build_xm();
        // row count of the first pattern header
        let at = offset::HEADER_SIZE + 276 + 5;
        data[at..at + 2].copy_from_slice(&1000u16.to_le_bytes());
        assert!(load(&data, DecodeOptions::default()).is_err());
    }

    #[test]
    fn test_stereo_sample() {
        let mut data = build_xm();
        let sample_at = data.len() - 4 - 40;
        // 8-bit stereo, four bytes: two frames
        data[sample_at + 14] = 0x20;
        let payload = data.len() - 4;
        data[payload..].copy_from_slice(&[1, 1, 5, 1]);

        let module = load(&data, DecodeOptions::default()).unwrap();
        let sample = module.sample(1).unwrap();
        assert!(sample.is_stereo());
        assert_eq!(sample.bits(), 8);
        assert_eq!(sample.length, 2);
        assert_eq!(sample.length_bytes(), 4);
        assert_eq!(&*sample.data, &[1, 5, 2, 6]);
    }

    #[test]
    fn test_undelta() {
        assert_eq!(undelta_8(&[1, 1, 0xFE]), vec![1, 2, 0]);
        assert_eq!(undelta_16(&[0xFF, 0xFF, 0x02, 0x00, 0x07]), vec![0xFF, 0xFF, 0x01, 0x00]);
    }

    #[test]
    fn test_convert_note() {
        assert_eq!(convert_note(0), note::NONE);
        assert_eq!(convert_note(1), note::MIN + 12);
        assert_eq!(convert_note(97), note::KEY_OFF);
        assert_eq!(convert_note(98), note::NONE);
    }
}
