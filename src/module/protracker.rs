//! ProTracker MOD loader (31 samples, 4-99 channels)

use super::effects::{convert_mod_effect, note};
use super::reader::ByteReader;
use super::{key, Cell, DecodeOptions, Format, Module, Pattern, Sample, SampleFlags, Sequence, Tuning};
use crate::error::{Error, Result};
use std::sync::Arc;

/// Offset of the format tag
const MAGIC_OFFSET: usize = 1080;
/// Size of everything before the pattern data
const HEADER_SIZE: usize = 1084;
const TITLE_LEN: usize = 20;
const SAMPLE_NAME_LEN: usize = 22;
const NUM_SAMPLES: usize = 31;
const ORDER_TABLE_LEN: usize = 128;
const ROWS_PER_PATTERN: usize = 64;
const FLT8_MAGIC: &[u8; 4] = b"FLT8";

/// ProTracker periods for finetune 0, five octaves starting at C-0
const PERIODS: [u16; 60] = [
    1712, 1616, 1525, 1440, 1357, 1281, 1209, 1141, 1077, 1017, 961, 907, //
    856, 808, 762, 720, 678, 640, 604, 570, 538, 508, 480, 453, //
    428, 404, 381, 360, 340, 320, 302, 285, 269, 254, 240, 226, //
    214, 202, 190, 180, 170, 160, 151, 143, 135, 127, 120, 113, //
    107, 101, 95, 90, 85, 80, 76, 71, 67, 64, 60, 57,
];

/// Normalized note of `PERIODS[0]`; period 428 lands on middle C
const FIRST_PERIOD_NOTE: u8 = note::MIDDLE_C - 24;

/// Channel count and tracker name implied by a format tag
fn identify(magic: &[u8]) -> Option<(usize, &'static str)> {
    let digit = |b: u8| b.is_ascii_digit().then(|| (b - b'0') as usize);
    match magic {
        b"M.K." | b"M!K!" | b"M&K!" => Some((4, "ProTracker")),
        b"N.T." => Some((4, "NoiseTracker")),
        b"FLT4" => Some((4, "Startrekker")),
        b"FLT8" => Some((8, "Startrekker")),
        b"CD81" | b"OKTA" | b"OCTA" => Some((8, "Oktalyser")),
        [d, b'C', b'H', b'N'] => digit(*d)
            .filter(|&n| n > 0)
            .map(|n| (n, "Generic MOD-compatible Tracker")),
        [d1, d2, b'C', b'H'] | [d1, d2, b'C', b'N'] => {
            let n = digit(*d1)? * 10 + digit(*d2)?;
            (n > 0).then_some((n, "FastTracker"))
        }
        [b'T', b'D', b'Z', d] => digit(*d)
            .filter(|&n| n > 0)
            .map(|n| (n, "TakeTracker")),
        _ => None,
    }
}

/// Check for a recognised MOD tag
pub fn detect(data: &[u8]) -> bool {
    data.len() >= HEADER_SIZE && identify(&data[MAGIC_OFFSET..HEADER_SIZE]).is_some()
}

/// Map an Amiga period to the closest normalized note
pub fn period_to_note(period: u16) -> u8 {
    if period == 0 {
        return note::NONE;
    }
    let (index, _) = PERIODS
        .iter()
        .enumerate()
        .min_by_key(|(_, &p)| (p as i32 - period as i32).abs())
        .unwrap_or((0, &0));
    FIRST_PERIOD_NOTE + index as u8
}

/// Unpack one 4-byte pattern event
fn read_event(raw: &[u8]) -> Cell {
    let period = (((raw[0] & 0x0F) as u16) << 8) | raw[1] as u16;
    let instrument = (raw[0] & 0xF0) | (raw[2] >> 4);
    let (effect, param) = convert_mod_effect(raw[2] & 0x0F, raw[3], false);
    Cell {
        note: period_to_note(period),
        instrument,
        effect: effect.code(),
        param,
    }
}

struct SampleHeader {
    name: String,
    length: u32,
    fine_tune: i8,
    volume: u8,
    loop_start: u32,
    loop_length: u32,
}

fn read_sample_header(reader: &mut ByteReader) -> Result<SampleHeader> {
    let name = reader.read_string(SAMPLE_NAME_LEN)?;
    let length = reader.read_u16_be()? as u32 * 2;
    // Finetune is a signed nibble; the normalized scale is 1/128th semitones
    let fine_tune = ((reader.read_u8()? & 0x0F) << 4) as i8;
    let volume = reader.read_u8()?.min(64);
    let loop_start = reader.read_u16_be()? as u32 * 2;
    let loop_length = reader.read_u16_be()? as u32 * 2;
    Ok(SampleHeader {
        name,
        length,
        fine_tune,
        volume,
        loop_start,
        loop_length,
    })
}

impl SampleHeader {
    fn into_sample(self, data: Arc<[u8]>) -> Sample {
        let mut flags = SampleFlags::empty();
        let mut loop_end = 0;
        if self.loop_length > 2 {
            flags |= SampleFlags::LOOP;
            loop_end = (self.loop_start + self.loop_length).min(self.length);
        }
        Sample {
            name: self.name,
            length: self.length,
            loop_start: if flags.is_empty() { 0 } else { self.loop_start },
            loop_end,
            volume: self.volume as u16 * 4,
            flags,
            tuning: Tuning::Relative {
                relative_tone: 0,
                fine_tune: self.fine_tune,
            },
            data,
            ..Sample::default()
        }
    }
}

/// Load a MOD file
pub fn load(data: &[u8], options: DecodeOptions) -> Result<Module> {
    let (channels, tracker) = identify(data.get(MAGIC_OFFSET..HEADER_SIZE).unwrap_or(&[]))
        .ok_or(Error::UnsupportedFormat)?;

    let mut reader = ByteReader::new(data);
    let title = reader.read_string(TITLE_LEN)?;

    let mut headers = Vec::with_capacity(NUM_SAMPLES);
    for _ in 0..NUM_SAMPLES {
        headers.push(read_sample_header(&mut reader)?);
    }

    let song_length = (reader.read_u8()? as usize).min(ORDER_TABLE_LEN);
    let _restart = reader.read_u8()?;
    let order_table = reader.read_slice(ORDER_TABLE_LEN)?;
    reader.seek(HEADER_SIZE)?;

    // Startrekker FLT8 stores each pattern as two 4-channel halves and only
    // references even (half) indices in the order table.
    let split = data.get(MAGIC_OFFSET..HEADER_SIZE) == Some(FLT8_MAGIC.as_slice());
    let (halves, stride) = if split { (2, 4) } else { (1, channels) };
    let orders: Vec<usize> = order_table
        .iter()
        .map(|&p| if split { p as usize / 2 } else { p as usize })
        .collect();

    // Patterns are stored up to the highest index in the full table, not just
    // the played part of it.
    let num_patterns = orders.iter().copied().max().unwrap_or(0) + 1;
    let chunk_size = ROWS_PER_PATTERN * stride * 4;

    let mut module = Module::new(Format::Mod, channels);
    module.set_metadata(key::TITLE, title);
    module.set_metadata(key::TRACKER, tracker);

    for index in 0..num_patterns {
        let mut pattern = Pattern::empty(ROWS_PER_PATTERN, channels);
        for half in 0..halves {
            let raw = reader.read_slice(chunk_size).map_err(|_| {
                Error::decode(format!("Pattern {index} truncated"))
            })?;
            let first_channel = half * stride;
            for (i, event) in raw.chunks_exact(4).enumerate() {
                pattern.set(i / stride, first_channel + i % stride, read_event(event));
            }
        }
        module.add_pattern(pattern);
    }

    module.sequences = vec![Sequence::new(orders[..song_length].to_vec())];

    for (index, header) in headers.into_iter().enumerate() {
        let len = header.length as usize;
        let payload = if options.skip_samples {
            reader.skip(len.min(reader.remaining()))?;
            Arc::from(Vec::new())
        } else {
            let bytes = reader.read_slice_truncated(len);
            if bytes.len() < len {
                tracing::warn!(
                    sample = index + 1,
                    expected = len,
                    available = bytes.len(),
                    "sample data truncated"
                );
            }
            Arc::from(bytes)
        };
        module.samples.push(header.into_sample(payload));
    }

    Ok(module)
}
