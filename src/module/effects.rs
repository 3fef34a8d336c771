//! Normalized note and effect values
//!
//! Every loader converts its native encoding into these values so that the
//! fingerprint and the diagnostics see one vocabulary regardless of format.

/// Note value constants
pub mod note {
    /// Empty cell
    pub const NONE: u8 = 0;
    /// C-0
    pub const MIN: u8 = 1;
    /// C-5
    pub const MIDDLE_C: u8 = 61;
    /// B-9
    pub const MAX: u8 = 120;
    pub const FADE: u8 = 253;
    pub const CUT: u8 = 254;
    pub const KEY_OFF: u8 = 255;
}

const NOTE_NAMES: [&str; 12] = [
    "C-", "C#", "D-", "D#", "E-", "F-", "F#", "G-", "G#", "A-", "A#", "B-",
];

/// Three-character tracker display of a note value
pub fn note_name(value: u8) -> String {
    match value {
        note::NONE => "...".to_string(),
        note::MIN..=note::MAX => {
            let n = value - note::MIN;
            format!("{}{}", NOTE_NAMES[(n % 12) as usize], n / 12)
        }
        note::FADE => "~~~".to_string(),
        note::CUT => "^^^".to_string(),
        note::KEY_OFF => "===".to_string(),
        _ => "???".to_string(),
    }
}

/// Normalized effect commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Effect {
    None = 0,
    Arpeggio = 1,
    PortamentoUp = 2,
    PortamentoDown = 3,
    TonePortamento = 4,
    Vibrato = 5,
    TonePortaVolSlide = 6,
    VibratoVolSlide = 7,
    Tremolo = 8,
    Panning = 9,
    Offset = 10,
    VolumeSlide = 11,
    PositionJump = 12,
    Volume = 13,
    PatternBreak = 14,
    Retrigger = 15,
    Speed = 16,
    Tempo = 17,
    Tremor = 18,
    ModExtended = 19,
    GlobalVolume = 23,
    GlobalVolumeSlide = 24,
    KeyOff = 25,
    ExtraFinePortamento = 28,
    PanningSlide = 29,
    SetEnvelopePosition = 30,
}

impl Effect {
    /// Look up a normalized effect from its numeric code
    pub fn from_code(code: u8) -> Option<Self> {
        use Effect::*;
        Some(match code {
            0 => None,
            1 => Arpeggio,
            2 => PortamentoUp,
            3 => PortamentoDown,
            4 => TonePortamento,
            5 => Vibrato,
            6 => TonePortaVolSlide,
            7 => VibratoVolSlide,
            8 => Tremolo,
            9 => Panning,
            10 => Offset,
            11 => VolumeSlide,
            12 => PositionJump,
            13 => Volume,
            14 => PatternBreak,
            15 => Retrigger,
            16 => Speed,
            17 => Tempo,
            18 => Tremor,
            19 => ModExtended,
            23 => GlobalVolume,
            24 => GlobalVolumeSlide,
            25 => KeyOff,
            28 => ExtraFinePortamento,
            29 => PanningSlide,
            30 => SetEnvelopePosition,
            _ => return Option::None,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Convert a ProTracker/FastTracker effect (command digit 0x0-0x21) and parameter
/// into a normalized `(effect, param)` pair.
///
/// `is_xm` enables the FastTracker 2 commands above 0xF and keeps Fxx speed/tempo
/// split at 0x20 as both trackers do.
pub fn convert_mod_effect(command: u8, param: u8, is_xm: bool) -> (Effect, u8) {
    let effect = match command {
        0x0 if param != 0 => Effect::Arpeggio,
        0x0 => Effect::None,
        0x1 => Effect::PortamentoUp,
        0x2 => Effect::PortamentoDown,
        0x3 => Effect::TonePortamento,
        0x4 => Effect::Vibrato,
        0x5 => Effect::TonePortaVolSlide,
        0x6 => Effect::VibratoVolSlide,
        0x7 => Effect::Tremolo,
        0x8 => Effect::Panning,
        0x9 => Effect::Offset,
        0xA => Effect::VolumeSlide,
        0xB => Effect::PositionJump,
        0xC => Effect::Volume,
        0xD => Effect::PatternBreak,
        0xE => Effect::ModExtended,
        0xF if param < 0x20 => Effect::Speed,
        0xF => Effect::Tempo,
        0x10 if is_xm => Effect::GlobalVolume,
        0x11 if is_xm => Effect::GlobalVolumeSlide,
        0x14 if is_xm => Effect::KeyOff,
        0x15 if is_xm => Effect::SetEnvelopePosition,
        0x19 if is_xm => Effect::PanningSlide,
        0x1B if is_xm => Effect::Retrigger,
        0x1D if is_xm => Effect::Tremor,
        0x21 if is_xm => Effect::ExtraFinePortamento,
        _ => Effect::None,
    };
    if effect == Effect::None {
        (Effect::None, 0)
    } else {
        (effect, param)
    }
}

/// Row targeted by a pattern break parameter (stored as two decimal digits)
pub fn pattern_break_row(param: u8) -> usize {
    ((param >> 4) as usize) * 10 + (param & 0x0F) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_names() {
        assert_eq!(note_name(note::MIDDLE_C), "C-5");
        assert_eq!(note_name(note::MIN), "C-0");
        assert_eq!(note_name(note::MIN + 13), "C#1");
        assert_eq!(note_name(note::NONE), "...");
        assert_eq!(note_name(note::KEY_OFF), "===");
    }

    #[test]
    fn test_arpeggio_needs_param() {
        assert_eq!(convert_mod_effect(0, 0, false), (Effect::None, 0));
        assert_eq!(convert_mod_effect(0, 0xFF, false), (Effect::Arpeggio, 0xFF));
        assert_eq!(Effect::Arpeggio.code(), 1);
    }

    #[test]
    fn test_speed_tempo_split() {
        assert_eq!(convert_mod_effect(0xF, 0x06, false).0, Effect::Speed);
        assert_eq!(convert_mod_effect(0xF, 0x7D, false).0, Effect::Tempo);
    }

    #[test]
    fn test_xm_only_commands() {
        assert_eq!(convert_mod_effect(0x10, 0x40, false), (Effect::None, 0));
        assert_eq!(convert_mod_effect(0x10, 0x40, true), (Effect::GlobalVolume, 0x40));
        assert_eq!(convert_mod_effect(0x14, 0x00, true).0, Effect::KeyOff);
    }

    #[test]
    fn test_code_roundtrip() {
        for code in 0..=255u8 {
            if let Some(effect) = Effect::from_code(code) {
                assert_eq!(effect.code(), code);
            }
        }
    }

    #[test]
    fn test_pattern_break_row() {
        assert_eq!(pattern_break_row(0x00), 0);
        assert_eq!(pattern_break_row(0x16), 16);
        assert_eq!(pattern_break_row(0x63), 63);
    }
}
