//! Pattern fingerprint
//!
//! The fingerprint is a 64-bit FNV-1a digest over every non-zero note met while
//! walking all non-hidden subsongs order by order, row by row, channel by channel.
//! Values must stay bit-for-bit stable; the traversal below is the definition.

use crate::module::ModuleSource;
use std::hash::Hasher;

/// FNV-1a 64-bit offset basis
pub const FNV_OFFSET_BASIS: u64 = 14695981039346656037;

/// FNV-1a 64-bit prime
pub const FNV_PRIME: u64 = 1099511628211;

/// Effect code that, paired with `SENTINEL_PARAM`, stops an effect-aware traversal
pub const SENTINEL_EFFECT: u8 = 1;
pub const SENTINEL_PARAM: u8 = 0xFF;

/// Fingerprint reported when the sentinel cell is found
pub const SENTINEL_FINGERPRINT: u64 = 1;

/// Incremental FNV-1a (64-bit) accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fnv1a64 {
    hash: u64,
}

impl Fnv1a64 {
    pub fn new() -> Self {
        Self {
            hash: FNV_OFFSET_BASIS,
        }
    }

    /// Fold one byte into the hash
    #[inline]
    pub fn update(&mut self, value: u8) {
        self.hash ^= value as u64;
        self.hash = self.hash.wrapping_mul(FNV_PRIME);
    }

    pub fn value(&self) -> u64 {
        self.hash
    }
}

impl Default for Fnv1a64 {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for Fnv1a64 {
    fn finish(&self) -> u64 {
        self.hash
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.update(b);
        }
    }
}

/// Result of a traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fingerprint {
    /// Digest of the note content
    Content(u64),
    /// The sentinel cell was found; the value is `SENTINEL_FINGERPRINT`
    Sentinel,
}

impl Fingerprint {
    pub fn value(self) -> u64 {
        match self {
            Fingerprint::Content(hash) => hash,
            Fingerprint::Sentinel => SENTINEL_FINGERPRINT,
        }
    }

    pub fn is_sentinel(self) -> bool {
        matches!(self, Fingerprint::Sentinel)
    }
}

/// Traversal settings
#[derive(Debug, Clone, Copy, Default)]
pub struct TraversalOptions {
    /// Read effect columns and stop at the sentinel cell
    pub effect_aware: bool,
    /// Emit one trace event per traversed cell on target `modhash::cells`
    pub verbose: bool,
}

/// Compute the fingerprint of a module.
///
/// Subsongs whose selection lands on a non-zero order are hidden subsongs: their
/// orders are part of a sequence that is walked in full from order 0 anyway, so
/// they are skipped. The cursor is left on subsong 0.
pub fn fingerprint<M: ModuleSource + ?Sized>(module: &mut M, options: TraversalOptions) -> Fingerprint {
    let mut hasher = Fnv1a64::new();
    let result = walk(module, options, &mut hasher);
    if module.num_subsongs() > 0 {
        module.select_subsong(0);
    }
    result
}

fn walk<M: ModuleSource + ?Sized>(
    module: &mut M,
    options: TraversalOptions,
    hasher: &mut Fnv1a64,
) -> Fingerprint {
    let num_channels = module.num_channels();

    for subsong in 0..module.num_subsongs() {
        module.select_subsong(subsong);
        if module.current_order() != 0 {
            tracing::debug!(subsong, order = module.current_order(), "skipping hidden subsong");
            continue;
        }

        for order in 0..module.num_orders() {
            let Some(pattern) = module.order_pattern(order) else {
                continue;
            };
            for row in 0..module.pattern_num_rows(pattern) {
                for channel in 0..num_channels {
                    if options.verbose {
                        tracing::trace!(
                            target: "modhash::cells",
                            subsong,
                            order,
                            pattern,
                            row,
                            channel,
                            "{}",
                            module.cell(pattern, row, channel)
                        );
                    }

                    if options.effect_aware
                        && module.cell_effect(pattern, row, channel) == SENTINEL_EFFECT
                        && module.cell_effect_param(pattern, row, channel) == SENTINEL_PARAM
                    {
                        tracing::debug!(order, pattern, row, channel, "sentinel cell found");
                        return Fingerprint::Sentinel;
                    }

                    let note = module.cell_note(pattern, row, channel);
                    if note != 0 {
                        hasher.update(note);
                    }
                }
            }
        }
    }

    Fingerprint::Content(hasher.value())
}

/// Hash a raw note sequence exactly as the traversal would, skipping zeros
pub fn hash_notes(notes: impl IntoIterator<Item = u8>) -> u64 {
    let mut hasher = Fnv1a64::new();
    for note in notes.into_iter().filter(|&n| n != 0) {
        hasher.update(note);
    }
    hasher.value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Cell, Effect, Format, Module, Pattern, Sequence, Subsong};

    fn two_row_module() -> Module {
        let mut module = Module::new(Format::Mod, 4);
        let mut pattern = Pattern::empty(2, 4);
        pattern.set(0, 0, Cell::note(60));
        module.add_pattern(pattern);
        module.sequences = vec![Sequence::new(vec![0])];
        module
    }

    #[test]
    fn test_fnv_known_values() {
        assert_eq!(Fnv1a64::new().value(), FNV_OFFSET_BASIS);
        // FNV-1a 64 of "a"
        let mut h = Fnv1a64::new();
        h.write(b"a");
        assert_eq!(h.finish(), 0xaf63dc4c8601ec8c);
        let mut h = Fnv1a64::new();
        h.write(b"foobar");
        assert_eq!(h.finish(), 0x85944171f73967e8);
    }

    #[test]
    fn test_single_note_scenario() {
        let mut module = two_row_module();
        let expected = (FNV_OFFSET_BASIS ^ 60).wrapping_mul(FNV_PRIME);
        let result = fingerprint(&mut module, TraversalOptions::default());
        assert_eq!(result, Fingerprint::Content(expected));
        assert_eq!(result.value(), hash_notes([60]));
    }

    #[test]
    fn test_sentinel_scenario() {
        let mut module = two_row_module();
        module.patterns[0].set(1, 3, Cell::default().with_effect(Effect::Arpeggio, 0xFF));

        let aware = TraversalOptions {
            effect_aware: true,
            verbose: false,
        };
        let result = fingerprint(&mut module, aware);
        assert_eq!(result, Fingerprint::Sentinel);
        assert_eq!(result.value(), 1);

        // without effect awareness the cell is ordinary content
        let plain = fingerprint(&mut module, TraversalOptions::default());
        assert_eq!(plain.value(), hash_notes([60]));
    }

    #[test]
    fn test_arpeggio_with_other_param_is_not_sentinel() {
        let mut module = two_row_module();
        module.patterns[0].set(1, 0, Cell::default().with_effect(Effect::Arpeggio, 0xFE));
        let result = fingerprint(
            &mut module,
            TraversalOptions {
                effect_aware: true,
                verbose: true,
            },
        );
        assert_eq!(result, Fingerprint::Content(hash_notes([60])));
    }

    #[test]
    fn test_row_major_order() {
        let mut module = Module::new(Format::Mod, 2);
        let mut pattern = Pattern::empty(2, 2);
        pattern.set(0, 1, Cell::note(2));
        pattern.set(1, 0, Cell::note(3));
        pattern.set(0, 0, Cell::note(1));
        module.add_pattern(pattern);
        module.sequences = vec![Sequence::new(vec![0])];

        let result = fingerprint(&mut module, TraversalOptions::default());
        assert_eq!(result.value(), hash_notes([1, 2, 3]));
        assert_ne!(result.value(), hash_notes([1, 3, 2]));
    }

    #[test]
    fn test_repeated_orders_contribute_twice() {
        let mut module = two_row_module();
        module.sequences[0].orders = vec![0, 0];
        let result = fingerprint(&mut module, TraversalOptions::default());
        assert_eq!(result.value(), hash_notes([60, 60]));
    }

    #[test]
    fn test_hidden_subsong_skipped_and_cursor_reset() {
        let mut module = two_row_module();
        module.sequences[0].orders = vec![0, 0];
        let without = fingerprint(&mut module, TraversalOptions::default());

        module.subsongs.push(Subsong {
            sequence: 0,
            start_order: 1,
        });
        let with = fingerprint(&mut module, TraversalOptions::default());
        assert_eq!(without, with);
        assert_eq!(module.selected(), Subsong::default());
    }

    #[test]
    fn test_second_sequence_contributes() {
        let mut module = two_row_module();
        module.sequences.push(Sequence::new(vec![0]));
        module.subsongs.push(Subsong {
            sequence: 1,
            start_order: 0,
        });
        let result = fingerprint(&mut module, TraversalOptions::default());
        assert_eq!(result.value(), hash_notes([60, 60]));
    }

    #[test]
    fn test_empty_module() {
        let mut module = Module::new(Format::Xm, 8);
        let result = fingerprint(&mut module, TraversalOptions::default());
        assert_eq!(result.value(), FNV_OFFSET_BASIS);
    }
}
