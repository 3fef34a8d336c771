//! Subsong detection
//!
//! A sequence is played through from order 0 following position jumps and
//! pattern breaks. Orders never reached that way start further subsongs, which
//! are then played through in turn until every playable order is covered.

use super::effects::{pattern_break_row, Effect};
use super::{Module, Pattern, Subsong};

/// Rebuild `module.subsongs` from its sequences and reset the cursor to the first one
pub fn detect_subsongs(module: &mut Module) {
    let mut subsongs = Vec::new();

    for (index, sequence) in module.sequences.iter().enumerate() {
        let patterns: Vec<Option<&Pattern>> = sequence
            .orders
            .iter()
            .map(|&p| module.patterns.get(p).filter(|p| p.rows() > 0))
            .collect();
        let mut visited: Vec<Vec<bool>> = patterns
            .iter()
            .map(|p| vec![false; p.map_or(1, Pattern::rows)])
            .collect();

        let mut start = Some(0);
        while let Some(start_order) = start {
            subsongs.push(Subsong {
                sequence: index,
                start_order,
            });
            play_through(&patterns, &mut visited, start_order);

            start = (0..patterns.len())
                .find(|&o| patterns[o].is_some() && !visited[o].iter().any(|&v| v));
        }
    }

    if subsongs.is_empty() {
        subsongs.push(Subsong::default());
    }
    module.cursor = subsongs[0];
    module.subsongs = subsongs;
}

/// Mark every (order, row) reached from `order`, stopping at the end of the
/// sequence or at the first position played twice
fn play_through(patterns: &[Option<&Pattern>], visited: &mut [Vec<bool>], mut order: usize) {
    let mut row = 0;
    loop {
        while order < patterns.len() && patterns[order].is_none() {
            visited[order][0] = true;
            order += 1;
            row = 0;
        }
        let Some(pattern) = patterns.get(order).copied().flatten() else {
            break;
        };
        if row >= pattern.rows() {
            row = 0;
        }
        if visited[order][row] {
            break;
        }
        visited[order][row] = true;

        let mut jump = None;
        let mut break_row = None;
        for cell in pattern.row_cells(row) {
            match Effect::from_code(cell.effect) {
                Some(Effect::PositionJump) => jump = Some(cell.param as usize),
                Some(Effect::PatternBreak) => break_row = Some(pattern_break_row(cell.param)),
                _ => {}
            }
        }

        if jump.is_some() || break_row.is_some() {
            order = jump.unwrap_or(order + 1);
            row = break_row.unwrap_or(0);
        } else {
            row += 1;
            if row >= pattern.rows() {
                order += 1;
                row = 0;
            }
        }
    }
}
