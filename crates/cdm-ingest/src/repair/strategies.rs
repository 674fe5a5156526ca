//! Individual repair strategies, tried in chain order by the engine.

use super::profile::RowProfile;
use super::segment::{SplitMode, segment};

/// One step of the repair chain.
///
/// A strategy either reconstructs exactly `profile.arity()` values or
/// declines by returning `None`, letting the next strategy try.
pub trait RepairStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn attempt(&self, fields: &[String], profile: &RowProfile) -> Option<Vec<String>>;
}

/// Accepts rows whose field count already equals the header arity.
#[derive(Debug, Clone, Copy, Default)]
pub struct WellFormed;

impl WellFormed {
    pub const NAME: &'static str = "well_formed";
}

impl RepairStrategy for WellFormed {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn attempt(&self, fields: &[String], profile: &RowProfile) -> Option<Vec<String>> {
        (fields.len() == profile.arity()).then(|| fields.to_vec())
    }
}

/// Splits a fully fused row using anchor patterns only.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnchoredSplit;

impl RepairStrategy for AnchoredSplit {
    fn name(&self) -> &'static str {
        "anchored"
    }

    fn attempt(&self, fields: &[String], profile: &RowProfile) -> Option<Vec<String>> {
        fused_row(fields, profile)
            .and_then(|text| segment(text, profile.columns(), SplitMode::AnchorsOnly))
    }
}

/// Splits a fully fused row, dividing unanchored runs by expected length.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProportionalSplit;

impl RepairStrategy for ProportionalSplit {
    fn name(&self) -> &'static str {
        "proportional"
    }

    fn attempt(&self, fields: &[String], profile: &RowProfile) -> Option<Vec<String>> {
        fused_row(fields, profile)
            .and_then(|text| segment(text, profile.columns(), SplitMode::Proportional))
    }
}

fn fused_row<'a>(fields: &'a [String], profile: &RowProfile) -> Option<&'a str> {
    match fields {
        [only] if profile.arity() > 1 => Some(only.as_str()),
        _ => None,
    }
}

/// Keeps the separated fields of a partially formatted row and re-splits
/// the single field that absorbed the missing separators.
///
/// Every field position is considered as the fused one; the candidate whose
/// preserved fields best fit their columns wins, then the one closest to
/// the expected lengths, then the leftmost.
#[derive(Debug, Clone, Copy)]
pub struct PartialSalvage {
    mode: SplitMode,
}

impl PartialSalvage {
    pub fn anchored() -> Self {
        Self {
            mode: SplitMode::AnchorsOnly,
        }
    }

    pub fn proportional() -> Self {
        Self {
            mode: SplitMode::Proportional,
        }
    }
}

impl RepairStrategy for PartialSalvage {
    fn name(&self) -> &'static str {
        match self.mode {
            SplitMode::AnchorsOnly => "partial_salvage",
            SplitMode::Proportional => "partial_salvage_proportional",
        }
    }

    fn attempt(&self, fields: &[String], profile: &RowProfile) -> Option<Vec<String>> {
        let arity = profile.arity();
        let observed = fields.len();
        if observed < 2 || observed >= arity {
            return None;
        }
        let width = arity - observed + 1;
        let columns = profile.columns();

        let mut best: Option<(usize, f64, usize, Vec<String>)> = None;
        for fused in 0..observed {
            let fused_columns = &columns[fused..fused + width];
            let Some(pieces) = segment(&fields[fused], fused_columns, self.mode) else {
                continue;
            };

            let mut fits = 0;
            let mut deviation = 0.0;
            for (idx, value) in fields.iter().enumerate() {
                if idx == fused {
                    continue;
                }
                let column = if idx < fused {
                    &columns[idx]
                } else {
                    &columns[idx + width - 1]
                };
                if column.fits(value) {
                    fits += 1;
                }
                deviation += (value.chars().count() as f64 - column.expected_len).abs();
            }
            let expected: f64 = fused_columns.iter().map(|column| column.expected_len).sum();
            deviation += (fields[fused].chars().count() as f64 - expected).abs();

            let better = match &best {
                None => true,
                Some((best_fits, best_deviation, _, _)) => {
                    fits > *best_fits || (fits == *best_fits && deviation < *best_deviation)
                }
            };
            if better {
                best = Some((fits, deviation, fused, pieces));
            }
        }

        let (_, _, fused, pieces) = best?;
        let mut values = Vec::with_capacity(arity);
        values.extend_from_slice(&fields[..fused]);
        values.extend(pieces);
        values.extend_from_slice(&fields[fused + 1..]);
        Some(values)
    }
}
