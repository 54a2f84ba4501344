// Window of snapshots → long-form chart series.
// Pure: the same input always yields the same output, no state survives a call.
//
// 1. collapse readings identical to an earlier one (timestamp ignored)
// 2. drop rows without the anchor reading (heating supply temperature)
// 3. rebase cumulative counters to the window, map modulation into its display band
// 4. melt to (timestamp, variable, value)

use std::collections::HashSet;

use crate::models::{
    Field, Normalization, STARTS_DISPLAY_MAX, Series, SeriesPoint, Snapshot, modulation_forward,
};

/// Lookback used when the caller does not choose one.
pub const DEFAULT_WINDOW_DAYS: u32 = 2;

/// Rows without this reading come from a broken poll and are not charted.
pub const ANCHOR: Field = Field::TempHeating;

type ReadingKey = [Option<u64>; Field::ALL.len()];

fn reading_key(s: &Snapshot) -> ReadingKey {
    let mut key = [None; Field::ALL.len()];
    for (slot, field) in key.iter_mut().zip(Field::ALL) {
        // -0.0 and 0.0 are the same reading.
        *slot = s.value(field).map(|v| if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() });
    }
    key
}

/// First occurrence (by time) of every distinct reading.
pub fn dedupe<'a>(snapshots: &[&'a Snapshot]) -> Vec<&'a Snapshot> {
    let mut seen: HashSet<ReadingKey> = HashSet::with_capacity(snapshots.len());
    snapshots
        .iter()
        .copied()
        .filter(|s| seen.insert(reading_key(s)))
        .collect()
}

fn min_max(rows: &[&Snapshot], field: Field) -> Option<(f64, f64)> {
    rows.iter()
        .filter_map(|s| s.value(field))
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Transform parameters for this window.
pub fn fit(rows: &[&Snapshot]) -> Normalization {
    let hours = min_max(rows, Field::Hours);
    let starts = min_max(rows, Field::Starts);
    Normalization {
        hours_offset: hours.map(|(lo, _)| lo),
        starts_offset: starts.map(|(lo, _)| lo),
        starts_scale: starts
            .map(|(lo, hi)| hi - lo)
            .filter(|span| *span > 0.0)
            .map(|span| STARTS_DISPLAY_MAX / span),
    }
}

/// Display value of one reading under `norm`.
pub fn normalize(norm: &Normalization, field: Field, value: f64) -> f64 {
    match field {
        Field::Hours => value - norm.hours_offset.unwrap_or(0.0),
        Field::Starts => {
            let rebased = value - norm.starts_offset.unwrap_or(0.0);
            match norm.starts_scale {
                Some(scale) => rebased * scale,
                None => rebased,
            }
        }
        Field::Modulation => modulation_forward(value),
        _ => value,
    }
}

/// Build the chart series for one window. Unknown readings produce no point.
pub fn build(snapshots: &[Snapshot]) -> Series {
    let mut ordered: Vec<&Snapshot> = snapshots.iter().collect();
    ordered.sort_by_key(|s| s.timestamp);

    let rows: Vec<&Snapshot> = dedupe(&ordered)
        .into_iter()
        .filter(|s| s.value(ANCHOR).is_some())
        .collect();
    if rows.is_empty() {
        return Series::default();
    }

    let normalization = fit(&rows);
    let mut points = Vec::with_capacity(rows.len() * Field::ALL.len());
    for row in &rows {
        for field in Field::ALL {
            if let Some(v) = row.value(field) {
                points.push(SeriesPoint {
                    timestamp: row.timestamp,
                    variable: field,
                    value: normalize(&normalization, field, v),
                });
            }
        }
    }

    Series {
        rows: rows.len(),
        normalization,
        points,
    }
}
