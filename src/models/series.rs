// Long-form chart series: one point per (time, variable).

use serde::{Deserialize, Serialize};

use super::Field;

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Closed time interval `[since, until]` in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub since: i64,
    pub until: i64,
}

impl Window {
    pub fn new(since: i64, until: i64) -> Self {
        Self { since, until }
    }

    /// The `days` days up to and including `now`.
    pub fn last_days(now: i64, days: u32) -> Self {
        Self {
            since: now - i64::from(days) * SECS_PER_DAY,
            until: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.since > self.until
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.since <= timestamp && timestamp <= self.until
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: i64,
    pub variable: Field,
    pub value: f64,
}

/// Parameters of the display transforms applied to one window, so consumers can
/// recover original units. `None` when the variable had no values in the window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    /// Subtracted from `hours`.
    pub hours_offset: Option<f64>,
    /// Subtracted from `starts` before scaling.
    pub starts_offset: Option<f64>,
    /// Rebased `starts` were multiplied by this (10 / rebased max); `None` if unscaled.
    pub starts_scale: Option<f64>,
}

pub const MODULATION_BASE: f64 = 2.0;
pub const MODULATION_DIVISOR: f64 = 50.0;
pub const STARTS_DISPLAY_MAX: f64 = 10.0;

/// Modulation percent → display band just above the 0/1 indicator lines.
pub fn modulation_forward(percent: f64) -> f64 {
    MODULATION_BASE + percent / MODULATION_DIVISOR
}

pub fn modulation_inverse(displayed: f64) -> f64 {
    (displayed - MODULATION_BASE) * MODULATION_DIVISOR
}

impl Normalization {
    /// Original-unit value of a displayed point.
    pub fn invert(&self, variable: Field, displayed: f64) -> f64 {
        match variable {
            Field::Modulation => modulation_inverse(displayed),
            Field::Hours => displayed + self.hours_offset.unwrap_or(0.0),
            Field::Starts => {
                let rebased = match self.starts_scale {
                    Some(scale) => displayed / scale,
                    None => displayed,
                };
                rebased + self.starts_offset.unwrap_or(0.0)
            }
            _ => displayed,
        }
    }
}

/// Output of one series build. Recomputed on every render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Rows that survived deduplication and the anchor filter.
    pub rows: usize,
    pub normalization: Normalization,
    pub points: Vec<SeriesPoint>,
}

impl Series {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.points.last().map(|p| p.timestamp)
    }
}
