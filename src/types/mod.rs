//! Plain data records shared across the engine.
//!
//! These are behavior-free wire-shaped records: the Transport decodes
//! frames into them and the engine reconciles them into session state.

mod account;
mod contract;
mod execution;
mod market_data;

pub use account::*;
pub use contract::*;
pub use execution::*;
pub use market_data::*;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Wire sentinel for "double not populated".
pub const UNSET_DOUBLE: f64 = f64::MAX;

/// Wire sentinel for "integer not populated".
pub const UNSET_INTEGER: i32 = i32::MAX;

/// True if a wire double carries the not-populated sentinel.
pub fn is_unset_double(value: f64) -> bool {
    value == UNSET_DOUBLE
}

/// Session-wide defaults for fields with missing or empty data.
///
/// `empty_price`/`empty_size` form the sentinel pair written into quote
/// state when a side reports no quote, so that "no quote" stays
/// distinguishable from a legitimately zero value.
#[derive(Debug, Clone, Copy)]
pub struct Defaults {
    pub empty_price: f64,
    pub empty_size: f64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            empty_price: f64::NAN,
            empty_size: 0.0,
        }
    }
}

/// Parse the broker's date/time string shapes.
///
/// Accepts `YYYYMMDD`, a unix-epoch second count, and the
/// `YYYYMMDD{space or dash}HH:MM:SS` forms.
pub fn parse_wire_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()) {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").ok()?;
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }

    if value.bytes().all(|b| b.is_ascii_digit()) {
        let secs = value.parse::<i64>().ok()?;
        return Utc.timestamp_opt(secs, 0).single();
    }

    for format in ["%Y%m%d-%H:%M:%S", "%Y%m%d %H:%M:%S", "%Y%m%d  %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    None
}
