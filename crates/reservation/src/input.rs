//! Parsing of raw count fields from request bodies and query strings.

use crate::error::{ReservationError, Result};

/// Parses a count for reserve. Missing, empty, non-numeric and zero counts are rejected.
pub fn parse_count(raw: Option<&str>) -> Result<u32> {
    let count = parse_raw(raw)?;
    if count == 0 {
        return Err(ReservationError::InvalidInput(
            "count must be at least 1".to_string(),
        ));
    }
    Ok(count)
}

/// Parses a count for adjust, where zero means release.
pub fn parse_adjust_count(raw: Option<&str>) -> Result<u32> {
    parse_raw(raw)
}

fn parse_raw(raw: Option<&str>) -> Result<u32> {
    let raw = raw
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ReservationError::InvalidInput("count is required".to_string()))?;

    raw.parse::<u32>()
        .map_err(|_| ReservationError::InvalidInput(format!("invalid count '{raw}'")))
}
