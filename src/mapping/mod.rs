//! Payload decoding for the two device endpoints.

pub mod meter;
pub mod solar;

pub use meter::parse_meter;
pub use solar::parse_solar;

/// Text the inverter puts in a tag when it has no reading.
pub const NULL_SENTINEL: &str = "-";

/// Trimmed value, or `None` when blank or the null sentinel.
pub(crate) fn present(raw: &str) -> Option<&str> {
    let v = raw.trim();
    if v.is_empty() || v == NULL_SENTINEL {
        None
    } else {
        Some(v)
    }
}

pub(crate) fn parse_float(raw: &str) -> Result<Option<f64>, String> {
    match present(raw) {
        None => Ok(None),
        Some(v) => match v.parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(Some(f)),
            _ => Err(v.to_string()),
        },
    }
}

/// Integers may arrive as decimals ("1234.0"); those truncate toward zero.
pub(crate) fn parse_int(raw: &str) -> Result<Option<i64>, String> {
    match present(raw) {
        None => Ok(None),
        Some(v) => {
            if let Ok(i) = v.parse::<i64>() {
                return Ok(Some(i));
            }
            match v.parse::<f64>() {
                Ok(f) if f.is_finite() && f.abs() < i64::MAX as f64 => Ok(Some(f.trunc() as i64)),
                _ => Err(v.to_string()),
            }
        }
    }
}
