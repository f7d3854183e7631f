use crate::error::ParseError;
use crate::mapping::{parse_float, parse_int, present};
use crate::models::{MeterDevice, MeterReading};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Decode a P1 meter `/api/v1/data` payload.
///
/// Fails only on invalid JSON, a non-object document, or when `unique_id` or
/// `active_power_w` is missing or of the wrong type. Which other keys are
/// present depends on firmware and phase count; a missing key, `null` or a
/// value of the wrong type is absent. The reading is stamped with the
/// collection instant `ts`; the payload has no timestamp of its own.
pub fn parse_meter(body: &[u8], ts: DateTime<Utc>) -> Result<MeterReading, ParseError> {
    let doc: Value = serde_json::from_slice(body)
        .map_err(|e| ParseError::Malformed(format!("invalid JSON: {}", e)))?;
    let fields = match &doc {
        Value::Object(map) => Fields(map),
        _ => return Err(ParseError::Malformed("payload is not a JSON object".into())),
    };

    let unique_id = match fields.get("unique_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
        Some(Value::String(_)) | None => {
            return Err(ParseError::Malformed(
                "missing required key `unique_id`".into(),
            ))
        }
        Some(other) => {
            return Err(ParseError::Malformed(format!(
                "`unique_id` must be a string, got {}",
                other
            )))
        }
    };
    let active_power_w = match fields.get("active_power_w") {
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| {
            ParseError::Malformed(format!("`active_power_w` out of range: {}", n))
        })?,
        None => {
            return Err(ParseError::Malformed(
                "missing required key `active_power_w`".into(),
            ))
        }
        Some(other) => {
            return Err(ParseError::Malformed(format!(
                "`active_power_w` must be a number, got {}",
                other
            )))
        }
    };

    let active_tariff = fields.int("active_tariff");
    if let Some(tariff) = active_tariff {
        if tariff != 1 && tariff != 2 {
            warn!(unique_id = %unique_id, tariff, "meter reports unexpected active tariff");
        }
    }

    debug!(unique_id = %unique_id, active_power_w, "meter payload decoded");

    Ok(MeterReading {
        ts,
        device: MeterDevice {
            unique_id,
            meter_model: fields.text("meter_model"),
            smr_version: fields.int("smr_version"),
            wifi_ssid: fields.text("wifi_ssid"),
        },
        wifi_strength: fields.float("wifi_strength"),
        active_tariff,
        total_power_import_kwh: fields.float("total_power_import_kwh"),
        total_power_import_t1_kwh: fields.float("total_power_import_t1_kwh"),
        total_power_import_t2_kwh: fields.float("total_power_import_t2_kwh"),
        total_power_export_kwh: fields.float("total_power_export_kwh"),
        total_power_export_t1_kwh: fields.float("total_power_export_t1_kwh"),
        total_power_export_t2_kwh: fields.float("total_power_export_t2_kwh"),
        active_power_w,
        active_power_l1_w: fields.float("active_power_l1_w"),
        active_power_l2_w: fields.float("active_power_l2_w"),
        active_power_l3_w: fields.float("active_power_l3_w"),
        active_voltage_l1_v: fields.float("active_voltage_l1_v"),
        active_voltage_l2_v: fields.float("active_voltage_l2_v"),
        active_voltage_l3_v: fields.float("active_voltage_l3_v"),
        active_current_a: fields.float("active_current_a"),
        active_current_l1_a: fields.float("active_current_l1_a"),
        active_current_l2_a: fields.float("active_current_l2_a"),
        active_current_l3_a: fields.float("active_current_l3_a"),
        voltage_sag_l1_count: fields.int("voltage_sag_l1_count"),
        voltage_sag_l2_count: fields.int("voltage_sag_l2_count"),
        voltage_sag_l3_count: fields.int("voltage_sag_l3_count"),
        voltage_swell_l1_count: fields.int("voltage_swell_l1_count"),
        voltage_swell_l2_count: fields.int("voltage_swell_l2_count"),
        voltage_swell_l3_count: fields.int("voltage_swell_l3_count"),
        any_power_fail_count: fields.int("any_power_fail_count"),
        long_power_fail_count: fields.int("long_power_fail_count"),
    })
}

/// Optional keys of the payload. Numbers sent as strings are accepted the way
/// inverter tag text is; anything else of the wrong type is `warn!`ed and absent.
struct Fields<'a>(&'a Map<String, Value>);

impl<'a> Fields<'a> {
    /// Present and not `null`.
    fn get(&self, key: &str) -> Option<&'a Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    fn text(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => present(s).map(str::to_string),
            Value::Number(n) => Some(n.to_string()),
            other => mismatch(key, other),
        }
    }

    fn float(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => parse_float(s).unwrap_or_else(|_| mismatch(key, s)),
            other => mismatch(key, other),
        }
    }

    fn int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| parse_int(&n.to_string()).ok().flatten())
                .or_else(|| mismatch(key, n)),
            Value::String(s) => parse_int(s).unwrap_or_else(|_| mismatch(key, s)),
            other => mismatch(key, other),
        }
    }
}

fn mismatch<T>(key: &str, value: impl std::fmt::Display) -> Option<T> {
    warn!(key, %value, "ignoring meter value of unexpected type");
    None
}
