use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Solar,
    Meter,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Solar => "solar",
            SourceKind::Meter => "meter",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "solar" => Ok(SourceKind::Solar),
            "meter" => Ok(SourceKind::Meter),
            other => Err(format!("unknown source: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    Success,
    Failure,
}

impl CollectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionStatus::Success => "success",
            CollectionStatus::Failure => "failure",
        }
    }
}

impl FromStr for CollectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(CollectionStatus::Success),
            "failure" => Ok(CollectionStatus::Failure),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// One inverter sample. Every measurement is optional: the inverter reports
/// `-` for values it does not have (night time, unused phases or strings).
#[derive(Debug, Clone, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct SolarReading {
    pub ts: DateTime<Utc>,
    pub state: Option<String>,
    pub vac_l1: Option<f64>,
    pub vac_l2: Option<f64>,
    pub vac_l3: Option<f64>,
    pub iac_l1: Option<f64>,
    pub iac_l2: Option<f64>,
    pub iac_l3: Option<f64>,
    pub freq1: Option<f64>,
    pub freq2: Option<f64>,
    pub freq3: Option<f64>,
    pub pac1: Option<i64>,
    pub pac2: Option<i64>,
    pub pac3: Option<i64>,
    pub p_ac: Option<i64>,
    pub temp: Option<f64>,
    pub e_today: Option<f64>,
    pub t_today: Option<f64>,
    pub e_total: Option<f64>,
    pub co2: Option<f64>,
    pub t_total: Option<f64>,
    pub v_pv1: Option<f64>,
    pub v_pv2: Option<f64>,
    pub v_pv3: Option<f64>,
    pub v_bus: Option<f64>,
    pub max_power: Option<i64>,
    pub i_pv11: Option<f64>,
    pub i_pv12: Option<f64>,
    pub i_pv13: Option<f64>,
    pub i_pv14: Option<f64>,
    pub i_pv21: Option<f64>,
    pub i_pv22: Option<f64>,
    pub i_pv23: Option<f64>,
    pub i_pv24: Option<f64>,
    pub i_pv31: Option<f64>,
    pub i_pv32: Option<f64>,
    pub i_pv33: Option<f64>,
    pub i_pv34: Option<f64>,
}

/// Descriptive fields of a smart meter, keyed by `unique_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct MeterDevice {
    pub unique_id: String,
    pub meter_model: Option<String>,
    pub smr_version: Option<i64>,
    pub wifi_ssid: Option<String>,
}

/// One smart meter sample. Power is signed, positive means import from the grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct MeterReading {
    pub ts: DateTime<Utc>,
    #[sqlx(flatten)]
    pub device: MeterDevice,
    pub wifi_strength: Option<f64>,
    pub active_tariff: Option<i64>,
    pub total_power_import_kwh: Option<f64>,
    pub total_power_import_t1_kwh: Option<f64>,
    pub total_power_import_t2_kwh: Option<f64>,
    pub total_power_export_kwh: Option<f64>,
    pub total_power_export_t1_kwh: Option<f64>,
    pub total_power_export_t2_kwh: Option<f64>,
    pub active_power_w: f64,
    pub active_power_l1_w: Option<f64>,
    pub active_power_l2_w: Option<f64>,
    pub active_power_l3_w: Option<f64>,
    pub active_voltage_l1_v: Option<f64>,
    pub active_voltage_l2_v: Option<f64>,
    pub active_voltage_l3_v: Option<f64>,
    pub active_current_a: Option<f64>,
    pub active_current_l1_a: Option<f64>,
    pub active_current_l2_a: Option<f64>,
    pub active_current_l3_a: Option<f64>,
    pub voltage_sag_l1_count: Option<i64>,
    pub voltage_sag_l2_count: Option<i64>,
    pub voltage_sag_l3_count: Option<i64>,
    pub voltage_swell_l1_count: Option<i64>,
    pub voltage_swell_l2_count: Option<i64>,
    pub voltage_swell_l3_count: Option<i64>,
    pub any_power_fail_count: Option<i64>,
    pub long_power_fail_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionLogEntry {
    pub ts: DateTime<Utc>,
    pub source: SourceKind,
    pub status: CollectionStatus,
    /// Present iff `status` is `Failure`.
    pub error: Option<String>,
    pub execution_time_ms: i64,
    pub records_processed: i32,
}

impl CollectionLogEntry {
    pub fn success(ts: DateTime<Utc>, source: SourceKind, execution_time_ms: i64) -> Self {
        Self {
            ts,
            source,
            status: CollectionStatus::Success,
            error: None,
            execution_time_ms,
            records_processed: 1,
        }
    }

    pub fn failure(
        ts: DateTime<Utc>,
        source: SourceKind,
        error: impl Into<String>,
        execution_time_ms: i64,
    ) -> Self {
        Self {
            ts,
            source,
            status: CollectionStatus::Failure,
            error: Some(error.into()),
            execution_time_ms,
            records_processed: 0,
        }
    }
}
