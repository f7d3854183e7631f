use crate::config::DbConfig;
use crate::error::AppError;
use crate::models::{CollectionLogEntry, MeterDevice, MeterReading, SolarReading};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

pub type DbPool = Pool<Postgres>;

pub const SOLAR_TABLE: &str = "solar_readings";
pub const METER_TABLE: &str = "meter_readings";
pub const DEVICE_TABLE: &str = "meter_devices";
pub const LOG_TABLE: &str = "collection_logs";

/// Build a lazily connecting pool. Nothing touches the network until the
/// first statement, so an unreachable database shows up as a write error of
/// the pipeline that needed it instead of aborting the whole process.
pub fn connect(cfg: &DbConfig) -> Result<DbPool, AppError> {
    let options = match &cfg.url {
        Some(url) => PgConnectOptions::from_str(url)
            .map_err(|e| AppError::Config(format!("invalid database url: {}", e)))?,
        None => PgConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .username(&cfg.user)
            .password(&cfg.password)
            .database(&cfg.name),
    };
    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(Duration::from_secs(cfg.acquire_timeout_secs))
        .connect_lazy_with(options);
    Ok(pool)
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS solar_readings
    (
        ts         TIMESTAMPTZ      NOT NULL,
        state      TEXT,
        vac_l1     DOUBLE PRECISION,
        vac_l2     DOUBLE PRECISION,
        vac_l3     DOUBLE PRECISION,
        iac_l1     DOUBLE PRECISION,
        iac_l2     DOUBLE PRECISION,
        iac_l3     DOUBLE PRECISION,
        freq1      DOUBLE PRECISION,
        freq2      DOUBLE PRECISION,
        freq3      DOUBLE PRECISION,
        pac1       BIGINT,
        pac2       BIGINT,
        pac3       BIGINT,
        p_ac       BIGINT,
        temp       DOUBLE PRECISION,
        e_today    DOUBLE PRECISION,
        t_today    DOUBLE PRECISION,
        e_total    DOUBLE PRECISION,
        co2        DOUBLE PRECISION,
        t_total    DOUBLE PRECISION,
        v_pv1      DOUBLE PRECISION,
        v_pv2      DOUBLE PRECISION,
        v_pv3      DOUBLE PRECISION,
        v_bus      DOUBLE PRECISION,
        max_power  BIGINT,
        i_pv11     DOUBLE PRECISION,
        i_pv12     DOUBLE PRECISION,
        i_pv13     DOUBLE PRECISION,
        i_pv14     DOUBLE PRECISION,
        i_pv21     DOUBLE PRECISION,
        i_pv22     DOUBLE PRECISION,
        i_pv23     DOUBLE PRECISION,
        i_pv24     DOUBLE PRECISION,
        i_pv31     DOUBLE PRECISION,
        i_pv32     DOUBLE PRECISION,
        i_pv33     DOUBLE PRECISION,
        i_pv34     DOUBLE PRECISION,
        created_at TIMESTAMPTZ      NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_solar_readings_ts ON solar_readings (ts)",
    r#"
    CREATE TABLE IF NOT EXISTS meter_devices
    (
        id          BIGSERIAL   PRIMARY KEY,
        unique_id   TEXT        NOT NULL UNIQUE,
        meter_model TEXT,
        smr_version BIGINT,
        wifi_ssid   TEXT,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS meter_readings
    (
        ts                        TIMESTAMPTZ      NOT NULL,
        device_id                 BIGINT           NOT NULL REFERENCES meter_devices (id),
        wifi_strength             DOUBLE PRECISION,
        active_tariff             BIGINT,
        total_power_import_kwh    DOUBLE PRECISION,
        total_power_import_t1_kwh DOUBLE PRECISION,
        total_power_import_t2_kwh DOUBLE PRECISION,
        total_power_export_kwh    DOUBLE PRECISION,
        total_power_export_t1_kwh DOUBLE PRECISION,
        total_power_export_t2_kwh DOUBLE PRECISION,
        active_power_w            DOUBLE PRECISION NOT NULL,
        active_power_l1_w         DOUBLE PRECISION,
        active_power_l2_w         DOUBLE PRECISION,
        active_power_l3_w         DOUBLE PRECISION,
        active_voltage_l1_v       DOUBLE PRECISION,
        active_voltage_l2_v       DOUBLE PRECISION,
        active_voltage_l3_v       DOUBLE PRECISION,
        active_current_a          DOUBLE PRECISION,
        active_current_l1_a       DOUBLE PRECISION,
        active_current_l2_a       DOUBLE PRECISION,
        active_current_l3_a       DOUBLE PRECISION,
        voltage_sag_l1_count      BIGINT,
        voltage_sag_l2_count      BIGINT,
        voltage_sag_l3_count      BIGINT,
        voltage_swell_l1_count    BIGINT,
        voltage_swell_l2_count    BIGINT,
        voltage_swell_l3_count    BIGINT,
        any_power_fail_count      BIGINT,
        long_power_fail_count     BIGINT,
        created_at                TIMESTAMPTZ      NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_meter_readings_ts ON meter_readings (ts)",
    "CREATE INDEX IF NOT EXISTS idx_meter_readings_device_ts ON meter_readings (device_id, ts)",
    r#"
    CREATE TABLE IF NOT EXISTS collection_logs
    (
        id                BIGSERIAL   PRIMARY KEY,
        ts                TIMESTAMPTZ NOT NULL,
        source            TEXT        NOT NULL CHECK (source IN ('solar', 'meter')),
        status            TEXT        NOT NULL CHECK (status IN ('success', 'failure')),
        error             TEXT,
        execution_time_ms BIGINT      NOT NULL,
        records_processed INTEGER     NOT NULL DEFAULT 0,
        created_at        TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_collection_logs_ts ON collection_logs (ts)",
    "CREATE INDEX IF NOT EXISTS idx_collection_logs_status ON collection_logs (status)",
];

/// Create missing tables and indexes. With `timescale` the readings tables
/// also become hypertables; that part is best effort since plain Postgres
/// has no `create_hypertable`.
pub async fn ensure_schema(pool: &DbPool, timescale: bool) -> Result<(), AppError> {
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(pool).await?;
    }
    if timescale {
        for table in [SOLAR_TABLE, METER_TABLE] {
            let sql = format!(
                "SELECT create_hypertable('{}', 'ts', if_not_exists => TRUE, migrate_data => TRUE)",
                table
            );
            if let Err(e) = sqlx::query(&sql).execute(pool).await {
                warn!(table, error = %e, "could not create hypertable");
            }
        }
    }
    debug!("schema ensured");
    Ok(())
}

pub(crate) enum SqlValue {
    Ts(DateTime<Utc>),
    Text(Option<String>),
    F64(Option<f64>),
    I64(Option<i64>),
    I32(i32),
}

pub(crate) type Columns = Vec<(&'static str, SqlValue)>;

fn bind_value<'q>(
    q: Query<'q, Postgres, PgArguments>,
    value: SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Ts(v) => q.bind(v),
        SqlValue::Text(v) => q.bind(v),
        SqlValue::F64(v) => q.bind(v),
        SqlValue::I64(v) => q.bind(v),
        SqlValue::I32(v) => q.bind(v),
    }
}

fn insert_sql(table: &str, columns: &Columns) -> String {
    let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        names.join(", "),
        placeholders.join(", ")
    )
}

/// Single-row INSERT. Absent values are bound as typed NULLs so the column
/// keeps its NULL instead of a default.
pub(crate) async fn insert_row(
    conn: &mut PgConnection,
    table: &str,
    columns: Columns,
) -> Result<(), sqlx::Error> {
    let sql = insert_sql(table, &columns);
    let mut q = sqlx::query(&sql);
    for (_, value) in columns {
        q = bind_value(q, value);
    }
    q.execute(conn).await?;
    Ok(())
}

/// Insert or refresh a device row and return its key. `updated_at` only
/// moves when one of the descriptive fields actually changed.
pub(crate) async fn upsert_device(
    conn: &mut PgConnection,
    device: &MeterDevice,
    seen_at: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO {table} (unique_id, meter_model, smr_version, wifi_ssid, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $5)
        ON CONFLICT (unique_id) DO UPDATE SET
            meter_model = EXCLUDED.meter_model,
            smr_version = EXCLUDED.smr_version,
            wifi_ssid = EXCLUDED.wifi_ssid,
            updated_at = CASE
                WHEN ({table}.meter_model, {table}.smr_version, {table}.wifi_ssid)
                     IS DISTINCT FROM (EXCLUDED.meter_model, EXCLUDED.smr_version, EXCLUDED.wifi_ssid)
                THEN EXCLUDED.updated_at
                ELSE {table}.updated_at
            END
        RETURNING id
        "#,
        table = DEVICE_TABLE
    );
    let id: i64 = sqlx::query_scalar(&sql)
        .bind(&device.unique_id)
        .bind(&device.meter_model)
        .bind(device.smr_version)
        .bind(&device.wifi_ssid)
        .bind(seen_at)
        .fetch_one(conn)
        .await?;
    Ok(id)
}

impl SolarReading {
    pub(crate) fn columns(&self) -> Columns {
        use SqlValue::{F64, I64};
        vec![
            ("ts", SqlValue::Ts(self.ts)),
            ("state", SqlValue::Text(self.state.clone())),
            ("vac_l1", F64(self.vac_l1)),
            ("vac_l2", F64(self.vac_l2)),
            ("vac_l3", F64(self.vac_l3)),
            ("iac_l1", F64(self.iac_l1)),
            ("iac_l2", F64(self.iac_l2)),
            ("iac_l3", F64(self.iac_l3)),
            ("freq1", F64(self.freq1)),
            ("freq2", F64(self.freq2)),
            ("freq3", F64(self.freq3)),
            ("pac1", I64(self.pac1)),
            ("pac2", I64(self.pac2)),
            ("pac3", I64(self.pac3)),
            ("p_ac", I64(self.p_ac)),
            ("temp", F64(self.temp)),
            ("e_today", F64(self.e_today)),
            ("t_today", F64(self.t_today)),
            ("e_total", F64(self.e_total)),
            ("co2", F64(self.co2)),
            ("t_total", F64(self.t_total)),
            ("v_pv1", F64(self.v_pv1)),
            ("v_pv2", F64(self.v_pv2)),
            ("v_pv3", F64(self.v_pv3)),
            ("v_bus", F64(self.v_bus)),
            ("max_power", I64(self.max_power)),
            ("i_pv11", F64(self.i_pv11)),
            ("i_pv12", F64(self.i_pv12)),
            ("i_pv13", F64(self.i_pv13)),
            ("i_pv14", F64(self.i_pv14)),
            ("i_pv21", F64(self.i_pv21)),
            ("i_pv22", F64(self.i_pv22)),
            ("i_pv23", F64(self.i_pv23)),
            ("i_pv24", F64(self.i_pv24)),
            ("i_pv31", F64(self.i_pv31)),
            ("i_pv32", F64(self.i_pv32)),
            ("i_pv33", F64(self.i_pv33)),
            ("i_pv34", F64(self.i_pv34)),
        ]
    }
}

impl MeterReading {
    pub(crate) fn columns(&self, device_id: i64) -> Columns {
        use SqlValue::{F64, I64};
        vec![
            ("ts", SqlValue::Ts(self.ts)),
            ("device_id", I64(Some(device_id))),
            ("wifi_strength", F64(self.wifi_strength)),
            ("active_tariff", I64(self.active_tariff)),
            ("total_power_import_kwh", F64(self.total_power_import_kwh)),
            ("total_power_import_t1_kwh", F64(self.total_power_import_t1_kwh)),
            ("total_power_import_t2_kwh", F64(self.total_power_import_t2_kwh)),
            ("total_power_export_kwh", F64(self.total_power_export_kwh)),
            ("total_power_export_t1_kwh", F64(self.total_power_export_t1_kwh)),
            ("total_power_export_t2_kwh", F64(self.total_power_export_t2_kwh)),
            ("active_power_w", F64(Some(self.active_power_w))),
            ("active_power_l1_w", F64(self.active_power_l1_w)),
            ("active_power_l2_w", F64(self.active_power_l2_w)),
            ("active_power_l3_w", F64(self.active_power_l3_w)),
            ("active_voltage_l1_v", F64(self.active_voltage_l1_v)),
            ("active_voltage_l2_v", F64(self.active_voltage_l2_v)),
            ("active_voltage_l3_v", F64(self.active_voltage_l3_v)),
            ("active_current_a", F64(self.active_current_a)),
            ("active_current_l1_a", F64(self.active_current_l1_a)),
            ("active_current_l2_a", F64(self.active_current_l2_a)),
            ("active_current_l3_a", F64(self.active_current_l3_a)),
            ("voltage_sag_l1_count", I64(self.voltage_sag_l1_count)),
            ("voltage_sag_l2_count", I64(self.voltage_sag_l2_count)),
            ("voltage_sag_l3_count", I64(self.voltage_sag_l3_count)),
            ("voltage_swell_l1_count", I64(self.voltage_swell_l1_count)),
            ("voltage_swell_l2_count", I64(self.voltage_swell_l2_count)),
            ("voltage_swell_l3_count", I64(self.voltage_swell_l3_count)),
            ("any_power_fail_count", I64(self.any_power_fail_count)),
            ("long_power_fail_count", I64(self.long_power_fail_count)),
        ]
    }
}

impl CollectionLogEntry {
    pub(crate) fn columns(&self) -> Columns {
        vec![
            ("ts", SqlValue::Ts(self.ts)),
            ("source", SqlValue::Text(Some(self.source.as_str().to_string()))),
            ("status", SqlValue::Text(Some(self.status.as_str().to_string()))),
            ("error", SqlValue::Text(self.error.clone())),
            ("execution_time_ms", SqlValue::I64(Some(self.execution_time_ms))),
            ("records_processed", SqlValue::I32(self.records_processed)),
        ]
    }
}
