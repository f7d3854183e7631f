use crate::db::DbPool;
use crate::error::AppError;
use crate::models::{
    CollectionLogEntry, CollectionStatus, MeterDevice, MeterReading, SolarReading, SourceKind,
};
use anyhow::anyhow;
use sqlx::Row;

/// Read side of the collector's tables, used for inspection and tests.
#[derive(Clone)]
pub struct ReadingsRepository {
    pool: DbPool,
}

impl ReadingsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn latest_solar(&self) -> Result<Option<SolarReading>, AppError> {
        let reading = sqlx::query_as::<_, SolarReading>(
            "SELECT * FROM solar_readings ORDER BY ts DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(reading)
    }

    /// Latest reading of one meter, device fields joined in.
    pub async fn latest_meter(&self, unique_id: &str) -> Result<Option<MeterReading>, AppError> {
        let reading = sqlx::query_as::<_, MeterReading>(
            "SELECT r.*, d.unique_id, d.meter_model, d.smr_version, d.wifi_ssid
             FROM meter_readings r
             JOIN meter_devices d ON d.id = r.device_id
             WHERE d.unique_id = $1
             ORDER BY r.ts DESC LIMIT 1",
        )
        .bind(unique_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(reading)
    }

    /// Device row and its surrogate key.
    pub async fn device_by_unique_id(
        &self,
        unique_id: &str,
    ) -> Result<Option<(i64, MeterDevice)>, AppError> {
        let row = sqlx::query(
            "SELECT id, unique_id, meter_model, smr_version, wifi_ssid
             FROM meter_devices WHERE unique_id = $1",
        )
        .bind(unique_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            (
                row.get("id"),
                MeterDevice {
                    unique_id: row.get("unique_id"),
                    meter_model: row.get("meter_model"),
                    smr_version: row.get("smr_version"),
                    wifi_ssid: row.get("wifi_ssid"),
                },
            )
        }))
    }

    pub async fn count_devices(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM meter_devices")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    pub async fn count_meter_readings(&self, unique_id: &str) -> Result<i64, AppError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count
             FROM meter_readings r
             JOIN meter_devices d ON d.id = r.device_id
             WHERE d.unique_id = $1",
        )
        .bind(unique_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("count"))
    }

    /// Most recent collection attempts, newest first, optionally for one source.
    pub async fn recent_logs(
        &self,
        source: Option<SourceKind>,
        limit: i64,
    ) -> Result<Vec<CollectionLogEntry>, AppError> {
        let mut query = String::from(
            "SELECT ts, source, status, error, execution_time_ms, records_processed
             FROM collection_logs",
        );
        if source.is_some() {
            query.push_str(" WHERE source = $2");
        }
        query.push_str(" ORDER BY ts DESC, id DESC LIMIT $1");

        let mut sql_query = sqlx::query(&query).bind(limit);
        if let Some(source) = source {
            sql_query = sql_query.bind(source.as_str());
        }

        let rows = sql_query.fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let source: String = row.get("source");
                let status: String = row.get("status");
                Ok(CollectionLogEntry {
                    ts: row.get("ts"),
                    source: source.parse::<SourceKind>().map_err(|e| anyhow!(e))?,
                    status: status.parse::<CollectionStatus>().map_err(|e| anyhow!(e))?,
                    error: row.get("error"),
                    execution_time_ms: row.get("execution_time_ms"),
                    records_processed: row.get("records_processed"),
                })
            })
            .collect()
    }
}
