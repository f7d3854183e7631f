use crate::db::{insert_row, upsert_device, DbPool, LOG_TABLE, METER_TABLE, SOLAR_TABLE};
use crate::error::WriteError;
use crate::models::{CollectionLogEntry, MeterReading, SolarReading};
use tracing::debug;

/// Where a cycle persists what it collected.
#[allow(async_fn_in_trait)]
pub trait Store {
    async fn write_solar(&self, reading: &SolarReading) -> Result<(), WriteError>;

    /// Upsert the reading's device and append the reading in one unit of
    /// work. Returns the device key the reading references.
    async fn write_meter(&self, reading: &MeterReading) -> Result<i64, WriteError>;

    async fn write_log(&self, entry: &CollectionLogEntry) -> Result<(), WriteError>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl Store for PgStore {
    async fn write_solar(&self, reading: &SolarReading) -> Result<(), WriteError> {
        let mut conn = self.pool.acquire().await?;
        insert_row(&mut conn, SOLAR_TABLE, reading.columns()).await?;
        debug!(ts = %reading.ts, "solar reading stored");
        Ok(())
    }

    async fn write_meter(&self, reading: &MeterReading) -> Result<i64, WriteError> {
        let mut tx = self.pool.begin().await?;
        let device_id = upsert_device(&mut tx, &reading.device, reading.ts).await?;
        insert_row(&mut tx, METER_TABLE, reading.columns(device_id)).await?;
        tx.commit().await?;
        debug!(ts = %reading.ts, device_id, "meter reading stored");
        Ok(device_id)
    }

    async fn write_log(&self, entry: &CollectionLogEntry) -> Result<(), WriteError> {
        let mut conn = self.pool.acquire().await?;
        insert_row(&mut conn, LOG_TABLE, entry.columns()).await?;
        Ok(())
    }
}
