//! SQLite implementation of the meter store.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::schema::CREATE_METERING_TABLE;
use super::{format_timestamp, state_from_column, MeterRow, MeterStore, Result};
use crate::payload::MeterReading;

/// SQLite-backed `MeterStore`.
///
/// SQLite is demo-scale storage (a handful of concurrent inserts per
/// second); the trait boundary is where a real database server would slot in.
pub struct SqliteMeterStore {
    pool: SqlitePool,
}

impl SqliteMeterStore {
    /// Create a store over an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_METERING_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MeterStore for SqliteMeterStore {
    async fn insert_reading(&self, reading: &MeterReading) -> Result<()> {
        let datetime = format_timestamp(reading.ts);

        sqlx::query("INSERT INTO Metering (meter_id, datetime, value, state) VALUES (?, ?, ?, ?)")
            .bind(&reading.id)
            .bind(datetime)
            .bind(reading.value)
            .bind(u8::from(reading.state) as i64)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn readings_in_range(
        &self,
        meter_id: &str,
        from_ts: f64,
        to_ts: f64,
    ) -> Result<Vec<MeterRow>> {
        let from = format_timestamp(from_ts);
        let to = format_timestamp(to_ts);

        // The column has INTEGER affinity, so purely numeric ids are stored
        // as integers; CAST brings them back as text either way.
        let rows = sqlx::query(
            "SELECT id, CAST(meter_id AS TEXT) AS meter_id, datetime, value, state \
             FROM Metering \
             WHERE meter_id = ? AND datetime BETWEEN ? AND ? \
             ORDER BY datetime, id",
        )
        .bind(meter_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(MeterRow {
                    id: row.try_get("id")?,
                    meter_id: row.try_get("meter_id")?,
                    datetime: row.try_get("datetime")?,
                    value: row.try_get("value")?,
                    state: state_from_column(row.try_get("state")?)?,
                })
            })
            .collect()
    }
}
