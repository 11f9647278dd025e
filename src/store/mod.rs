//! Meter store: the relational collaborator persisting meter readings.
//!
//! Queries are explicit request/response: callers pass the meter id and
//! timestamp range and get rows back. No per-store selection state.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, LocalResult, TimeZone};
use tracing::info;

use crate::config::StorageConfig;
use crate::payload::{MeterReading, MeterState};

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteMeterStore;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from the meter store.
///
/// `Database` is the recoverable case the durable worker requeues on.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// One persisted reading.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterRow {
    /// Row id.
    pub id: i64,
    /// Meter identifier.
    pub meter_id: String,
    /// Local timestamp, `%Y-%m-%dT%H:%M:%S`.
    pub datetime: String,
    /// Measured value.
    pub value: f64,
    /// Reading state.
    pub state: MeterState,
}

/// Insert/select interface over the metering table.
#[async_trait]
pub trait MeterStore: Send + Sync {
    /// Persist one reading.
    async fn insert_reading(&self, reading: &MeterReading) -> Result<()>;

    /// Rows for one meter whose timestamps fall in `[from_ts, to_ts]`,
    /// oldest first.
    async fn readings_in_range(
        &self,
        meter_id: &str,
        from_ts: f64,
        to_ts: f64,
    ) -> Result<Vec<MeterRow>>;
}

/// Format a unix timestamp the way collaborator processes store it.
pub fn format_timestamp(ts: f64) -> String {
    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
    match Local.timestamp_opt(ts as i64, 0) {
        LocalResult::Single(dt) => dt.format(FORMAT).to_string(),
        _ => Local::now().format(FORMAT).to_string(),
    }
}

/// Open the configured store and create the schema if needed.
pub async fn init_store(config: &StorageConfig) -> Result<Arc<dyn MeterStore>> {
    if let Some(parent) = std::path::Path::new(&config.path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.path)).await?;
    let store = SqliteMeterStore::new(pool);
    store.init().await?;

    info!(path = %config.path, "meter store opened");
    Ok(Arc::new(store))
}

pub(crate) fn state_from_column(state: i64) -> Result<MeterState> {
    u8::try_from(state)
        .ok()
        .and_then(|v| MeterState::try_from(v).ok())
        .ok_or_else(|| StoreError::Corrupt(format!("unknown meter state {}", state)))
}
