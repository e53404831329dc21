//! Analytical warehouse access.
//!
//! The pipeline talks to the warehouse through [`Warehouse`] and [`RowCursor`].
//! [`SnowflakeClient`] implements them over the Snowflake SQL REST API.

mod snowflake;

pub use snowflake::{SnowflakeClient, SnowflakeCursor};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// One result row. Values arrive as strings; SQL `NULL` is `None`.
pub type Row = Vec<Option<String>>;

/// Errors raised by warehouse operations
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// Client could not be configured
    #[error("Connection error: {0}")]
    Connection(String),

    /// The warehouse rejected the statement
    #[error("Query failed ({code}): {message}")]
    Query { code: String, message: String },

    /// Transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response did not have the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Cursor used after close
    #[error("Cursor is closed")]
    Closed,
}

/// Result type for warehouse operations
pub type Result<T> = std::result::Result<T, WarehouseError>;

/// A connection able to run SQL statements.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Run `sql` and return a cursor over its result set.
    async fn query(&self, sql: &str) -> Result<Box<dyn RowCursor>>;

    /// Release the connection.
    async fn close(&self) -> Result<()>;
}

/// Forward-only cursor over a result set.
#[async_trait]
pub trait RowCursor: Send {
    /// Total rows in the result set.
    fn row_count(&self) -> usize;

    /// Fetch up to `n` rows. An empty result means the cursor is drained.
    async fn fetch_many(&mut self, n: usize) -> Result<Vec<Row>>;

    /// Release the cursor.
    async fn close(&mut self) -> Result<()>;
}

/// Parse a Snowflake timestamp value.
///
/// The SQL API renders timestamps as epoch seconds with a fractional part,
/// followed by a timezone offset for `TIMESTAMP_TZ` (`"1616173619.123 1440"`).
/// The epoch value is already UTC so the offset is ignored.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let epoch = value
        .split_whitespace()
        .next()
        .ok_or_else(|| WarehouseError::Decode("empty timestamp".to_string()))?;

    let (secs, frac) = epoch.split_once('.').unwrap_or((epoch, ""));
    let secs: i64 = secs
        .parse()
        .map_err(|_| WarehouseError::Decode(format!("invalid timestamp '{}'", value)))?;

    let nanos = if frac.is_empty() {
        0
    } else {
        let digits: String = frac.chars().take(9).collect();
        let scale = 10u32.pow(9 - digits.len() as u32);
        digits
            .parse::<u32>()
            .map_err(|_| WarehouseError::Decode(format!("invalid timestamp '{}'", value)))?
            * scale
    };

    // negative epochs carry the fraction toward zero
    let (secs, nanos) = if epoch.starts_with('-') && nanos > 0 {
        (secs - 1, 1_000_000_000 - nanos)
    } else {
        (secs, nanos)
    };

    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| WarehouseError::Decode(format!("timestamp out of range '{}'", value)))
}
