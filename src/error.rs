//! Error taxonomy for the sensor pipeline.
//!
//! Ingestion-side errors ([`IngestError`]) are data problems: the message is
//! logged and dropped. Infrastructure errors ([`StorageError`]) keep the
//! underlying `sqlx` cause and are classified so callers can tell a lost
//! connection from a timeout from a plain failed statement.

use crate::models::Metric;
use crate::notify::DispatchError;

// ---

/// Why an inbound message was rejected before reaching storage.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Missing or unparsable required fields, or a body that is not JSON.
    #[error("payload invalid: {0}")]
    PayloadInvalid(String),

    /// The topic does not resolve to a known metric.
    #[error("unknown metric for topic '{topic}'")]
    UnknownMetric { topic: String },

    /// The value has the wrong type for the metric.
    #[error("schema mismatch for {metric}: {reason}")]
    SchemaMismatch { metric: Metric, reason: String },

    #[error("{metric} value {value} outside [{min}, {max}]")]
    OutOfRange {
        metric: Metric,
        value: f64,
        min: f64,
        max: f64,
    },
}

impl IngestError {
    // ---
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::PayloadInvalid(_) => "PAYLOAD_INVALID",
            IngestError::UnknownMetric { .. } => "UNKNOWN_METRIC",
            IngestError::SchemaMismatch { .. } => "SCHEMA_MISMATCH",
            IngestError::OutOfRange { .. } => "VALUE_OUT_OF_RANGE",
        }
    }

    /// Coarse log reason: range failures versus everything schema-shaped.
    pub fn reason(&self) -> &'static str {
        match self {
            IngestError::OutOfRange { .. } => "min_max_check",
            _ => "schema_mismatch",
        }
    }
}

/// Storage failures, classified from the driver error.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage connection failed during {op}: {source}")]
    Connection {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("storage timed out during {op}: {source}")]
    Timeout {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("storage error during {op}: {source}")]
    Failed {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

/// Postgres `query_canceled`, raised when `statement_timeout` fires.
const PG_QUERY_CANCELED: &str = "57014";

impl StorageError {
    // ---
    /// Classify a driver error raised while running `op`.
    pub fn classify(op: &'static str, source: sqlx::Error) -> Self {
        // ---
        let sql_state = match &source {
            sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
            _ => None,
        };

        let timed_out = matches!(source, sqlx::Error::PoolTimedOut)
            || sql_state.as_deref() == Some(PG_QUERY_CANCELED);

        // SQLSTATE class 08: connection exception
        let connection_lost = matches!(
            source,
            sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed
        ) || sql_state.as_deref().is_some_and(|s| s.starts_with("08"));

        if timed_out {
            StorageError::Timeout { op, source }
        } else if connection_lost {
            StorageError::Connection { op, source }
        } else {
            StorageError::Failed { op, source }
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, StorageError::Connection { .. })
    }

    pub fn code(&self) -> &'static str {
        match self {
            StorageError::Connection { .. } => "DB_CONN_FAIL",
            StorageError::Timeout { .. } => "DB_TIMEOUT",
            StorageError::Failed { .. } => "DB_ERROR",
        }
    }
}

/// Errors from the comparison/query side.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("unknown metric '{0}'; valid metrics: temperature, humidity, pollen, particulate_matter")]
    UnknownMetric(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from one alert evaluation.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("alert dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("no alert recipient configured")]
    NoRecipient,
}
