//! Ingestion pipeline: validate one message, upsert it, log the outcome.
//!
//! Messages are processed one at a time with at-most-once semantics. Data
//! problems and non-connection write failures drop the message and the
//! consumer carries on; a lost storage connection is returned to the caller,
//! which tears the consumer down and restarts it.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::error::{IngestError, StorageError};
use crate::models::{Metric, UpsertOutcome};
use crate::store::SeriesStore;
use crate::validator;

pub mod mqtt;

// ---

/// What happened to one message.
#[derive(Debug)]
pub enum Disposition {
    Stored(UpsertOutcome),
    Rejected(IngestError),
    WriteFailed(StorageError),
}

pub struct Ingestor {
    store: Arc<dyn SeriesStore>,
}

impl Ingestor {
    // ---
    pub fn new(store: Arc<dyn SeriesStore>) -> Self {
        Self { store }
    }

    /// Process one `(topic, payload)` pair.
    ///
    /// Returns `Err` only for a storage connection failure, which the
    /// consumer treats as fatal.
    pub async fn handle(&self, topic: &str, payload: &[u8]) -> Result<Disposition, StorageError> {
        // ---
        let timer = Instant::now();

        let reading = match validator::validate(topic, payload) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(
                    topic,
                    result = "failed",
                    reason = e.reason(),
                    error_code = e.code(),
                    error = %e,
                    duration_ms = timer.elapsed().as_millis() as u64,
                    "Message rejected"
                );
                return Ok(Disposition::Rejected(e));
            }
        };

        let metric = reading
            .metrics()
            .present()
            .first()
            .copied()
            .map_or("none", Metric::as_str);

        match self
            .store
            .upsert(reading.device_id, reading.timestamp, &reading.metrics())
            .await
        {
            Ok(outcome) => {
                info!(
                    topic,
                    device_id = reading.device_id,
                    metric,
                    msg_ts = %reading.timestamp.to_rfc3339(),
                    result = "ok",
                    duration_ms = timer.elapsed().as_millis() as u64,
                    "Message processed"
                );
                Ok(Disposition::Stored(outcome))
            }
            Err(e) if e.is_connection() => {
                error!(
                    topic,
                    device_id = reading.device_id,
                    metric,
                    error_code = e.code(),
                    error = %e,
                    "Storage connection lost while writing"
                );
                Err(e)
            }
            Err(e) => {
                error!(
                    topic,
                    device_id = reading.device_id,
                    metric,
                    result = "failed",
                    error_code = e.code(),
                    error = %e,
                    duration_ms = timer.elapsed().as_millis() as u64,
                    "Write failed, message dropped"
                );
                Ok(Disposition::WriteFailed(e))
            }
        }
    }
}
