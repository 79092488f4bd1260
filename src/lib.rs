//! `sensorwatch`: MQTT sensor ingestion, time series queries and threshold
//! alerting over PostgreSQL.
//!
//! The binary in `main.rs` wires these modules together; everything it needs
//! is reachable from here so the HTTP layer and the pipeline can be tested
//! in-process against [`store::MemoryStore`].

pub mod aggregate;
pub mod alert;
pub mod config;
pub mod error;
pub mod ingest;
pub mod models;
pub mod notify;
pub mod routes;
pub mod schema;
pub mod store;
pub mod validator;

pub use config::Config;
pub use error::{AlertError, IngestError, QueryError, StorageError};
pub use models::{DeviceId, Metric, Reading, Severity, ThresholdProfile};
