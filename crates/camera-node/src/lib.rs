//! Per-camera ingestion-and-detection engine.
//!
//! One worker per camera owns its RTSP source, rolling buffer, detector
//! stack and event sink; the supervisor owns the workers. External
//! collaborators see three seams: the camera configuration provider, the
//! event store sink, and the status/frame feed.

pub mod buffer;
pub mod config;
pub mod error;
pub mod factory;
pub mod sink;
pub mod source;
pub mod store;
pub mod supervisor;
pub mod worker;

pub use config::NodeConfig;
pub use error::WorkerError;
pub use supervisor::{ConfigProvider, Supervisor};
pub use worker::{WorkerFactory, WorkerHandle, WorkerParts, WorkerSettings, WorkerState, WorkerStatus};
