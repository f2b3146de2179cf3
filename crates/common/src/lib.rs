//! Shared contracts for the tillwatch camera pipeline.
//!
//! This crate defines the data types that cross module boundaries: the
//! per-camera configuration snapshot, the owned frame value, detection and
//! event records, and the on-disk media layout. It deliberately contains no
//! I/O beyond path construction so that the detector and worker crates can
//! depend on it without pulling in their runtimes.

pub mod config;
pub mod events;
pub mod frame;
pub mod media;

pub use config::{CameraConfig, CashierZone};
pub use events::{BoundingBox, Detection, EventKind, EventSidecar, NewEvent};
pub use frame::Frame;
pub use media::MediaLayout;
