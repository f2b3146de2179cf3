//! Vision pipeline: inference backends and the three event detectors.
//!
//! The unified detector fans one frame out to the cash, violence and fire
//! detectors in a fixed order and renders the annotated frame used for
//! live viewing and clips. Backends wrap the ONNX models and are the only
//! place model I/O happens; detectors are pure temporal logic over
//! `PoseResult`s and object boxes, which keeps them testable with stub
//! backends.

pub mod backend;
pub mod cash;
pub mod fire;
pub mod motion;
pub mod overlay;
pub mod unified;
pub mod violence;

pub use backend::{
    FireObjectBackend, HandSide, Keypoint, ObjectBox, ObjectLabel, PoseBackend, PoseResult,
    StubObjectBackend, StubPoseBackend,
};
pub use motion::{MotionEstimator, MotionMap};
pub use unified::{Detector, FrameAnalysis, FrameContext, UnifiedDetector};
