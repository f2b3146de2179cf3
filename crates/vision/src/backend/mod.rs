//! Inference backend contracts.
//!
//! Backends are stateless wrappers around the model sessions: one call per
//! frame, invoked sequentially from the owning worker thread. Models load
//! once at worker start; a load failure is a fatal worker error.

pub mod objects;
pub mod pose;
pub mod stub;

pub use objects::{ObjectBackendConfig, OrtObjectBackend};
pub use pose::{OrtPoseBackend, PoseBackendConfig};
pub use stub::{StubObjectBackend, StubPoseBackend};

use anyhow::Result;
use common::{BoundingBox, Frame};
use serde::{Deserialize, Serialize};

/// Standard COCO pose keypoint names (17 keypoints)
pub const COCO_KEYPOINTS: [&str; 17] = [
    "nose",
    "left_eye",
    "right_eye",
    "left_ear",
    "right_ear",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
];

pub const LEFT_SHOULDER: usize = 5;
pub const RIGHT_SHOULDER: usize = 6;
pub const LEFT_WRIST: usize = 9;
pub const RIGHT_WRIST: usize = 10;
pub const LEFT_HIP: usize = 11;
pub const RIGHT_HIP: usize = 12;

/// Pose keypoint with 2D coordinates and confidence, in image pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandSide {
    Left,
    Right,
}

impl HandSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandSide::Left => "left",
            HandSide::Right => "right",
        }
    }

    fn wrist_index(&self) -> usize {
        match self {
            HandSide::Left => LEFT_WRIST,
            HandSide::Right => RIGHT_WRIST,
        }
    }
}

/// One detected person: bounding box plus 17 COCO-ordered keypoints.
#[derive(Debug, Clone)]
pub struct PoseResult {
    pub bbox: BoundingBox,
    pub keypoints: Vec<Keypoint>,
    pub confidence: f32,
}

impl PoseResult {
    pub fn keypoint(&self, index: usize) -> Option<&Keypoint> {
        self.keypoints.get(index)
    }

    /// Wrist position for one hand if its confidence is at or above the
    /// floor (inclusive).
    pub fn wrist(&self, side: HandSide, floor: f32) -> Option<(f32, f32, f32)> {
        let kp = self.keypoint(side.wrist_index())?;
        if kp.confidence >= floor {
            Some((kp.x, kp.y, kp.confidence))
        } else {
            None
        }
    }

    /// Person centre point: hip midpoint when both hips clear the floor,
    /// else shoulder midpoint, else the bounding-box centre. The centre
    /// decides cashier-zone membership.
    pub fn center(&self, floor: f32) -> (f32, f32) {
        if let Some(mid) = self.midpoint(LEFT_HIP, RIGHT_HIP, floor) {
            return mid;
        }
        if let Some(mid) = self.midpoint(LEFT_SHOULDER, RIGHT_SHOULDER, floor) {
            return mid;
        }
        self.bbox.center()
    }

    fn midpoint(&self, a: usize, b: usize, floor: f32) -> Option<(f32, f32)> {
        let ka = self.keypoint(a)?;
        let kb = self.keypoint(b)?;
        if ka.confidence >= floor && kb.confidence >= floor {
            Some(((ka.x + kb.x) / 2.0, (ka.y + kb.y) / 2.0))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectLabel {
    Fire,
    Smoke,
    Other,
}

/// Labelled box from the fire/smoke object model.
#[derive(Debug, Clone)]
pub struct ObjectBox {
    pub label: ObjectLabel,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Person-pose inference over one frame.
pub trait PoseBackend: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<PoseResult>>;
}

/// Fire/smoke object inference over one frame.
pub trait FireObjectBackend: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<ObjectBox>>;
}
