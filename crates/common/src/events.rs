//! Detection and event contracts.
//!
//! A `Detection` is the ephemeral output of a detector for one frame; a
//! `NewEvent` is the durable record handed to the event store once the
//! clip, thumbnail and sidecar exist on disk.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Cash,
    Violence,
    Fire,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Cash => "cash",
            EventKind::Violence => "violence",
            EventKind::Fire => "fire",
        }
    }

    /// Banner colour used when burning labels into clips (BGR).
    pub fn banner_color(&self) -> [u8; 3] {
        match self {
            EventKind::Cash => [0, 255, 0],
            EventKind::Violence => [0, 0, 255],
            EventKind::Fire => [0, 165, 255],
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis-aligned box in image pixels, origin top-left, corner form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn diagonal(&self) -> f32 {
        (self.width().powi(2) + self.height().powi(2)).sqrt()
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }

    fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        if x2 > x1 && y2 > y1 {
            (x2 - x1) * (y2 - y1)
        } else {
            0.0
        }
    }

    /// Intersection over the smaller box, in [0, 1]. Used as the contact
    /// measure between two people.
    pub fn overlap_ratio(&self, other: &BoundingBox) -> f32 {
        let min_area = self.area().min(other.area());
        if min_area <= 0.0 {
            return 0.0;
        }
        self.intersection_area(other) / min_area
    }

    /// Intersection over union, in [0, 1].
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    pub fn as_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// A fired detection, before persistence.
#[derive(Debug, Clone)]
pub struct Detection {
    pub kind: EventKind,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub frame_index: u64,
    /// Type-specific metadata, merged verbatim into the sidecar.
    pub metadata: Map<String, Value>,
}

/// Durable event record handed to the store after artefacts exist on disk.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub camera_id: String,
    pub kind: EventKind,
    pub confidence: f32,
    pub clip_path: String,
    pub thumbnail_path: String,
    pub json_path: Option<String>,
    pub bbox: Option<BoundingBox>,
    pub frame_index: u64,
    pub captured_at: DateTime<Local>,
}

/// JSON sidecar written next to every clip.
///
/// Readers must ignore unknown keys; detector metadata is flattened into
/// the top level so the per-type field contracts appear verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSidecar {
    /// ISO 8601 local wall-clock time of the triggering frame.
    pub timestamp: String,
    pub event_type: EventKind,
    pub camera_id: String,
    #[serde(default)]
    pub camera_name: String,
    pub confidence: f32,
    pub frame_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f32; 4]>,
    pub clip_path: String,
    pub thumbnail_path: String,
    /// ISO 8601 time the sink started persisting.
    pub trigger_time: String,
    pub frames_saved: usize,
    pub duration_sec: f64,
    /// False when the H.264 transcode was unavailable and the intermediate
    /// container was kept.
    #[serde(default = "default_transcoded")]
    pub transcoded: bool,
    #[serde(flatten)]
    pub detector: Map<String, Value>,
}

fn default_transcoded() -> bool {
    true
}
