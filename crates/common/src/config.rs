//! Per-camera configuration.
//!
//! A `CameraConfig` is read once when a worker starts and treated as an
//! immutable snapshot for that worker's lifetime; changing it requires a
//! restart of that worker only.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Image-space region that classifies a person as the cashier.
///
/// Either an axis-aligned rectangle or a polygon in image coordinates
/// (origin top-left). Membership is decided by the person's centre point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CashierZone {
    Rect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    Polygon {
        points: Vec<[f32; 2]>,
    },
}

impl CashierZone {
    /// Zone membership test for a centre point. Rectangle edges are
    /// inclusive; polygons use even-odd ray casting.
    pub fn contains(&self, px: f32, py: f32) -> bool {
        match self {
            CashierZone::Rect {
                x,
                y,
                width,
                height,
            } => px >= *x && px <= x + width && py >= *y && py <= y + height,
            CashierZone::Polygon { points } => point_in_polygon(px, py, points),
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            CashierZone::Rect { width, height, .. } => *width > 0.0 && *height > 0.0,
            CashierZone::Polygon { points } => points.len() >= 3,
        }
    }
}

fn point_in_polygon(px: f32, py: f32, points: &[[f32; 2]]) -> bool {
    let n = points.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (points[i][0], points[i][1]);
        let (xj, yj) = (points[j][0], points[j][1]);
        if ((yi > py) != (yj > py)) && (px < (xj - xi) * (py - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Configuration snapshot for one camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Numeric identifier, unique per node. Also used for CPU-core
    /// assignment (`id mod cpu_count`).
    pub id: i64,

    /// External camera label, e.g. "CAM-LOBBY-01". Used in artefact names.
    pub camera_id: String,

    /// Human-readable name for status displays and sidecars.
    #[serde(default)]
    pub name: String,

    /// RTSP stream URL. TCP transport is forced by the frame source.
    pub rtsp_url: String,

    /// Cashier zone in image coordinates.
    pub cashier_zone: CashierZone,

    #[serde(default = "default_true")]
    pub detect_cash: bool,
    #[serde(default = "default_true")]
    pub detect_violence: bool,
    #[serde(default = "default_true")]
    pub detect_fire: bool,

    /// Minimum distance score for a cash detection, in [0, 1].
    #[serde(default = "default_cash_confidence")]
    pub cash_confidence: f32,
    /// Minimum aggression score for a violence detection, in [0, 1].
    #[serde(default = "default_violence_confidence")]
    pub violence_confidence: f32,
    /// Minimum model confidence for a fire detection, in [0, 1].
    #[serde(default = "default_fire_confidence")]
    pub fire_confidence: f32,

    /// Keypoint confidence floor: a wrist/hip/shoulder participates only
    /// when its confidence is at or above this value.
    #[serde(default = "default_pose_confidence")]
    pub pose_confidence: f32,

    /// Hand-touch distance threshold in pixels (strict less-than).
    #[serde(default = "default_hand_touch_distance")]
    pub hand_touch_distance: u32,

    /// Motion activity floor for violence candidates.
    #[serde(default = "default_motion_threshold")]
    pub motion_threshold: f32,

    /// Consecutive candidate frames required before an event is emitted.
    #[serde(default = "default_min_transaction_frames")]
    pub min_transaction_frames: u32,
    #[serde(default = "default_min_violence_frames")]
    pub min_violence_frames: u32,
    #[serde(default = "default_min_fire_frames")]
    pub min_fire_frames: u32,

    /// Minimum frames between two emitted events of the same type.
    #[serde(default = "default_cash_cooldown")]
    pub cash_cooldown_frames: u64,
    #[serde(default = "default_violence_cooldown")]
    pub violence_cooldown_frames: u64,
    #[serde(default = "default_fire_cooldown")]
    pub fire_cooldown_frames: u64,
}

fn default_true() -> bool {
    true
}

fn default_cash_confidence() -> f32 {
    0.5
}

fn default_violence_confidence() -> f32 {
    0.6
}

fn default_fire_confidence() -> f32 {
    0.5
}

fn default_pose_confidence() -> f32 {
    0.3
}

fn default_hand_touch_distance() -> u32 {
    100
}

fn default_motion_threshold() -> f32 {
    100.0
}

fn default_min_transaction_frames() -> u32 {
    1
}

fn default_min_violence_frames() -> u32 {
    15
}

fn default_min_fire_frames() -> u32 {
    10
}

fn default_cash_cooldown() -> u64 {
    45
}

fn default_violence_cooldown() -> u64 {
    90
}

fn default_fire_cooldown() -> u64 {
    120
}

impl CameraConfig {
    /// Validate field ranges before a worker is started with this snapshot.
    pub fn validate(&self) -> Result<()> {
        if self.camera_id.is_empty() {
            bail!("camera_id must not be empty");
        }
        if self.rtsp_url.is_empty() {
            bail!("rtsp_url must not be empty");
        }
        if !self.cashier_zone.is_valid() {
            bail!("cashier_zone is degenerate");
        }
        for (label, value) in [
            ("cash_confidence", self.cash_confidence),
            ("violence_confidence", self.violence_confidence),
            ("fire_confidence", self.fire_confidence),
            ("pose_confidence", self.pose_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be within [0, 1], got {}", label, value);
            }
        }
        for (label, value) in [
            ("min_transaction_frames", self.min_transaction_frames),
            ("min_violence_frames", self.min_violence_frames),
            ("min_fire_frames", self.min_fire_frames),
        ] {
            if value < 1 {
                bail!("{} must be at least 1", label);
            }
        }
        if self.hand_touch_distance == 0 {
            bail!("hand_touch_distance must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CameraConfig {
        serde_yaml::from_str(
            r#"
id: 3
camera_id: CAM-LOBBY-01
name: Lobby counter
rtsp_url: rtsp://10.0.0.3:554/stream1
cashier_zone:
  x: 100
  y: 120
  width: 400
  height: 300
"#,
        )
        .expect("valid camera yaml")
    }

    #[test]
    fn defaults_apply_for_omitted_fields() {
        let cfg = sample();
        assert!(cfg.detect_cash && cfg.detect_violence && cfg.detect_fire);
        assert_eq!(cfg.hand_touch_distance, 100);
        assert_eq!(cfg.min_transaction_frames, 1);
        assert_eq!(cfg.cash_cooldown_frames, 45);
        assert_eq!(cfg.pose_confidence, 0.3);
        cfg.validate().unwrap();
    }

    #[test]
    fn rect_zone_edges_are_inclusive() {
        let zone = CashierZone::Rect {
            x: 100.0,
            y: 120.0,
            width: 400.0,
            height: 300.0,
        };
        assert!(zone.contains(100.0, 120.0));
        assert!(zone.contains(500.0, 420.0));
        assert!(zone.contains(300.0, 200.0));
        assert!(!zone.contains(500.1, 200.0));
        assert!(!zone.contains(99.9, 200.0));
    }

    #[test]
    fn polygon_zone_membership() {
        let zone = CashierZone::Polygon {
            points: vec![[0.0, 0.0], [200.0, 0.0], [200.0, 100.0], [0.0, 100.0]],
        };
        assert!(zone.contains(100.0, 50.0));
        assert!(!zone.contains(250.0, 50.0));
        assert!(!zone.contains(100.0, 150.0));
    }

    #[test]
    fn polygon_parses_from_yaml() {
        let yaml = r#"
id: 1
camera_id: CAM-2
rtsp_url: rtsp://example/stream
cashier_zone:
  points: [[10, 10], [300, 10], [300, 200], [10, 200]]
"#;
        let cfg: CameraConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(cfg.cashier_zone, CashierZone::Polygon { .. }));
        assert!(cfg.cashier_zone.contains(100.0, 100.0));
    }

    #[test]
    fn validate_rejects_out_of_range_confidence() {
        let mut cfg = sample();
        cfg.fire_confidence = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_gate() {
        let mut cfg = sample();
        cfg.min_fire_frames = 0;
        assert!(cfg.validate().is_err());
    }
}
