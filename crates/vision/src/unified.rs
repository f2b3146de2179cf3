//! Per-frame fan-out across the detector sequence.
//!
//! Detectors share one pose inference and one motion map per processed
//! frame and run in a fixed order: cash, violence, fire. Each detector is
//! independent; several types may fire on the same frame. The overlay is
//! rendered once per processed frame whether or not anything fired.

use crate::backend::{FireObjectBackend, PoseBackend, PoseResult};
use crate::cash::{CashDetector, CashDetectorConfig};
use crate::fire::{FireDetector, FireDetectorConfig};
use crate::motion::{MotionEstimator, MotionMap};
use crate::overlay;
use crate::violence::{ViolenceDetector, ViolenceDetectorConfig};
use anyhow::Result;
use common::{CameraConfig, CashierZone, Detection, Frame};

/// Everything a detector may look at for one processed frame.
pub struct FrameContext<'a> {
    pub frame: &'a Frame,
    pub frame_index: u64,
    pub poses: &'a [PoseResult],
    pub motion: &'a MotionMap,
}

/// Uniform detector capability. The unified detector holds an ordered
/// sequence of these; new event types are added by extending the sequence.
pub trait Detector: Send {
    fn name(&self) -> &'static str;
    fn process(&mut self, ctx: &FrameContext<'_>) -> Result<Vec<Detection>>;
}

/// Result of processing one frame.
pub struct FrameAnalysis {
    pub detections: Vec<Detection>,
    pub annotated: Frame,
    pub people_count: usize,
}

pub struct UnifiedDetector {
    pose: Box<dyn PoseBackend>,
    detectors: Vec<Box<dyn Detector>>,
    motion: MotionEstimator,
    zone: CashierZone,
    pose_confidence: f32,
    hand_touch_distance: u32,
}

impl UnifiedDetector {
    /// Build the detector sequence for one camera. Disabled detectors are
    /// left out entirely and keep no state.
    pub fn new(
        config: &CameraConfig,
        pose: Box<dyn PoseBackend>,
        fire_objects: Box<dyn FireObjectBackend>,
    ) -> Self {
        let mut detectors: Vec<Box<dyn Detector>> = Vec::new();
        if config.detect_cash {
            detectors.push(Box::new(CashDetector::new(CashDetectorConfig::from(config))));
        }
        if config.detect_violence {
            detectors.push(Box::new(ViolenceDetector::new(
                ViolenceDetectorConfig::from(config),
            )));
        }
        if config.detect_fire {
            detectors.push(Box::new(FireDetector::new(
                FireDetectorConfig::from(config),
                fire_objects,
            )));
        }

        Self {
            pose,
            detectors,
            motion: MotionEstimator::new(),
            zone: config.cashier_zone.clone(),
            pose_confidence: config.pose_confidence,
            hand_touch_distance: config.hand_touch_distance,
        }
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Run the full sequence over one frame and render the overlay.
    pub fn process(&mut self, frame: &Frame) -> Result<FrameAnalysis> {
        let poses = self.pose.detect(frame)?;
        let motion = self.motion.update(frame);

        let ctx = FrameContext {
            frame,
            frame_index: frame.index,
            poses: &poses,
            motion: &motion,
        };

        let mut detections = Vec::new();
        for detector in &mut self.detectors {
            detections.extend(detector.process(&ctx)?);
        }

        let annotated = overlay::render(
            frame,
            &poses,
            &self.zone,
            self.pose_confidence,
            self.hand_touch_distance,
            &detections,
        );

        Ok(FrameAnalysis {
            detections,
            annotated,
            people_count: poses.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        Keypoint, ObjectBox, ObjectLabel, StubObjectBackend, StubPoseBackend, LEFT_HIP, LEFT_WRIST,
        RIGHT_HIP, RIGHT_WRIST,
    };
    use common::{BoundingBox, EventKind};

    fn camera_config() -> CameraConfig {
        serde_yaml::from_str(
            r#"
id: 1
camera_id: CAM-TEST
rtsp_url: rtsp://example/stream
cashier_zone: { x: 400, y: 300, width: 400, height: 400 }
min_fire_frames: 1
cash_confidence: 0.1
"#,
        )
        .unwrap()
    }

    fn person(hip: (f32, f32), wrists: (f32, f32)) -> PoseResult {
        let mut keypoints = vec![
            Keypoint {
                x: 0.0,
                y: 0.0,
                confidence: 0.0
            };
            17
        ];
        keypoints[LEFT_HIP] = Keypoint {
            x: hip.0 - 10.0,
            y: hip.1,
            confidence: 0.9,
        };
        keypoints[RIGHT_HIP] = Keypoint {
            x: hip.0 + 10.0,
            y: hip.1,
            confidence: 0.9,
        };
        keypoints[LEFT_WRIST] = Keypoint {
            x: wrists.0,
            y: wrists.1,
            confidence: 0.9,
        };
        keypoints[RIGHT_WRIST] = Keypoint {
            x: wrists.0 + 4.0,
            y: wrists.1,
            confidence: 0.9,
        };
        PoseResult {
            bbox: BoundingBox::new(hip.0 - 60.0, hip.1 - 180.0, hip.0 + 60.0, hip.1 + 180.0),
            keypoints,
            confidence: 0.9,
        }
    }

    #[test]
    fn sequence_follows_config_flags() {
        let mut config = camera_config();
        config.detect_violence = false;
        let unified = UnifiedDetector::new(
            &config,
            Box::new(StubPoseBackend::empty()),
            Box::new(StubObjectBackend::empty()),
        );
        assert_eq!(unified.detector_names(), vec!["cash", "fire"]);
    }

    #[test]
    fn fixed_order_is_cash_violence_fire() {
        let config = camera_config();
        let unified = UnifiedDetector::new(
            &config,
            Box::new(StubPoseBackend::empty()),
            Box::new(StubObjectBackend::empty()),
        );
        assert_eq!(unified.detector_names(), vec!["cash", "violence", "fire"]);
    }

    #[test]
    fn multiple_types_can_fire_on_the_same_frame() {
        let config = camera_config();
        // Cashier/customer touch plus a confident fire box on frame 0.
        let poses = vec![
            person((600.0, 500.0), (600.0, 450.0)),
            person((300.0, 500.0), (640.0, 452.0)),
        ];
        let fire = vec![ObjectBox {
            label: ObjectLabel::Fire,
            confidence: 0.9,
            bbox: BoundingBox::new(30.0, 30.0, 120.0, 120.0),
        }];
        let mut unified = UnifiedDetector::new(
            &config,
            Box::new(StubPoseBackend::constant(poses)),
            Box::new(StubObjectBackend::constant(fire)),
        );

        let frame = Frame::filled(1280, 720, [0, 0, 0], 0);
        let analysis = unified.process(&frame).unwrap();
        let kinds: Vec<EventKind> = analysis.detections.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![EventKind::Cash, EventKind::Fire]);
        assert_eq!(analysis.people_count, 2);
    }

    #[test]
    fn annotated_frame_is_produced_every_processed_frame() {
        let config = camera_config();
        let mut unified = UnifiedDetector::new(
            &config,
            Box::new(StubPoseBackend::empty()),
            Box::new(StubObjectBackend::empty()),
        );
        let frame = Frame::filled(1280, 720, [0, 0, 0], 3);
        let analysis = unified.process(&frame).unwrap();
        assert!(analysis.detections.is_empty());
        assert_eq!(analysis.annotated.width(), 1280);
        // Zone outline is drawn even with nothing detected.
        assert_eq!(analysis.annotated.pixel(500, 300), [0, 255, 255]);
    }
}
