//! Cash hand-to-hand exchange detector.
//!
//! A candidate frame requires exactly one person inside the cashier zone
//! (the cashier) and one outside (the customer), with a wrist pair closer
//! than the configured pixel threshold. Zone membership is decided by the
//! person's centre point alone. Candidates must persist for a configured
//! number of consecutive frames and respect the per-type cooldown before a
//! detection is emitted.

use crate::backend::{HandSide, PoseResult};
use crate::unified::{Detector, FrameContext};
use anyhow::Result;
use common::{BoundingBox, CameraConfig, CashierZone, Detection, EventKind};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone)]
pub struct CashDetectorConfig {
    pub zone: CashierZone,
    /// Hand-touch distance threshold D in pixels (strict less-than).
    pub hand_touch_distance: u32,
    /// Keypoint confidence floor κ (inclusive).
    pub pose_confidence: f32,
    /// Consecutive candidate frames M required before emitting.
    pub min_transaction_frames: u32,
    /// Minimum frames between two emitted cash detections.
    pub cooldown_frames: u64,
    /// Minimum distance score θc.
    pub confidence_threshold: f32,
}

impl From<&CameraConfig> for CashDetectorConfig {
    fn from(cfg: &CameraConfig) -> Self {
        Self {
            zone: cfg.cashier_zone.clone(),
            hand_touch_distance: cfg.hand_touch_distance,
            pose_confidence: cfg.pose_confidence,
            min_transaction_frames: cfg.min_transaction_frames,
            cooldown_frames: cfg.cash_cooldown_frames,
            confidence_threshold: cfg.cash_confidence,
        }
    }
}

struct PersonView<'a> {
    pose: &'a PoseResult,
    center: (f32, f32),
    in_zone: bool,
}

/// Best wrist pairing found in one frame, before the temporal gate.
struct TouchCandidate {
    cashier_idx: usize,
    customer_idx: usize,
    cashier_side: HandSide,
    customer_side: HandSide,
    cashier_wrist: (f32, f32, f32),
    customer_wrist: (f32, f32, f32),
    distance: f32,
    min_wrist_confidence: f32,
    customer_center_x: f32,
}

impl TouchCandidate {
    /// Deterministic ordering: smallest distance wins; ties go to the
    /// higher minimum wrist confidence, then to the leftmost customer
    /// centre, so recordings are reproducible.
    fn beats(&self, other: &TouchCandidate) -> bool {
        match self.distance.total_cmp(&other.distance) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => {
                match other
                    .min_wrist_confidence
                    .total_cmp(&self.min_wrist_confidence)
                {
                    std::cmp::Ordering::Less => true,
                    std::cmp::Ordering::Greater => false,
                    std::cmp::Ordering::Equal => self.customer_center_x < other.customer_center_x,
                }
            }
        }
    }
}

pub struct CashDetector {
    config: CashDetectorConfig,
    consecutive: u32,
    last_emitted: Option<u64>,
}

impl CashDetector {
    pub fn new(config: CashDetectorConfig) -> Self {
        Self {
            config,
            consecutive: 0,
            last_emitted: None,
        }
    }

    fn best_candidate(&self, people: &[PersonView<'_>]) -> Option<TouchCandidate> {
        let kappa = self.config.pose_confidence;
        let mut best: Option<TouchCandidate> = None;

        for i in 0..people.len() {
            for j in (i + 1)..people.len() {
                // Exactly one of the pair must be the cashier.
                if people[i].in_zone == people[j].in_zone {
                    continue;
                }
                let (cashier_idx, customer_idx) = if people[i].in_zone { (i, j) } else { (j, i) };
                let cashier = &people[cashier_idx];
                let customer = &people[customer_idx];

                for cashier_side in [HandSide::Left, HandSide::Right] {
                    let Some(cw) = cashier.pose.wrist(cashier_side, kappa) else {
                        continue;
                    };
                    for customer_side in [HandSide::Left, HandSide::Right] {
                        let Some(uw) = customer.pose.wrist(customer_side, kappa) else {
                            continue;
                        };
                        let distance = ((cw.0 - uw.0).powi(2) + (cw.1 - uw.1).powi(2)).sqrt();
                        let candidate = TouchCandidate {
                            cashier_idx,
                            customer_idx,
                            cashier_side,
                            customer_side,
                            cashier_wrist: cw,
                            customer_wrist: uw,
                            distance,
                            min_wrist_confidence: cw.2.min(uw.2),
                            customer_center_x: customer.center.0,
                        };
                        if best.as_ref().map_or(true, |b| candidate.beats(b)) {
                            best = Some(candidate);
                        }
                    }
                }
            }
        }
        best
    }

    fn cooldown_elapsed(&self, frame_index: u64) -> bool {
        self.last_emitted
            .map_or(true, |last| frame_index - last >= self.config.cooldown_frames)
    }

    fn party_json(&self, view: &PersonView<'_>, hand_used: HandSide) -> Value {
        let kappa = self.config.pose_confidence;
        let hand = |side: HandSide| -> Value {
            match view.pose.wrist(side, kappa) {
                Some((x, y, c)) => json!([x, y, c]),
                None => Value::Null,
            }
        };
        json!({
            "center": [view.center.0, view.center.1],
            "bbox": view.pose.bbox.as_array(),
            "hands": { "left": hand(HandSide::Left), "right": hand(HandSide::Right) },
            "in_zone": view.in_zone,
            "hand_used": hand_used.as_str(),
        })
    }

    fn build_detection(
        &self,
        ctx: &FrameContext<'_>,
        people: &[PersonView<'_>],
        touch: &TouchCandidate,
        distance_score: f32,
    ) -> Detection {
        let d = self.config.hand_touch_distance;
        let interaction = (
            (touch.cashier_wrist.0 + touch.customer_wrist.0) / 2.0,
            (touch.cashier_wrist.1 + touch.customer_wrist.1) / 2.0,
        );
        let bbox = BoundingBox::new(
            (interaction.0 - 80.0).max(0.0),
            (interaction.1 - 80.0).max(0.0),
            (interaction.0 + 80.0).min(ctx.frame.width() as f32),
            (interaction.1 + 80.0).min(ctx.frame.height() as f32),
        );

        let mut metadata = Map::new();
        metadata.insert("event_type".into(), json!("cash"));
        metadata.insert(
            "cashier".into(),
            self.party_json(&people[touch.cashier_idx], touch.cashier_side),
        );
        metadata.insert(
            "customer".into(),
            self.party_json(&people[touch.customer_idx], touch.customer_side),
        );
        metadata.insert("measured_hand_distance".into(), json!(touch.distance));
        metadata.insert("distance_threshold".into(), json!(d));
        metadata.insert(
            "interaction_point".into(),
            json!([interaction.0, interaction.1]),
        );
        metadata.insert("people_count".into(), json!(people.len()));
        metadata.insert(
            "cash_detection".into(),
            json!({
                "hand_touch_distance_threshold": d,
                "cashier_zone": self.config.zone.clone(),
                "pose_confidence": self.config.pose_confidence,
            }),
        );

        Detection {
            kind: EventKind::Cash,
            confidence: distance_score,
            bbox,
            frame_index: ctx.frame_index,
            metadata,
        }
    }
}

impl Detector for CashDetector {
    fn name(&self) -> &'static str {
        "cash"
    }

    fn process(&mut self, ctx: &FrameContext<'_>) -> Result<Vec<Detection>> {
        let kappa = self.config.pose_confidence;
        let people: Vec<PersonView<'_>> = ctx
            .poses
            .iter()
            .map(|pose| {
                let center = pose.center(kappa);
                PersonView {
                    pose,
                    center,
                    in_zone: self.config.zone.contains(center.0, center.1),
                }
            })
            .collect();

        let touch = match self.best_candidate(&people) {
            // Strict less-than: a wrist pair at exactly D is not a touch.
            Some(t) if t.distance < self.config.hand_touch_distance as f32 => t,
            _ => {
                self.consecutive = 0;
                return Ok(Vec::new());
            }
        };

        self.consecutive += 1;
        let distance_score = 1.0 - touch.distance / self.config.hand_touch_distance as f32;

        if self.consecutive < self.config.min_transaction_frames
            || distance_score < self.config.confidence_threshold
            || !self.cooldown_elapsed(ctx.frame_index)
        {
            return Ok(Vec::new());
        }

        let detection = self.build_detection(ctx, &people, &touch, distance_score);
        self.consecutive = 0;
        self.last_emitted = Some(ctx.frame_index);
        tracing::debug!(
            frame = ctx.frame_index,
            distance = touch.distance,
            score = distance_score,
            "cash exchange detected"
        );
        Ok(vec![detection])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Keypoint, LEFT_HIP, LEFT_WRIST, RIGHT_HIP, RIGHT_WRIST};
    use crate::motion::MotionMap;
    use common::Frame;

    fn zone() -> CashierZone {
        CashierZone::Rect {
            x: 400.0,
            y: 300.0,
            width: 400.0,
            height: 400.0,
        }
    }

    fn config() -> CashDetectorConfig {
        CashDetectorConfig {
            zone: zone(),
            hand_touch_distance: 100,
            pose_confidence: 0.3,
            min_transaction_frames: 1,
            cooldown_frames: 45,
            confidence_threshold: 0.1,
        }
    }

    fn person(hip: (f32, f32), wrists: (f32, f32), wrist_conf: f32) -> PoseResult {
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
            confidence: wrist_conf,
        };
        keypoints[RIGHT_WRIST] = Keypoint {
            x: wrists.0 + 4.0,
            y: wrists.1,
            confidence: wrist_conf,
        };
        PoseResult {
            bbox: BoundingBox::new(hip.0 - 60.0, hip.1 - 180.0, hip.0 + 60.0, hip.1 + 180.0),
            keypoints,
            confidence: 0.9,
        }
    }

    fn run_frames(
        detector: &mut CashDetector,
        poses: &[PoseResult],
        frames: std::ops::Range<u64>,
    ) -> Vec<u64> {
        let frame = Frame::filled(1280, 720, [0, 0, 0], 0);
        let motion = MotionMap::zero();
        let mut emitted = Vec::new();
        for index in frames {
            let ctx = FrameContext {
                frame: &frame,
                frame_index: index,
                poses,
                motion: &motion,
            };
            for det in detector.process(&ctx).unwrap() {
                emitted.push(det.frame_index);
            }
        }
        emitted
    }

    #[test]
    fn cashier_customer_touch_fires_and_respects_cooldown() {
        let mut detector = CashDetector::new(config());
        // One centre inside the zone (cashier), one outside (customer).
        let poses = vec![
            person((600.0, 500.0), (600.0, 450.0), 0.9),
            person((300.0, 500.0), (680.0, 455.0), 0.9),
        ];
        let emitted = run_frames(&mut detector, &poses, 0..60);
        assert_eq!(emitted, vec![0, 45]);
    }

    #[test]
    fn two_people_both_in_zone_never_fire() {
        let mut detector = CashDetector::new(config());
        let poses = vec![
            person((600.0, 500.0), (600.0, 450.0), 0.9),
            person((620.0, 500.0), (605.0, 452.0), 0.9),
        ];
        let emitted = run_frames(&mut detector, &poses, 0..60);
        assert!(emitted.is_empty());
    }

    #[test]
    fn low_wrist_confidence_blocks_detection() {
        let mut detector = CashDetector::new(config());
        let poses = vec![
            person((600.0, 500.0), (600.0, 450.0), 0.25),
            person((300.0, 500.0), (680.0, 455.0), 0.25),
        ];
        let emitted = run_frames(&mut detector, &poses, 0..30);
        assert!(emitted.is_empty());
    }

    #[test]
    fn wrist_confidence_exactly_at_floor_is_accepted() {
        let mut detector = CashDetector::new(config());
        let poses = vec![
            person((600.0, 500.0), (600.0, 450.0), 0.3),
            person((300.0, 500.0), (680.0, 455.0), 0.3),
        ];
        let emitted = run_frames(&mut detector, &poses, 0..1);
        assert_eq!(emitted, vec![0]);
    }

    #[test]
    fn distance_equal_to_threshold_is_not_a_candidate() {
        let mut detector = CashDetector::new(config());
        // Only the left wrists participate, exactly 100 px apart.
        let mut cashier = person((600.0, 500.0), (596.0, 450.0), 0.9);
        cashier.keypoints[RIGHT_WRIST].confidence = 0.0;
        let mut customer = person((300.0, 500.0), (696.0, 450.0), 0.9);
        customer.keypoints[RIGHT_WRIST].confidence = 0.0;
        let poses = vec![cashier, customer];
        let emitted = run_frames(&mut detector, &poses, 0..10);
        assert!(emitted.is_empty());
    }

    #[test]
    fn temporal_gate_requires_consecutive_candidates() {
        let mut cfg = config();
        cfg.min_transaction_frames = 5;
        let mut detector = CashDetector::new(cfg);
        let poses = vec![
            person((600.0, 500.0), (600.0, 450.0), 0.9),
            person((300.0, 500.0), (680.0, 455.0), 0.9),
        ];
        // 4 candidate frames, then a gap, then 5 more: only the second run
        // reaches the gate.
        let mut emitted = run_frames(&mut detector, &poses, 0..4);
        emitted.extend(run_frames(&mut detector, &[], 4..5));
        emitted.extend(run_frames(&mut detector, &poses, 5..10));
        assert_eq!(emitted, vec![9]);
    }

    #[test]
    fn tie_breaks_prefer_higher_wrist_confidence_then_leftmost() {
        let mut detector = CashDetector::new(config());
        let cashier = person((600.0, 500.0), (600.0, 450.0), 0.9);
        // Two customers at the same distance; the second has higher wrist
        // confidence and must win.
        let mut weak = person((300.0, 500.0), (650.0, 450.0), 0.5);
        weak.keypoints[RIGHT_WRIST].confidence = 0.0;
        let mut strong = person((320.0, 520.0), (650.0, 450.0), 0.8);
        strong.keypoints[RIGHT_WRIST].confidence = 0.0;

        let poses = vec![cashier, weak, strong];
        let frame = Frame::filled(1280, 720, [0, 0, 0], 0);
        let motion = MotionMap::zero();
        let ctx = FrameContext {
            frame: &frame,
            frame_index: 0,
            poses: &poses,
            motion: &motion,
        };
        let detections = detector.process(&ctx).unwrap();
        assert_eq!(detections.len(), 1);
        let customer = &detections[0].metadata["customer"];
        assert_eq!(customer["center"][0].as_f64().unwrap(), 320.0);
    }

    #[test]
    fn metadata_carries_the_field_contract() {
        let mut detector = CashDetector::new(config());
        let poses = vec![
            person((600.0, 500.0), (600.0, 450.0), 0.9),
            person((300.0, 500.0), (680.0, 455.0), 0.9),
        ];
        let frame = Frame::filled(1280, 720, [0, 0, 0], 0);
        let motion = MotionMap::zero();
        let ctx = FrameContext {
            frame: &frame,
            frame_index: 7,
            poses: &poses,
            motion: &motion,
        };
        let detection = detector.process(&ctx).unwrap().remove(0);

        let meta = &detection.metadata;
        assert_eq!(meta["event_type"], "cash");
        assert_eq!(meta["cashier"]["in_zone"], true);
        assert_eq!(meta["customer"]["in_zone"], false);
        assert_eq!(meta["distance_threshold"], 100);
        assert_eq!(meta["people_count"], 2);
        let measured = meta["measured_hand_distance"].as_f64().unwrap();
        assert!(measured < 100.0);
        assert!(meta["cash_detection"]["cashier_zone"].is_object());
        assert!(meta["interaction_point"].is_array());
        assert!(meta["cashier"]["hand_used"].is_string());
    }
}
