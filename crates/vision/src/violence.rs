//! Interpersonal violence detector.
//!
//! Close-combat logic over pose pairs: two people in contact (overlapping
//! boxes or centres within a proximity bound), sustained motion inside the
//! union of their boxes, and raised arms all feed an aggression score.
//! Single-person activity is never violence, and pairs entirely inside the
//! cashier zone are ignored as normal transaction motion.

use crate::backend::{PoseResult, LEFT_SHOULDER, LEFT_WRIST, RIGHT_SHOULDER, RIGHT_WRIST};
use crate::motion::MotionMap;
use crate::unified::{Detector, FrameContext};
use anyhow::Result;
use common::{BoundingBox, CameraConfig, CashierZone, Detection, EventKind};
use serde_json::{json, Map};

#[derive(Debug, Clone)]
pub struct ViolenceDetectorConfig {
    pub zone: CashierZone,
    /// Minimum aggression score θv.
    pub confidence_threshold: f32,
    /// Consecutive candidate frames Mv required before emitting.
    pub min_violence_frames: u32,
    /// Motion activity floor μ for a candidate pair.
    pub motion_threshold: f32,
    /// Minimum frames between two emitted violence detections.
    pub cooldown_frames: u64,
    /// Keypoint confidence floor for arm posture checks.
    pub pose_confidence: f32,
}

impl From<&CameraConfig> for ViolenceDetectorConfig {
    fn from(cfg: &CameraConfig) -> Self {
        Self {
            zone: cfg.cashier_zone.clone(),
            confidence_threshold: cfg.violence_confidence,
            min_violence_frames: cfg.min_violence_frames,
            motion_threshold: cfg.motion_threshold,
            cooldown_frames: cfg.violence_cooldown_frames,
            pose_confidence: cfg.pose_confidence,
        }
    }
}

struct Altercation {
    first: usize,
    second: usize,
    score: f32,
    motion: f32,
    bbox: BoundingBox,
}

pub struct ViolenceDetector {
    config: ViolenceDetectorConfig,
    consecutive: u32,
    last_emitted: Option<u64>,
}

impl ViolenceDetector {
    pub fn new(config: ViolenceDetectorConfig) -> Self {
        Self {
            config,
            consecutive: 0,
            last_emitted: None,
        }
    }

    /// Wrist above the same-side shoulder counts as a raised arm.
    fn has_raised_arm(&self, pose: &PoseResult) -> bool {
        let kappa = self.config.pose_confidence;
        for (wrist_idx, shoulder_idx) in [(LEFT_WRIST, LEFT_SHOULDER), (RIGHT_WRIST, RIGHT_SHOULDER)]
        {
            let (Some(wrist), Some(shoulder)) =
                (pose.keypoint(wrist_idx), pose.keypoint(shoulder_idx))
            else {
                continue;
            };
            if wrist.confidence >= kappa && shoulder.confidence >= kappa && wrist.y < shoulder.y {
                return true;
            }
        }
        false
    }

    fn pair_altercation(
        &self,
        first: (usize, &PoseResult),
        second: (usize, &PoseResult),
        motion: &MotionMap,
    ) -> Option<Altercation> {
        let kappa = self.config.pose_confidence;
        let (ci, a) = first;
        let (cj, b) = second;

        // Normal transaction motion: both centres inside the cashier zone.
        let ca = a.center(kappa);
        let cb = b.center(kappa);
        if self.config.zone.contains(ca.0, ca.1) && self.config.zone.contains(cb.0, cb.1) {
            return None;
        }

        let overlap = a.bbox.overlap_ratio(&b.bbox);
        let center_distance = ((ca.0 - cb.0).powi(2) + (ca.1 - cb.1).powi(2)).sqrt();
        let proximity_bound = (a.bbox.diagonal() + b.bbox.diagonal()) / 4.0;
        if overlap <= 0.0 && center_distance >= proximity_bound {
            return None;
        }

        let union = a.bbox.union(&b.bbox);
        let pair_motion = motion.magnitude(&union);
        if pair_motion < self.config.motion_threshold {
            return None;
        }

        let motion_score = (pair_motion / (2.0 * self.config.motion_threshold)).min(1.0);
        let overlap_score = (overlap * 2.0).min(1.0);
        let raised = self.has_raised_arm(a) as u32 + self.has_raised_arm(b) as u32;
        let arm_score = raised as f32 / 2.0;

        let score = 0.4 * motion_score + 0.3 * overlap_score + 0.3 * arm_score;
        if score < self.config.confidence_threshold {
            return None;
        }

        Some(Altercation {
            first: ci,
            second: cj,
            score,
            motion: pair_motion,
            bbox: union,
        })
    }

    fn cooldown_elapsed(&self, frame_index: u64) -> bool {
        self.last_emitted
            .map_or(true, |last| frame_index - last >= self.config.cooldown_frames)
    }
}

impl Detector for ViolenceDetector {
    fn name(&self) -> &'static str {
        "violence"
    }

    fn process(&mut self, ctx: &FrameContext<'_>) -> Result<Vec<Detection>> {
        let mut altercations = Vec::new();
        for i in 0..ctx.poses.len() {
            for j in (i + 1)..ctx.poses.len() {
                if let Some(alt) =
                    self.pair_altercation((i, &ctx.poses[i]), (j, &ctx.poses[j]), ctx.motion)
                {
                    altercations.push(alt);
                }
            }
        }

        if altercations.is_empty() {
            self.consecutive = 0;
            return Ok(Vec::new());
        }

        self.consecutive += 1;
        if self.consecutive < self.config.min_violence_frames
            || !self.cooldown_elapsed(ctx.frame_index)
        {
            return Ok(Vec::new());
        }

        let best = altercations
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .expect("non-empty altercations");

        let mut involved: Vec<usize> = altercations
            .iter()
            .flat_map(|alt| [alt.first, alt.second])
            .collect();
        involved.sort_unstable();
        involved.dedup();

        let mut metadata = Map::new();
        metadata.insert("event_type".into(), json!("violence"));
        metadata.insert("people_involved".into(), json!(involved.len()));
        metadata.insert("motion_magnitude".into(), json!(best.motion));
        metadata.insert("close_combat_detected".into(), json!(true));
        metadata.insert(
            "violence_detection".into(),
            json!({
                "min_violence_frames": self.config.min_violence_frames,
                "violence_confidence": self.config.confidence_threshold,
                "motion_threshold": self.config.motion_threshold,
            }),
        );

        let detection = Detection {
            kind: EventKind::Violence,
            confidence: best.score,
            bbox: best.bbox,
            frame_index: ctx.frame_index,
            metadata,
        };

        self.consecutive = 0;
        self.last_emitted = Some(ctx.frame_index);
        tracing::debug!(
            frame = ctx.frame_index,
            score = best.score,
            motion = best.motion,
            "violence detected"
        );
        Ok(vec![detection])
    }
}
