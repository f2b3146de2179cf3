//! Fire and smoke detector.
//!
//! Two stacked methods: the fire/smoke object model is consulted first;
//! when it yields no box at or above the confidence threshold, a
//! colour-and-flicker fallback looks for large bright-orange regions whose
//! area varies over recent frames. A gray/white smoke mask with upward
//! drift raises confidence but never promotes a candidate on its own.

use crate::backend::{FireObjectBackend, ObjectLabel};
use crate::unified::{Detector, FrameContext};
use anyhow::Result;
use common::{BoundingBox, CameraConfig, Detection, EventKind, Frame};
use serde_json::{json, Map};
use std::collections::VecDeque;

/// Minimum connected fire-coloured region, in pixels.
const MIN_FIRE_AREA: u32 = 3000;
/// Minimum normalized flicker score for the colour fallback.
const MIN_FLICKER_SCORE: f32 = 0.4;
/// Area-history window for the flicker score.
const FLICKER_WINDOW: usize = 10;
/// Minimum gray/white region treated as smoke.
const MIN_SMOKE_AREA: u32 = 5000;

#[derive(Debug, Clone)]
pub struct FireDetectorConfig {
    /// Minimum model confidence θf for the object method.
    pub confidence_threshold: f32,
    /// Consecutive candidate frames Mf required before emitting.
    pub min_fire_frames: u32,
    /// Minimum frames between two emitted fire detections.
    pub cooldown_frames: u64,
}

impl From<&CameraConfig> for FireDetectorConfig {
    fn from(cfg: &CameraConfig) -> Self {
        Self {
            confidence_threshold: cfg.fire_confidence,
            min_fire_frames: cfg.min_fire_frames,
            cooldown_frames: cfg.fire_cooldown_frames,
        }
    }
}

struct FireCandidate {
    method: &'static str,
    confidence: f32,
    bbox: BoundingBox,
    area: u32,
    flicker: f32,
}

pub struct FireDetector {
    config: FireDetectorConfig,
    backend: Box<dyn FireObjectBackend>,
    area_history: VecDeque<f32>,
    smoke_centroid: Option<(f32, f32)>,
    consecutive: u32,
    last_emitted: Option<u64>,
}

impl FireDetector {
    pub fn new(config: FireDetectorConfig, backend: Box<dyn FireObjectBackend>) -> Self {
        Self {
            config,
            backend,
            area_history: VecDeque::with_capacity(FLICKER_WINDOW),
            smoke_centroid: None,
            consecutive: 0,
            last_emitted: None,
        }
    }

    fn yolo_candidate(&mut self, frame: &Frame) -> Result<Option<FireCandidate>> {
        let boxes = self.backend.detect(frame)?;
        let best = boxes
            .into_iter()
            .filter(|b| {
                matches!(b.label, ObjectLabel::Fire | ObjectLabel::Smoke)
                    && b.confidence >= self.config.confidence_threshold
            })
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

        Ok(best.map(|b| FireCandidate {
            method: "yolo",
            confidence: b.confidence,
            area: b.bbox.area() as u32,
            bbox: b.bbox,
            flicker: 0.0,
        }))
    }

    /// Colour fallback: bright-orange mask minus skin tones, connected
    /// components, and the temporal variance of the masked area.
    fn color_candidate(&mut self, frame: &Frame) -> Option<FireCandidate> {
        let mask = fire_mask(frame);
        let (area, bbox) = largest_component(&mask, frame.width(), frame.height());

        if self.area_history.len() == FLICKER_WINDOW {
            self.area_history.pop_front();
        }
        self.area_history.push_back(area as f32);

        let flicker = flicker_score(&self.area_history);
        if area < MIN_FIRE_AREA || flicker < MIN_FLICKER_SCORE {
            return None;
        }

        Some(FireCandidate {
            method: "color_based",
            confidence: (0.5 + flicker / 2.0).min(1.0),
            bbox: bbox?,
            area,
            flicker,
        })
    }

    /// Gray/white mask with upward centroid drift. Auxiliary only.
    fn smoke_rising(&mut self, frame: &Frame) -> bool {
        let (area, centroid) = smoke_mask_stats(frame);
        let previous = self.smoke_centroid;
        self.smoke_centroid = centroid;

        if area < MIN_SMOKE_AREA {
            return false;
        }
        match (previous, centroid) {
            (Some(prev), Some(cur)) => cur.1 < prev.1 - 1.0,
            _ => false,
        }
    }

    fn cooldown_elapsed(&self, frame_index: u64) -> bool {
        self.last_emitted
            .map_or(true, |last| frame_index - last >= self.config.cooldown_frames)
    }
}

impl Detector for FireDetector {
    fn name(&self) -> &'static str {
        "fire"
    }

    fn process(&mut self, ctx: &FrameContext<'_>) -> Result<Vec<Detection>> {
        let mut candidate = self.yolo_candidate(ctx.frame)?;
        if candidate.is_none() {
            candidate = self.color_candidate(ctx.frame);
        }

        let Some(mut candidate) = candidate else {
            self.consecutive = 0;
            return Ok(Vec::new());
        };

        let smoke_detected = self.smoke_rising(ctx.frame);
        if smoke_detected {
            candidate.confidence = (candidate.confidence + 0.1).min(1.0);
        }

        self.consecutive += 1;
        if self.consecutive < self.config.min_fire_frames || !self.cooldown_elapsed(ctx.frame_index)
        {
            return Ok(Vec::new());
        }

        let mut metadata = Map::new();
        metadata.insert("event_type".into(), json!("fire"));
        metadata.insert(
            "fire_detection".into(),
            json!({
                "min_fire_frames": self.config.min_fire_frames,
                "fire_confidence": self.config.confidence_threshold,
                "detection_method": candidate.method,
            }),
        );
        metadata.insert("fire_area".into(), json!(candidate.area));
        metadata.insert("smoke_detected".into(), json!(smoke_detected));
        metadata.insert("flickering_score".into(), json!(candidate.flicker));

        let detection = Detection {
            kind: EventKind::Fire,
            confidence: candidate.confidence,
            bbox: candidate.bbox,
            frame_index: ctx.frame_index,
            metadata,
        };

        self.consecutive = 0;
        self.last_emitted = Some(ctx.frame_index);
        tracing::debug!(
            frame = ctx.frame_index,
            method = candidate.method,
            area = candidate.area,
            "fire detected"
        );
        Ok(vec![detection])
    }
}

/// BGR to HSV with OpenCV-style ranges: H in [0, 180), S and V in [0, 255].
fn bgr_to_hsv(b: u8, g: u8, r: u8) -> (f32, f32, f32) {
    let (bf, gf, rf) = (b as f32, g as f32, r as f32);
    let max = bf.max(gf).max(rf);
    let min = bf.min(gf).min(rf);
    let delta = max - min;

    let v = max;
    let s = if max > 0.0 { delta / max * 255.0 } else { 0.0 };
    let h = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (((gf - bf) / delta).rem_euclid(6.0))
    } else if max == gf {
        60.0 * ((bf - rf) / delta + 2.0)
    } else {
        60.0 * ((rf - gf) / delta + 4.0)
    };
    (h / 2.0, s, v)
}

/// Bright-orange fire mask, with skin tones subtracted.
fn fire_mask(frame: &Frame) -> Vec<bool> {
    let (w, h) = (frame.width(), frame.height());
    let mut mask = vec![false; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            let [b, g, r] = frame.pixel(x, y);
            let (hue, s, v) = bgr_to_hsv(b, g, r);
            let orange = (5.0..=25.0).contains(&hue) && s >= 150.0 && v >= 200.0;
            let deep_red = (0.0..=5.0).contains(&hue) && s >= 200.0 && v >= 220.0;
            let skin = (0.0..=25.0).contains(&hue)
                && (20.0..=170.0).contains(&s)
                && (70.0..=200.0).contains(&v);
            mask[(y * w + x) as usize] = (orange || deep_red) && !skin;
        }
    }
    mask
}

/// Largest 4-connected component of the mask: (area, bounding box).
fn largest_component(mask: &[bool], w: u32, h: u32) -> (u32, Option<BoundingBox>) {
    let mut visited = vec![false; mask.len()];
    let mut best_area = 0u32;
    let mut best_bbox = None;
    let mut queue = Vec::new();

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }
        let mut area = 0u32;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (w, h, 0u32, 0u32);
        visited[start] = true;
        queue.push(start);

        while let Some(idx) = queue.pop() {
            area += 1;
            let x = (idx as u32) % w;
            let y = (idx as u32) / w;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            let mut push = |nx: i64, ny: i64| {
                if nx >= 0 && ny >= 0 && (nx as u32) < w && (ny as u32) < h {
                    let nidx = (ny as u32 * w + nx as u32) as usize;
                    if mask[nidx] && !visited[nidx] {
                        visited[nidx] = true;
                        queue.push(nidx);
                    }
                }
            };
            push(x as i64 - 1, y as i64);
            push(x as i64 + 1, y as i64);
            push(x as i64, y as i64 - 1);
            push(x as i64, y as i64 + 1);
        }

        if area > best_area {
            best_area = area;
            best_bbox = Some(BoundingBox::new(
                min_x as f32,
                min_y as f32,
                (max_x + 1) as f32,
                (max_y + 1) as f32,
            ));
        }
    }
    (best_area, best_bbox)
}

/// Normalized temporal variance of the masked area: coefficient of
/// variation clamped to [0, 1]. Needs at least 3 samples.
fn flicker_score(history: &VecDeque<f32>) -> f32 {
    if history.len() < 3 {
        return 0.0;
    }
    let n = history.len() as f32;
    let mean = history.iter().sum::<f32>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = history.iter().map(|a| (a - mean).powi(2)).sum::<f32>() / n;
    (variance.sqrt() / mean).clamp(0.0, 1.0)
}

/// Gray/white mask area and centroid for the smoke branch.
fn smoke_mask_stats(frame: &Frame) -> (u32, Option<(f32, f32)>) {
    let (w, h) = (frame.width(), frame.height());
    let mut area = 0u32;
    let (mut sum_x, mut sum_y) = (0.0f64, 0.0f64);
    for y in 0..h {
        for x in 0..w {
            let [b, g, r] = frame.pixel(x, y);
            let (_, s, v) = bgr_to_hsv(b, g, r);
            if s <= 40.0 && (150.0..=255.0).contains(&v) {
                area += 1;
                sum_x += x as f64;
                sum_y += y as f64;
            }
        }
    }
    if area == 0 {
        (0, None)
    } else {
        (
            area,
            Some((
                (sum_x / area as f64) as f32,
                (sum_y / area as f64) as f32,
            )),
        )
    }
}
