//! Fire/smoke object backend backed by a YOLO ONNX model.

use super::pose::build_session;
use super::{FireObjectBackend, ObjectBox, ObjectLabel};
use anyhow::{Context, Result};
use common::{BoundingBox, Frame};
use image::DynamicImage;
use ndarray::{Array, IxDyn};
use ort::{session::Session, value::Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectBackendConfig {
    /// Path to the fire/smoke ONNX model file
    pub model_path: String,

    /// Minimum box confidence kept after decoding
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,

    /// IoU threshold for non-maximum suppression
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,

    /// Model input size (width and height)
    #[serde(default = "default_input_size")]
    pub input_size: u32,

    /// Class names in model output order; names containing "fire" or
    /// "smoke" map to the corresponding labels, everything else to Other.
    #[serde(default = "default_class_names")]
    pub class_names: Vec<String>,

    /// Execution provider preference (CPU, CUDA)
    #[serde(default = "default_execution_provider")]
    pub execution_provider: String,

    /// GPU device ID
    #[serde(default)]
    pub device_id: i32,
}

fn default_confidence() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.45
}

fn default_input_size() -> u32 {
    640
}

fn default_class_names() -> Vec<String> {
    vec!["fire".to_string(), "smoke".to_string()]
}

fn default_execution_provider() -> String {
    "CUDA".to_string()
}

impl ObjectBackendConfig {
    pub fn new(model_path: impl Into<String>) -> Self {
        Self {
            model_path: model_path.into(),
            confidence_threshold: default_confidence(),
            iou_threshold: default_iou_threshold(),
            input_size: default_input_size(),
            class_names: default_class_names(),
            execution_provider: default_execution_provider(),
            device_id: 0,
        }
    }
}

/// ONNX Runtime object backend for the fire/smoke model.
pub struct OrtObjectBackend {
    config: ObjectBackendConfig,
    session: Session,
    labels: Vec<ObjectLabel>,
}

impl OrtObjectBackend {
    pub fn load(config: ObjectBackendConfig) -> Result<Self> {
        let (session, provider) = build_session(
            &config.model_path,
            &config.execution_provider,
            config.device_id,
        )?;
        let labels = config
            .class_names
            .iter()
            .map(|name| {
                let lower = name.to_lowercase();
                if lower.contains("fire") {
                    ObjectLabel::Fire
                } else if lower.contains("smoke") {
                    ObjectLabel::Smoke
                } else {
                    ObjectLabel::Other
                }
            })
            .collect();
        tracing::info!(
            model = %config.model_path,
            provider = %provider,
            classes = config.class_names.len(),
            "fire object model loaded"
        );
        Ok(Self {
            config,
            session,
            labels,
        })
    }

    fn preprocess(&self, img: &DynamicImage) -> Array<f32, IxDyn> {
        let size = self.config.input_size;
        let resized = img.resize_exact(size, size, image::imageops::FilterType::Triangle);
        let rgb = resized.to_rgb8();

        let mut input = Array::zeros(IxDyn(&[1, 3, size as usize, size as usize]));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
            input[[0, 1, y as usize, x as usize]] = pixel[1] as f32 / 255.0;
            input[[0, 2, y as usize, x as usize]] = pixel[2] as f32 / 255.0;
        }
        input
    }

    /// Decode YOLO output `[1, 4 + num_classes, N]` and apply NMS.
    fn postprocess(
        &self,
        output: Array<f32, IxDyn>,
        original_width: u32,
        original_height: u32,
    ) -> Result<Vec<ObjectBox>> {
        let shape = output.shape();
        if shape.len() != 3 || shape[1] <= 4 {
            anyhow::bail!(
                "unsupported object output shape {:?}, expected [1, 4+C, N]",
                shape
            );
        }

        let scale_x = original_width as f32 / self.config.input_size as f32;
        let scale_y = original_height as f32 / self.config.input_size as f32;
        let num_classes = shape[1] - 4;
        let num_predictions = shape[2];

        let mut boxes = Vec::new();
        for i in 0..num_predictions {
            let mut best_score = 0.0f32;
            let mut best_class = 0usize;
            for class_idx in 0..num_classes {
                let score = output[[0, 4 + class_idx, i]];
                if score > best_score {
                    best_score = score;
                    best_class = class_idx;
                }
            }
            if best_score < self.config.confidence_threshold {
                continue;
            }

            let cx = output[[0, 0, i]];
            let cy = output[[0, 1, i]];
            let w = output[[0, 2, i]];
            let h = output[[0, 3, i]];
            let bbox = BoundingBox::new(
                ((cx - w / 2.0) * scale_x).max(0.0),
                ((cy - h / 2.0) * scale_y).max(0.0),
                ((cx + w / 2.0) * scale_x).min(original_width as f32),
                ((cy + h / 2.0) * scale_y).min(original_height as f32),
            );

            boxes.push(ObjectBox {
                label: self
                    .labels
                    .get(best_class)
                    .copied()
                    .unwrap_or(ObjectLabel::Other),
                confidence: best_score,
                bbox,
            });
        }

        boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let mut keep: Vec<ObjectBox> = Vec::new();
        for candidate in boxes {
            let suppressed = keep
                .iter()
                .any(|kept| kept.bbox.iou(&candidate.bbox) >= self.config.iou_threshold);
            if !suppressed {
                keep.push(candidate);
            }
        }
        Ok(keep)
    }
}

impl FireObjectBackend for OrtObjectBackend {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<ObjectBox>> {
        let img = DynamicImage::ImageRgb8(frame.to_rgb_image());
        let input = self.preprocess(&img);
        let input_tensor = Value::from_array(input)?;

        let timer = telemetry::metrics::INFERENCE_TIME
            .with_label_values(&["fire_objects"])
            .start_timer();
        let outputs = self.session.run(ort::inputs![input_tensor])?;
        timer.observe_duration();

        let output_value = outputs
            .get("output")
            .or_else(|| outputs.get("output0"))
            .context("no output tensor found in fire model")?;
        let (shape, data) = output_value.try_extract_tensor::<f32>()?;
        let shape_usize: Vec<usize> = shape.as_ref().iter().map(|&x| x as usize).collect();
        let output = Array::from_shape_vec(IxDyn(&shape_usize), data.to_vec())?;

        self.postprocess(output, frame.width(), frame.height())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ObjectBackendConfig::new("models/fire_smoke.onnx");
        assert_eq!(config.class_names, vec!["fire", "smoke"]);
        assert_eq!(config.input_size, 640);
    }

    #[test]
    fn load_fails_for_missing_model() {
        let config = ObjectBackendConfig::new("/nonexistent/fire.onnx");
        assert!(OrtObjectBackend::load(config).is_err());
    }
}
