//! Person-pose backend backed by a YOLOv8-pose ONNX model.

use super::{Keypoint, PoseBackend, PoseResult};
use anyhow::{Context, Result};
use common::{BoundingBox, Frame};
use image::DynamicImage;
use ndarray::{Array, IxDyn};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseBackendConfig {
    /// Path to the pose ONNX model file
    pub model_path: String,

    /// Minimum person confidence for a decoded pose
    #[serde(default = "default_person_confidence")]
    pub person_confidence: f32,

    /// IoU threshold for non-maximum suppression
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,

    /// Model input size (width and height)
    #[serde(default = "default_input_size")]
    pub input_size: u32,

    /// Maximum number of poses kept per frame
    #[serde(default = "default_max_poses")]
    pub max_poses: usize,

    /// Execution provider preference (CPU, CUDA)
    #[serde(default = "default_execution_provider")]
    pub execution_provider: String,

    /// GPU device ID
    #[serde(default)]
    pub device_id: i32,
}

fn default_person_confidence() -> f32 {
    0.5
}

fn default_iou_threshold() -> f32 {
    0.45
}

fn default_input_size() -> u32 {
    640
}

fn default_max_poses() -> usize {
    10
}

fn default_execution_provider() -> String {
    "CUDA".to_string()
}

impl PoseBackendConfig {
    pub fn new(model_path: impl Into<String>) -> Self {
        Self {
            model_path: model_path.into(),
            person_confidence: default_person_confidence(),
            iou_threshold: default_iou_threshold(),
            input_size: default_input_size(),
            max_poses: default_max_poses(),
            execution_provider: default_execution_provider(),
            device_id: 0,
        }
    }
}

/// ONNX Runtime pose backend. Owned exclusively by one worker thread;
/// `detect` is synchronous and blocking.
pub struct OrtPoseBackend {
    config: PoseBackendConfig,
    session: Session,
    provider: String,
}

impl OrtPoseBackend {
    /// Load the model. CUDA is tried first when requested, falling back to
    /// CPU; a missing or unreadable model file is an error.
    pub fn load(config: PoseBackendConfig) -> Result<Self> {
        let (session, provider) = build_session(
            &config.model_path,
            &config.execution_provider,
            config.device_id,
        )?;
        tracing::info!(
            model = %config.model_path,
            provider = %provider,
            input_size = config.input_size,
            "pose model loaded"
        );
        Ok(Self {
            config,
            session,
            provider,
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

    /// Decode YOLOv8-pose output `[1, 56, N]`: rows 0..4 are (cx, cy, w, h),
    /// row 4 is the person score, rows 5.. are 17 * (x, y, confidence).
    fn postprocess(
        &self,
        output: Array<f32, IxDyn>,
        original_width: u32,
        original_height: u32,
    ) -> Result<Vec<PoseResult>> {
        let shape = output.shape();
        if shape.len() != 3 || shape[1] < 5 + 17 * 3 {
            anyhow::bail!(
                "unsupported pose output shape {:?}, expected [1, 56, N]",
                shape
            );
        }

        let scale_x = original_width as f32 / self.config.input_size as f32;
        let scale_y = original_height as f32 / self.config.input_size as f32;
        let num_predictions = shape[2];

        let mut candidates = Vec::new();
        for i in 0..num_predictions {
            let score = output[[0, 4, i]];
            if score < self.config.person_confidence {
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

            let mut keypoints = Vec::with_capacity(17);
            for k in 0..17 {
                keypoints.push(Keypoint {
                    x: output[[0, 5 + k * 3, i]] * scale_x,
                    y: output[[0, 6 + k * 3, i]] * scale_y,
                    confidence: output[[0, 7 + k * 3, i]],
                });
            }

            candidates.push(PoseResult {
                bbox,
                keypoints,
                confidence: score,
            });
        }

        Ok(self.nms(candidates))
    }

    fn nms(&self, mut candidates: Vec<PoseResult>) -> Vec<PoseResult> {
        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut keep: Vec<PoseResult> = Vec::new();
        for candidate in candidates {
            if keep.len() >= self.config.max_poses {
                break;
            }
            let suppressed = keep
                .iter()
                .any(|kept| kept.bbox.iou(&candidate.bbox) >= self.config.iou_threshold);
            if !suppressed {
                keep.push(candidate);
            }
        }
        keep
    }
}

impl PoseBackend for OrtPoseBackend {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<PoseResult>> {
        let img = DynamicImage::ImageRgb8(frame.to_rgb_image());
        let input = self.preprocess(&img);
        let input_tensor = Value::from_array(input)?;

        let timer = telemetry::metrics::INFERENCE_TIME
            .with_label_values(&["pose"])
            .start_timer();
        let outputs = self.session.run(ort::inputs![input_tensor])?;
        timer.observe_duration();

        let output_value = outputs
            .get("output")
            .or_else(|| outputs.get("output0"))
            .context("no output tensor found in pose model")?;
        let (shape, data) = output_value.try_extract_tensor::<f32>()?;
        let shape_usize: Vec<usize> = shape.as_ref().iter().map(|&x| x as usize).collect();
        let output = Array::from_shape_vec(IxDyn(&shape_usize), data.to_vec())?;

        let poses = self.postprocess(output, frame.width(), frame.height())?;
        tracing::trace!(provider = %self.provider, poses = poses.len(), "pose inference done");
        Ok(poses)
    }
}

fn session_builder() -> Result<ort::session::builder::SessionBuilder> {
    Ok(Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?)
}

/// Build an ort session with CUDA→CPU fallback.
pub(crate) fn build_session(
    model_path: &str,
    execution_provider: &str,
    device_id: i32,
) -> Result<(Session, String)> {
    match execution_provider.to_uppercase().as_str() {
        "CUDA" => {
            let result = session_builder()?
                .with_execution_providers([
                    CUDAExecutionProvider::default()
                        .with_device_id(device_id)
                        .build(),
                    CPUExecutionProvider::default().build(),
                ])?
                .commit_from_file(model_path);
            match result {
                Ok(session) => Ok((session, "CUDA".to_string())),
                Err(e) => {
                    tracing::warn!(model = %model_path, error = %e, "CUDA unavailable, using CPU");
                    let session = session_builder()?
                        .commit_from_file(model_path)
                        .with_context(|| format!("load model {}", model_path))?;
                    Ok((session, "CPU".to_string()))
                }
            }
        }
        _ => {
            let session = session_builder()?
                .commit_from_file(model_path)
                .with_context(|| format!("load model {}", model_path))?;
            Ok((session, "CPU".to_string()))
        }
    }
}
