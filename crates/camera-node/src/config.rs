//! Node configuration.
//!
//! One YAML file describes the node: event store URL, media root, model
//! weights, detection cadence, and the camera list. A few fields accept
//! environment overrides for container deployments.

use crate::supervisor::ConfigProvider;
use anyhow::{bail, Context, Result};
use common::CameraConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPaths {
    /// Person-pose model weights. Required.
    pub pose: PathBuf,
    /// Fire/smoke model weights. Required.
    pub fire: PathBuf,
    /// General object model. Optional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objects: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Event store URL, e.g. `sqlite:///var/lib/tillwatch/events.db`.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Root of the media tree (clips/thumbnails/json).
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,

    pub models: ModelPaths,

    /// Run detection every Nth frame.
    #[serde(default = "default_detect_interval")]
    pub detect_interval: u64,

    /// Rolling buffer window in seconds.
    #[serde(default = "default_buffer_seconds")]
    pub buffer_seconds: f64,

    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
}

fn default_database_url() -> String {
    "sqlite://tillwatch.db".to_string()
}

fn default_media_root() -> PathBuf {
    PathBuf::from("./media")
}

fn default_detect_interval() -> u64 {
    4
}

fn default_buffer_seconds() -> f64 {
    30.0
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let mut config: NodeConfig =
            serde_yaml::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Resolve the config path from TILLWATCH_CONFIG (default
    /// `tillwatch.yaml`) and load it.
    pub fn from_env() -> Result<Self> {
        let path =
            env::var("TILLWATCH_CONFIG").unwrap_or_else(|_| "tillwatch.yaml".to_string());
        Self::from_file(Path::new(&path))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("DATABASE_URL") {
            self.database_url = url;
        }
        if let Ok(root) = env::var("MEDIA_ROOT") {
            self.media_root = PathBuf::from(root);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.detect_interval == 0 {
            bail!("detect_interval must be at least 1");
        }
        if self.buffer_seconds <= 0.0 {
            bail!("buffer_seconds must be positive");
        }
        let mut ids = HashSet::new();
        for camera in &self.cameras {
            if !ids.insert(camera.id) {
                bail!("duplicate camera id {}", camera.id);
            }
            camera
                .validate()
                .with_context(|| format!("camera {}", camera.id))?;
        }
        Ok(())
    }
}

impl ConfigProvider for NodeConfig {
    fn camera(&self, id: i64) -> Option<CameraConfig> {
        self.cameras.iter().find(|c| c.id == id).cloned()
    }

    fn cameras(&self) -> Vec<CameraConfig> {
        self.cameras.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
database_url: "sqlite://events.db"
media_root: /srv/media
models:
  pose: models/yolov8s-pose.onnx
  fire: models/fire_smoke.onnx
cameras:
  - id: 1
    camera_id: CAM-FRONT
    rtsp_url: rtsp://10.0.0.11:554/stream1
    cashier_zone: { x: 100, y: 100, width: 300, height: 300 }
  - id: 2
    camera_id: CAM-BACK
    rtsp_url: rtsp://10.0.0.12:554/stream1
    detect_fire: false
    cashier_zone:
      points: [[50, 50], [400, 50], [400, 300], [50, 300]]
"#;

    #[test]
    fn parses_sample_and_validates() {
        let config: NodeConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.cameras.len(), 2);
        assert_eq!(config.detect_interval, 4);
        assert!(!config.cameras[1].detect_fire);
        assert!(config.models.objects.is_none());
    }

    #[test]
    fn provider_lookup_by_id() {
        let config: NodeConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.camera(2).unwrap().camera_id, "CAM-BACK");
        assert!(config.camera(99).is_none());
    }

    #[test]
    fn duplicate_camera_ids_are_rejected() {
        let mut config: NodeConfig = serde_yaml::from_str(SAMPLE).unwrap();
        config.cameras[1].id = 1;
        assert!(config.validate().is_err());
    }
}
