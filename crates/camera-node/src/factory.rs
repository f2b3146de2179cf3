//! Production worker assembly.
//!
//! Builds the real parts for one camera on its worker thread: ONNX
//! backends, the ffmpeg frame source and the ffmpeg-backed sink. Missing
//! pose or fire weights are a configuration error and leave the worker in
//! the error state.

use crate::config::NodeConfig;
use crate::error::WorkerError;
use crate::sink::{EventSink, FfmpegClipEncoder};
use crate::source::{FrameSource, SourceConfig};
use crate::store::EventStore;
use crate::worker::{WorkerFactory, WorkerParts, WorkerSettings};
use anyhow::Result;
use common::{CameraConfig, MediaLayout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vision::backend::{ObjectBackendConfig, OrtObjectBackend, OrtPoseBackend, PoseBackendConfig};
use vision::UnifiedDetector;

pub struct ProductionWorkerFactory {
    media_root: PathBuf,
    pose_model: PathBuf,
    fire_model: PathBuf,
    settings: WorkerSettings,
    store: Arc<dyn EventStore>,
    runtime: tokio::runtime::Handle,
}

impl ProductionWorkerFactory {
    pub fn new(
        config: &NodeConfig,
        store: Arc<dyn EventStore>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            media_root: config.media_root.clone(),
            pose_model: config.models.pose.clone(),
            fire_model: config.models.fire.clone(),
            settings: WorkerSettings {
                detect_interval: config.detect_interval,
                buffer_seconds: config.buffer_seconds,
                ..WorkerSettings::default()
            },
            store,
            runtime,
        }
    }
}

fn require_model(path: &Path, what: &str) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(WorkerError::Config(format!(
            "{what} model weights missing: {}",
            path.display()
        ))
        .into())
    }
}

impl WorkerFactory for ProductionWorkerFactory {
    fn build(&self, camera: &CameraConfig) -> Result<WorkerParts> {
        require_model(&self.pose_model, "pose")?;
        require_model(&self.fire_model, "fire")?;

        let pose = OrtPoseBackend::load(PoseBackendConfig::new(
            self.pose_model.display().to_string(),
        ))
        .map_err(|e| WorkerError::Config(format!("load pose model: {e:#}")))?;
        let fire = OrtObjectBackend::load(ObjectBackendConfig::new(
            self.fire_model.display().to_string(),
        ))
        .map_err(|e| WorkerError::Config(format!("load fire model: {e:#}")))?;

        let detector = UnifiedDetector::new(camera, Box::new(pose), Box::new(fire));
        let source = FrameSource::open(SourceConfig::new(camera.rtsp_url.clone()))?;
        let sink = EventSink::new(
            MediaLayout::new(self.media_root.clone()),
            self.store.clone(),
            Box::new(FfmpegClipEncoder),
            self.runtime.clone(),
        );

        Ok(WorkerParts {
            source: Box::new(source),
            detector,
            sink,
            settings: self.settings.clone(),
        })
    }
}
