//! Event persistence.
//!
//! `persist` turns a detection plus a buffer snapshot into the on-disk
//! artefacts and the durable event record: intermediate MJPEG clip, H.264
//! MP4 transcode with faststart (falling back to the intermediate
//! container when unavailable), JPEG thumbnail, JSON sidecar, and finally
//! the store insert. The insert only happens once the clip file exists;
//! store failures are logged and the artefacts kept for reconciliation.

use crate::buffer::BufferSnapshot;
use crate::error::WorkerError;
use crate::store::EventStore;
use anyhow::{Context, Result};
use chrono::Local;
use common::{CameraConfig, Detection, EventSidecar, Frame, MediaLayout, NewEvent};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use vision::overlay;

/// Most recent buffered frames written into one clip.
const MAX_CLIP_FRAMES: usize = 150;
/// Wall-clock cap on the H.264 transcode.
const TRANSCODE_DEADLINE: Duration = Duration::from_secs(180);

/// Container/codec seam so the pipeline can be exercised without ffmpeg.
pub trait ClipEncoder: Send + Sync {
    /// Write frames into the intermediate container at `path`; returns the
    /// number of frames written.
    fn write_intermediate(
        &self,
        frames: &mut dyn Iterator<Item = Frame>,
        width: u32,
        height: u32,
        fps: f64,
        path: &Path,
    ) -> Result<usize>;

    /// Transcode to H.264 MP4 with faststart. `Ok(false)` means the
    /// transcode was unavailable or exceeded the deadline and the caller
    /// should keep the intermediate container.
    fn transcode(&self, src: &Path, dst: &Path, fps: f64, deadline: Duration) -> Result<bool>;
}

/// Production encoder shelling out to ffmpeg.
pub struct FfmpegClipEncoder;

impl ClipEncoder for FfmpegClipEncoder {
    fn write_intermediate(
        &self,
        frames: &mut dyn Iterator<Item = Frame>,
        width: u32,
        height: u32,
        fps: f64,
        path: &Path,
    ) -> Result<usize> {
        let mut child = Command::new("ffmpeg")
            .args(["-y", "-nostdin", "-loglevel", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", "bgr24"])
            .args(["-s", &format!("{width}x{height}")])
            .args(["-r", &format!("{fps}")])
            .args(["-i", "pipe:0"])
            .args(["-c:v", "mjpeg", "-q:v", "5"])
            .arg(path)
            .stdin(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("spawn ffmpeg clip writer")?;

        let mut stdin = child.stdin.take().context("clip writer has no stdin")?;
        let mut written = 0usize;
        for frame in frames {
            stdin
                .write_all(frame.data())
                .context("stream frame to clip writer")?;
            written += 1;
        }
        drop(stdin);

        let status = child.wait().context("wait for clip writer")?;
        if !status.success() {
            anyhow::bail!("clip writer exited with {status:?}");
        }
        if written == 0 {
            anyhow::bail!("no frames written to clip");
        }
        Ok(written)
    }

    fn transcode(&self, src: &Path, dst: &Path, fps: f64, deadline: Duration) -> Result<bool> {
        let child = Command::new("ffmpeg")
            .args(["-y", "-nostdin", "-loglevel", "error"])
            .arg("-i")
            .arg(src)
            .args(["-c:v", "libx264", "-preset", "fast", "-crf", "23"])
            .args(["-pix_fmt", "yuv420p"])
            .args(["-movflags", "+faststart"])
            .args(["-r", &format!("{fps}")])
            .arg(dst)
            .stderr(Stdio::null())
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "transcoder unavailable, keeping intermediate container");
                return Ok(false);
            }
        };

        let started = Instant::now();
        loop {
            match child.try_wait().context("poll transcoder")? {
                Some(status) if status.success() => return Ok(true),
                Some(status) => {
                    warn!(?status, "transcode failed, keeping intermediate container");
                    return Ok(false);
                }
                None if started.elapsed() > deadline => {
                    warn!("transcode exceeded deadline, keeping intermediate container");
                    let _ = child.kill();
                    let _ = child.wait();
                    return Ok(false);
                }
                None => std::thread::sleep(Duration::from_millis(200)),
            }
        }
    }
}

/// Encoder double for tests: dumps a tiny marker file instead of video.
pub struct StubClipEncoder {
    pub transcode_ok: bool,
}

impl ClipEncoder for StubClipEncoder {
    fn write_intermediate(
        &self,
        frames: &mut dyn Iterator<Item = Frame>,
        width: u32,
        height: u32,
        fps: f64,
        path: &Path,
    ) -> Result<usize> {
        let count = frames.count();
        if count == 0 {
            anyhow::bail!("no frames written to clip");
        }
        fs::write(path, format!("clip {count} frames {width}x{height} @{fps}"))?;
        Ok(count)
    }

    fn transcode(&self, src: &Path, dst: &Path, _fps: f64, _deadline: Duration) -> Result<bool> {
        if self.transcode_ok {
            fs::copy(src, dst)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Artefact paths and the store outcome for one persisted event.
#[derive(Debug)]
pub struct EventArtifacts {
    pub clip_path: PathBuf,
    pub thumbnail_path: PathBuf,
    pub json_path: PathBuf,
    pub event_id: Option<i64>,
    pub transcoded: bool,
    pub frames_saved: usize,
}

pub struct EventSink {
    media: MediaLayout,
    store: Arc<dyn EventStore>,
    encoder: Box<dyn ClipEncoder>,
    runtime: tokio::runtime::Handle,
}

impl EventSink {
    pub fn new(
        media: MediaLayout,
        store: Arc<dyn EventStore>,
        encoder: Box<dyn ClipEncoder>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            media,
            store,
            encoder,
            runtime,
        }
    }

    /// Persist one detection. The stop flag is honoured between major
    /// steps so a worker shutdown is never blocked on media I/O.
    pub fn persist(
        &self,
        camera: &CameraConfig,
        detection: &Detection,
        snapshot: &BufferSnapshot,
        stop: &AtomicBool,
    ) -> Result<EventArtifacts> {
        let frames = tail(&snapshot.annotated, MAX_CLIP_FRAMES);
        if frames.is_empty() {
            return Err(WorkerError::Persistence("frame buffer is empty".into()).into());
        }
        let last_frame = frames[frames.len() - 1].clone();
        let (width, height) = (last_frame.width(), last_frame.height());
        let fps = snapshot.effective_fps;

        self.media
            .ensure_tree()
            .map_err(|e| WorkerError::Persistence(format!("{e:#}")))?;

        let trigger_time = Local::now();
        let base = MediaLayout::base_name(detection.kind, &camera.camera_id, &trigger_time);
        let unique = uuid::Uuid::new_v4().simple().to_string();
        let temp_path = self.media.intermediate_clip_path(&base, &unique[..6]);

        check_stop(stop)?;

        let kind = detection.kind;
        let mut banner_frames = frames.iter().map(|frame| {
            let mut clip_frame = (*frame).clone();
            overlay::draw_banner(&mut clip_frame, kind);
            clip_frame
        });
        let frames_saved = match self
            .encoder
            .write_intermediate(&mut banner_frames, width, height, fps, &temp_path)
        {
            Ok(count) => count,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(WorkerError::Persistence(format!("write clip: {e:#}")).into());
            }
        };

        check_stop(stop)?;

        let mp4_path = self.media.clip_path(&base);
        let transcoded = self
            .encoder
            .transcode(&temp_path, &mp4_path, fps, TRANSCODE_DEADLINE)
            .map_err(|e| WorkerError::Persistence(format!("transcode: {e:#}")))?;
        let clip_path = if transcoded {
            let _ = fs::remove_file(&temp_path);
            mp4_path
        } else {
            let fallback = self.media.fallback_clip_path(&base);
            fs::rename(&temp_path, &fallback)
                .map_err(|e| WorkerError::Persistence(format!("keep intermediate clip: {e}")))?;
            fallback
        };
        debug!(clip = %clip_path.display(), frames_saved, transcoded, "clip written");

        check_stop(stop)?;

        let thumbnail_path = self.media.thumbnail_path(&base);
        let mut thumb_frame = last_frame.clone();
        overlay::draw_banner(&mut thumb_frame, kind);
        thumb_frame
            .to_rgb_image()
            .save(&thumbnail_path)
            .map_err(|e| WorkerError::Persistence(format!("write thumbnail: {e}")))?;

        let json_path = self.media.json_path(&base);
        let sidecar = EventSidecar {
            timestamp: last_frame.captured_at.to_rfc3339(),
            event_type: detection.kind,
            camera_id: camera.camera_id.clone(),
            camera_name: camera.name.clone(),
            confidence: detection.confidence,
            frame_number: detection.frame_index,
            bbox: Some(detection.bbox.as_array()),
            clip_path: clip_path.display().to_string(),
            thumbnail_path: thumbnail_path.display().to_string(),
            trigger_time: trigger_time.to_rfc3339(),
            frames_saved,
            duration_sec: frames_saved as f64 / fps,
            transcoded,
            detector: detection.metadata.clone(),
        };
        let sidecar_text = serde_json::to_string_pretty(&sidecar)
            .map_err(|e| WorkerError::Persistence(format!("encode sidecar: {e}")))?;
        fs::write(&json_path, sidecar_text)
            .map_err(|e| WorkerError::Persistence(format!("write sidecar: {e}")))?;

        check_stop(stop)?;

        // The clip exists on disk at this point; only now may the event
        // record be inserted.
        let record = NewEvent {
            camera_id: camera.camera_id.clone(),
            kind: detection.kind,
            confidence: detection.confidence,
            clip_path: clip_path.display().to_string(),
            thumbnail_path: thumbnail_path.display().to_string(),
            json_path: Some(json_path.display().to_string()),
            bbox: Some(detection.bbox),
            frame_index: detection.frame_index,
            captured_at: last_frame.captured_at,
        };
        let event_id = match self.runtime.block_on(self.store.record_event(record)) {
            Ok(id) => Some(id),
            Err(e) => {
                error!(
                    camera = %camera.camera_id,
                    error = %format!("{e:#}"),
                    "event insert failed, artefacts retained for reconciliation"
                );
                None
            }
        };

        info!(
            camera = %camera.camera_id,
            event_type = %detection.kind,
            clip = %clip_path.display(),
            event_id = ?event_id,
            "event persisted"
        );

        Ok(EventArtifacts {
            clip_path,
            thumbnail_path,
            json_path,
            event_id,
            transcoded,
            frames_saved,
        })
    }
}

fn tail(frames: &[Frame], limit: usize) -> &[Frame] {
    if frames.len() > limit {
        &frames[frames.len() - limit..]
    } else {
        frames
    }
}

fn check_stop(stop: &AtomicBool) -> Result<()> {
    if stop.load(Ordering::Relaxed) {
        Err(WorkerError::Interrupted.into())
    } else {
        Ok(())
    }
}
