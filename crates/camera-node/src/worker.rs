//! Per-camera worker.
//!
//! Each camera gets a dedicated OS thread that owns the frame source,
//! rolling buffer, unified detector and event sink for that camera alone.
//! The thread publishes counters and the latest annotated frame through a
//! shared block the supervisor and viewers read without touching worker
//! state. Panics are contained to the worker; the shared state ends in
//! `error` and the supervisor reaps the handle.

use crate::buffer::RollingBuffer;
use crate::error::WorkerError;
use crate::sink::EventSink;
use crate::source::VideoSource;
use anyhow::Result;
use chrono::{DateTime, Local};
use common::{CameraConfig, Frame};
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use vision::UnifiedDetector;

/// Graceful-stop deadline before a worker thread is abandoned.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Reconnect cycles tolerated before the worker goes fatal.
const MAX_RECONNECT_STORM: u32 = 8;
/// Inference failures tolerated inside the rolling window.
const INFERENCE_ERROR_LIMIT: usize = 30;
/// Window (in frames) for the inference failure budget.
const INFERENCE_ERROR_WINDOW: u64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Running,
    Reconnecting,
    Stopping,
    Stopped,
    Error,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Reconnecting => "reconnecting",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
            WorkerState::Error => "error",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State a worker shares with the outside world. Counters are monotonic
/// for the lifetime of the worker; the frame slot is a single-writer
/// latest-value register that readers copy out of.
pub struct WorkerShared {
    state: Mutex<WorkerState>,
    last_error: Mutex<Option<String>>,
    pub frames_processed: AtomicU64,
    pub events_detected: AtomicU64,
    started_at: Mutex<Option<DateTime<Local>>>,
    frame_slot: Mutex<Option<Frame>>,
    pub stop: Arc<AtomicBool>,
}

impl WorkerShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(WorkerState::Starting),
            last_error: Mutex::new(None),
            frames_processed: AtomicU64::new(0),
            events_detected: AtomicU64::new(0),
            started_at: Mutex::new(None),
            frame_slot: Mutex::new(None),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().expect("worker state lock")
    }

    pub fn set_state(&self, state: WorkerState) {
        *self.state.lock().expect("worker state lock") = state;
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().expect("worker error lock").clone()
    }

    pub fn set_error(&self, message: impl Into<String>) {
        let mut message = message.into();
        message.truncate(200);
        *self.last_error.lock().expect("worker error lock") = Some(message);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Writer overwrites; old frames are dropped silently.
    pub fn publish_frame(&self, frame: Frame) {
        *self.frame_slot.lock().expect("frame slot lock") = Some(frame);
    }

    /// Reader copies the pixels out before use.
    pub fn latest_frame(&self) -> Option<Frame> {
        self.frame_slot.lock().expect("frame slot lock").clone()
    }

    fn mark_started(&self) {
        *self.started_at.lock().expect("started_at lock") = Some(Local::now());
    }

    pub fn started_at(&self) -> Option<DateTime<Local>> {
        *self.started_at.lock().expect("started_at lock")
    }
}

/// Status snapshot exposed to the supervisor and the status feed.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub camera_id: i64,
    pub camera_label: String,
    pub state: WorkerState,
    pub last_error: Option<String>,
    pub frames_processed: u64,
    pub events_detected: u64,
    pub started_at: Option<DateTime<Local>>,
    pub uptime_secs: Option<u64>,
    pub alive: bool,
}

/// Tunables the launcher may override (tests shorten the cadence).
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Run detection every Nth frame.
    pub detect_interval: u64,
    /// Buffer every Nth frame for clips.
    pub buffer_decimation: u64,
    /// Rolling window length in seconds.
    pub buffer_seconds: f64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            detect_interval: 4,
            buffer_decimation: 2,
            buffer_seconds: 30.0,
        }
    }
}

/// Everything a worker thread runs with.
pub struct WorkerParts {
    pub source: Box<dyn VideoSource>,
    pub detector: UnifiedDetector,
    pub sink: EventSink,
    pub settings: WorkerSettings,
}

/// Builds worker parts on the worker thread, where the slow and fallible
/// work (model load, stream open) belongs.
pub trait WorkerFactory: Send + Sync {
    fn build(&self, camera: &CameraConfig) -> Result<WorkerParts>;
}

pub struct WorkerHandle {
    camera: CameraConfig,
    shared: Arc<WorkerShared>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Validate the snapshot and spawn the worker thread.
    pub fn spawn(camera: CameraConfig, factory: Arc<dyn WorkerFactory>) -> Result<Self> {
        camera
            .validate()
            .map_err(|e| WorkerError::Config(format!("{e:#}")))?;

        let shared = Arc::new(WorkerShared::new());
        let thread_shared = shared.clone();
        let thread_camera = camera.clone();

        let thread = std::thread::Builder::new()
            .name(format!("camera-{}", camera.id))
            .spawn(move || {
                telemetry::metrics::WORKERS_RUNNING.inc();
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    run_worker(&thread_camera, &thread_shared, factory)
                }));
                match outcome {
                    Ok(Ok(())) => thread_shared.set_state(WorkerState::Stopped),
                    Ok(Err(e)) if WorkerError::is_interrupted(&e) => {
                        thread_shared.set_state(WorkerState::Stopped)
                    }
                    Ok(Err(e)) => {
                        error!(camera = thread_camera.id, error = %format!("{e:#}"), "worker failed");
                        thread_shared.set_error(format!("{e:#}"));
                        thread_shared.set_state(WorkerState::Error);
                    }
                    Err(_) => {
                        error!(camera = thread_camera.id, "worker panicked");
                        thread_shared.set_error("worker panicked");
                        thread_shared.set_state(WorkerState::Error);
                    }
                }
                telemetry::metrics::WORKERS_RUNNING.dec();
            })
            .map_err(|e| WorkerError::Config(format!("spawn worker thread: {e}")))?;

        Ok(Self {
            camera,
            shared,
            thread: Some(thread),
        })
    }

    pub fn camera(&self) -> &CameraConfig {
        &self.camera
    }

    pub fn shared(&self) -> Arc<WorkerShared> {
        self.shared.clone()
    }

    pub fn is_alive(&self) -> bool {
        self.thread
            .as_ref()
            .map_or(false, |thread| !thread.is_finished())
    }

    pub fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if matches!(
            self.shared.state(),
            WorkerState::Running | WorkerState::Reconnecting | WorkerState::Starting
        ) {
            self.shared.set_state(WorkerState::Stopping);
        }
    }

    /// Request a stop and wait up to `timeout`. Returns false when the
    /// thread had to be abandoned; its blocking operations all carry
    /// shorter timeouts, so it still exits on its own.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.request_stop();
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            if self
                .thread
                .as_ref()
                .map_or(true, |thread| thread.is_finished())
            {
                if let Some(thread) = self.thread.take() {
                    let _ = thread.join();
                }
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        warn!(camera = self.camera.id, "worker did not stop in time, abandoning thread");
        self.thread = None;
        false
    }

    pub fn status(&self) -> WorkerStatus {
        let started_at = self.shared.started_at();
        WorkerStatus {
            camera_id: self.camera.id,
            camera_label: self.camera.camera_id.clone(),
            state: self.shared.state(),
            last_error: self.shared.last_error(),
            frames_processed: self.shared.frames_processed.load(Ordering::Relaxed),
            events_detected: self.shared.events_detected.load(Ordering::Relaxed),
            started_at,
            uptime_secs: started_at.map(|t| {
                (Local::now() - t).num_seconds().max(0) as u64
            }),
            alive: self.is_alive(),
        }
    }

    pub fn frame(&self) -> Option<Frame> {
        self.shared.latest_frame()
    }
}

/// The worker loop proper. Runs on the dedicated thread.
fn run_worker(
    camera: &CameraConfig,
    shared: &WorkerShared,
    factory: Arc<dyn WorkerFactory>,
) -> Result<()> {
    let cpu_count = num_cpus::get().max(1);
    let assigned_core = camera.id as usize % cpu_count;
    info!(
        camera = camera.id,
        label = %camera.camera_id,
        assigned_core,
        "worker starting"
    );

    shared.set_state(WorkerState::Starting);
    shared.mark_started();

    let WorkerParts {
        mut source,
        mut detector,
        sink,
        settings,
    } = factory.build(camera)?;

    let fps = source.fps();
    let effective_fps = (fps / settings.buffer_decimation as f64).max(1.0);
    let capacity = (effective_fps * settings.buffer_seconds).ceil() as usize;
    let mut buffer = RollingBuffer::new(capacity, effective_fps);

    shared.set_state(WorkerState::Running);
    info!(camera = camera.id, fps, buffer_capacity = capacity, "detection loop started");

    let (width, height) = source.dimensions();
    let mut frame_count: u64 = 0;
    let mut reconnect_storm: u32 = 0;
    let mut inference_errors: VecDeque<u64> = VecDeque::new();
    let mut last_annotated: Option<Frame> = None;

    while !shared.stop_requested() {
        let buf = match source.try_read()? {
            Some(buf) => buf,
            None => {
                if source.should_reconnect() {
                    reconnect(camera, shared, source.as_mut(), &mut reconnect_storm)?;
                }
                continue;
            }
        };
        reconnect_storm = 0;

        frame_count += 1;
        shared.frames_processed.store(frame_count, Ordering::Relaxed);
        telemetry::metrics::FRAMES_PROCESSED
            .with_label_values(&[&camera.camera_id])
            .inc();

        let frame = Frame::from_bgr(buf, width, height, frame_count - 1);

        if frame_count % settings.buffer_decimation == 0 {
            let annotated = last_annotated.clone().unwrap_or_else(|| frame.clone());
            buffer.push(frame.clone(), annotated);
        }

        if frame_count % settings.detect_interval != 0 {
            continue;
        }

        let analysis = match detector.process(&frame) {
            Ok(analysis) => analysis,
            Err(e) => {
                // Single-frame inference failures are swallowed; a burst
                // inside the window escalates to fatal.
                inference_errors.push_back(frame_count);
                while inference_errors
                    .front()
                    .is_some_and(|&at| at + INFERENCE_ERROR_WINDOW < frame_count)
                {
                    inference_errors.pop_front();
                }
                warn!(camera = camera.id, frame = frame_count, error = %format!("{e:#}"), "inference failed, frame skipped");
                if inference_errors.len() > INFERENCE_ERROR_LIMIT {
                    return Err(WorkerError::Inference(format!(
                        "{} inference failures within {} frames",
                        inference_errors.len(),
                        INFERENCE_ERROR_WINDOW
                    ))
                    .into());
                }
                continue;
            }
        };

        last_annotated = Some(analysis.annotated.clone());
        shared.publish_frame(analysis.annotated);

        for detection in &analysis.detections {
            let snapshot = buffer.snapshot();
            match sink.persist(camera, detection, &snapshot, &shared.stop) {
                Ok(artifacts) => {
                    shared.events_detected.fetch_add(1, Ordering::Relaxed);
                    telemetry::metrics::EVENTS_DETECTED
                        .with_label_values(&[&camera.camera_id, detection.kind.as_str()])
                        .inc();
                    info!(
                        camera = camera.id,
                        event_type = %detection.kind,
                        clip = %artifacts.clip_path.display(),
                        "event recorded"
                    );
                }
                Err(e) if WorkerError::is_interrupted(&e) => return Err(e),
                Err(e) => {
                    // The detector cooldown is already armed, so a failing
                    // sink cannot produce a write storm.
                    telemetry::metrics::CLIP_WRITE_FAILURES.inc();
                    shared.set_error(format!("{e:#}"));
                    error!(camera = camera.id, error = %format!("{e:#}"), "event persistence failed");
                }
            }
        }
    }

    info!(camera = camera.id, frames = frame_count, "worker stopping");
    Ok(())
}

/// Reconnect loop with a bounded storm budget.
fn reconnect(
    camera: &CameraConfig,
    shared: &WorkerShared,
    source: &mut dyn VideoSource,
    storm: &mut u32,
) -> Result<()> {
    shared.set_state(WorkerState::Reconnecting);
    shared.set_error("stream lost, reconnecting");

    while !shared.stop_requested() {
        *storm += 1;
        if *storm > MAX_RECONNECT_STORM {
            return Err(WorkerError::StreamLost(format!(
                "gave up after {} reconnect attempts",
                MAX_RECONNECT_STORM
            ))
            .into());
        }

        telemetry::metrics::STREAM_RECONNECTS
            .with_label_values(&[&camera.camera_id])
            .inc();

        match source.reconnect() {
            Ok(true) => {
                shared.set_state(WorkerState::Running);
                info!(camera = camera.id, "stream recovered");
                return Ok(());
            }
            Ok(false) => {
                warn!(camera = camera.id, attempt = *storm, "reconnect attempt failed");
            }
            Err(e) => {
                warn!(camera = camera.id, attempt = *storm, error = %e, "reconnect attempt errored");
            }
        }
    }

    Err(WorkerError::Interrupted.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&WorkerState::Reconnecting).unwrap(),
            "\"reconnecting\""
        );
        assert_eq!(WorkerState::Error.as_str(), "error");
    }

    #[test]
    fn shared_counters_are_monotonic_snapshots() {
        let shared = WorkerShared::new();
        shared.frames_processed.store(10, Ordering::Relaxed);
        shared.events_detected.fetch_add(1, Ordering::Relaxed);
        assert_eq!(shared.frames_processed.load(Ordering::Relaxed), 10);
        assert_eq!(shared.events_detected.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn frame_slot_overwrites_and_copies() {
        let shared = WorkerShared::new();
        shared.publish_frame(Frame::filled(4, 4, [1, 1, 1], 0));
        shared.publish_frame(Frame::filled(4, 4, [2, 2, 2], 1));
        let latest = shared.latest_frame().unwrap();
        assert_eq!(latest.index, 1);
        // The slot still holds the frame after a read.
        assert!(shared.latest_frame().is_some());
    }

    #[test]
    fn error_messages_are_truncated() {
        let shared = WorkerShared::new();
        shared.set_error("x".repeat(500));
        assert_eq!(shared.last_error().unwrap().len(), 200);
    }
}
