//! End-to-end worker tests over scripted sources and stub backends.

use camera_node::sink::{EventSink, StubClipEncoder};
use camera_node::source::ScriptedSource;
use camera_node::store::{EventStore, SqliteEventStore};
use camera_node::worker::{WorkerFactory, WorkerHandle, WorkerParts, WorkerSettings, WorkerState};
use camera_node::WorkerError;
use common::{BoundingBox, CameraConfig, EventSidecar, MediaLayout, NewEvent};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vision::backend::{Keypoint, PoseResult, LEFT_HIP, LEFT_WRIST, RIGHT_HIP, RIGHT_WRIST};
use vision::{StubObjectBackend, StubPoseBackend, UnifiedDetector};

fn camera_yaml(extra: &str) -> CameraConfig {
    let base = r#"
id: 7
camera_id: CAM-E2E
name: Till one
rtsp_url: rtsp://scripted/stream
cashier_zone: { x: 400, y: 300, width: 400, height: 400 }
"#;
    serde_yaml::from_str(&format!("{base}{extra}")).unwrap()
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

struct NullStore;

#[async_trait::async_trait]
impl EventStore for NullStore {
    async fn record_event(&self, _event: NewEvent) -> anyhow::Result<i64> {
        Ok(1)
    }
}

/// One-shot factory: hands out prepared parts exactly once.
struct OneShotFactory {
    parts: Mutex<Option<WorkerParts>>,
}

impl OneShotFactory {
    fn new(parts: WorkerParts) -> Arc<Self> {
        Arc::new(Self {
            parts: Mutex::new(Some(parts)),
        })
    }
}

impl WorkerFactory for OneShotFactory {
    fn build(&self, _camera: &CameraConfig) -> anyhow::Result<WorkerParts> {
        self.parts
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow::anyhow!("factory already consumed"))
    }
}

struct FailingFactory;

impl WorkerFactory for FailingFactory {
    fn build(&self, _camera: &CameraConfig) -> anyhow::Result<WorkerParts> {
        Err(WorkerError::Config("pose model weights missing: models/pose.onnx".into()).into())
    }
}

fn test_settings() -> WorkerSettings {
    WorkerSettings {
        detect_interval: 1,
        buffer_decimation: 1,
        buffer_seconds: 5.0,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_outage_reconnects_without_spurious_frames() {
    let camera = camera_yaml("");
    let dir = tempfile::tempdir().unwrap();

    // 10 good reads, a 25-read outage, 10 more good reads, then dry.
    let mut reads: Vec<Option<[u8; 3]>> = Vec::new();
    reads.extend(std::iter::repeat(Some([9, 9, 9])).take(10));
    reads.extend(std::iter::repeat(None).take(25));
    reads.extend(std::iter::repeat(Some([9, 9, 9])).take(10));
    let source = ScriptedSource::new(64, 48, 15.0, reads)
        .with_delays(Duration::from_millis(2), Duration::from_millis(150));
    let reconnects = source.reconnect_counter();

    let detector = UnifiedDetector::new(
        &camera,
        Box::new(StubPoseBackend::empty()),
        Box::new(StubObjectBackend::empty()),
    );
    let sink = EventSink::new(
        MediaLayout::new(dir.path()),
        Arc::new(NullStore),
        Box::new(StubClipEncoder { transcode_ok: true }),
        tokio::runtime::Handle::current(),
    );
    let factory = OneShotFactory::new(WorkerParts {
        source: Box::new(source),
        detector,
        sink,
        settings: test_settings(),
    });

    let mut handle = WorkerHandle::spawn(camera, factory).unwrap();
    let shared = handle.shared();

    // Observe the worker until it has recovered and read all 20 frames.
    let mut seen_reconnecting_at: Option<u64> = None;
    let mut saw_running = false;
    for _ in 0..4000 {
        let state = shared.state();
        let frames = shared.frames_processed.load(Ordering::Relaxed);
        if state == WorkerState::Running {
            saw_running = true;
        }
        if state == WorkerState::Reconnecting && seen_reconnecting_at.is_none() {
            seen_reconnecting_at = Some(frames);
        }
        if frames >= 20 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert!(saw_running, "worker never reached running");
    // No frames arrive during the outage, so the counter froze at 10.
    assert_eq!(seen_reconnecting_at, Some(10));
    assert_eq!(shared.frames_processed.load(Ordering::Relaxed), 20);
    assert!(reconnects.load(Ordering::SeqCst) >= 1);
    assert_eq!(shared.events_detected.load(Ordering::Relaxed), 0);

    let stopped = tokio::task::spawn_blocking(move || handle.stop(Duration::from_secs(10)))
        .await
        .unwrap();
    assert!(stopped, "worker did not stop in time");
    assert_eq!(shared.state(), WorkerState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cash_events_flow_to_disk_and_store() {
    let camera = camera_yaml(
        r#"detect_violence: false
detect_fire: false
cash_confidence: 0.1
min_transaction_frames: 1
cash_cooldown_frames: 5
"#,
    );
    let media_dir = tempfile::tempdir().unwrap();
    let db_dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}/events.db", db_dir.path().display());
    let store = Arc::new(SqliteEventStore::connect(&url).await.unwrap());

    let reads: Vec<Option<[u8; 3]>> =
        std::iter::repeat(Some([9, 9, 9])).take(12).collect();
    let source = ScriptedSource::new(1280, 720, 15.0, reads);

    // A cashier inside the zone touching a customer outside it, on every
    // frame.
    let poses = vec![
        person((600.0, 500.0), (600.0, 450.0)),
        person((300.0, 500.0), (640.0, 452.0)),
    ];
    let detector = UnifiedDetector::new(
        &camera,
        Box::new(StubPoseBackend::constant(poses)),
        Box::new(StubObjectBackend::empty()),
    );
    let sink = EventSink::new(
        MediaLayout::new(media_dir.path()),
        store.clone(),
        Box::new(StubClipEncoder { transcode_ok: true }),
        tokio::runtime::Handle::current(),
    );
    let factory = OneShotFactory::new(WorkerParts {
        source: Box::new(source),
        detector,
        sink,
        settings: test_settings(),
    });

    let mut handle = WorkerHandle::spawn(camera, factory).unwrap();
    let shared = handle.shared();

    for _ in 0..4000 {
        if shared.frames_processed.load(Ordering::Relaxed) >= 12 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let stopped = tokio::task::spawn_blocking(move || handle.stop(Duration::from_secs(10)))
        .await
        .unwrap();
    assert!(stopped);

    // Frames 0, 5 and 10 pass the cooldown gate.
    assert_eq!(shared.events_detected.load(Ordering::Relaxed), 3);

    let events = store.events_for_camera("CAM-E2E").await.unwrap();
    assert_eq!(events.len(), 3);
    let frame_numbers: Vec<i64> = events.iter().map(|e| e.frame_number).collect();
    assert_eq!(frame_numbers, vec![0, 5, 10]);
    for event in &events {
        assert_eq!(event.event_type, "cash");
        assert_eq!(event.status, "pending");
        assert!(
            std::path::Path::new(&event.clip_path).exists(),
            "clip missing: {}",
            event.clip_path
        );
        assert!(std::path::Path::new(&event.thumbnail_path).exists());
    }

    // Sidecars parse and carry the cash metadata contract. Events within
    // the same wall-clock second share a base name, so there may be fewer
    // files than events.
    let json_dir = media_dir.path().join("json");
    let mut sidecars = 0;
    for entry in std::fs::read_dir(&json_dir).unwrap() {
        let text = std::fs::read_to_string(entry.unwrap().path()).unwrap();
        let sidecar: EventSidecar = serde_json::from_str(&text).unwrap();
        assert_eq!(sidecar.camera_id, "CAM-E2E");
        assert!(sidecar.detector.contains_key("cashier"));
        assert!(sidecar.detector.contains_key("customer"));
        assert!(sidecar.detector.contains_key("measured_hand_distance"));
        sidecars += 1;
    }
    assert!(sidecars >= 1);

    // Live-view slot holds the annotated frame.
    assert!(shared.latest_frame().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn build_failure_leaves_worker_in_error_state() {
    let camera = camera_yaml("");
    let handle = WorkerHandle::spawn(camera, Arc::new(FailingFactory)).unwrap();
    let shared = handle.shared();

    for _ in 0..1000 {
        if !handle.is_alive() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert!(!handle.is_alive());
    assert_eq!(shared.state(), WorkerState::Error);
    let message = shared.last_error().unwrap();
    assert!(message.contains("pose model weights missing"));

    let status = handle.status();
    assert_eq!(status.state, WorkerState::Error);
    assert!(!status.alive);
    assert_eq!(status.frames_processed, 0);
}
