//! Supervisor lifecycle: idempotent start/stop, restart, reaping.

use camera_node::sink::{EventSink, StubClipEncoder};
use camera_node::source::ScriptedSource;
use camera_node::store::EventStore;
use camera_node::supervisor::{ConfigProvider, Supervisor};
use camera_node::worker::{WorkerFactory, WorkerParts, WorkerSettings, WorkerState};
use camera_node::WorkerError;
use common::{CameraConfig, MediaLayout, NewEvent};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use vision::{StubObjectBackend, StubPoseBackend, UnifiedDetector};

struct NullStore;

#[async_trait::async_trait]
impl EventStore for NullStore {
    async fn record_event(&self, _event: NewEvent) -> anyhow::Result<i64> {
        Ok(1)
    }
}

fn camera(id: i64) -> CameraConfig {
    serde_yaml::from_str(&format!(
        r#"
id: {id}
camera_id: CAM-{id}
rtsp_url: rtsp://scripted/{id}
cashier_zone: {{ x: 0, y: 0, width: 100, height: 100 }}
"#
    ))
    .unwrap()
}

struct StaticProvider {
    cameras: Vec<CameraConfig>,
}

impl ConfigProvider for StaticProvider {
    fn camera(&self, id: i64) -> Option<CameraConfig> {
        self.cameras.iter().find(|c| c.id == id).cloned()
    }

    fn cameras(&self) -> Vec<CameraConfig> {
        self.cameras.clone()
    }
}

/// Builds endless scripted workers; configured ids fail at build time.
struct ScriptedFactory {
    media: Arc<tempfile::TempDir>,
    runtime: tokio::runtime::Handle,
    failing: HashSet<i64>,
}

impl WorkerFactory for ScriptedFactory {
    fn build(&self, camera: &CameraConfig) -> anyhow::Result<WorkerParts> {
        if self.failing.contains(&camera.id) {
            return Err(WorkerError::Config("fire model weights missing".into()).into());
        }
        let source = ScriptedSource::endless(64, 48, 15.0, [3, 3, 3]);
        let detector = UnifiedDetector::new(
            camera,
            Box::new(StubPoseBackend::empty()),
            Box::new(StubObjectBackend::empty()),
        );
        let sink = EventSink::new(
            MediaLayout::new(self.media.path()),
            Arc::new(NullStore),
            Box::new(StubClipEncoder { transcode_ok: true }),
            self.runtime.clone(),
        );
        Ok(WorkerParts {
            source: Box::new(source),
            detector,
            sink,
            settings: WorkerSettings::default(),
        })
    }
}

fn build_supervisor(camera_ids: &[i64], failing: &[i64]) -> Supervisor {
    let provider = StaticProvider {
        cameras: camera_ids.iter().map(|&id| camera(id)).collect(),
    };
    let factory = ScriptedFactory {
        media: Arc::new(tempfile::tempdir().unwrap()),
        runtime: tokio::runtime::Handle::current(),
        failing: failing.iter().copied().collect(),
    };
    Supervisor::new(Arc::new(provider), Arc::new(factory))
}

async fn wait_for_state(supervisor: &Supervisor, id: i64, state: WorkerState) {
    for _ in 0..2000 {
        if supervisor
            .status_for(id)
            .await
            .is_some_and(|s| s.state == state)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("camera {id} never reached {state}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_and_stop_are_idempotent() {
    let supervisor = build_supervisor(&[1], &[]);

    assert!(supervisor.start(1).await.unwrap());
    assert!(!supervisor.start(1).await.unwrap(), "second start is a no-op");
    wait_for_state(&supervisor, 1, WorkerState::Running).await;

    assert!(supervisor.stop(1).await.unwrap());
    assert!(!supervisor.stop(1).await.unwrap(), "second stop is a no-op");
    assert!(supervisor.status_for(1).await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_all_reports_unknown_and_status_lists_workers() {
    let supervisor = build_supervisor(&[1, 2], &[]);
    assert_eq!(supervisor.start_all().await, 2);

    wait_for_state(&supervisor, 1, WorkerState::Running).await;
    wait_for_state(&supervisor, 2, WorkerState::Running).await;

    let statuses = supervisor.status().await;
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].camera_id, 1);
    assert_eq!(statuses[1].camera_id, 2);
    assert!(statuses.iter().all(|s| s.alive));

    assert!(supervisor.start(99).await.is_err(), "unknown camera");

    supervisor.stop_all().await;
    assert!(supervisor.status().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_replaces_the_worker() {
    let supervisor = build_supervisor(&[1], &[]);
    assert!(supervisor.start(1).await.unwrap());
    wait_for_state(&supervisor, 1, WorkerState::Running).await;
    let first_started = supervisor.status_for(1).await.unwrap().started_at;

    supervisor.restart(1).await.unwrap();
    wait_for_state(&supervisor, 1, WorkerState::Running).await;
    let status = supervisor.status_for(1).await.unwrap();
    assert!(status.alive);
    assert!(status.started_at >= first_started);

    supervisor.stop_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dead_workers_are_reaped_and_restartable() {
    let supervisor = build_supervisor(&[1, 2], &[2]);

    assert!(supervisor.start(2).await.unwrap());
    wait_for_state(&supervisor, 2, WorkerState::Error).await;

    let status = supervisor.status_for(2).await.unwrap();
    assert!(!status.alive);
    assert!(status.last_error.unwrap().contains("fire model"));

    let reaped = supervisor.reap().await;
    assert_eq!(reaped, vec![2]);
    assert!(supervisor.status_for(2).await.is_none());

    // A reaped camera can be started again (and fails the same way).
    assert!(supervisor.start(2).await.unwrap());
    wait_for_state(&supervisor, 2, WorkerState::Error).await;
    supervisor.stop_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn frame_feed_serves_latest_annotated_frame() {
    let supervisor = build_supervisor(&[1], &[]);
    assert!(supervisor.start(1).await.unwrap());
    wait_for_state(&supervisor, 1, WorkerState::Running).await;

    // Detection runs every 4th frame; wait for a published frame.
    let mut frame = None;
    for _ in 0..2000 {
        frame = supervisor.frame(1).await;
        if frame.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let frame = frame.expect("no annotated frame published");
    assert_eq!((frame.width(), frame.height()), (64, 48));

    assert!(supervisor.frame(42).await.is_none());
    supervisor.stop_all().await;
}
