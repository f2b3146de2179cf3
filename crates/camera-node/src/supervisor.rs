//! Worker lifecycle supervisor.
//!
//! Holds the only mapping from camera id to worker handle; workers never
//! see the registry. Start and stop are idempotent, and a periodic reaper
//! tick drops handles whose thread is gone so a crashed worker can be
//! started again.

use crate::worker::{WorkerFactory, WorkerHandle, WorkerStatus, STOP_TIMEOUT};
use anyhow::{anyhow, Result};
use common::{CameraConfig, Frame};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Read-only view of the camera configuration store.
pub trait ConfigProvider: Send + Sync {
    fn camera(&self, id: i64) -> Option<CameraConfig>;
    fn cameras(&self) -> Vec<CameraConfig>;
}

pub struct Supervisor {
    workers: Mutex<HashMap<i64, WorkerHandle>>,
    provider: Arc<dyn ConfigProvider>,
    factory: Arc<dyn WorkerFactory>,
}

impl Supervisor {
    pub fn new(provider: Arc<dyn ConfigProvider>, factory: Arc<dyn WorkerFactory>) -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            provider,
            factory,
        }
    }

    /// Start one camera worker. Returns false when it is already running
    /// (a no-op); a dead handle under the same id is replaced.
    pub async fn start(&self, camera_id: i64) -> Result<bool> {
        let mut workers = self.workers.lock().await;
        if let Some(existing) = workers.get(&camera_id) {
            if existing.is_alive() {
                return Ok(false);
            }
            workers.remove(&camera_id);
        }

        let config = self
            .provider
            .camera(camera_id)
            .ok_or_else(|| anyhow!("camera {camera_id} is not configured"))?;

        let handle = WorkerHandle::spawn(config, self.factory.clone())?;
        workers.insert(camera_id, handle);
        info!(camera = camera_id, "worker started");
        Ok(true)
    }

    /// Stop one camera worker. Returns false when none was running.
    pub async fn stop(&self, camera_id: i64) -> Result<bool> {
        let handle = {
            let mut workers = self.workers.lock().await;
            workers.remove(&camera_id)
        };
        let Some(mut handle) = handle else {
            return Ok(false);
        };

        // Joining can take up to the stop timeout; do it off the runtime.
        let stopped =
            tokio::task::spawn_blocking(move || handle.stop(STOP_TIMEOUT)).await?;
        if !stopped {
            warn!(camera = camera_id, "worker abandoned after stop timeout");
        }
        info!(camera = camera_id, "worker stopped");
        Ok(true)
    }

    pub async fn restart(&self, camera_id: i64) -> Result<()> {
        self.stop(camera_id).await?;
        self.start(camera_id).await?;
        Ok(())
    }

    /// Start every configured camera; returns the number actually started.
    pub async fn start_all(&self) -> usize {
        let mut started = 0;
        for config in self.provider.cameras() {
            match self.start(config.id).await {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(camera = config.id, error = %format!("{e:#}"), "worker failed to start");
                }
            }
        }
        started
    }

    /// Stop every worker and return their final statuses.
    pub async fn stop_all(&self) -> Vec<WorkerStatus> {
        let ids: Vec<i64> = {
            let workers = self.workers.lock().await;
            workers.keys().copied().collect()
        };
        let mut final_statuses = Vec::new();
        for id in ids {
            if let Some(status) = self.status_for(id).await {
                final_statuses.push(status);
            }
            let _ = self.stop(id).await;
        }
        final_statuses
    }

    pub async fn status(&self) -> Vec<WorkerStatus> {
        let workers = self.workers.lock().await;
        let mut statuses: Vec<WorkerStatus> = workers.values().map(|w| w.status()).collect();
        statuses.sort_by_key(|s| s.camera_id);
        statuses
    }

    pub async fn status_for(&self, camera_id: i64) -> Option<WorkerStatus> {
        let workers = self.workers.lock().await;
        workers.get(&camera_id).map(|w| w.status())
    }

    /// Latest annotated frame for a camera, if its worker published one.
    pub async fn frame(&self, camera_id: i64) -> Option<Frame> {
        let workers = self.workers.lock().await;
        workers.get(&camera_id).and_then(|w| w.frame())
    }

    /// Drop handles whose worker thread is no longer alive. Returns the
    /// reaped camera ids.
    pub async fn reap(&self) -> Vec<i64> {
        let mut workers = self.workers.lock().await;
        let dead: Vec<i64> = workers
            .iter()
            .filter(|(_, handle)| !handle.is_alive())
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            if let Some(handle) = workers.remove(id) {
                warn!(
                    camera = id,
                    state = %handle.status().state,
                    "reaped dead worker"
                );
            }
        }
        dead
    }

    /// Periodic reaper tick.
    pub fn spawn_reaper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let supervisor = self;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                supervisor.reap().await;
            }
        })
    }
}
