use anyhow::Result;
use camera_node::factory::ProductionWorkerFactory;
use camera_node::store::SqliteEventStore;
use camera_node::{NodeConfig, Supervisor, WorkerState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_with_service("camera-node");

    let config = NodeConfig::from_env()?;
    config.validate()?;
    info!(
        cameras = config.cameras.len(),
        media_root = %config.media_root.display(),
        "node configuration loaded"
    );

    let store = Arc::new(SqliteEventStore::connect(&config.database_url).await?);
    let factory = Arc::new(ProductionWorkerFactory::new(
        &config,
        store,
        tokio::runtime::Handle::current(),
    ));

    let supervisor = Arc::new(Supervisor::new(Arc::new(config), factory));
    let started = supervisor.start_all().await;
    info!(started, "camera workers started");

    let reaper = supervisor.clone().spawn_reaper(Duration::from_secs(5));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    reaper.abort();
    let final_statuses = supervisor.stop_all().await;

    let mut failed = false;
    for status in final_statuses {
        if status.state == WorkerState::Error {
            failed = true;
            error!(
                camera = status.camera_id,
                error = ?status.last_error,
                "worker ended in error state"
            );
        }
    }
    if failed {
        std::process::exit(1);
    }
    Ok(())
}
