//! apkforge - APK packaging workbench
//!
//! Shell entry point: initializes logging and configuration, then drives
//! the project orchestration core with the APK paths given on the command
//! line, draining lifecycle events until every project is at rest.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use apkforge_core::{AppConfig, Orchestrator, Status};

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("failed to set tracing subscriber");

    info!("{} v{} starting", apkforge::APP_NAME, apkforge::VERSION);

    let config = match AppConfig::load().await {
        Ok(config) => config,
        Err(err) => {
            warn!(%err, "could not load configuration, using defaults");
            AppConfig::default()
        }
    };
    tokio::fs::create_dir_all(config.working_root()).await?;

    let orchestrator = Orchestrator::new(config);
    let relay = orchestrator.spawn_recent_relay();
    let events = orchestrator.subscribe();

    let paths: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        info!("no APKs given; nothing to do");
        orchestrator.shutdown().await;
        let _ = relay.await;
        return Ok(());
    }

    orchestrator.open_batch(&paths).await;

    // Wait for every open project to come to rest, logging events as they
    // arrive.
    loop {
        while let Ok(event) = events.try_recv() {
            info!(?event, "lifecycle");
        }

        let registry = orchestrator.registry();
        let busy = (0..registry.len())
            .filter_map(|index| registry.at(index))
            .any(|project| !matches!(project.status(), Status::Normal | Status::Errored));
        if !busy {
            break;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let registry = orchestrator.registry();
    for index in 0..registry.len() {
        if let Some(project) = registry.at(index) {
            match project.failure() {
                Some(failure) => warn!(
                    project = project.title(),
                    stage = ?failure.stage,
                    message = %failure.message,
                    "finished with error"
                ),
                None => info!(project = project.title(), "finished"),
            }
        }
    }

    // Shutdown stops the relay; wait for it so the runtime can wind down.
    orchestrator.shutdown().await;
    let _ = relay.await;
    Ok(())
}
