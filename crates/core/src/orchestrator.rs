//! Application Orchestrator
//!
//! Routes shell-level commands (open, close, pack, install) into the
//! registry/project layer and relays lifecycle notifications outward.
//! Holds its collaborators explicitly; there is no process-global
//! application accessor.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::Result;
use crate::events::{EventBus, EventSubscription, ProjectEvent};
use crate::project::Project;
use crate::registry::ProjectRegistry;

/// Injected confirmation for reopening an already-open project. Returning
/// `false` keeps the existing entry untouched.
pub type ConfirmReopen = Box<dyn Fn(&Path) -> bool + Send + Sync>;

pub struct Orchestrator {
    registry: Arc<ProjectRegistry>,
    bus: Arc<EventBus>,
    config: Arc<RwLock<AppConfig>>,
    confirm_reopen: ConfirmReopen,
    // Stops the recent-items relay; cancelled on shutdown and on drop so
    // the relay never outlives the orchestrator.
    relay_stop: CancellationToken,
}

impl Orchestrator {
    /// Build an orchestrator that always reopens without asking.
    pub fn new(config: AppConfig) -> Self {
        Self::with_confirmation(config, Box::new(|_| true))
    }

    pub fn with_confirmation(config: AppConfig, confirm_reopen: ConfirmReopen) -> Self {
        let bus = Arc::new(EventBus::new());
        let toolbox = Arc::new(config.toolbox());
        let registry = Arc::new(ProjectRegistry::new(
            toolbox,
            Arc::clone(&bus),
            config.working_root(),
        ));

        Self {
            registry,
            bus,
            config: Arc::new(RwLock::new(config)),
            confirm_reopen,
            relay_stop: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> Arc<ProjectRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Open an APK, unpacking immediately.
    ///
    /// An already-open path goes through the reopen confirmation: declined
    /// means the existing entry is returned unchanged (no new working
    /// directory, no notification); confirmed means close-then-reopen for
    /// a fresh copy.
    pub async fn open_source(&self, path: &Path) -> Result<Arc<Project>> {
        if let Some(existing) = self.registry.find(path) {
            if !(self.confirm_reopen)(existing.original_path()) {
                return Ok(existing);
            }
            self.registry.close(&existing).await;
        }
        self.registry.open(path, true)
    }

    /// Open a batch of paths delivered by a second application instance;
    /// a failure on one path does not abort the rest.
    pub async fn open_batch(&self, paths: &[PathBuf]) -> Vec<Result<Arc<Project>>> {
        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            let result = self.open_source(path).await;
            if let Err(err) = &result {
                warn!(path = %path.display(), %err, "failed to open");
            }
            results.push(result);
        }
        results
    }

    pub async fn close(&self, project: &Arc<Project>) -> bool {
        self.registry.close(project).await
    }

    pub fn pack(&self, project: &Arc<Project>) -> Result<()> {
        project.pack()
    }

    pub async fn install(&self, project: &Arc<Project>) -> Result<()> {
        project.install().await
    }

    pub fn mark_modified(&self, project: &Arc<Project>) {
        project.mark_modified();
    }

    /// Start the recent-items relay: unpacked/packed/installed projects are
    /// recorded (path + thumbnail) in the configuration's recent list. The
    /// task ends when the orchestrator shuts down or is dropped.
    pub fn spawn_recent_relay(&self) -> tokio::task::JoinHandle<()> {
        let subscription = self.bus.subscribe();
        let registry = Arc::clone(&self.registry);
        let config = Arc::clone(&self.config);
        let stop = self.relay_stop.clone();

        // The registry keeps the bus (and our sender) alive, so the channel
        // never disconnects on its own; the loop polls the stop token
        // between receives instead of blocking indefinitely.
        tokio::task::spawn_blocking(move || loop {
            if stop.is_cancelled() {
                break;
            }
            let event = match subscription.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            let id = match event {
                ProjectEvent::Unpacked { id, .. }
                | ProjectEvent::Packed { id, .. }
                | ProjectEvent::Installed { id, .. } => id,
                _ => continue,
            };
            if let Some(project) = registry.get(id) {
                config
                    .write()
                    .add_recent(project.original_path().to_path_buf(), project.thumbnail());
            }
        })
    }

    /// Persist configuration changes (recent list included).
    pub async fn save_config(&self) -> Result<()> {
        let snapshot = self.config.read().clone();
        snapshot.save().await
    }

    /// Close every project, persist configuration, and stop the relay.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.registry.close_all().await;
        if let Err(err) = self.save_config().await {
            warn!(%err, "failed to save configuration");
        }
        self.relay_stop.cancel();
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.relay_stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sandbox_config(dir: &Path) -> AppConfig {
        AppConfig {
            temp_root: Some(dir.join("work")),
            ..AppConfig::default()
        }
    }

    fn touch_apk(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"PK\x03\x04").unwrap();
        path
    }

    #[tokio::test]
    async fn declined_reopen_returns_existing_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let apk = touch_apk(dir.path(), "sample.apk");

        let asked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&asked);
        let orchestrator = Orchestrator::with_confirmation(
            sandbox_config(dir.path()),
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                false
            }),
        );

        // Tools are absent in the sandbox; the unpack attempt settles into
        // Errored, which is still "open" from the registry's point of view.
        // Wait for it to settle so the subscription below sees no stragglers.
        let first = orchestrator.open_source(&apk).await.unwrap();
        for _ in 0..500 {
            if first.status() == crate::project::Status::Errored {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let sub = orchestrator.subscribe();

        let second = orchestrator.open_source(&apk).await.unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(first.contents_dir(), second.contents_dir());
        assert_eq!(asked.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.registry().len(), 1);
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn confirmed_reopen_creates_a_fresh_project() {
        let dir = tempfile::tempdir().unwrap();
        let apk = touch_apk(dir.path(), "sample.apk");
        let orchestrator = Orchestrator::new(sandbox_config(dir.path()));

        let first = orchestrator.open_source(&apk).await.unwrap();
        let second = orchestrator.open_source(&apk).await.unwrap();

        assert_ne!(first.id(), second.id());
        assert_ne!(first.contents_dir(), second.contents_dir());
        assert_eq!(orchestrator.registry().len(), 1);
    }

    #[tokio::test]
    async fn recent_relay_stops_when_orchestrator_goes_away() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(sandbox_config(dir.path()));
        let relay = orchestrator.spawn_recent_relay();

        // The registry keeps the relay's channel connected, so only the
        // stop token can end the task; dropping the orchestrator fires it.
        drop(orchestrator);
        tokio::time::timeout(Duration::from_secs(5), relay)
            .await
            .expect("relay kept running after the orchestrator was dropped")
            .unwrap();
    }

    #[tokio::test]
    async fn batch_open_survives_bad_paths() {
        let dir = tempfile::tempdir().unwrap();
        let good_a = touch_apk(dir.path(), "a.apk");
        let good_b = touch_apk(dir.path(), "b.apk");
        let missing = dir.path().join("missing.apk");
        let orchestrator = Orchestrator::new(sandbox_config(dir.path()));

        let results = orchestrator
            .open_batch(&[good_a, missing, good_b])
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        assert_eq!(orchestrator.registry().len(), 2);
    }
}
