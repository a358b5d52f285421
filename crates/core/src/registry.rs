//! Project Registry
//!
//! The ordered collection of open projects. Entries are unique by
//! canonicalized source path; insertion order gives observers stable
//! positional addressing. Mutations are atomic with respect to their
//! Added/Removed notifications.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::events::{EventBus, ProjectEvent};
use crate::project::{Project, Toolbox};

pub struct ProjectRegistry {
    projects: RwLock<Vec<Arc<Project>>>,
    toolbox: Arc<Toolbox>,
    bus: Arc<EventBus>,
    temp_root: PathBuf,
}

impl ProjectRegistry {
    pub fn new(toolbox: Arc<Toolbox>, bus: Arc<EventBus>, temp_root: PathBuf) -> Self {
        Self {
            projects: RwLock::new(Vec::new()),
            toolbox,
            bus,
            temp_root,
        }
    }

    /// Open `path` as a project, optionally starting the unpack stage.
    ///
    /// An entry already open for the same canonical path is returned as-is
    /// (no duplicate, no notification); whether to close-and-reopen for a
    /// fresh copy is the caller's decision.
    pub fn open(&self, path: &Path, unpack: bool) -> Result<Arc<Project>> {
        let canonical = std::fs::canonicalize(path)?;

        let project = {
            let mut projects = self.projects.write();
            if let Some(existing) = projects
                .iter()
                .find(|p| p.original_path() == canonical)
            {
                return Ok(Arc::clone(existing));
            }

            let id = Uuid::new_v4();
            let contents_dir = self.contents_dir_for(&canonical, id);
            let project = Project::new(
                id,
                canonical,
                contents_dir,
                Arc::clone(&self.toolbox),
                Arc::clone(&self.bus),
            );

            let index = projects.len();
            projects.push(Arc::clone(&project));
            self.bus.emit(ProjectEvent::Added { id, index });
            project
        };

        info!(path = %project.original_path().display(), "project opened");

        if unpack {
            project.unpack()?;
        }
        Ok(project)
    }

    /// Close a project: remove it, cancel any in-flight stage, and release
    /// its working directory. Returns `false` when it was already closed.
    pub async fn close(&self, project: &Arc<Project>) -> bool {
        let removed = {
            let mut projects = self.projects.write();
            match projects.iter().position(|p| p.id() == project.id()) {
                Some(index) => {
                    let removed = projects.remove(index);
                    self.bus.emit(ProjectEvent::Removed { id: removed.id() });
                    Some(removed)
                }
                None => None,
            }
        };

        match removed {
            Some(project) => {
                info!(path = %project.original_path().display(), "project closed");
                project.destroy().await;
                true
            }
            None => false,
        }
    }

    /// Close every open project, releasing all working directories.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<Project>> = {
            let mut projects = self.projects.write();
            std::mem::take(&mut *projects)
        };
        for project in drained {
            self.bus.emit(ProjectEvent::Removed { id: project.id() });
            project.destroy().await;
        }
    }

    /// Lookup by canonicalized source path.
    pub fn find(&self, path: &Path) -> Option<Arc<Project>> {
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.projects
            .read()
            .iter()
            .find(|p| p.original_path() == canonical)
            .cloned()
    }

    /// Lookup by project identity.
    pub fn get(&self, id: Uuid) -> Option<Arc<Project>> {
        self.projects.read().iter().find(|p| p.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.projects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.read().is_empty()
    }

    /// Positional accessor for presentation-layer addressing.
    pub fn at(&self, index: usize) -> Option<Arc<Project>> {
        self.projects.read().get(index).cloned()
    }

    pub fn index_of(&self, project: &Arc<Project>) -> Option<usize> {
        self.projects
            .read()
            .iter()
            .position(|p| p.id() == project.id())
    }

    fn contents_dir_for(&self, source: &Path, id: Uuid) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string());
        // Same-named sources must not collide; the id prefix disambiguates.
        let short_id = &id.simple().to_string()[..8];
        self.temp_root.join(format!("{stem}-{short_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apkforge_device::AdbClient;
    use apkforge_tools::{ApkSigner, Apktool, KeyStore, ZipAlign};

    use crate::project::PackOptions;

    fn bogus_toolbox() -> Arc<Toolbox> {
        Arc::new(Toolbox {
            apktool: Apktool::new("/no/such/java", "/no/such/apktool.jar"),
            signer: ApkSigner::new("/no/such/apksigner"),
            keystore: KeyStore::debug(PathBuf::from("/no/such/debug.keystore")),
            zipalign: ZipAlign::new("/no/such/zipalign"),
            adb: AdbClient::new("/no/such/adb"),
            pack_options: PackOptions::default(),
        })
    }

    fn registry(temp_root: &Path) -> (ProjectRegistry, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let registry = ProjectRegistry::new(bogus_toolbox(), Arc::clone(&bus), temp_root.into());
        (registry, bus)
    }

    fn touch_apk(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"PK\x03\x04").unwrap();
        path
    }

    #[test]
    fn same_path_is_never_duplicated() {
        let dir = tempfile::tempdir().unwrap();
        let apk = touch_apk(dir.path(), "sample.apk");
        let (registry, bus) = registry(dir.path());
        let sub = bus.subscribe();

        let first = registry.open(&apk, false).unwrap();
        let second = registry.open(&apk, false).unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(registry.len(), 1);

        // Exactly one Added for the two opens.
        assert!(matches!(
            sub.try_recv().unwrap(),
            ProjectEvent::Added { index: 0, .. }
        ));
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn distinct_paths_keep_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch_apk(dir.path(), "a.apk");
        let b = touch_apk(dir.path(), "b.apk");
        let (registry, _bus) = registry(dir.path());

        let first = registry.open(&a, false).unwrap();
        let second = registry.open(&b, false).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.index_of(&first), Some(0));
        assert_eq!(registry.index_of(&second), Some(1));
        assert_eq!(registry.at(1).unwrap().id(), second.id());
    }

    #[test]
    fn same_named_sources_get_distinct_working_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let sub_a = dir.path().join("a");
        let sub_b = dir.path().join("b");
        std::fs::create_dir_all(&sub_a).unwrap();
        std::fs::create_dir_all(&sub_b).unwrap();
        let apk_a = touch_apk(&sub_a, "sample.apk");
        let apk_b = touch_apk(&sub_b, "sample.apk");
        let (registry, _bus) = registry(dir.path());

        let first = registry.open(&apk_a, false).unwrap();
        let second = registry.open(&apk_b, false).unwrap();
        assert_ne!(first.contents_dir(), second.contents_dir());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _bus) = registry(dir.path());
        assert!(registry.open(&dir.path().join("nope.apk"), false).is_err());
    }

    #[tokio::test]
    async fn close_removes_and_second_close_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let apk = touch_apk(dir.path(), "sample.apk");
        let (registry, bus) = registry(dir.path());

        let project = registry.open(&apk, false).unwrap();
        let sub = bus.subscribe();

        assert!(registry.close(&project).await);
        assert_eq!(registry.len(), 0);
        assert!(matches!(
            sub.try_recv().unwrap(),
            ProjectEvent::Removed { .. }
        ));

        assert!(!registry.close(&project).await);
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn reopen_after_close_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let apk = touch_apk(dir.path(), "sample.apk");
        let (registry, _bus) = registry(dir.path());

        let first = registry.open(&apk, false).unwrap();
        registry.close(&first).await;

        let second = registry.open(&apk, false).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn close_removes_owned_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let apk = touch_apk(dir.path(), "sample.apk");
        let (registry, _bus) = registry(dir.path());

        let project = registry.open(&apk, false).unwrap();
        let contents = project.contents_dir().to_path_buf();
        std::fs::create_dir_all(&contents).unwrap();

        registry.close(&project).await;
        assert!(!contents.exists());
    }
}
