//! Project Lifecycle
//!
//! A project is one opened APK driven through the packaging pipeline:
//! unpack (decode), pack (rebuild), sign, align, install. Each stage runs
//! an external tool on a worker task; per-project transitions are
//! serialized by the status guard, so the working directory is never
//! touched by a background process while the status reads Normal or
//! Errored.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use apkforge_device::AdbClient;
use apkforge_tools::{Apktool, ApkSigner, KeyStore, ToolError, ZipAlign};

use crate::error::{ApkforgeError, Result};
use crate::events::{EventBus, ProjectEvent};

/// Project status; exactly one is active at a time. Normal is both the
/// initial at-rest state and the terminal success state of every pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Normal,
    Unpacking,
    Packing,
    Signing,
    Optimizing,
    Installing,
    Errored,
}

/// One discrete external-tool-backed pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Unpack,
    Pack,
    Sign,
    Align,
    Install,
}

impl Stage {
    /// Status shown while this stage is running.
    pub fn status(self) -> Status {
        match self {
            Stage::Unpack => Status::Unpacking,
            Stage::Pack => Status::Packing,
            Stage::Sign => Status::Signing,
            Stage::Align => Status::Optimizing,
            Stage::Install => Status::Installing,
        }
    }
}

/// Error context kept while a project is Errored. The recorded stage
/// determines what a retry re-attempts.
#[derive(Debug, Clone)]
pub struct FailureContext {
    pub stage: Stage,
    pub message: String,
    pub exit_code: Option<i32>,
}

/// Which pack sub-stages run after recompilation.
#[derive(Debug, Clone, Copy)]
pub struct PackOptions {
    pub sign: bool,
    pub align: bool,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            sign: true,
            align: true,
        }
    }
}

/// External tools the pipeline drives, preconfigured from `AppConfig`.
pub struct Toolbox {
    pub apktool: Apktool,
    pub signer: ApkSigner,
    pub keystore: KeyStore,
    pub zipalign: ZipAlign,
    pub adb: AdbClient,
    pub pack_options: PackOptions,
}

#[derive(Debug)]
struct ProjectState {
    status: Status,
    modified: bool,
    unpacked: bool,
    failure: Option<FailureContext>,
    thumbnail: Option<PathBuf>,
    package_path: Option<PathBuf>,
}

/// One opened APK and its lifecycle state machine.
///
/// Owned by the `ProjectRegistry`; entry operations claim the matching
/// busy status under the state lock before spawning their worker task, so
/// a second stage cannot start until the previous completion has been
/// fully processed.
pub struct Project {
    id: Uuid,
    original_path: PathBuf,
    contents_dir: PathBuf,
    title: String,
    state: RwLock<ProjectState>,
    toolbox: Arc<Toolbox>,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
    // Active stage task; awaited on destroy so a cancelled run is fully
    // reaped before the working directory is removed.
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Project {
    pub(crate) fn new(
        id: Uuid,
        original_path: PathBuf,
        contents_dir: PathBuf,
        toolbox: Arc<Toolbox>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let title = original_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| original_path.display().to_string());

        Arc::new(Self {
            id,
            original_path,
            contents_dir,
            title,
            state: RwLock::new(ProjectState {
                status: Status::Normal,
                modified: false,
                unpacked: false,
                failure: None,
                thumbnail: None,
                package_path: None,
            }),
            toolbox,
            bus,
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The source APK path; immutable for the project's lifetime.
    pub fn original_path(&self) -> &Path {
        &self.original_path
    }

    /// The owned working directory backing the unpacked tree.
    pub fn contents_dir(&self) -> &Path {
        &self.contents_dir
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn status(&self) -> Status {
        self.state.read().status
    }

    pub fn is_modified(&self) -> bool {
        self.state.read().modified
    }

    pub fn is_unpacked(&self) -> bool {
        self.state.read().unpacked
    }

    /// Failure detail; present only while Errored.
    pub fn failure(&self) -> Option<FailureContext> {
        self.state.read().failure.clone()
    }

    /// Launcher icon inside the unpacked tree, refreshed on unpack/pack.
    pub fn thumbnail(&self) -> Option<PathBuf> {
        self.state.read().thumbnail.clone()
    }

    /// The signed/aligned artifact of the last successful pack.
    pub fn package_path(&self) -> Option<PathBuf> {
        self.state.read().package_path.clone()
    }

    /// Start decoding the source APK into the working directory.
    ///
    /// Valid from a freshly opened project or from Errored when the decode
    /// itself failed; fails with `AlreadyUnpacking` while a decode is in
    /// flight.
    pub fn unpack(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.write();
            match state.status {
                Status::Unpacking => return Err(ApkforgeError::AlreadyUnpacking),
                Status::Normal => {
                    if state.unpacked {
                        return Err(ApkforgeError::InvalidState("already unpacked".into()));
                    }
                }
                Status::Errored => {
                    let failed_stage = state.failure.as_ref().map(|f| f.stage);
                    if failed_stage != Some(Stage::Unpack) {
                        return Err(ApkforgeError::InvalidState(
                            "last failure was not in the unpack stage".into(),
                        ));
                    }
                }
                other => {
                    return Err(ApkforgeError::InvalidState(format!(
                        "cannot unpack while {other:?}"
                    )))
                }
            }
            state.status = Status::Unpacking;
            state.failure = None;
            self.emit_changed_locked(&state);
        }
        info!(project = %self.title, "unpacking");

        let project = Arc::clone(self);
        *self.worker.lock() = Some(tokio::spawn(async move {
            project.run_unpack().await;
        }));
        Ok(())
    }

    async fn run_unpack(self: Arc<Self>) {
        let result = self
            .toolbox
            .apktool
            .decode(&self.original_path, &self.contents_dir, &self.cancel)
            .await;

        // A cancelled run must not transition or notify.
        if self.cancel.is_cancelled() {
            return;
        }

        match result {
            Ok(_) => {
                let thumbnail = find_launcher_icon(&self.contents_dir);
                // Emitting under the state lock keeps the completion
                // notification atomic with the status write: nothing can
                // claim the next stage before observers heard about this one.
                {
                    let mut state = self.state.write();
                    state.status = Status::Normal;
                    state.modified = false;
                    state.unpacked = true;
                    state.thumbnail = thumbnail;
                    self.emit_changed_locked(&state);
                    self.bus.emit(ProjectEvent::Unpacked {
                        id: self.id,
                        path: self.original_path.clone(),
                    });
                }
                info!(project = %self.title, "unpacked");
            }
            Err(err) => self.fail(Stage::Unpack, err),
        }
    }

    /// Start the repack pipeline (pack, then sign/align per `PackOptions`).
    ///
    /// Valid from Normal with an existing working directory; from Errored
    /// it re-enters at the stage that failed rather than restarting the
    /// whole pipeline.
    pub fn pack(self: &Arc<Self>) -> Result<()> {
        let start = {
            let mut state = self.state.write();
            let start = match state.status {
                Status::Normal => Stage::Pack,
                Status::Errored => match state.failure.as_ref().map(|f| f.stage) {
                    Some(stage @ (Stage::Pack | Stage::Sign | Stage::Align)) => stage,
                    _ => {
                        return Err(ApkforgeError::InvalidState(
                            "last failure was not in the pack pipeline".into(),
                        ))
                    }
                },
                other => {
                    return Err(ApkforgeError::InvalidState(format!(
                        "cannot pack while {other:?}"
                    )))
                }
            };
            if !state.unpacked || !self.contents_dir.exists() {
                return Err(ApkforgeError::NotUnpacked);
            }
            state.status = start.status();
            state.failure = None;
            self.emit_changed_locked(&state);
            start
        };
        info!(project = %self.title, ?start, "packing");

        let project = Arc::clone(self);
        *self.worker.lock() = Some(tokio::spawn(async move {
            project.run_pack(start).await;
        }));
        Ok(())
    }

    async fn run_pack(self: Arc<Self>, start: Stage) {
        let options = self.toolbox.pack_options;
        let dist = self.contents_dir.join("dist");
        let artifact = dist.join(
            self.original_path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("package.apk")),
        );

        let mut stage = start;
        loop {
            // The entry operation already claimed and announced `start`.
            if stage != start {
                let mut state = self.state.write();
                state.status = stage.status();
                self.emit_changed_locked(&state);
            }

            let result = match stage {
                Stage::Pack => match tokio::fs::create_dir_all(&dist).await {
                    Ok(()) => {
                        self.toolbox
                            .apktool
                            .build(&self.contents_dir, &artifact, &self.cancel)
                            .await
                            .map(|_| ())
                    }
                    Err(err) => Err(ToolError::Io(err)),
                },
                Stage::Sign => self
                    .toolbox
                    .signer
                    .sign(&artifact, &self.toolbox.keystore, &self.cancel)
                    .await
                    .map(|_| ()),
                Stage::Align => {
                    let aligned = dist.join("aligned.apk.tmp");
                    match self
                        .toolbox
                        .zipalign
                        .align(&artifact, &aligned, &self.cancel)
                        .await
                    {
                        Ok(_) => tokio::fs::rename(&aligned, &artifact)
                            .await
                            .map_err(ToolError::Io),
                        Err(err) => Err(err),
                    }
                }
                Stage::Unpack | Stage::Install => unreachable!("not a pack stage"),
            };

            if self.cancel.is_cancelled() {
                return;
            }
            if let Err(err) = result {
                self.fail(stage, err);
                return;
            }

            stage = match next_pack_stage(stage, options) {
                Some(next) => next,
                None => break,
            };
        }

        let thumbnail = find_launcher_icon(&self.contents_dir);
        {
            let mut state = self.state.write();
            state.status = Status::Normal;
            state.modified = false;
            state.thumbnail = thumbnail;
            state.package_path = Some(artifact.clone());
            self.emit_changed_locked(&state);
            self.bus.emit(ProjectEvent::Packed {
                id: self.id,
                path: artifact.clone(),
            });
        }
        info!(project = %self.title, artifact = %artifact.display(), "packed");
    }

    /// Push the packaged artifact (or the original APK if never packed) to
    /// the first online device.
    ///
    /// Valid only from Normal; fails with `DeviceUnavailable` when no
    /// device responds. The install stage returns to Normal whether or not
    /// the device accepted the APK; failure detail travels in the `Changed`
    /// notification rather than the Errored state.
    pub async fn install(self: &Arc<Self>) -> Result<()> {
        if self.status() != Status::Normal {
            return Err(ApkforgeError::InvalidState(format!(
                "cannot install while {:?}",
                self.status()
            )));
        }

        let device = self.toolbox.adb.first_online_device(&self.cancel).await?;

        {
            let mut state = self.state.write();
            if state.status != Status::Normal {
                return Err(ApkforgeError::InvalidState(format!(
                    "cannot install while {:?}",
                    state.status
                )));
            }
            state.status = Status::Installing;
            self.emit_changed_locked(&state);
        }
        info!(project = %self.title, device = %device.label(), "installing");

        let project = Arc::clone(self);
        *self.worker.lock() = Some(tokio::spawn(async move {
            project.run_install(device.serial).await;
        }));
        Ok(())
    }

    async fn run_install(self: Arc<Self>, serial: String) {
        let apk = self
            .package_path()
            .unwrap_or_else(|| self.original_path.clone());

        let result = self.toolbox.adb.install(&serial, &apk, &self.cancel).await;

        if self.cancel.is_cancelled() {
            return;
        }

        {
            let mut state = self.state.write();
            state.status = Status::Normal;
            match &result {
                Ok(()) => {
                    self.emit_changed_locked(&state);
                    self.bus.emit(ProjectEvent::Installed {
                        id: self.id,
                        path: apk.clone(),
                    });
                }
                // Install failure returns to Normal; the detail travels in
                // the notification, not the Errored state.
                Err(err) => {
                    self.bus.emit(ProjectEvent::Changed {
                        id: self.id,
                        status: Status::Normal,
                        error: Some(err.to_string()),
                    });
                }
            }
        }
        match result {
            Ok(()) => info!(project = %self.title, "installed"),
            Err(err) => warn!(project = %self.title, %err, "install failed"),
        }
    }

    /// Record an external edit to the unpacked tree.
    ///
    /// No-op unless the project is at rest in Normal with an unpacked
    /// tree; otherwise sets the dirty flag and notifies observers.
    pub fn mark_modified(&self) {
        let mut state = self.state.write();
        if state.status != Status::Normal || !state.unpacked {
            return;
        }
        state.modified = true;
        self.emit_changed_locked(&state);
    }

    /// Tear down: cancel any in-flight stage and remove the owned working
    /// directory. Called by the registry on close.
    pub(crate) async fn destroy(&self) {
        self.cancel.cancel();
        // The cancelled worker reaps its child before finishing; only then
        // is the tree safe to remove.
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
        if self.contents_dir.exists() {
            if let Err(err) = tokio::fs::remove_dir_all(&self.contents_dir).await {
                warn!(
                    project = %self.title,
                    dir = %self.contents_dir.display(),
                    %err,
                    "failed to remove working directory"
                );
            }
        }
    }

    /// Emit `Changed` for the state the caller is holding the lock on, so
    /// the notification is atomic with the status write.
    fn emit_changed_locked(&self, state: &ProjectState) {
        self.bus.emit(ProjectEvent::Changed {
            id: self.id,
            status: state.status,
            error: state.failure.as_ref().map(|f| f.message.clone()),
        });
    }

    fn fail(&self, stage: Stage, err: ToolError) {
        let (message, exit_code) = match err {
            ToolError::Failed { exit_code, stderr } => (stderr, Some(exit_code)),
            other => (other.to_string(), None),
        };
        warn!(project = %self.title, ?stage, %message, "stage failed");
        let mut state = self.state.write();
        state.status = Status::Errored;
        state.failure = Some(FailureContext {
            stage,
            message,
            exit_code,
        });
        self.emit_changed_locked(&state);
    }

    #[cfg(test)]
    pub(crate) fn force_state_for_test(&self, status: Status, unpacked: bool) {
        let mut state = self.state.write();
        state.status = status;
        state.unpacked = unpacked;
    }
}

/// The stage following `stage` in the pack pipeline, honoring optional
/// sign/align sub-stages.
fn next_pack_stage(stage: Stage, options: PackOptions) -> Option<Stage> {
    match stage {
        Stage::Pack if options.sign => Some(Stage::Sign),
        Stage::Pack if options.align => Some(Stage::Align),
        Stage::Sign if options.align => Some(Stage::Align),
        _ => None,
    }
}

/// Locate the launcher icon inside an unpacked tree, preferring mipmap
/// densities over drawable fallbacks.
fn find_launcher_icon(contents: &Path) -> Option<PathBuf> {
    let res = contents.join("res");
    let mut fallback = None;

    for entry in WalkDir::new(res).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name != "ic_launcher.png" && name != "ic_launcher.webp" {
            continue;
        }
        let parent = entry
            .path()
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if parent.starts_with("mipmap") {
            return Some(entry.into_path());
        }
        fallback.get_or_insert_with(|| entry.into_path());
    }

    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn make_project(bus: &Arc<EventBus>) -> Arc<Project> {
        Project::new(
            Uuid::new_v4(),
            PathBuf::from("/tmp/sample.apk"),
            PathBuf::from("/tmp/does-not-exist/sample-contents"),
            bogus_toolbox(),
            Arc::clone(bus),
        )
    }

    #[test]
    fn next_stage_honors_options() {
        let all = PackOptions::default();
        assert_eq!(next_pack_stage(Stage::Pack, all), Some(Stage::Sign));
        assert_eq!(next_pack_stage(Stage::Sign, all), Some(Stage::Align));
        assert_eq!(next_pack_stage(Stage::Align, all), None);

        let unsigned = PackOptions {
            sign: false,
            align: true,
        };
        assert_eq!(next_pack_stage(Stage::Pack, unsigned), Some(Stage::Align));

        let bare = PackOptions {
            sign: false,
            align: false,
        };
        assert_eq!(next_pack_stage(Stage::Pack, bare), None);
    }

    #[test]
    fn mark_modified_is_noop_until_unpacked() {
        let bus = Arc::new(EventBus::new());
        let sub = bus.subscribe();
        let project = make_project(&bus);

        project.mark_modified();
        assert!(!project.is_modified());
        assert!(sub.try_recv().is_err());

        project.force_state_for_test(Status::Normal, true);
        project.mark_modified();
        assert!(project.is_modified());
        match sub.try_recv().unwrap() {
            ProjectEvent::Changed { status, .. } => assert_eq!(status, Status::Normal),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn mark_modified_is_noop_while_busy_or_errored() {
        let bus = Arc::new(EventBus::new());
        let project = make_project(&bus);

        for status in [
            Status::Unpacking,
            Status::Packing,
            Status::Signing,
            Status::Optimizing,
            Status::Installing,
            Status::Errored,
        ] {
            project.force_state_for_test(status, true);
            project.mark_modified();
            assert!(!project.is_modified(), "dirty flag set while {status:?}");
            assert_eq!(project.status(), status);
        }
    }

    #[tokio::test]
    async fn unpack_while_unpacking_is_rejected() {
        let bus = Arc::new(EventBus::new());
        let project = make_project(&bus);
        project.force_state_for_test(Status::Unpacking, false);

        let err = project.unpack().unwrap_err();
        assert!(matches!(err, ApkforgeError::AlreadyUnpacking));
    }

    #[tokio::test]
    async fn pack_requires_unpacked_tree() {
        let bus = Arc::new(EventBus::new());
        let project = make_project(&bus);

        let err = project.pack().unwrap_err();
        assert!(matches!(err, ApkforgeError::NotUnpacked));
    }

    #[tokio::test]
    async fn pack_from_unrelated_error_is_rejected() {
        let bus = Arc::new(EventBus::new());
        let project = make_project(&bus);
        project.force_state_for_test(Status::Errored, false);

        // Errored without a pack-pipeline failure context cannot retry pack.
        let err = project.pack().unwrap_err();
        assert!(matches!(err, ApkforgeError::InvalidState(_)));
    }

    #[tokio::test]
    async fn unpack_with_missing_tool_becomes_errored() {
        let bus = Arc::new(EventBus::new());
        let sub = bus.subscribe();
        let project = make_project(&bus);

        project.unpack().unwrap();
        assert_eq!(project.status(), Status::Unpacking);

        for _ in 0..200 {
            if project.status() == Status::Errored {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(project.status(), Status::Errored);

        let failure = project.failure().expect("failure context");
        assert_eq!(failure.stage, Stage::Unpack);
        assert!(failure.exit_code.is_none());

        // Exactly two Changed events: entering Unpacking, then Errored.
        let first = sub.try_recv().unwrap();
        let second = sub.try_recv().unwrap();
        assert!(matches!(
            first,
            ProjectEvent::Changed {
                status: Status::Unpacking,
                ..
            }
        ));
        assert!(matches!(
            second,
            ProjectEvent::Changed {
                status: Status::Errored,
                error: Some(_),
                ..
            }
        ));
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn install_requires_normal_status() {
        let bus = Arc::new(EventBus::new());
        let project = make_project(&bus);
        project.force_state_for_test(Status::Packing, true);

        let err = project.install().await.unwrap_err();
        assert!(matches!(err, ApkforgeError::InvalidState(_)));
    }

    #[tokio::test]
    async fn install_without_adb_reports_tool_not_found() {
        let bus = Arc::new(EventBus::new());
        let project = make_project(&bus);
        project.force_state_for_test(Status::Normal, true);

        let err = project.install().await.unwrap_err();
        assert!(matches!(err, ApkforgeError::ToolNotFound(_)));
        // The failed device probe must not leave the project busy.
        assert_eq!(project.status(), Status::Normal);
    }
}
