//! Apktool Wrapper
//!
//! Decodes APKs into an editable tree and rebuilds them, running the
//! apktool jar through a configured Java runtime.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::runner::{ToolOutput, ToolRunner};
use crate::ToolError;

/// Drives `java -jar apktool.jar`.
#[derive(Debug, Clone)]
pub struct Apktool {
    java: ToolRunner,
    jar_path: PathBuf,
    frameworks_dir: Option<PathBuf>,
}

impl Apktool {
    pub fn new(java: impl Into<PathBuf>, jar_path: impl Into<PathBuf>) -> Self {
        Self {
            java: ToolRunner::new(java),
            jar_path: jar_path.into(),
            frameworks_dir: None,
        }
    }

    /// Use a shared framework resource directory across invocations.
    pub fn with_frameworks(mut self, dir: impl Into<PathBuf>) -> Self {
        self.frameworks_dir = Some(dir.into());
        self
    }

    pub fn jar_path(&self) -> &Path {
        &self.jar_path
    }

    fn base_args(&self) -> Vec<OsString> {
        vec!["-jar".into(), self.jar_path.clone().into_os_string()]
    }

    fn push_frameworks(&self, args: &mut Vec<OsString>) {
        if let Some(dir) = &self.frameworks_dir {
            args.push("-p".into());
            args.push(dir.clone().into_os_string());
        }
    }

    /// Decode `apk` into `out_dir`, replacing any stale tree.
    pub async fn decode(
        &self,
        apk: &Path,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        info!(apk = %apk.display(), out = %out_dir.display(), "apktool decode");

        let mut args = self.base_args();
        args.push("d".into());
        args.push("-f".into());
        self.push_frameworks(&mut args);
        args.push("-o".into());
        args.push(out_dir.as_os_str().to_owned());
        args.push(apk.as_os_str().to_owned());

        self.java.run(args, None, cancel).await
    }

    /// Rebuild a decoded tree into `out_apk` (unsigned).
    pub async fn build(
        &self,
        contents: &Path,
        out_apk: &Path,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        info!(contents = %contents.display(), out = %out_apk.display(), "apktool build");

        let mut args = self.base_args();
        args.push("b".into());
        self.push_frameworks(&mut args);
        args.push(contents.as_os_str().to_owned());
        args.push("-o".into());
        args.push(out_apk.as_os_str().to_owned());

        self.java.run(args, None, cancel).await
    }
}
