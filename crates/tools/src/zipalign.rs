//! Zip Alignment
//!
//! Post-processes a packaged APK with `zipalign` so the platform loader can
//! mmap its entries.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::runner::{ToolOutput, ToolRunner};
use crate::ToolError;

/// `zipalign` wrapper.
#[derive(Debug, Clone)]
pub struct ZipAlign {
    runner: ToolRunner,
}

impl ZipAlign {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            runner: ToolRunner::new(executable),
        }
    }

    /// Align `input` into `output` on a 4-byte boundary.
    ///
    /// zipalign cannot rewrite in place, so callers align into a sibling
    /// file and rename over the original afterwards.
    pub async fn align(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        info!(input = %input.display(), output = %output.display(), "aligning");

        let args: Vec<OsString> = vec![
            "-f".into(),
            "-p".into(),
            "4".into(),
            input.as_os_str().to_owned(),
            output.as_os_str().to_owned(),
        ];
        self.runner.run(args, None, cancel).await
    }

    /// Verify alignment of an existing APK.
    pub async fn check(
        &self,
        apk: &Path,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let args: Vec<OsString> = vec!["-c".into(), "4".into(), apk.as_os_str().to_owned()];
        self.runner.run(args, None, cancel).await
    }
}
