//! APK Signing
//!
//! Signs packaged APKs in place with `apksigner` and a keystore.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::runner::{ToolOutput, ToolRunner};
use crate::ToolError;

/// Keystore reference used for signing.
#[derive(Debug, Clone)]
pub struct KeyStore {
    /// Path to the keystore file
    pub path: PathBuf,
    /// Keystore password
    pub password: String,
    /// Key alias
    pub alias: String,
    /// Key password (if different from the keystore password)
    pub key_password: Option<String>,
}

impl KeyStore {
    pub fn new(path: PathBuf, password: &str, alias: &str) -> Self {
        Self {
            path,
            password: password.to_string(),
            alias: alias.to_string(),
            key_password: None,
        }
    }

    /// The well-known Android debug keystore identity.
    pub fn debug(path: PathBuf) -> Self {
        Self::new(path, "android", "androiddebugkey")
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

/// `apksigner` wrapper.
#[derive(Debug, Clone)]
pub struct ApkSigner {
    runner: ToolRunner,
}

impl ApkSigner {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            runner: ToolRunner::new(executable),
        }
    }

    /// Sign `apk` in place.
    pub async fn sign(
        &self,
        apk: &Path,
        keystore: &KeyStore,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        info!(apk = %apk.display(), keystore = %keystore.path.display(), "signing");

        let mut args: Vec<OsString> = vec![
            "sign".into(),
            "--ks".into(),
            keystore.path.clone().into_os_string(),
            "--ks-pass".into(),
            format!("pass:{}", keystore.password).into(),
            "--ks-key-alias".into(),
            keystore.alias.clone().into(),
        ];
        if let Some(key_password) = &keystore.key_password {
            args.push("--key-pass".into());
            args.push(format!("pass:{key_password}").into());
        }
        args.push(apk.as_os_str().to_owned());

        self.runner.run(args, None, cancel).await
    }

    /// Check an existing signature without modifying the APK.
    pub async fn verify(
        &self,
        apk: &Path,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let args: Vec<OsString> = vec!["verify".into(), apk.as_os_str().to_owned()];
        self.runner.run(args, None, cancel).await
    }
}
