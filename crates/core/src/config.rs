//! Application Configuration
//!
//! Persistent settings: external tool locations, keystore identity, pack
//! pipeline options, the working-directory root, and the recent-items
//! list. Stored as TOML under the platform config directory.

use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use apkforge_device::AdbClient;
use apkforge_tools::{ApkSigner, Apktool, KeyStore, ZipAlign};

use crate::error::{ApkforgeError, Result};
use crate::project::{PackOptions, Toolbox};

/// External tool locations. Bare names resolve through PATH.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub java_path: PathBuf,
    pub apktool_jar: PathBuf,
    pub apksigner_path: PathBuf,
    pub zipalign_path: PathBuf,
    pub adb_path: PathBuf,
    /// Shared apktool framework resources, if any.
    pub frameworks_dir: Option<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            java_path: PathBuf::from("java"),
            apktool_jar: PathBuf::from("apktool.jar"),
            apksigner_path: PathBuf::from("apksigner"),
            zipalign_path: PathBuf::from("zipalign"),
            adb_path: PathBuf::from("adb"),
            frameworks_dir: None,
        }
    }
}

/// Keystore used for the sign stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreConfig {
    pub path: PathBuf,
    pub password: String,
    pub alias: String,
    pub key_password: Option<String>,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("debug.keystore"),
            password: "android".to_string(),
            alias: "androiddebugkey".to_string(),
            key_password: None,
        }
    }
}

/// Which pack sub-stages run after recompilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackConfig {
    pub sign: bool,
    pub align: bool,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            sign: true,
            align: true,
        }
    }
}

/// One recent-items entry: source path plus its last known thumbnail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecentEntry {
    pub path: PathBuf,
    pub thumbnail: Option<PathBuf>,
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration version for migrations
    pub version: u32,
    pub tools: ToolConfig,
    pub keystore: KeystoreConfig,
    pub pack: PackConfig,
    /// Root for per-project working directories; defaults to the OS temp
    /// directory when unset.
    pub temp_root: Option<PathBuf>,
    pub recent: Vec<RecentEntry>,
    pub max_recent: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: 1,
            tools: ToolConfig::default(),
            keystore: KeystoreConfig::default(),
            pack: PackConfig::default(),
            temp_root: None,
            recent: Vec::new(),
            max_recent: 10,
        }
    }
}

impl AppConfig {
    /// Get the configuration directory path.
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("org", "apkforge", "apkforge")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the configuration file path.
    pub fn config_file() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Load configuration from file, creating defaults when absent.
    pub async fn load() -> Result<Self> {
        let config_file = Self::config_file()
            .ok_or_else(|| ApkforgeError::Config("cannot determine config path".into()))?;

        if config_file.exists() {
            debug!("loading config from {:?}", config_file);
            let contents = tokio::fs::read_to_string(&config_file).await?;
            let config: AppConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            info!("config file not found, using defaults");
            let config = AppConfig::default();
            config.save().await?;
            Ok(config)
        }
    }

    /// Save configuration to file.
    pub async fn save(&self) -> Result<()> {
        let config_file = Self::config_file()
            .ok_or_else(|| ApkforgeError::Config("cannot determine config path".into()))?;

        if let Some(parent) = config_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = toml::to_string_pretty(self)?;
        tokio::fs::write(&config_file, contents).await?;

        debug!("config saved to {:?}", config_file);
        Ok(())
    }

    /// Root directory for per-project working directories.
    pub fn working_root(&self) -> PathBuf {
        self.temp_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(crate::APP_NAME))
    }

    /// Record a project in the recent list, newest first, deduplicated.
    pub fn add_recent(&mut self, path: PathBuf, thumbnail: Option<PathBuf>) {
        self.recent.retain(|entry| entry.path != path);
        self.recent.insert(0, RecentEntry { path, thumbnail });
        self.recent.truncate(self.max_recent);
    }

    /// Build the tool set the pipeline drives from these settings.
    pub fn toolbox(&self) -> Toolbox {
        let mut apktool = Apktool::new(&self.tools.java_path, &self.tools.apktool_jar);
        if let Some(dir) = &self.tools.frameworks_dir {
            apktool = apktool.with_frameworks(dir);
        }

        let mut keystore = KeyStore::new(
            self.keystore.path.clone(),
            &self.keystore.password,
            &self.keystore.alias,
        );
        keystore.key_password = self.keystore.key_password.clone();

        Toolbox {
            apktool,
            signer: ApkSigner::new(&self.tools.apksigner_path),
            keystore,
            zipalign: ZipAlign::new(&self.tools.zipalign_path),
            adb: AdbClient::new(&self.tools.adb_path),
            pack_options: PackOptions {
                sign: self.pack.sign,
                align: self.pack.align,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = AppConfig::default();
        assert_eq!(config.tools.java_path, PathBuf::from("java"));
        assert_eq!(config.keystore.alias, "androiddebugkey");
        assert!(config.pack.sign);
        assert_eq!(config.max_recent, 10);
    }

    #[test]
    fn recent_list_deduplicates_and_caps() {
        let mut config = AppConfig {
            max_recent: 3,
            ..AppConfig::default()
        };

        config.add_recent(PathBuf::from("/one.apk"), None);
        config.add_recent(PathBuf::from("/two.apk"), None);
        config.add_recent(PathBuf::from("/one.apk"), Some(PathBuf::from("/icon.png")));
        config.add_recent(PathBuf::from("/three.apk"), None);
        config.add_recent(PathBuf::from("/four.apk"), None);

        assert_eq!(config.recent.len(), 3);
        assert_eq!(config.recent[0].path, PathBuf::from("/four.apk"));
        assert_eq!(config.recent[1].path, PathBuf::from("/three.apk"));
        // Re-adding /one.apk moved it instead of duplicating it.
        assert_eq!(config.recent[2].path, PathBuf::from("/one.apk"));
        assert!(config.recent[2].thumbnail.is_some());
    }

    #[test]
    fn config_roundtrips_through_toml() {
        let mut config = AppConfig::default();
        config.add_recent(PathBuf::from("/sample.apk"), None);
        config.pack.align = false;

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.recent, config.recent);
        assert!(!parsed.pack.align);
    }
}
