//! Configuration management
//!
//! Handles:
//! - node search settings (device dir, pattern, udev anchor, lspci filter)
//! - remote host credentials, password kept in the OS keyring
//! - TOML storage under the user config directory

use crate::error::{Result, ScanError};
use crate::gateway::RemoteLogin;
use crate::nodes::{NodeSearch, DEFAULT_BUS_FILTER};
use crate::pcie::DEFAULT_ANCHOR;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const KEYRING_SERVICE: &str = "nvme-scan";
const CONFIG_ENV: &str = "NVME_SCAN_CONFIG";
const PASSWORD_ENV: &str = "NVME_SCAN_PASSWORD";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub scan: ScanSettings,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub dev_dir: String,
    pub node_pattern: String,
    pub bus_filter: String,
    pub anchor: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub server_ip: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user_name: Option<String>,
    #[serde(default)]
    pub store_credentials: bool,
    #[serde(skip)] // Never serialize passwords
    pub cached_password: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            dev_dir: "/dev".to_string(),
            node_pattern: "nvme*".to_string(),
            bus_filter: DEFAULT_BUS_FILTER.to_string(),
            anchor: DEFAULT_ANCHOR.to_string(),
        }
    }
}

impl ScanSettings {
    pub fn node_search(&self) -> NodeSearch {
        NodeSearch {
            dev_dir: self.dev_dir.clone(),
            pattern: self.node_pattern.clone(),
            anchor: self.anchor.clone(),
        }
    }
}

impl RemoteConfig {
    /// Complete login, or the first missing credential
    pub fn login(&self) -> Result<RemoteLogin> {
        let server_ip = self
            .server_ip
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(ScanError::Credentials("server_ip"))?;
        let user_name = self
            .user_name
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(ScanError::Credentials("user_name"))?;
        let user_pwd = self
            .cached_password
            .clone()
            .ok_or(ScanError::Credentials("user_pwd"))?;

        Ok(RemoteLogin {
            server_ip,
            port: self.port,
            user_name,
            user_pwd,
        })
    }

    /// Label used for snapshots even when the login is incomplete
    pub fn host_label(&self) -> String {
        self.server_ip.clone().unwrap_or_else(|| "remote".to_string())
    }

    fn keyring_entry(&self) -> Result<Entry> {
        let user = format!(
            "{}@{}",
            self.user_name.as_deref().unwrap_or_default(),
            self.server_ip.as_deref().unwrap_or_default()
        );
        Ok(Entry::new(KEYRING_SERVICE, &user)?)
    }

    /// Load password from secure OS keyring
    fn load_password(&self) -> Result<String> {
        Ok(self.keyring_entry()?.get_password()?)
    }

    /// Save password to secure OS keyring
    fn save_password(&self, password: &str) -> Result<()> {
        Ok(self.keyring_entry()?.set_password(password)?)
    }

    /// Delete password from keyring
    pub fn delete_password(&self) -> Result<()> {
        Ok(self.keyring_entry()?.delete_credential()?)
    }
}

impl RemoteLogin {
    /// `ScanError::Credentials` names the first missing piece
    pub fn from_config(remote: &RemoteConfig) -> Result<Self> {
        remote.login()
    }
}

impl ScanConfig {
    /// Path from `NVME_SCAN_CONFIG`, else the OS config directory
    pub fn config_file_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        let mut path = dirs::config_dir().ok_or_else(|| {
            ScanError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not find config directory",
            ))
        })?;
        path.push("nvme-scan");
        path.push("config.toml");
        Ok(path)
    }

    /// Load from `path`; a missing file yields defaults
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path).await?;
        let mut config: ScanConfig = toml::from_str(&content)?;

        if let Some(remote) = config.remote.as_mut() {
            remote.cached_password = match std::env::var(PASSWORD_ENV) {
                Ok(password) => Some(password),
                Err(_) if remote.store_credentials => remote.load_password().ok(),
                Err(_) => None,
            };
        }
        Ok(config)
    }

    /// `explicit` when given, else the default location
    pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
        match explicit {
            Some(p) => Ok(p.to_path_buf()),
            None => Self::config_file_path(),
        }
    }

    /// Configuration problems are never fatal: report and use defaults
    pub async fn load_or_default(path: Option<&Path>) -> Self {
        let path = match Self::resolve_path(path) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("ERR: {}, using default configuration", e);
                return Self::default();
            }
        };
        match Self::load_from(&path).await {
            Ok(config) => config,
            Err(e) => {
                eprintln!("ERR: invalid config {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config (without the password) to `path`
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;

        if let Some(remote) = &self.remote {
            if remote.store_credentials {
                if let Some(password) = &remote.cached_password {
                    remote.save_password(password)?;
                }
            }
        }
        Ok(())
    }

    /// Remove the stored password of the configured remote host.
    /// `Ok(false)` when no remote host is configured.
    pub fn forget_password(&self) -> Result<bool> {
        match &self.remote {
            Some(remote) => {
                remote.delete_password()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ScanConfig::default();
        assert_eq!(config.scan.dev_dir, "/dev");
        assert_eq!(config.scan.bus_filter, "Non-");
        assert!(config.remote.is_none());
        assert_eq!(config.scan.node_search(), NodeSearch::default());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ScanConfig = toml::from_str(
            r#"
            [scan]
            dev_dir = "/mnt/dev"

            [remote]
            server_ip = "10.0.0.7"
            user_name = "lab"
            "#,
        )
        .unwrap();
        assert_eq!(config.scan.dev_dir, "/mnt/dev");
        assert_eq!(config.scan.node_pattern, "nvme*");
        let remote = config.remote.unwrap();
        assert_eq!(remote.port, 22);
        assert!(!remote.store_credentials);
    }

    #[test]
    fn test_incomplete_credentials() {
        let mut remote = RemoteConfig {
            server_ip: Some("10.0.0.7".into()),
            port: 22,
            user_name: None,
            store_credentials: false,
            cached_password: Some("pw".into()),
        };
        assert!(matches!(remote.login(), Err(ScanError::Credentials("user_name"))));

        remote.user_name = Some("lab".into());
        remote.cached_password = None;
        assert!(matches!(remote.login(), Err(ScanError::Credentials("user_pwd"))));

        remote.cached_password = Some("pw".into());
        let login = remote.login().unwrap();
        assert_eq!(login.server_ip, "10.0.0.7");
        assert_eq!(login.user_pwd, "pw");
    }

    #[test]
    fn test_password_is_never_serialized() {
        let config = ScanConfig {
            scan: ScanSettings::default(),
            remote: Some(RemoteConfig {
                server_ip: Some("10.0.0.7".into()),
                port: 2222,
                user_name: Some("lab".into()),
                store_credentials: false,
                cached_password: Some("secret".into()),
            }),
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(!text.contains("secret"));
        assert!(text.contains("2222"));
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults_and_invalid_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ScanConfig::load_from(&dir.path().join("none.toml")).await.unwrap();
        assert_eq!(missing, ScanConfig::default());

        let invalid = dir.path().join("bad.toml");
        std::fs::write(&invalid, "[scan\ndev_dir = ").unwrap();
        assert!(matches!(ScanConfig::load_from(&invalid).await, Err(ScanError::Toml(_))));
        assert_eq!(ScanConfig::load_or_default(Some(&invalid)).await, ScanConfig::default());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        let mut config = ScanConfig::default();
        config.scan.bus_filter = "Non-Volatile".into();

        config.save_to(&path).await.unwrap();
        let reloaded = ScanConfig::load_from(&path).await.unwrap();
        assert_eq!(reloaded.scan.bus_filter, "Non-Volatile");
    }

    #[test]
    fn test_explicit_config_path_wins() {
        let path = ScanConfig::resolve_path(Some(Path::new("/etc/nvme-scan.toml"))).unwrap();
        assert_eq!(path, PathBuf::from("/etc/nvme-scan.toml"));
    }

    #[test]
    fn test_forget_password_without_remote_is_a_no_op() {
        assert!(!ScanConfig::default().forget_password().unwrap());
    }

    #[tokio::test]
    async fn test_saved_remote_section_reloads_without_password() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = ScanConfig {
            remote: Some(RemoteConfig {
                server_ip: Some("10.0.0.7".into()),
                port: 2222,
                user_name: Some("lab".into()),
                store_credentials: false,
                cached_password: Some("secret".into()),
            }),
            ..Default::default()
        };

        config.save_to(&path).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("secret"));

        let reloaded = ScanConfig::load_from(&path).await.unwrap();
        let remote = reloaded.remote.unwrap();
        assert_eq!(remote.port, 2222);
        assert_eq!(remote.user_name.as_deref(), Some("lab"));
    }
}
