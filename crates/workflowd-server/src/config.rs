// ABOUTME: Dispatcher configuration file: listen address, cluster id and dispatch tunables.
// ABOUTME: Looked up in ./config.toml then ~/.workflowd/config.toml, created with defaults if absent.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatcher::{CommandSpec, DispatchSettings};

/// File name looked up in the working directory and in ~/.workflowd.
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub server: ServerConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Listen address, e.g. "0.0.0.0:50051"
    pub port: String,
    pub cluster_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchConfig {
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,

    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,

    /// Command sent to every agent as soon as it connects
    #[serde(default = "default_initial_executable")]
    pub initial_executable: String,

    #[serde(default = "default_initial_args")]
    pub initial_args: Vec<String>,
}

fn default_command_buffer() -> usize {
    DispatchSettings::default().command_buffer
}

fn default_dispatch_timeout_ms() -> u64 {
    DispatchSettings::default().dispatch_timeout.as_millis() as u64
}

fn default_initial_executable() -> String {
    DispatchSettings::default().initial_command.executable
}

fn default_initial_args() -> Vec<String> {
    DispatchSettings::default().initial_command.args
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            command_buffer: default_command_buffer(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            initial_executable: default_initial_executable(),
            initial_args: default_initial_args(),
        }
    }
}

impl DispatchConfig {
    pub fn to_settings(&self) -> DispatchSettings {
        DispatchSettings {
            command_buffer: self.command_buffer.max(1),
            dispatch_timeout: Duration::from_millis(self.dispatch_timeout_ms),
            initial_command: CommandSpec::new(
                self.initial_executable.clone(),
                self.initial_args.clone(),
            ),
        }
    }
}

impl Config {
    /// Fresh config with a new random cluster id.
    pub fn generate() -> Self {
        Self {
            server: ServerConfig {
                port: "0.0.0.0:50051".to_string(),
                cluster_id: uuid::Uuid::new_v4().to_string(),
            },
            dispatch: DispatchConfig::default(),
        }
    }

    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Save config to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// ~/.workflowd/config.toml
    pub fn home_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".workflowd").join(CONFIG_FILE_NAME))
    }

    /// Resolve the config for this process.
    ///
    /// An explicit path must exist. Otherwise the working directory wins over
    /// the home directory, and when neither has a config a default one is
    /// written to the working directory.
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, PathBuf)> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        Self::resolve_in(explicit, &cwd, Self::home_path().as_deref())
    }

    pub fn resolve_in(
        explicit: Option<&Path>,
        cwd: &Path,
        home_config: Option<&Path>,
    ) -> Result<(Self, PathBuf)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, path.to_path_buf()));
        }

        let local = cwd.join(CONFIG_FILE_NAME);
        if local.is_file() {
            return Ok((Self::load(&local)?, local));
        }

        if let Some(home) = home_config.filter(|p| p.is_file()) {
            return Ok((Self::load(home)?, home.to_path_buf()));
        }

        let config = Self::generate();
        match config.save(&local) {
            Ok(()) => tracing::info!(path = %local.display(), "Created default config"),
            Err(e) => tracing::warn!(error = %e, "Could not write default config, using it in memory"),
        }
        Ok((config, local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_minimal_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [server]
            port = "127.0.0.1:6000"
            cluster_id = "cluster-a"
        "#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, "127.0.0.1:6000");
        assert_eq!(config.server.cluster_id, "cluster-a");
        assert_eq!(config.dispatch, DispatchConfig::default());
    }

    #[test]
    fn test_load_dispatch_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [server]
            port = "0.0.0.0:50051"
            cluster_id = "c"

            [dispatch]
            command_buffer = 2
            dispatch_timeout_ms = 250
            initial_executable = "echo"
            initial_args = ["hello"]
        "#
        )
        .unwrap();

        let settings = Config::load(file.path()).unwrap().dispatch.to_settings();
        assert_eq!(settings.command_buffer, 2);
        assert_eq!(settings.dispatch_timeout, Duration::from_millis(250));
        assert_eq!(
            settings.initial_command,
            CommandSpec::new("echo", vec!["hello".to_string()])
        );
    }

    #[test]
    fn test_missing_server_section_is_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[dispatch]\ncommand_buffer = 3").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let config = Config::generate();
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_generate_uses_fresh_cluster_ids() {
        let a = Config::generate();
        let b = Config::generate();
        assert_ne!(a.server.cluster_id, b.server.cluster_id);
        assert_eq!(a.server.port, "0.0.0.0:50051");
    }

    #[test]
    fn test_resolve_prefers_working_directory() {
        let cwd = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        let home_path = home.path().join(CONFIG_FILE_NAME);

        let mut local = Config::generate();
        local.server.cluster_id = "local".to_string();
        local.save(&cwd.path().join(CONFIG_FILE_NAME)).unwrap();
        let mut global = Config::generate();
        global.server.cluster_id = "home".to_string();
        global.save(&home_path).unwrap();

        let (config, path) = Config::resolve_in(None, cwd.path(), Some(&home_path)).unwrap();
        assert_eq!(config.server.cluster_id, "local");
        assert_eq!(path, cwd.path().join(CONFIG_FILE_NAME));
    }

    #[test]
    fn test_resolve_falls_back_to_home() {
        let cwd = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        let home_path = home.path().join(CONFIG_FILE_NAME);

        let mut global = Config::generate();
        global.server.cluster_id = "home".to_string();
        global.save(&home_path).unwrap();

        let (config, path) = Config::resolve_in(None, cwd.path(), Some(&home_path)).unwrap();
        assert_eq!(config.server.cluster_id, "home");
        assert_eq!(path, home_path);
    }

    #[test]
    fn test_resolve_creates_default_when_absent() {
        let cwd = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        let home_path = home.path().join(CONFIG_FILE_NAME);

        let (config, path) = Config::resolve_in(None, cwd.path(), Some(&home_path)).unwrap();
        assert_eq!(path, cwd.path().join(CONFIG_FILE_NAME));
        assert_eq!(Config::load(&path).unwrap(), config);
        assert!(!home_path.exists());
    }

    #[test]
    fn test_resolve_explicit_missing_is_error() {
        let cwd = tempfile::tempdir().unwrap();
        let missing = cwd.path().join("nope.toml");
        assert!(Config::resolve_in(Some(&missing), cwd.path(), None).is_err());
    }
}
