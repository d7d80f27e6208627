use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SyncError;

pub const POLL_INTERVAL_ENV: &str = "LOGSYNC_POLL_INTERVAL_MS";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub view: ViewConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            enabled: default_true(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewConfig {
    #[serde(default = "default_title_suffix")]
    pub title_suffix: String,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            title_suffix: default_title_suffix(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll.interval_ms)
    }

    #[must_use]
    pub const fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.channel.initial_backoff_ms)
    }

    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.channel.max_backoff_ms)
    }

    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for a zero poll interval or an initial
    /// backoff above the maximum.
    pub fn validate(&self, origin: &Path) -> Result<(), SyncError> {
        let invalid = |reason: String| SyncError::Config {
            path: origin.to_path_buf(),
            reason,
        };
        if self.poll.interval_ms == 0 {
            return Err(invalid("poll.interval_ms must be greater than zero".into()));
        }
        if self.channel.initial_backoff_ms > self.channel.max_backoff_ms {
            return Err(invalid(format!(
                "channel.initial_backoff_ms ({}) exceeds channel.max_backoff_ms ({})",
                self.channel.initial_backoff_ms, self.channel.max_backoff_ms
            )));
        }
        Ok(())
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] when an override is not a valid number.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), SyncError> {
        if let Some(raw) = lookup(POLL_INTERVAL_ENV) {
            self.poll.interval_ms = raw.trim().parse().map_err(|e| SyncError::Config {
                path: PathBuf::from(format!("${POLL_INTERVAL_ENV}")),
                reason: format!("'{raw}' is not a millisecond count: {e}"),
            })?;
        }
        Ok(())
    }
}

/// Path of the project config file under `project_root`.
#[must_use]
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".logsync/config.toml")
}

/// Path of the per-user config file, when the platform has a config dir.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("logsync/config.toml"))
}

/// # Errors
///
/// Returns [`SyncError::Config`] if the file exists but cannot be read or
/// parsed.
pub fn load_project_config(project_root: &Path) -> Result<SyncConfig, SyncError> {
    load_file(&project_config_path(project_root))
}

/// # Errors
///
/// Returns [`SyncError::Config`] if the file exists but cannot be read or
/// parsed.
pub fn load_user_config() -> Result<SyncConfig, SyncError> {
    user_config_path().map_or_else(|| Ok(SyncConfig::default()), |path| load_file(&path))
}

/// User config, overlaid by project config, overlaid by environment.
///
/// Keys set in the project file win over the user file; keys absent from
/// both keep their defaults.
///
/// # Errors
///
/// Returns [`SyncError::Config`] for unreadable files, parse failures, bad
/// overrides, or a configuration that fails [`SyncConfig::validate`].
pub fn resolve_config(project_root: &Path) -> Result<SyncConfig, SyncError> {
    let project_path = project_config_path(project_root);
    let mut merged = toml::Table::new();
    if let Some(user_path) = user_config_path() {
        overlay(&mut merged, read_table(&user_path)?);
    }
    overlay(&mut merged, read_table(&project_path)?);

    let mut config: SyncConfig =
        toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| SyncError::Config {
                path: project_path.clone(),
                reason: e.to_string(),
            })?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate(&project_path)?;
    Ok(config)
}

fn load_file(path: &Path) -> Result<SyncConfig, SyncError> {
    if !path.exists() {
        return Ok(SyncConfig::default());
    }
    let content = std::fs::read_to_string(path).map_err(|e| SyncError::Config {
        path: path.to_path_buf(),
        reason: format!("failed to read: {e}"),
    })?;
    toml::from_str(&content).map_err(|e| SyncError::Config {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn read_table(path: &Path) -> Result<toml::Table, SyncError> {
    if !path.exists() {
        return Ok(toml::Table::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| SyncError::Config {
        path: path.to_path_buf(),
        reason: format!("failed to read: {e}"),
    })?;
    content.parse::<toml::Table>().map_err(|e| SyncError::Config {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn overlay(base: &mut toml::Table, top: toml::Table) {
    for (key, value) in top {
        match value {
            toml::Value::Table(incoming) => {
                if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                    overlay(existing, incoming);
                } else {
                    base.insert(key, toml::Value::Table(incoming));
                }
            }
            other => {
                base.insert(key, other);
            }
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_poll_interval_ms() -> u64 {
    60_000
}

const fn default_initial_backoff_ms() -> u64 {
    1_000
}

const fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_title_suffix() -> String {
    "Developer Tools".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_project_config(dir: &TempDir, body: &str) {
        let path = project_config_path(dir.path());
        std::fs::create_dir_all(path.parent().expect("has parent")).expect("mkdir");
        std::fs::write(path, body).expect("write config");
    }

    #[test]
    fn missing_project_config_uses_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let config = load_project_config(dir.path()).expect("load");
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert!(config.poll.enabled);
        assert_eq!(config.view.title_suffix, "Developer Tools");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().expect("tempdir");
        write_project_config(&dir, "[poll]\ninterval_ms = 5000\n");
        let config = load_project_config(dir.path()).expect("load");
        assert_eq!(config.poll.interval_ms, 5_000);
        assert!(config.poll.enabled);
        assert_eq!(config.channel, ChannelConfig::default());
    }

    #[test]
    fn parse_error_names_the_file() {
        let dir = TempDir::new().expect("tempdir");
        write_project_config(&dir, "[poll\n");
        let err = load_project_config(dir.path()).unwrap_err();
        assert!(matches!(err, SyncError::Config { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut config = SyncConfig::default();
        config.poll.interval_ms = 0;
        assert!(config.validate(Path::new("x")).is_err());
    }

    #[test]
    fn validate_rejects_inverted_backoff() {
        let mut config = SyncConfig::default();
        config.channel.initial_backoff_ms = 10_000;
        config.channel.max_backoff_ms = 1_000;
        let err = config.validate(Path::new("x")).unwrap_err();
        assert!(err.to_string().contains("initial_backoff_ms"));
    }

    #[test]
    fn env_override_replaces_interval() {
        let mut config = SyncConfig::default();
        config
            .apply_env_overrides(|key| (key == POLL_INTERVAL_ENV).then(|| "250".to_string()))
            .expect("override");
        assert_eq!(config.poll.interval_ms, 250);
    }

    #[test]
    fn bad_env_override_is_rejected() {
        let mut config = SyncConfig::default();
        let err = config
            .apply_env_overrides(|_| Some("soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("soon"));
    }

    #[test]
    fn overlay_merges_nested_tables() {
        let mut base: toml::Table = "[poll]\ninterval_ms = 10\nenabled = false\n"
            .parse()
            .expect("base");
        let top: toml::Table = "[poll]\ninterval_ms = 20\n[view]\ntitle_suffix = \"X\"\n"
            .parse()
            .expect("top");
        overlay(&mut base, top);
        let config: SyncConfig = toml::Value::Table(base).try_into().expect("config");
        assert_eq!(config.poll.interval_ms, 20);
        assert!(!config.poll.enabled);
        assert_eq!(config.view.title_suffix, "X");
    }
}
