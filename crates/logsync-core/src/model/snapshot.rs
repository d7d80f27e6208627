//! Coarse project-wide fields refreshed by the poll channel.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{Cursor, SourceId};
use super::source::Source;

/// How the development server is exposed to devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostType {
    Tunnel,
    #[default]
    Lan,
    Localhost,
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tunnel => "tunnel",
            Self::Lan => "lan",
            Self::Localhost => "localhost",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default)]
    pub host_type: HostType,
}

/// Project manifest fields shown in the console header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub github_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub send_to: Option<String>,
}

/// Which sources the user pinned as visible panes, and which one is focused.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutState {
    #[serde(default)]
    pub selected: Option<SourceId>,
    #[serde(default)]
    pub sources: Vec<SourceId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    #[serde(default)]
    pub network_status: Option<String>,
    #[serde(default)]
    pub is_android_simulator_supported: bool,
    #[serde(default)]
    pub is_ios_simulator_supported: bool,
}

/// The snapshot-only fields of the store. Node sequences never live here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    #[serde(default)]
    pub manifest_url: Option<String>,
    #[serde(default)]
    pub settings: ProjectSettings,
    #[serde(default)]
    pub config: ProjectConfig,
    #[serde(default)]
    pub user_settings: UserSettings,
    #[serde(default)]
    pub layout: LayoutState,
    #[serde(default)]
    pub process_info: ProcessInfo,
}

/// Result of the initial bulk fetch or of a full resync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialState {
    #[serde(default)]
    pub snapshot: ProjectSnapshot,
    #[serde(default)]
    pub sources: Vec<Source>,
    /// Resume point for the push channel.
    #[serde(default)]
    pub last_cursor: Option<Cursor>,
}
