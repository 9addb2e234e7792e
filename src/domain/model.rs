use crate::utils::error::{BootError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// 建置階段，順序固定：manifest 一定在 stage 之前
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    Base,
    System,
    Workdir,
    Manifest,
    Stage,
    Env,
}

impl PhaseKind {
    pub const BUILD_ORDER: [PhaseKind; 6] = [
        PhaseKind::Base,
        PhaseKind::System,
        PhaseKind::Workdir,
        PhaseKind::Manifest,
        PhaseKind::Stage,
        PhaseKind::Env,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKind::Base => "base",
            PhaseKind::System => "system",
            PhaseKind::Workdir => "workdir",
            PhaseKind::Manifest => "manifest",
            PhaseKind::Stage => "stage",
            PhaseKind::Env => "env",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseOutcome {
    Executed,
    Cached,
}

#[derive(Debug, Clone)]
pub struct PhaseResult {
    pub phase: PhaseKind,
    pub key: String,
    pub outcome: PhaseOutcome,
    pub duration: Duration,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Container instance lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BootState {
    Created,
    DependenciesInstalled,
    FilesStaged,
    Running,
    ExitedOk,
    ExitedError,
}

impl BootState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BootState::ExitedOk | BootState::ExitedError)
    }

    fn can_advance_to(&self, next: BootState) -> bool {
        use BootState::*;
        match (self, next) {
            (s, ExitedError) => !s.is_terminal(),
            (Created, DependenciesInstalled) => true,
            (DependenciesInstalled, FilesStaged) => true,
            (FilesStaged, Running) => true,
            (Running, ExitedOk) => true,
            _ => false,
        }
    }

    pub fn advance(self, next: BootState) -> Result<BootState> {
        if self.can_advance_to(next) {
            Ok(next)
        } else {
            Err(BootError::InvalidTransitionError {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for BootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootState::Created => "CREATED",
            BootState::DependenciesInstalled => "DEPENDENCIES_INSTALLED",
            BootState::FilesStaged => "FILES_STAGED",
            BootState::Running => "RUNNING",
            BootState::ExitedOk => "EXITED_OK",
            BootState::ExitedError => "EXITED_ERROR",
        };
        f.write_str(name)
    }
}

/// How the server process is started: `<server> <app> [--app-dir D] --host H --port P ...`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    #[serde(default = "default_server")]
    pub server: String,
    pub app: String,
    #[serde(default)]
    pub app_dir: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port_env")]
    pub port_env: String,
    #[serde(default)]
    pub fallback_port: Option<u16>,
    /// Documented externally reachable port. Never enforced.
    #[serde(default)]
    pub expose: Option<u16>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_server() -> String {
    "uvicorn".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port_env() -> String {
    "PORT".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerEntry {
    pub phase: PhaseKind,
    pub key: String,
}

/// 建置完成後寫入 state_dir/image.json，launch 只讀這份記錄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub recipe: String,
    pub version: String,
    pub base_image: String,
    pub workdir: String,
    pub layers: Vec<LayerEntry>,
    pub system_packages: Vec<String>,
    pub requirements: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub launch: LaunchSpec,
    pub built_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn layer_key(&self, phase: PhaseKind) -> Option<&str> {
        self.layers
            .iter()
            .find(|l| l.phase == phase)
            .map(|l| l.key.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_state_happy_path() {
        let state = BootState::Created
            .advance(BootState::DependenciesInstalled)
            .and_then(|s| s.advance(BootState::FilesStaged))
            .and_then(|s| s.advance(BootState::Running))
            .and_then(|s| s.advance(BootState::ExitedOk))
            .unwrap();
        assert_eq!(state, BootState::ExitedOk);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_boot_state_rejects_skips_and_restarts() {
        assert!(BootState::Created.advance(BootState::Running).is_err());
        assert!(BootState::FilesStaged.advance(BootState::DependenciesInstalled).is_err());
        assert!(BootState::ExitedOk.advance(BootState::ExitedError).is_err());
        assert!(BootState::ExitedError.advance(BootState::Running).is_err());
    }

    #[test]
    fn test_any_live_state_can_fail() {
        for state in [
            BootState::Created,
            BootState::DependenciesInstalled,
            BootState::FilesStaged,
            BootState::Running,
        ] {
            assert_eq!(state.advance(BootState::ExitedError).unwrap(), BootState::ExitedError);
        }
    }

    #[test]
    fn test_launch_spec_defaults() {
        let spec: LaunchSpec = toml::from_str(r#"app = "main:app""#).unwrap();
        assert_eq!(spec.server, "uvicorn");
        assert_eq!(spec.host, "0.0.0.0");
        assert_eq!(spec.port_env, "PORT");
        assert!(spec.fallback_port.is_none());
    }
}
