//! Process launch from a built image record.
//!
//! The port is resolved once, probed, and then handed to the server through
//! both `--port` and the environment variable it came from.

use crate::core::env::{self, RuntimeEnv};
use crate::core::layout::Layout;
use crate::core::port::{self, ResolvedPort};
use crate::core::toolcheck;
use crate::domain::model::{BootState, ImageRecord};
use crate::utils::error::{BootError, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Replace the sequencer process with the server (Unix only).
    Exec,
    /// Spawn the server as a child, forward termination and wait.
    Supervise,
}

/// Everything needed to start the server, fully resolved.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: PathBuf,
    pub port: ResolvedPort,
    pub host: String,
}

impl LaunchPlan {
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    pub state: BootState,
    pub code: Option<i32>,
}

pub struct Launcher {
    image: ImageRecord,
    layout: Layout,
    runtime: RuntimeEnv,
    state: BootState,
}

impl Launcher {
    /// 一個已建置的映像代表檔案已就位，所以從 FILES_STAGED 開始
    pub fn new(image: ImageRecord, layout: Layout, runtime: RuntimeEnv) -> Self {
        Self {
            image,
            layout,
            runtime,
            state: BootState::FilesStaged,
        }
    }

    pub fn state(&self) -> BootState {
        self.state
    }

    pub fn resolve_port(&self) -> Result<ResolvedPort> {
        port::resolve_port(&self.image.launch, &self.image.env, &self.runtime)
    }

    /// `<server> <app> [--app-dir D] --host H --port P <extra_args>`
    pub fn server_args(&self, port: u16) -> Vec<String> {
        let launch = &self.image.launch;
        let mut args = vec![launch.app.clone()];
        if let Some(dir) = &launch.app_dir {
            args.push("--app-dir".to_string());
            args.push(dir.clone());
        }
        args.push("--host".to_string());
        args.push(launch.host.clone());
        args.push("--port".to_string());
        args.push(port.to_string());
        args.extend(launch.extra_args.iter().cloned());
        args
    }

    /// Resolves port, environment and executable without starting anything.
    pub fn plan(&self) -> Result<LaunchPlan> {
        let launch = &self.image.launch;
        let port = self.resolve_port()?;

        let mut env = env::layered(&self.image.env, &self.runtime);
        env.insert(launch.port_env.clone(), port.port.to_string());

        let search_path = env.get("PATH").map(std::ffi::OsString::from);
        let program = toolcheck::find_on_path(&launch.server, search_path.as_deref()).ok_or_else(|| {
            BootError::BinaryNotFoundError {
                binary: launch.server.clone(),
            }
        })?;

        Ok(LaunchPlan {
            program,
            args: self.server_args(port.port),
            env,
            cwd: self.layout.host_workdir(),
            port,
            host: launch.host.clone(),
        })
    }

    /// Plans, probes the bind address and starts the server.
    ///
    /// In `Exec` mode this only returns on failure.
    pub async fn launch(&mut self, mode: LaunchMode) -> Result<ExitReport> {
        match self.start(mode).await {
            Ok(report) => Ok(report),
            Err(e) => {
                if !self.state.is_terminal() {
                    self.state = self.state.advance(BootState::ExitedError)?;
                }
                tracing::error!("❌ Launch failed in state {}: {}", self.state, e);
                Err(e)
            }
        }
    }

    async fn start(&mut self, mode: LaunchMode) -> Result<ExitReport> {
        let plan = self.plan()?;
        tracing::info!("🔌 Port {} from {}", plan.port.port, plan.port.source);
        port::probe_bind(&plan.host, plan.port.port).await?;

        self.state = self.state.advance(BootState::Running)?;
        tracing::info!("🚀 {} (cwd {})", plan.command_line(), plan.cwd.display());

        match mode {
            LaunchMode::Exec => exec(&plan),
            LaunchMode::Supervise => self.supervise(&plan).await,
        }
    }

    async fn supervise(&mut self, plan: &LaunchPlan) -> Result<ExitReport> {
        let mut child = tokio::process::Command::new(&plan.program)
            .args(&plan.args)
            .env_clear()
            .envs(&plan.env)
            .current_dir(&plan.cwd)
            .spawn()
            .map_err(|e| BootError::CommandSpawnError {
                program: plan.program.display().to_string(),
                source: e,
            })?;

        let outcome = tokio::select! {
            status = child.wait() => Ok(status?),
            signal = shutdown_signal() => Err(signal),
        };

        match outcome {
            Ok(status) => Ok(self.finish(status)),
            Err(signal) => {
                tracing::warn!("🛑 Received {}, stopping server", signal);
                child.start_kill()?;
                let _ = child.wait().await;
                Err(BootError::InterruptedError { signal })
            }
        }
    }

    fn finish(&mut self, status: ExitStatus) -> ExitReport {
        let next = if status.success() {
            BootState::ExitedOk
        } else {
            BootState::ExitedError
        };
        // RUNNING 之後兩個終止狀態都合法
        self.state = self.state.advance(next).unwrap_or(BootState::ExitedError);
        if status.success() {
            tracing::info!("✅ Server exited cleanly");
        } else {
            tracing::error!("❌ Server exited with {}", status);
        }
        ExitReport {
            state: self.state,
            code: status.code(),
        }
    }
}

#[cfg(unix)]
fn exec(plan: &LaunchPlan) -> Result<ExitReport> {
    use std::os::unix::process::CommandExt;

    let error = std::process::Command::new(&plan.program)
        .args(&plan.args)
        .env_clear()
        .envs(&plan.env)
        .current_dir(&plan.cwd)
        .exec();
    Err(BootError::CommandSpawnError {
        program: plan.program.display().to_string(),
        source: error,
    })
}

#[cfg(not(unix))]
fn exec(_plan: &LaunchPlan) -> Result<ExitReport> {
    Err(BootError::InvalidConfigValueError {
        field: "launch mode".to_string(),
        value: "exec".to_string(),
        reason: "process replacement is only available on Unix; use --supervise".to_string(),
    })
}

#[cfg(unix)]
async fn shutdown_signal() -> String {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT".to_string(),
            _ = term.recv() => "SIGTERM".to_string(),
        },
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT".to_string()
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> String {
    let _ = tokio::signal::ctrl_c().await;
    "Ctrl-C".to_string()
}
