use crate::domain::ports::{CommandRunner, CommandSpec};
use crate::utils::error::{BootError, Result};
use async_trait::async_trait;
use std::sync::Mutex;

/// Runs commands on the host with inherited stdio so installer output
/// reaches the container log unchanged.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &CommandSpec) -> Result<()> {
        let mut process = tokio::process::Command::new(&command.program);
        process.args(&command.args).envs(&command.env);
        if let Some(cwd) = &command.cwd {
            process.current_dir(cwd);
        }

        let status = process
            .status()
            .await
            .map_err(|e| BootError::CommandSpawnError {
                program: command.program.clone(),
                source: e,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(BootError::CommandFailedError {
                command: command.to_string(),
                status: status.to_string(),
            })
        }
    }
}

/// 只記錄指令不執行，用於 plan 與測試
#[derive(Debug, Default)]
pub struct RecordingRunner {
    commands: Mutex<Vec<CommandSpec>>,
    fail_on: Option<String>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails any command whose program matches `program`, after recording it.
    pub fn failing_on(program: impl Into<String>) -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            fail_on: Some(program.into()),
        }
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn programs(&self) -> Vec<String> {
        self.commands().into_iter().map(|c| c.program).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut commands) = self.commands.lock() {
            commands.clear();
        }
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &CommandSpec) -> Result<()> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.clone());
        }
        tracing::debug!("📝 Recorded: {}", command);

        if self.fail_on.as_deref() == Some(command.program.as_str()) {
            return Err(BootError::CommandFailedError {
                command: command.to_string(),
                status: "exit status: 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_runner_records_in_order() {
        let runner = RecordingRunner::new();
        runner.run(&CommandSpec::new("apt-get").arg("update")).await.unwrap();
        runner.run(&CommandSpec::new("pip").args(["install", "-r", "requirements.txt"])).await.unwrap();
        assert_eq!(runner.programs(), vec!["apt-get", "pip"]);

        runner.clear();
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_recording_runner_failure() {
        let runner = RecordingRunner::failing_on("pip");
        let err = runner.run(&CommandSpec::new("pip")).await.unwrap_err();
        assert!(matches!(err, BootError::CommandFailedError { .. }));
        assert_eq!(runner.programs(), vec!["pip"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_exit_status() {
        let runner = SystemRunner::new();
        assert!(runner.run(&CommandSpec::new("true")).await.is_ok());

        let err = runner.run(&CommandSpec::new("false")).await.unwrap_err();
        assert!(matches!(err, BootError::CommandFailedError { .. }));
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_system_runner_missing_program() {
        let runner = SystemRunner::new();
        let err = runner
            .run(&CommandSpec::new("definitely-not-a-real-binary-7f3a"))
            .await
            .unwrap_err();
        assert!(matches!(err, BootError::CommandSpawnError { .. }));
    }
}
