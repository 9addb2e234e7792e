use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Recipe parse error: {message}")]
    RecipeParseError { message: String },

    #[error("Missing configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Dependency manifest not found: {path}")]
    ManifestMissingError { path: String },

    #[error("Dependency manifest line {line} is invalid: {reason}")]
    ManifestParseError { line: usize, reason: String },

    #[error("Failed to start '{program}': {source}")]
    CommandSpawnError {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' exited with {status}")]
    CommandFailedError { command: String, status: String },

    #[error("Required binary '{binary}' not found on PATH")]
    BinaryNotFoundError { binary: String },

    #[error("Environment variable {variable} is not set and no fallback port is defined")]
    MissingPortVariableError { variable: String },

    #[error("Invalid port '{value}' from {source_name}")]
    InvalidPortError { value: String, source_name: String },

    #[error("Cannot bind {address}: {reason}")]
    PortUnavailableError { address: String, reason: String },

    #[error("No built image found at {path}")]
    ImageNotBuiltError { path: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransitionError { from: String, to: String },

    #[error("Interrupted by {signal}")]
    InterruptedError { signal: String },
}

/// 錯誤分類，對應啟動流程的階段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Build,
    Launch,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl BootError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BootError::RecipeParseError { .. }
            | BootError::MissingConfigError { .. }
            | BootError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            BootError::IoError(_)
            | BootError::ManifestMissingError { .. }
            | BootError::ManifestParseError { .. }
            | BootError::CommandSpawnError { .. }
            | BootError::CommandFailedError { .. }
            | BootError::BinaryNotFoundError { .. } => ErrorCategory::Build,
            BootError::MissingPortVariableError { .. }
            | BootError::InvalidPortError { .. }
            | BootError::PortUnavailableError { .. }
            | BootError::ImageNotBuiltError { .. }
            | BootError::InterruptedError { .. } => ErrorCategory::Launch,
            BootError::SerializationError(_) | BootError::InvalidTransitionError { .. } => {
                ErrorCategory::Internal
            }
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            BootError::InterruptedError { .. } => ErrorSeverity::Medium,
            BootError::InvalidTransitionError { .. } | BootError::SerializationError(_) => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::High,
        }
    }

    /// 以分類決定退出碼：設定 2、建置 3、啟動 4、內部 70
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::Configuration => 2,
            ErrorCategory::Build => 3,
            ErrorCategory::Launch => 4,
            ErrorCategory::Internal => 70,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            BootError::RecipeParseError { .. } => {
                "Check the recipe is valid TOML and contains [recipe], [base], [workdir], [manifest] and [launch]".to_string()
            }
            BootError::MissingConfigError { field } => format!("Add '{}' to the recipe", field),
            BootError::InvalidConfigValueError { field, .. } => {
                format!("Fix the value of '{}' in the recipe", field)
            }
            BootError::ManifestMissingError { path } => {
                format!("Create '{}' in the build context or point [manifest].path at it", path)
            }
            BootError::ManifestParseError { .. } => {
                "Use one requirement per line, e.g. 'fastapi==0.110.0', a URL, 'git+' reference or a local path".to_string()
            }
            BootError::CommandSpawnError { program, .. } => {
                format!("Make sure '{}' is installed in the base image", program)
            }
            BootError::CommandFailedError { .. } => {
                "Inspect the command output above; the build is not retried".to_string()
            }
            BootError::BinaryNotFoundError { binary } => {
                format!("Add the package providing '{}' to [system].packages", binary)
            }
            BootError::MissingPortVariableError { variable } => format!(
                "Set {} when starting the container or define [launch].fallback_port",
                variable
            ),
            BootError::InvalidPortError { .. } => {
                "Use an integer port between 1 and 65535".to_string()
            }
            BootError::PortUnavailableError { .. } => {
                "Stop the process holding the port or start with a different PORT".to_string()
            }
            BootError::ImageNotBuiltError { .. } => {
                "Run 'boot-seq build' before 'boot-seq launch'".to_string()
            }
            BootError::IoError(_) => "Check file permissions and available disk space".to_string(),
            BootError::SerializationError(_) | BootError::InvalidTransitionError { .. } => {
                "This is a bug in boot-seq; please report it".to_string()
            }
            BootError::InterruptedError { .. } => {
                "The orchestrator stopped the container; restart policy applies".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Build => format!("Build aborted: {}", self),
            ErrorCategory::Launch => format!("Launch failed: {}", self),
            ErrorCategory::Internal => format!("Internal error: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, BootError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_follow_category() {
        let config = BootError::MissingConfigError {
            field: "launch.app".to_string(),
        };
        let build = BootError::ManifestMissingError {
            path: "requirements.txt".to_string(),
        };
        let launch = BootError::MissingPortVariableError {
            variable: "PORT".to_string(),
        };

        assert_eq!(config.exit_code(), 2);
        assert_eq!(build.exit_code(), 3);
        assert_eq!(launch.exit_code(), 4);
        assert!(launch.recovery_suggestion().contains("PORT"));
        assert!(build.user_friendly_message().starts_with("Build aborted"));
    }
}
