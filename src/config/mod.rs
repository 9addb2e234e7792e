pub mod recipe;
pub mod variants;

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
use variants::Variant;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "boot-seq")]
#[command(about = "Container bootstrap sequencer: install dependencies, stage the app and launch its server")]
#[command(version)]
pub struct CliConfig {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the recipe file (defaults to <context>/boot.toml)
    #[arg(short, long, global = true)]
    pub recipe: Option<PathBuf>,

    /// Use a built-in recipe instead of a file
    #[arg(long, value_enum, global = true, conflicts_with = "recipe")]
    pub variant: Option<Variant>,

    /// Build context holding the manifest and the application tree
    #[arg(long, global = true, default_value = ".")]
    pub context: PathBuf,

    /// Filesystem root the workdir is created under
    #[arg(long, global = true, default_value = "/")]
    pub root: PathBuf,

    /// Where image.json and layers.json live (defaults to <workdir>/.boot)
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Execute every phase even when its layer key is unchanged
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Spawn the server and wait for it instead of replacing this process
    #[arg(long, global = true)]
    pub supervise: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Log CPU and memory usage per phase
    #[arg(long, global = true)]
    pub monitor: bool,

    /// Execution ID for this run
    #[arg(long, global = true)]
    pub execution_id: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Show the phase plan and layer keys without executing anything
    Plan,
    /// Run the build phases and write the image record
    Build,
    /// Start the server from a built image
    Launch,
    /// Build, then launch
    Up,
    /// Print the port the server would bind
    ResolvePort,
    /// Print the equivalent container build file
    Render,
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build_with_variant() {
        let config =
            CliConfig::try_parse_from(["boot-seq", "build", "--variant", "fallback", "--no-cache"])
                .unwrap();
        assert_eq!(config.command, Command::Build);
        assert_eq!(config.variant, Some(Variant::Fallback));
        assert!(config.no_cache);
        assert_eq!(config.root, PathBuf::from("/"));
    }

    #[test]
    fn test_recipe_and_variant_conflict() {
        let parsed = CliConfig::try_parse_from([
            "boot-seq",
            "plan",
            "--recipe",
            "boot.toml",
            "--variant",
            "strict",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_resolve_port_subcommand() {
        let config = CliConfig::try_parse_from(["boot-seq", "resolve-port", "--state-dir", "/app/.boot"])
            .unwrap();
        assert_eq!(config.command, Command::ResolvePort);
        assert_eq!(config.state_dir, Some(PathBuf::from("/app/.boot")));
    }
}
