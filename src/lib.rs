pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliConfig, Command};

pub use app::{BootOptions, Bootstrapper, ImageLaunch, RecipeSource};
pub use config::{recipe::Recipe, variants::Variant};
pub use core::launcher::{LaunchMode, Launcher};
pub use core::sequencer::BootSequence;
pub use utils::error::{BootError, Result};
