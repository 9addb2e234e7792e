//! The three built-in recipes. They differ mainly in how the listening port
//! is found when `PORT` is absent at container start:
//!
//! - `render`: `PORT=10000` is baked into the image environment.
//! - `fallback`: the launch falls back to 3000.
//! - `strict`: no default; launching without `PORT` fails.

use crate::config::recipe::{
    default_excludes, default_installer, default_manifest_path, BaseConfig, ManifestConfig,
    PackageManager, Recipe, RecipeInfo, StageConfig, SystemConfig, WorkdirConfig,
};
use crate::domain::model::LaunchSpec;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum Variant {
    Render,
    Fallback,
    Strict,
}

const BASE_IMAGE: &str = "python:3.11-slim";

impl Variant {
    pub fn name(&self) -> &'static str {
        match self {
            Variant::Render => "render",
            Variant::Fallback => "fallback",
            Variant::Strict => "strict",
        }
    }

    pub fn recipe(&self) -> Recipe {
        match self {
            Variant::Render => {
                let mut env = BTreeMap::new();
                env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
                env.insert("PORT".to_string(), "10000".to_string());

                let mut recipe = base_recipe(self.name(), "app:app");
                recipe.system.packages = vec!["ffmpeg".to_string(), "ca-certificates".to_string()];
                recipe.system.noninteractive = true;
                recipe.env = env;
                recipe.launch.expose = Some(10000);
                recipe
            }
            Variant::Fallback => {
                let mut recipe = base_recipe(self.name(), "main:app");
                recipe.launch.fallback_port = Some(3000);
                recipe
            }
            Variant::Strict => {
                let mut recipe = base_recipe(self.name(), "main:app");
                recipe.launch.app_dir = Some("backend".to_string());
                recipe
            }
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn base_recipe(name: &str, app: &str) -> Recipe {
    Recipe {
        recipe: RecipeInfo {
            name: name.to_string(),
            description: Some(format!("Built-in '{}' bootstrap", name)),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        base: BaseConfig {
            image: BASE_IMAGE.to_string(),
        },
        system: SystemConfig {
            package_manager: PackageManager::Apt,
            packages: vec!["ffmpeg".to_string()],
            noninteractive: false,
            clean_cache: true,
            verify_binaries: vec!["ffmpeg".to_string()],
        },
        workdir: WorkdirConfig {
            path: "/app".to_string(),
        },
        manifest: ManifestConfig {
            path: default_manifest_path(),
            installer: default_installer(),
        },
        stage: StageConfig {
            exclude: default_excludes(),
            ensure_dirs: Vec::new(),
        },
        env: BTreeMap::new(),
        launch: LaunchSpec {
            server: "uvicorn".to_string(),
            app: app.to_string(),
            app_dir: None,
            host: "0.0.0.0".to_string(),
            port_env: "PORT".to_string(),
            fallback_port: None,
            expose: None,
            extra_args: Vec::new(),
        },
    }
}
