#![allow(dead_code)]

use anyhow::Result;
use boot_seq::adapters::RecordingRunner;
use boot_seq::core::env::RuntimeEnv;
use boot_seq::{BootOptions, Bootstrapper, LaunchMode, Recipe, RecipeSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const RECIPE: &str = r#"
[recipe]
name = "test-api"
version = "1.0.0"

[base]
image = "python:3.11-slim"

[system]
packages = ["ffmpeg"]
noninteractive = true
verify_binaries = ["ffmpeg"]

[workdir]
path = "/app"

[manifest]
path = "requirements.txt"

[env]
PYTHONUNBUFFERED = "1"

[launch]
app = "main:app"
host = "127.0.0.1"
"#;

/// A build context, an empty filesystem root and a PATH holding a fake ffmpeg.
pub struct Fixture {
    pub dir: TempDir,
    pub context: PathBuf,
    pub root: PathBuf,
    pub bin: PathBuf,
}

impl Fixture {
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let context = dir.path().join("context");
        let root = dir.path().join("rootfs");
        let bin = dir.path().join("bin");

        std::fs::create_dir_all(context.join("static"))?;
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(&bin)?;

        std::fs::write(context.join("requirements.txt"), "fastapi==0.110.0\nuvicorn\n")?;
        std::fs::write(context.join("main.py"), "from fastapi import FastAPI\napp = FastAPI()\n")?;
        std::fs::write(context.join("static/index.html"), "<html></html>\n")?;
        write_executable(&bin.join("ffmpeg"))?;

        Ok(Self {
            dir,
            context,
            root,
            bin,
        })
    }

    pub fn build_env(&self) -> RuntimeEnv {
        RuntimeEnv::from_pairs([("PATH", self.bin.to_string_lossy().into_owned())])
    }

    pub fn options(&self, source: RecipeSource) -> BootOptions {
        BootOptions {
            source,
            context: self.context.clone(),
            root: self.root.clone(),
            state_dir: None,
            use_cache: true,
            mode: LaunchMode::Supervise,
            monitor: false,
            execution_id: Some("boot_test".to_string()),
        }
    }

    pub fn bootstrapper(&self, recipe: Recipe, runner: &Arc<RecordingRunner>) -> Bootstrapper {
        let runner: Arc<dyn boot_seq::core::CommandRunner> = runner.clone();
        Bootstrapper::with_recipe(self.options(RecipeSource::Context), recipe)
            .with_runner(runner)
            .with_build_env(self.build_env())
    }

    pub fn workdir(&self) -> PathBuf {
        self.root.join("app")
    }

    pub fn image_record(&self) -> PathBuf {
        self.workdir().join(".boot/image.json")
    }
}

pub fn test_recipe() -> Result<Recipe> {
    Ok(Recipe::from_toml_str(RECIPE)?)
}

#[cfg(unix)]
fn write_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, "#!/bin/sh\nexit 0\n")?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn write_executable(path: &Path) -> Result<()> {
    std::fs::write(path, "")?;
    Ok(())
}

pub fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
