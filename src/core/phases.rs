//! Build phases, in order: base, system, workdir, manifest, stage, env.

use crate::config::recipe::PackageManager;
use crate::core::fingerprint::{self, KeyBuilder};
use crate::core::image_ref::{ImageRef, PinLevel};
use crate::core::manifest::{self, DependencyManifest};
use crate::core::sequencer::{BuildContext, Phase};
use crate::core::toolcheck;
use crate::domain::model::PhaseKind;
use crate::domain::ports::CommandSpec;
use crate::utils::error::{BootError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::FileType;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const APT_LISTS_DIR: &str = "/var/lib/apt/lists";

pub fn build_phases() -> Vec<Box<dyn Phase>> {
    vec![
        Box::new(BasePhase),
        Box::new(SystemPhase),
        Box::new(WorkdirPhase),
        Box::new(ManifestPhase),
        Box::new(StagePhase),
        Box::new(EnvPhase),
    ]
}

pub struct BasePhase;

#[async_trait]
impl Phase for BasePhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Base
    }

    async fn prepare(&self, ctx: &mut BuildContext, key: KeyBuilder) -> Result<KeyBuilder> {
        let image = ImageRef::parse(&ctx.recipe.base.image)?;
        ctx.note("image", image.to_string());
        ctx.note("pin_level", format!("{:?}", image.pin_level()));
        Ok(key.field("image", image.to_string().as_bytes()))
    }

    async fn execute(&self, ctx: &mut BuildContext) -> Result<()> {
        let image = ImageRef::parse(&ctx.recipe.base.image)?;
        match image.pin_level() {
            PinLevel::Digest => tracing::info!("🧱 Base image {} pinned by digest", image),
            level => tracing::warn!(
                "⚠️ Base image {} is not pinned by digest ({:?}); rebuilds may drift",
                image,
                level
            ),
        }
        Ok(())
    }
}

pub struct SystemPhase;

impl SystemPhase {
    fn install_commands(ctx: &BuildContext) -> Vec<CommandSpec> {
        let packages = &ctx.system_packages;
        if packages.is_empty() {
            return Vec::new();
        }

        let system = &ctx.recipe.system;
        let with_frontend = |cmd: CommandSpec| {
            if system.noninteractive {
                cmd.env("DEBIAN_FRONTEND", "noninteractive")
            } else {
                cmd
            }
        };

        match system.package_manager {
            PackageManager::Apt => vec![
                with_frontend(CommandSpec::new("apt-get").arg("update")),
                with_frontend(
                    CommandSpec::new("apt-get")
                        .args(["install", "-y", "--no-install-recommends"])
                        .args(packages.iter().cloned()),
                ),
            ],
            PackageManager::Apk => vec![CommandSpec::new("apk")
                .args(["add", "--no-cache"])
                .args(packages.iter().cloned())],
            PackageManager::None => Vec::new(),
        }
    }

    /// 刪除套件索引，等同 `rm -rf /var/lib/apt/lists/*`
    fn clean_cache(ctx: &BuildContext) -> Result<usize> {
        if ctx.recipe.system.package_manager != PackageManager::Apt {
            return Ok(0);
        }
        let lists = ctx.layout.host_path(APT_LISTS_DIR);
        let entries = match std::fs::read_dir(&lists) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
            removed += 1;
        }
        Ok(removed)
    }

    fn verify_binaries(ctx: &BuildContext) -> Result<()> {
        let search_path = ctx.build_env.search_path();
        for binary in &ctx.recipe.system.verify_binaries {
            match toolcheck::find_on_path(binary, search_path.as_deref()) {
                Some(found) => tracing::info!("🔎 {} -> {}", binary, found.display()),
                None => {
                    return Err(BootError::BinaryNotFoundError {
                        binary: binary.clone(),
                    })
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Phase for SystemPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::System
    }

    async fn prepare(&self, ctx: &mut BuildContext, key: KeyBuilder) -> Result<KeyBuilder> {
        ctx.system_packages = ctx.recipe.system_packages();
        let system = &ctx.recipe.system;
        let key = key
            .field("manager", system.package_manager.as_str().as_bytes())
            .list("packages", &ctx.system_packages)
            .field("noninteractive", &[system.noninteractive as u8])
            .field("clean_cache", &[system.clean_cache as u8])
            .list("verify", &system.verify_binaries);
        Ok(key)
    }

    async fn execute(&self, ctx: &mut BuildContext) -> Result<()> {
        let commands = Self::install_commands(ctx);
        if commands.is_empty() {
            tracing::info!("📦 No system packages to install");
        }
        for command in &commands {
            tracing::info!("📦 {}", command);
            ctx.runner.run(command).await?;
        }

        if ctx.recipe.system.clean_cache && !commands.is_empty() {
            let removed = Self::clean_cache(ctx)?;
            tracing::debug!("🧹 Removed {} package index entries", removed);
        }

        Self::verify_binaries(ctx)?;
        let packages = ctx.system_packages.clone();
        ctx.note("packages", packages);
        Ok(())
    }
}

pub struct WorkdirPhase;

#[async_trait]
impl Phase for WorkdirPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Workdir
    }

    async fn prepare(&self, ctx: &mut BuildContext, key: KeyBuilder) -> Result<KeyBuilder> {
        Ok(key.field("path", ctx.layout.workdir.as_bytes()))
    }

    async fn execute(&self, ctx: &mut BuildContext) -> Result<()> {
        let workdir = ctx.layout.host_workdir();
        tokio::fs::create_dir_all(&workdir).await?;
        tracing::info!("📁 Workdir {}", workdir.display());
        Ok(())
    }
}

pub struct ManifestPhase;

impl ManifestPhase {
    fn installer_command(ctx: &BuildContext) -> CommandSpec {
        let manifest = ctx.recipe.manifest.path.as_str();
        let mut argv = ctx
            .recipe
            .manifest
            .installer
            .iter()
            .map(|arg| arg.replace("{manifest}", manifest));
        let program = argv.next().unwrap_or_default();
        CommandSpec::new(program)
            .args(argv)
            .current_dir(ctx.layout.host_workdir())
    }
}

#[async_trait]
impl Phase for ManifestPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Manifest
    }

    /// 只讀 manifest 本身，應用程式檔案的變動不會影響這一層
    async fn prepare(&self, ctx: &mut BuildContext, key: KeyBuilder) -> Result<KeyBuilder> {
        let source = ctx.layout.context_path(&ctx.recipe.manifest.path);
        let bytes = manifest::read_manifest_bytes(&source)?;
        let parsed = DependencyManifest::parse(&String::from_utf8_lossy(&bytes))?;
        if parsed.is_empty() {
            tracing::warn!("⚠️ {} lists no requirements", ctx.recipe.manifest.path);
        }
        let mut seen = std::collections::HashSet::new();
        for requirement in parsed.requirements() {
            if !seen.insert(requirement.normalized_name()) {
                tracing::warn!("⚠️ '{}' is listed more than once", requirement.name);
            }
        }
        ctx.requirements = parsed.requirement_lines();

        // 安裝指令以代換後的形式計入，cwd 不計入以免綁定 root
        let installer = Self::installer_command(ctx);
        Ok(key
            .field("path", ctx.recipe.manifest.path.as_bytes())
            .field("manifest", &bytes)
            .field("installer", installer.program.as_bytes())
            .list("installer_args", &installer.args))
    }

    async fn execute(&self, ctx: &mut BuildContext) -> Result<()> {
        let source = ctx.layout.context_path(&ctx.recipe.manifest.path);
        let target = ctx.layout.host_workdir().join(&ctx.recipe.manifest.path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if !same_file(&source, &target) {
            tokio::fs::copy(&source, &target).await?;
        }
        tracing::info!(
            "📜 Installing {} requirements from {}",
            ctx.requirements.len(),
            ctx.recipe.manifest.path
        );

        let command = Self::installer_command(ctx);
        tracing::info!("📜 {}", command);
        ctx.runner.run(&command).await?;

        let requirements = ctx.requirements.clone();
        ctx.note("requirements", requirements);
        Ok(())
    }
}

pub struct StagePhase;

impl StagePhase {
    /// Context entries that staging copies, with their paths relative to `source`.
    fn staged_entries(
        source: &Path,
        exclude: &[String],
        skip: &[PathBuf],
    ) -> Result<Vec<(PathBuf, walkdir::DirEntry)>> {
        let walker = WalkDir::new(source)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || (!fingerprint::is_excluded(entry.file_name(), exclude)
                        && !skip.iter().any(|s| entry.path().starts_with(s)))
            });

        let mut entries = Vec::new();
        for entry in walker {
            let entry = entry.map_err(walk_error)?;
            let relative = relative_to(entry.path(), source)?;
            entries.push((relative, entry));
        }
        Ok(entries)
    }

    /// 刪除 workdir 中 context 已經沒有的項目，`keep` 之下的路徑不動
    fn prune_stale(
        target: &Path,
        staged: &HashMap<PathBuf, FileType>,
        keep: &[PathBuf],
    ) -> Result<usize> {
        let mut walker = WalkDir::new(target)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();

        let mut removed = 0;
        while let Some(entry) = walker.next() {
            let entry = entry.map_err(walk_error)?;
            let file_type = entry.file_type();
            let is_dir = file_type.is_dir();
            let path = entry.path();

            if keep.iter().any(|k| path.starts_with(k)) {
                if is_dir {
                    walker.skip_current_dir();
                }
                continue;
            }
            let relative = relative_to(path, target)?;
            let holds_kept = keep.iter().any(|k| k.starts_with(path));
            match staged.get(&relative) {
                Some(&staged_type) if staged_type == file_type => continue,
                _ if holds_kept && is_dir => continue,
                _ => {}
            }

            tracing::debug!("🧹 Removing stale {}", relative.display());
            if is_dir {
                std::fs::remove_dir_all(path)?;
                walker.skip_current_dir();
            } else {
                std::fs::remove_file(path)?;
            }
            removed += 1;
        }
        Ok(removed)
    }

    /// Makes `target` mirror the staged context, leaving `keep` untouched.
    fn sync_tree(
        source: &Path,
        target: &Path,
        exclude: &[String],
        skip: &[PathBuf],
        keep: &[PathBuf],
    ) -> Result<(usize, usize)> {
        let entries = Self::staged_entries(source, exclude, skip)?;
        let staged: HashMap<PathBuf, FileType> = entries
            .iter()
            .map(|(relative, entry)| (relative.clone(), entry.file_type()))
            .collect();
        let removed = Self::prune_stale(target, &staged, keep)?;

        let mut copied = 0;
        for (relative, entry) in &entries {
            let destination = target.join(relative);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                std::fs::create_dir_all(&destination)?;
            } else if file_type.is_symlink() {
                copy_symlink(entry.path(), &destination)?;
                copied += 1;
            } else {
                if let Some(parent) = destination.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(entry.path(), &destination)?;
                copied += 1;
            }
        }
        Ok((copied, removed))
    }
}

#[async_trait]
impl Phase for StagePhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Stage
    }

    async fn prepare(&self, ctx: &mut BuildContext, key: KeyBuilder) -> Result<KeyBuilder> {
        let stage = ctx.recipe.stage.clone();
        let (context, skip) = staging_roots(ctx)?;
        let tree = fingerprint::tree_fingerprint(&context, &stage.exclude, &skip)?;
        ctx.note("tree", tree.clone());
        Ok(key
            .field("tree", tree.as_bytes())
            .list("exclude", &stage.exclude)
            .list("ensure_dirs", &stage.ensure_dirs))
    }

    async fn execute(&self, ctx: &mut BuildContext) -> Result<()> {
        let workdir = ctx.layout.host_workdir();
        let stage = ctx.recipe.stage.clone();

        if same_file(&ctx.layout.context, &workdir) {
            tracing::info!("🗂️ Context is the workdir, nothing to copy");
        } else {
            let (source, skip) = staging_roots(ctx)?;
            let target = workdir.canonicalize()?;
            let keep = kept_paths(ctx, &target, &source, &skip);
            let (copied, removed) = tokio::task::spawn_blocking(move || {
                Self::sync_tree(&source, &target, &stage.exclude, &skip, &keep)
            })
            .await
            .map_err(|e| BootError::IoError(std::io::Error::other(e.to_string())))??;
            tracing::info!(
                "🗂️ Staged {} files into {} ({} stale removed)",
                copied,
                workdir.display(),
                removed
            );
            ctx.note("files", copied);
            ctx.note("removed", removed);
        }

        for dir in &ctx.recipe.stage.ensure_dirs {
            tokio::fs::create_dir_all(workdir.join(dir)).await?;
        }
        Ok(())
    }
}

pub struct EnvPhase;

#[async_trait]
impl Phase for EnvPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Env
    }

    async fn prepare(&self, ctx: &mut BuildContext, key: KeyBuilder) -> Result<KeyBuilder> {
        ctx.image_env = ctx.recipe.image_env();
        let pairs: Vec<String> = ctx
            .image_env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        Ok(key.list("env", pairs))
    }

    async fn execute(&self, ctx: &mut BuildContext) -> Result<()> {
        for (name, value) in &ctx.image_env {
            tracing::info!("🌱 ENV {}={}", name, value);
        }
        let names: Vec<String> = ctx.image_env.keys().cloned().collect();
        ctx.note("env", names);
        Ok(())
    }
}

/// 正規化後的 context，以及必須跳過的 workdir / state_dir（位於 context 內時不可把自己複製進去）
fn staging_roots(ctx: &BuildContext) -> Result<(PathBuf, Vec<PathBuf>)> {
    let context = ctx.layout.context.canonicalize()?;
    let skip = [ctx.layout.host_workdir(), ctx.layout.state_dir()]
        .iter()
        .filter_map(|p| p.canonicalize().ok())
        .filter(|p| p != &context)
        .collect();
    Ok((context, skip))
}

/// workdir 中不屬於快照、同步時不可刪除的路徑：manifest 層、ensure_dirs、state dir，以及位於 workdir 內的 context
fn kept_paths(ctx: &BuildContext, target: &Path, context: &Path, skip: &[PathBuf]) -> Vec<PathBuf> {
    let mut keep = vec![target.join(&ctx.recipe.manifest.path)];
    keep.extend(ctx.recipe.stage.ensure_dirs.iter().map(|dir| target.join(dir)));
    keep.extend(skip.iter().filter(|s| s.as_path() != target).cloned());
    if context.starts_with(target) {
        keep.push(context.to_path_buf());
    }
    keep
}

fn relative_to(path: &Path, base: &Path) -> Result<PathBuf> {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .map_err(|e| BootError::IoError(std::io::Error::other(e.to_string())))
}

fn walk_error(e: walkdir::Error) -> BootError {
    match e.into_io_error() {
        Some(io) => BootError::IoError(io),
        None => BootError::IoError(std::io::Error::other("filesystem loop while staging")),
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(unix)]
fn copy_symlink(source: &Path, destination: &Path) -> Result<()> {
    let target = std::fs::read_link(source)?;
    if destination.symlink_metadata().is_ok() {
        std::fs::remove_file(destination)?;
    }
    std::os::unix::fs::symlink(target, destination)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, destination: &Path) -> Result<()> {
    std::fs::copy(source, destination)?;
    Ok(())
}
