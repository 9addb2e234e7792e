//! Wires recipe, layout, runner and layer store into the build and launch
//! operations the binary exposes.

use crate::adapters::{JsonLayerStore, SystemRunner};
use crate::config::recipe::Recipe;
use crate::config::variants::Variant;
use crate::core::dockerfile;
use crate::core::env::RuntimeEnv;
use crate::core::launcher::{ExitReport, LaunchMode, Launcher};
use crate::core::layout::{Layout, IMAGE_RECORD_FILE, STATE_DIR_NAME};
use crate::core::port::ResolvedPort;
use crate::core::sequencer::{self, BootSequence, BuildContext, BuildReport, PlannedPhase};
use crate::domain::ports::CommandRunner;
use crate::utils::error::{BootError, Result};
use crate::utils::validation::Validate;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_RECIPE_FILE: &str = "boot.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipeSource {
    Variant(Variant),
    File(PathBuf),
    /// `<context>/boot.toml`
    Context,
}

#[derive(Debug, Clone)]
pub struct BootOptions {
    pub source: RecipeSource,
    pub context: PathBuf,
    pub root: PathBuf,
    pub state_dir: Option<PathBuf>,
    pub use_cache: bool,
    pub mode: LaunchMode,
    pub monitor: bool,
    pub execution_id: Option<String>,
}

impl Default for BootOptions {
    fn default() -> Self {
        Self {
            source: RecipeSource::Context,
            context: PathBuf::from("."),
            root: PathBuf::from("/"),
            state_dir: None,
            use_cache: true,
            mode: if cfg!(unix) {
                LaunchMode::Exec
            } else {
                LaunchMode::Supervise
            },
            monitor: false,
            execution_id: None,
        }
    }
}

pub fn generate_execution_id() -> String {
    format!("boot_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S"))
}

pub struct Bootstrapper {
    options: BootOptions,
    recipe: Recipe,
    layout: Layout,
    runner: Arc<dyn CommandRunner>,
    build_env: RuntimeEnv,
    runtime_env: RuntimeEnv,
    execution_id: String,
}

impl Bootstrapper {
    pub fn new(options: BootOptions) -> Result<Self> {
        let recipe = load_recipe(&options.source, &options.context)?;
        Ok(Self::with_recipe(options, recipe))
    }

    pub fn with_recipe(options: BootOptions, recipe: Recipe) -> Self {
        let layout = Layout::new(&options.root, &options.context, recipe.workdir.path.clone())
            .with_state_dir(options.state_dir.clone());
        let execution_id = options
            .execution_id
            .clone()
            .unwrap_or_else(generate_execution_id);

        Self {
            options,
            recipe,
            layout,
            runner: Arc::new(SystemRunner::new()),
            build_env: RuntimeEnv::from_process(),
            runtime_env: RuntimeEnv::from_process(),
            execution_id,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_build_env(mut self, env: RuntimeEnv) -> Self {
        self.build_env = env;
        self
    }

    pub fn with_runtime_env(mut self, env: RuntimeEnv) -> Self {
        self.runtime_env = env;
        self
    }

    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    fn context(&self) -> BuildContext {
        BuildContext::new(self.recipe.clone(), self.layout.clone(), Arc::clone(&self.runner))
            .with_build_env(self.build_env.clone())
    }

    fn sequence(&self) -> BootSequence {
        BootSequence::standard(self.execution_id.clone())
            .with_cache(self.options.use_cache)
            .with_monitoring(self.options.monitor)
    }

    pub async fn plan(&self) -> Result<Vec<PlannedPhase>> {
        let store = JsonLayerStore::open(self.layout.layer_cache_path());
        let mut ctx = self.context();
        self.sequence().plan(&mut ctx, &store).await
    }

    pub async fn build(&self) -> Result<BuildReport> {
        tracing::info!(
            "🏗️ Building '{}' ({}) into {}",
            self.recipe.recipe.name,
            self.execution_id,
            self.layout.host_workdir().display()
        );
        let mut store = JsonLayerStore::open(self.layout.layer_cache_path());
        let mut ctx = self.context();
        self.sequence().build(&mut ctx, &mut store).await
    }

    /// Launch reads only the image record, never the recipe.
    pub fn launcher(&self) -> Result<Launcher> {
        open_launcher(&self.layout.image_record_path(), &self.options, self.runtime_env.clone())
    }

    pub async fn launch(&self) -> Result<ExitReport> {
        let mut launcher = self.launcher()?;
        launcher.launch(self.options.mode).await
    }

    pub async fn up(&self) -> Result<ExitReport> {
        self.build().await?;
        self.launch().await
    }

    pub fn resolve_port(&self) -> Result<ResolvedPort> {
        self.launcher()?.resolve_port()
    }

    pub fn render(&self) -> String {
        dockerfile::render(&self.recipe)
    }
}

/// Launch-side entry point. Finds the image record without loading or
/// validating a recipe, so a runtime without `boot.toml` can still start.
pub struct ImageLaunch {
    options: BootOptions,
    runtime_env: RuntimeEnv,
}

impl ImageLaunch {
    pub fn new(options: BootOptions) -> Self {
        Self {
            options,
            runtime_env: RuntimeEnv::from_process(),
        }
    }

    pub fn with_runtime_env(mut self, env: RuntimeEnv) -> Self {
        self.runtime_env = env;
        self
    }

    pub fn record_path(&self) -> PathBuf {
        locate_image_record(&self.options)
    }

    pub fn launcher(&self) -> Result<Launcher> {
        open_launcher(&self.record_path(), &self.options, self.runtime_env.clone())
    }

    pub async fn launch(&self) -> Result<ExitReport> {
        let mut launcher = self.launcher()?;
        launcher.launch(self.options.mode).await
    }

    pub fn resolve_port(&self) -> Result<ResolvedPort> {
        self.launcher()?.resolve_port()
    }
}

/// 依序：`--state-dir`、`<context>/.boot`、recipe 宣告的 workdir（只取路徑，不驗證）
pub fn locate_image_record(options: &BootOptions) -> PathBuf {
    if let Some(state_dir) = &options.state_dir {
        return state_dir.join(IMAGE_RECORD_FILE);
    }

    let mut candidates = vec![options.context.join(STATE_DIR_NAME).join(IMAGE_RECORD_FILE)];
    if let Some(workdir) = declared_workdir(&options.source, &options.context) {
        candidates.push(Layout::new(&options.root, &options.context, workdir).image_record_path());
    }

    match candidates.iter().find(|path| path.is_file()) {
        Some(found) => found.clone(),
        None => candidates.pop().unwrap_or_default(),
    }
}

fn declared_workdir(source: &RecipeSource, context: &Path) -> Option<String> {
    let path = match source {
        RecipeSource::Variant(variant) => return Some(variant.recipe().workdir.path),
        RecipeSource::File(path) => path.clone(),
        RecipeSource::Context => context.join(DEFAULT_RECIPE_FILE),
    };
    if !path.is_file() {
        return None;
    }
    match Recipe::from_file(&path) {
        Ok(recipe) => Some(recipe.workdir.path),
        Err(e) => {
            tracing::debug!("Ignoring recipe {} while locating image: {}", path.display(), e);
            None
        }
    }
}

fn open_launcher(record: &Path, options: &BootOptions, runtime: RuntimeEnv) -> Result<Launcher> {
    let image = sequencer::read_image_record(record)?;
    tracing::info!("📦 Image '{}' from {}", image.recipe, record.display());
    let state_dir = record.parent().map(Path::to_path_buf);
    let layout = Layout::new(&options.root, &options.context, image.workdir.clone()).with_state_dir(state_dir);
    Ok(Launcher::new(image, layout, runtime))
}

/// 依序：內建 variant、指定檔案、context 下的 boot.toml
pub fn load_recipe(source: &RecipeSource, context: &Path) -> Result<Recipe> {
    let recipe = match source {
        RecipeSource::Variant(variant) => {
            tracing::info!("📋 Using built-in recipe '{}'", variant);
            variant.recipe()
        }
        RecipeSource::File(path) => read_recipe_file(path)?,
        RecipeSource::Context => read_recipe_file(&context.join(DEFAULT_RECIPE_FILE))?,
    };
    recipe.validate()?;
    Ok(recipe)
}

fn read_recipe_file(path: &Path) -> Result<Recipe> {
    if !path.is_file() {
        return Err(BootError::MissingConfigError {
            field: format!("recipe file {}", path.display()),
        });
    }
    tracing::info!("📋 Loading recipe from {}", path.display());
    Recipe::from_file(path)
}
