use crate::config::recipe::Recipe;
use crate::core::env::RuntimeEnv;
use crate::core::fingerprint::KeyBuilder;
use crate::core::layout::Layout;
use crate::domain::model::{
    BootState, ImageRecord, LayerEntry, PhaseKind, PhaseOutcome, PhaseResult,
};
use crate::domain::ports::{CommandRunner, LayerStore};
use crate::utils::error::{BootError, Result};
use crate::utils::monitor::SystemMonitor;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// 建置過程中在各階段之間傳遞的狀態
pub struct BuildContext {
    pub recipe: Recipe,
    pub layout: Layout,
    pub runner: Arc<dyn CommandRunner>,
    /// Environment of the build process itself (PATH for binary checks).
    pub build_env: RuntimeEnv,
    pub system_packages: Vec<String>,
    pub requirements: Vec<String>,
    pub image_env: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl BuildContext {
    pub fn new(recipe: Recipe, layout: Layout, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            recipe,
            layout,
            runner,
            build_env: RuntimeEnv::from_process(),
            system_packages: Vec::new(),
            requirements: Vec::new(),
            image_env: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_build_env(mut self, env: RuntimeEnv) -> Self {
        self.build_env = env;
        self
    }

    pub fn note(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}

/// 一個建置階段。`prepare` 沒有副作用且每次都執行；`execute` 只在快取失效時執行。
#[async_trait::async_trait]
pub trait Phase: Send + Sync {
    fn kind(&self) -> PhaseKind;

    /// Records facts into the context and feeds the layer key.
    async fn prepare(&self, ctx: &mut BuildContext, key: KeyBuilder) -> Result<KeyBuilder>;

    async fn execute(&self, ctx: &mut BuildContext) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PlannedPhase {
    pub phase: PhaseKind,
    pub key: String,
    pub cached: bool,
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub execution_id: String,
    pub results: Vec<PhaseResult>,
    pub image: ImageRecord,
}

/// 依序執行建置階段，沒有並行也沒有重試
pub struct BootSequence {
    phases: Vec<Box<dyn Phase>>,
    monitor: Option<SystemMonitor>,
    use_cache: bool,
    execution_id: String,
    state: BootState,
}

impl BootSequence {
    pub fn new(execution_id: String) -> Self {
        Self {
            phases: Vec::new(),
            monitor: None,
            use_cache: true,
            execution_id,
            state: BootState::Created,
        }
    }

    /// The six build phases in their fixed order.
    pub fn standard(execution_id: String) -> Self {
        let mut sequence = Self::new(execution_id);
        for phase in crate::core::phases::build_phases() {
            sequence.add_phase(phase);
        }
        sequence
    }

    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitor = enabled.then(|| SystemMonitor::new(true));
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.use_cache = enabled;
        self
    }

    pub fn add_phase(&mut self, phase: Box<dyn Phase>) {
        self.phases.push(phase);
    }

    pub fn state(&self) -> BootState {
        self.state
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// 只計算各層的快取鍵，不執行任何階段
    pub async fn plan(&self, ctx: &mut BuildContext, store: &dyn LayerStore) -> Result<Vec<PlannedPhase>> {
        let mut planned = Vec::new();
        let mut parent: Option<String> = None;

        for phase in &self.phases {
            let builder = KeyBuilder::new(parent.as_deref(), phase.kind());
            let key = phase.prepare(ctx, builder).await?.finish();
            let cached = self.use_cache && store.cached_key(phase.kind()).as_deref() == Some(key.as_str());
            planned.push(PlannedPhase {
                phase: phase.kind(),
                key: key.clone(),
                cached,
            });
            parent = Some(key);
        }

        Ok(planned)
    }

    /// A failed phase leaves partial work on disk, so its stored key and
    /// every later one are dropped and the next build re-executes them.
    pub async fn build(&mut self, ctx: &mut BuildContext, store: &mut dyn LayerStore) -> Result<BuildReport> {
        match self.run_phases(ctx, store).await {
            Ok(report) => Ok(report),
            Err(e) => {
                if !self.state.is_terminal() {
                    self.state = self.state.advance(BootState::ExitedError)?;
                }
                tracing::error!("❌ Build failed in state {}: {}", self.state, e);
                Err(e)
            }
        }
    }

    async fn run_phases(&mut self, ctx: &mut BuildContext, store: &mut dyn LayerStore) -> Result<BuildReport> {
        let mut results = Vec::new();
        let mut layers = Vec::new();
        let mut pending: Vec<(PhaseKind, String)> = Vec::new();
        let mut parent: Option<String> = None;

        if let Some(monitor) = &self.monitor {
            monitor.log_stats("Build started");
        }

        for phase in &self.phases {
            let kind = phase.kind();
            let start_time = Instant::now();
            ctx.metadata.clear();

            let builder = KeyBuilder::new(parent.as_deref(), kind);
            let key = match phase.prepare(ctx, builder).await {
                Ok(builder) => builder.finish(),
                Err(e) => return Err(fail_phase(store, kind, e)),
            };

            let cached = self.use_cache && store.cached_key(kind).as_deref() == Some(key.as_str());
            let outcome = if cached {
                tracing::info!("♻️ Phase {} cached ({})", kind, &key[..12]);
                PhaseOutcome::Cached
            } else {
                tracing::info!("▶️ Phase {} running ({})", kind, &key[..12]);
                if let Err(e) = phase.execute(ctx).await {
                    return Err(fail_phase(store, kind, e));
                }
                pending.push((kind, key.clone()));
                PhaseOutcome::Executed
            };

            // state dir 預設在 workdir 之下，workdir 建立前不寫入快取
            if kind >= PhaseKind::Workdir {
                for (done, done_key) in pending.drain(..) {
                    store.record(done, &done_key)?;
                }
            }

            let result = PhaseResult {
                phase: kind,
                key: key.clone(),
                outcome,
                duration: start_time.elapsed(),
                metadata: std::mem::take(&mut ctx.metadata),
            };
            tracing::info!(
                "✅ Phase {} done ({:?}, {:?})",
                result.phase,
                result.outcome,
                result.duration
            );
            if let Some(monitor) = &self.monitor {
                monitor.log_stats(kind.as_str());
            }

            advance_after(&mut self.state, kind)?;
            layers.push(LayerEntry {
                phase: kind,
                key: key.clone(),
            });
            results.push(result);
            parent = Some(key);
        }

        for (done, done_key) in pending.drain(..) {
            store.record(done, &done_key)?;
        }
        if let Some(monitor) = &self.monitor {
            monitor.log_final_stats();
        }

        let image = ImageRecord {
            recipe: ctx.recipe.recipe.name.clone(),
            version: ctx.recipe.recipe.version.clone(),
            base_image: ctx.recipe.base.image.clone(),
            workdir: ctx.layout.workdir.clone(),
            layers,
            system_packages: ctx.system_packages.clone(),
            requirements: ctx.requirements.clone(),
            env: ctx.image_env.clone(),
            launch: ctx.recipe.launch.clone(),
            built_at: chrono::Utc::now(),
        };
        write_image_record(&ctx.layout.image_record_path(), &image)?;
        tracing::info!("📦 Image record written to {}", ctx.layout.image_record_path().display());

        Ok(BuildReport {
            execution_id: self.execution_id.clone(),
            results,
            image,
        })
    }

    /// 獲取執行摘要
    pub fn get_execution_summary(results: &[PhaseResult]) -> BTreeMap<String, serde_json::Value> {
        let mut summary = BTreeMap::new();

        let executed = results
            .iter()
            .filter(|r| r.outcome == PhaseOutcome::Executed)
            .count();
        let cached = results.len() - executed;
        let total_duration: std::time::Duration = results.iter().map(|r| r.duration).sum();

        summary.insert("total_phases".to_string(), serde_json::Value::from(results.len()));
        summary.insert("executed_phases".to_string(), serde_json::Value::from(executed));
        summary.insert("cached_phases".to_string(), serde_json::Value::from(cached));
        summary.insert(
            "total_duration_ms".to_string(),
            serde_json::Value::from(total_duration.as_millis() as u64),
        );
        let phases: Vec<serde_json::Value> = results
            .iter()
            .map(|r| serde_json::Value::from(r.phase.as_str()))
            .collect();
        summary.insert("phases".to_string(), serde_json::Value::Array(phases));

        summary
    }
}

fn fail_phase(store: &mut dyn LayerStore, kind: PhaseKind, error: BootError) -> BootError {
    tracing::error!("❌ Phase {} failed: {}", kind, error);
    if let Err(e) = store.invalidate_from(kind) {
        tracing::warn!("⚠️ Could not invalidate layers from {}: {}", kind, e);
    }
    error
}

fn advance_after(state: &mut BootState, kind: PhaseKind) -> Result<()> {
    let next = match kind {
        PhaseKind::Manifest => BootState::DependenciesInstalled,
        PhaseKind::Stage => BootState::FilesStaged,
        _ => return Ok(()),
    };
    *state = state.advance(next)?;
    tracing::debug!("🔀 State -> {}", state);
    Ok(())
}

pub fn write_image_record(path: &std::path::Path, image: &ImageRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(image)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn read_image_record(path: &std::path::Path) -> Result<ImageRecord> {
    let data = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => BootError::ImageNotBuiltError {
            path: path.display().to_string(),
        },
        _ => BootError::IoError(e),
    })?;
    Ok(serde_json::from_slice(&data)?)
}
