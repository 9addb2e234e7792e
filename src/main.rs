use boot_seq::core::sequencer::BootSequence;
use boot_seq::utils::error::BootError;
use boot_seq::utils::logger;
use boot_seq::{BootOptions, Bootstrapper, CliConfig, Command, ImageLaunch, LaunchMode, RecipeSource};
use clap::Parser;

fn boot_options(config: &CliConfig) -> BootOptions {
    let source = match (&config.variant, &config.recipe) {
        (Some(variant), _) => RecipeSource::Variant(*variant),
        (None, Some(path)) => RecipeSource::File(path.clone()),
        (None, None) => RecipeSource::Context,
    };
    let defaults = BootOptions::default();

    BootOptions {
        source,
        context: config.context.clone(),
        root: config.root.clone(),
        state_dir: config.state_dir.clone(),
        use_cache: !config.no_cache,
        mode: if config.supervise {
            LaunchMode::Supervise
        } else {
            defaults.mode
        },
        monitor: config.monitor,
        execution_id: config.execution_id.clone(),
    }
}

async fn run(config: &CliConfig) -> Result<i32, BootError> {
    let options = boot_options(config);

    match config.command {
        Command::Plan => {
            let boot = Bootstrapper::new(options)?;
            let planned = boot.plan().await?;
            println!("📋 Plan for '{}':", boot.recipe().recipe.name);
            for phase in planned {
                let status = if phase.cached { "cached" } else { "run" };
                println!("  {:<9} {:<7} {}", phase.phase.as_str(), status, &phase.key[..16]);
            }
            Ok(0)
        }
        Command::Build => {
            let boot = Bootstrapper::new(options)?;
            let report = boot.build().await?;
            let summary = BootSequence::get_execution_summary(&report.results);
            tracing::info!("📊 Execution summary: {:?}", summary);
            println!("✅ Build {} completed", report.execution_id);
            println!(
                "📦 {} phases, {} executed, {} cached",
                summary["total_phases"], summary["executed_phases"], summary["cached_phases"]
            );
            println!("📁 Image record: {}", boot.layout().image_record_path().display());
            Ok(0)
        }
        // launch 與 resolve-port 只讀映像記錄，不載入 recipe
        Command::Launch => {
            let report = ImageLaunch::new(options).launch().await?;
            Ok(report.code.unwrap_or(1))
        }
        Command::ResolvePort => {
            let resolved = ImageLaunch::new(options).resolve_port()?;
            tracing::info!("🔌 Port from {}", resolved.source);
            println!("{}", resolved.port);
            Ok(0)
        }
        Command::Up => {
            let report = Bootstrapper::new(options)?.up().await?;
            Ok(report.code.unwrap_or(1))
        }
        Command::Render => {
            print!("{}", Bootstrapper::new(options)?.render());
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    let config = CliConfig::parse();

    // 初始化日誌
    if config.json_logs {
        logger::init_json_logger(config.verbose);
    } else {
        logger::init_cli_logger(config.verbose);
    }

    tracing::info!("Starting boot-seq {:?}", config.command);
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }
    if config.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }

    match run(&config).await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(
                "❌ boot-seq failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            std::process::exit(e.exit_code());
        }
    }
}
