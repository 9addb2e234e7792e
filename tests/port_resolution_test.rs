mod common;

use anyhow::Result;
use boot_seq::adapters::RecordingRunner;
use boot_seq::core::env::RuntimeEnv;
use boot_seq::core::port::{PortSource, ResolvedPort};
use boot_seq::utils::error::BootError;
use boot_seq::{Bootstrapper, ImageLaunch, RecipeSource, Variant};
use common::Fixture;
use std::sync::Arc;

async fn build_variant(fixture: &Fixture, variant: Variant) -> Result<()> {
    let runner: Arc<dyn boot_seq::core::CommandRunner> = Arc::new(RecordingRunner::new());
    Bootstrapper::new(fixture.options(RecipeSource::Variant(variant)))?
        .with_runner(runner)
        .with_build_env(fixture.build_env())
        .build()
        .await?;
    Ok(())
}

fn resolve(
    fixture: &Fixture,
    variant: Variant,
    runtime: &[(&str, &str)],
) -> Result<std::result::Result<ResolvedPort, BootError>> {
    let boot = Bootstrapper::new(fixture.options(RecipeSource::Variant(variant)))?
        .with_runtime_env(RuntimeEnv::from_pairs(runtime.iter().copied()));
    Ok(boot.resolve_port())
}

#[tokio::test]
async fn test_render_variant_uses_baked_port() -> Result<()> {
    let fixture = Fixture::new()?;
    build_variant(&fixture, Variant::Render).await?;

    let resolved = resolve(&fixture, Variant::Render, &[])??;
    assert_eq!(resolved.port, 10000);
    assert_eq!(resolved.source, PortSource::Image);

    let resolved = resolve(&fixture, Variant::Render, &[("PORT", "8080")])??;
    assert_eq!(resolved.port, 8080);
    assert_eq!(resolved.source, PortSource::Runtime);
    Ok(())
}

#[tokio::test]
async fn test_fallback_variant_defaults_to_3000() -> Result<()> {
    let fixture = Fixture::new()?;
    build_variant(&fixture, Variant::Fallback).await?;

    let resolved = resolve(&fixture, Variant::Fallback, &[])??;
    assert_eq!(resolved.port, 3000);
    assert_eq!(resolved.source, PortSource::Fallback);

    // 空字串等同未設定
    let resolved = resolve(&fixture, Variant::Fallback, &[("PORT", "")])??;
    assert_eq!(resolved.port, 3000);

    let resolved = resolve(&fixture, Variant::Fallback, &[("PORT", "9000")])??;
    assert_eq!(resolved.port, 9000);
    Ok(())
}

#[tokio::test]
async fn test_strict_variant_requires_port() -> Result<()> {
    let fixture = Fixture::new()?;
    build_variant(&fixture, Variant::Strict).await?;

    let err = resolve(&fixture, Variant::Strict, &[])?.unwrap_err();
    assert!(matches!(err, BootError::MissingPortVariableError { ref variable } if variable == "PORT"));
    assert_eq!(err.exit_code(), 4);

    let resolved = resolve(&fixture, Variant::Strict, &[("PORT", "5000")])??;
    assert_eq!(resolved.port, 5000);
    Ok(())
}

#[tokio::test]
async fn test_invalid_runtime_port_is_rejected() -> Result<()> {
    let fixture = Fixture::new()?;
    build_variant(&fixture, Variant::Fallback).await?;

    for value in ["abc", "0", "70000", "-1"] {
        let err = resolve(&fixture, Variant::Fallback, &[("PORT", value)])?.unwrap_err();
        assert!(
            matches!(err, BootError::InvalidPortError { .. }),
            "PORT={} should be rejected, got {}",
            value,
            err
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_render_variant_bakes_noninteractive_frontend() -> Result<()> {
    let fixture = Fixture::new()?;
    build_variant(&fixture, Variant::Render).await?;

    let image = boot_seq::core::sequencer::read_image_record(&fixture.image_record())?;
    assert_eq!(image.env.get("PORT").map(String::as_str), Some("10000"));
    assert_eq!(image.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
    assert_eq!(image.env.get("DEBIAN_FRONTEND").map(String::as_str), Some("noninteractive"));
    assert_eq!(image.system_packages, vec!["ffmpeg", "ca-certificates"]);
    assert_eq!(image.launch.expose, Some(10000));
    Ok(())
}

#[tokio::test]
async fn test_state_dir_launch_needs_no_recipe() -> Result<()> {
    let fixture = Fixture::new()?;
    build_variant(&fixture, Variant::Fallback).await?;

    // 沒有 boot.toml 的目錄，只給 state dir
    let empty = tempfile::TempDir::new()?;
    let mut options = fixture.options(RecipeSource::Context);
    options.context = empty.path().to_path_buf();
    options.state_dir = Some(fixture.workdir().join(".boot"));

    let err = Bootstrapper::new(options.clone()).err();
    assert!(matches!(err, Some(BootError::MissingConfigError { .. })));

    let resolved = ImageLaunch::new(options.clone())
        .with_runtime_env(RuntimeEnv::default())
        .resolve_port()?;
    assert_eq!(resolved.port, 3000);
    assert_eq!(resolved.source, PortSource::Fallback);

    let launcher = ImageLaunch::new(options)
        .with_runtime_env(RuntimeEnv::from_pairs([("PORT", "4100")]))
        .launcher()?;
    assert_eq!(launcher.resolve_port()?.port, 4100);
    Ok(())
}

#[tokio::test]
async fn test_workdir_context_finds_image_record() -> Result<()> {
    let fixture = Fixture::new()?;
    build_variant(&fixture, Variant::Strict).await?;

    // 執行期 cwd 就是 workdir
    let mut options = fixture.options(RecipeSource::Context);
    options.context = fixture.workdir();
    let launch = ImageLaunch::new(options).with_runtime_env(RuntimeEnv::from_pairs([("PORT", "8081")]));

    assert_eq!(launch.record_path(), fixture.image_record());
    let resolved = launch.resolve_port()?;
    assert_eq!(resolved.port, 8081);
    assert_eq!(resolved.source, PortSource::Runtime);
    Ok(())
}
