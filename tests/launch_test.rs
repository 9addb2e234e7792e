#![cfg(unix)]

mod common;

use anyhow::Result;
use boot_seq::adapters::RecordingRunner;
use boot_seq::core::env::RuntimeEnv;
use boot_seq::domain::model::BootState;
use boot_seq::utils::error::BootError;
use boot_seq::{Bootstrapper, Recipe};
use common::Fixture;
use std::sync::Arc;

fn recipe_with_server(server: &str) -> Result<Recipe> {
    let mut recipe = common::test_recipe()?;
    recipe.launch.server = server.to_string();
    Ok(recipe)
}

fn runtime(port: u16) -> RuntimeEnv {
    RuntimeEnv::from_pairs([
        ("PATH".to_string(), "/usr/bin:/bin".to_string()),
        ("PORT".to_string(), port.to_string()),
    ])
}

async fn built(fixture: &Fixture, server: &str) -> Result<Bootstrapper> {
    let runner = Arc::new(RecordingRunner::new());
    let boot = fixture.bootstrapper(recipe_with_server(server)?, &runner);
    boot.build().await?;
    Ok(boot)
}

#[tokio::test]
async fn test_supervised_server_exit_ok() -> Result<()> {
    let fixture = Fixture::new()?;
    let boot = built(&fixture, "true")
        .await?
        .with_runtime_env(runtime(common::free_port()?));

    let report = boot.launch().await?;
    assert_eq!(report.state, BootState::ExitedOk);
    assert_eq!(report.code, Some(0));
    Ok(())
}

#[tokio::test]
async fn test_supervised_server_failure_maps_to_exited_error() -> Result<()> {
    let fixture = Fixture::new()?;
    let boot = built(&fixture, "false")
        .await?
        .with_runtime_env(runtime(common::free_port()?));

    let report = boot.launch().await?;
    assert_eq!(report.state, BootState::ExitedError);
    assert_eq!(report.code, Some(1));
    Ok(())
}

#[tokio::test]
async fn test_launch_plan_uses_resolved_port_everywhere() -> Result<()> {
    let fixture = Fixture::new()?;
    let boot = built(&fixture, "true").await?.with_runtime_env(runtime(4321));

    let plan = boot.launcher()?.plan()?;
    assert_eq!(
        plan.args,
        vec!["main:app", "--host", "127.0.0.1", "--port", "4321"]
    );
    assert_eq!(plan.env.get("PORT").map(String::as_str), Some("4321"));
    assert_eq!(plan.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
    assert_eq!(plan.cwd, fixture.workdir());
    Ok(())
}

#[tokio::test]
async fn test_port_in_use_fails_before_spawn() -> Result<()> {
    let fixture = Fixture::new()?;
    let holder = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = holder.local_addr()?.port();
    let boot = built(&fixture, "true").await?.with_runtime_env(runtime(port));

    let mut launcher = boot.launcher()?;
    let err = launcher
        .launch(boot_seq::LaunchMode::Supervise)
        .await
        .unwrap_err();
    assert!(matches!(err, BootError::PortUnavailableError { .. }));
    assert_eq!(launcher.state(), BootState::ExitedError);
    drop(holder);
    Ok(())
}

#[tokio::test]
async fn test_missing_server_binary() -> Result<()> {
    let fixture = Fixture::new()?;
    let boot = built(&fixture, "uvicorn-not-installed-here")
        .await?
        .with_runtime_env(runtime(common::free_port()?));

    let err = boot.launch().await.unwrap_err();
    assert!(matches!(err, BootError::BinaryNotFoundError { ref binary } if binary == "uvicorn-not-installed-here"));
    Ok(())
}

#[tokio::test]
async fn test_up_builds_then_launches() -> Result<()> {
    let fixture = Fixture::new()?;
    let runner = Arc::new(RecordingRunner::new());
    let boot = fixture
        .bootstrapper(recipe_with_server("true")?, &runner)
        .with_runtime_env(runtime(common::free_port()?));

    let report = boot.up().await?;
    assert_eq!(report.state, BootState::ExitedOk);
    assert!(fixture.image_record().exists());
    assert_eq!(runner.programs(), vec!["apt-get", "apt-get", "pip"]);
    Ok(())
}
