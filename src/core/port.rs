//! Port resolution. One rule for every recipe:
//! runtime variable, then the image-baked variable, then the recipe's
//! `fallback_port`, otherwise fail.

use crate::core::env::RuntimeEnv;
use crate::domain::model::LaunchSpec;
use crate::utils::error::{BootError, Result};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSource {
    Runtime,
    Image,
    Fallback,
}

impl fmt::Display for PortSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PortSource::Runtime => "runtime environment",
            PortSource::Image => "image environment",
            PortSource::Fallback => "launch fallback",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPort {
    pub port: u16,
    pub source: PortSource,
}

pub fn parse_port(value: &str, source_name: &str) -> Result<u16> {
    let invalid = || BootError::InvalidPortError {
        value: value.to_string(),
        source_name: source_name.to_string(),
    };
    let port: u16 = value.trim().parse().map_err(|_| invalid())?;
    if port == 0 {
        return Err(invalid());
    }
    Ok(port)
}

pub fn resolve_port(
    launch: &LaunchSpec,
    image_env: &BTreeMap<String, String>,
    runtime: &RuntimeEnv,
) -> Result<ResolvedPort> {
    let variable = launch.port_env.as_str();

    if let Some(value) = runtime.get(variable) {
        return Ok(ResolvedPort {
            port: parse_port(value, variable)?,
            source: PortSource::Runtime,
        });
    }

    if let Some(value) = image_env.get(variable).filter(|v| !v.is_empty()) {
        return Ok(ResolvedPort {
            port: parse_port(value, variable)?,
            source: PortSource::Image,
        });
    }

    match launch.fallback_port {
        Some(port) => Ok(ResolvedPort {
            port,
            source: PortSource::Fallback,
        }),
        None => Err(BootError::MissingPortVariableError {
            variable: variable.to_string(),
        }),
    }
}

/// 啟動前先確認位址可以綁定，讓「埠已被佔用」在啟動器就失敗
pub async fn probe_bind(host: &str, port: u16) -> Result<()> {
    let address = format!("{}:{}", host, port);
    match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(e) => Err(BootError::PortUnavailableError {
            address,
            reason: e.to_string(),
        }),
    }
}
