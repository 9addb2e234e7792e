use crate::utils::error::{BootError, Result};
use regex::Regex;
use std::sync::OnceLock;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn package_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Debian/Alpine 套件名稱：小寫字母數字開頭，允許 + - . 以及可選的 =version
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9+.\-]*(=[A-Za-z0-9.+~:\-]+)?$").expect("static regex")
    })
}

fn env_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(BootError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if path.contains('\0') {
        return Err(BootError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_absolute_path(field_name: &str, path: &str) -> Result<()> {
    validate_path(field_name, path)?;
    if !path.starts_with('/') {
        return Err(BootError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path must be absolute".to_string(),
        });
    }
    Ok(())
}

/// 相對路徑不可跳出建置上下文
pub fn validate_relative_path(field_name: &str, path: &str) -> Result<()> {
    validate_path(field_name, path)?;
    let escapes = std::path::Path::new(path)
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir | std::path::Component::RootDir));
    if escapes {
        return Err(BootError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path must stay inside the build context".to_string(),
        });
    }
    Ok(())
}

pub fn validate_package_names(field_name: &str, packages: &[String]) -> Result<()> {
    for package in packages {
        if !package_name_regex().is_match(package) {
            return Err(BootError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: package.clone(),
                reason: "Not a valid package name".to_string(),
            });
        }
    }
    Ok(())
}

pub fn validate_env_names<'a, I>(field_name: &str, names: I) -> Result<()>
where
    I: IntoIterator<Item = &'a String>,
{
    for name in names {
        if !env_name_regex().is_match(name) {
            return Err(BootError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: name.clone(),
                reason: "Not a valid environment variable name".to_string(),
            });
        }
    }
    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BootError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(BootError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_package_names() {
        let ok = vec!["ffmpeg".to_string(), "ca-certificates".to_string(), "libstdc++6".to_string()];
        assert!(validate_package_names("system.packages", &ok).is_ok());

        let pinned = vec!["ffmpeg=7:5.1.6-0+deb12u1".to_string()];
        assert!(validate_package_names("system.packages", &pinned).is_ok());

        let bad = vec!["ffmpeg; rm -rf /".to_string()];
        assert!(validate_package_names("system.packages", &bad).is_err());
    }

    #[test]
    fn test_validate_paths() {
        assert!(validate_absolute_path("workdir.path", "/app").is_ok());
        assert!(validate_absolute_path("workdir.path", "app").is_err());
        assert!(validate_relative_path("manifest.path", "requirements.txt").is_ok());
        assert!(validate_relative_path("manifest.path", "../secrets.txt").is_err());
        assert!(validate_relative_path("manifest.path", "/etc/passwd").is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range("launch.fallback_port", 3000u16, 1, u16::MAX).is_ok());
        assert!(validate_range("launch.fallback_port", 0u16, 1, u16::MAX).is_err());
    }

    #[test]
    fn test_validate_env_names() {
        let names = vec!["PORT".to_string(), "PYTHONUNBUFFERED".to_string()];
        assert!(validate_env_names("env", &names).is_ok());
        let bad = vec!["1PORT".to_string()];
        assert!(validate_env_names("env", &bad).is_err());
    }
}
