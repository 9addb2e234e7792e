use crate::utils::error::{BootError, Result};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// How strongly a base image reference pins its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PinLevel {
    /// No tag, `latest`, or a codename-only tag such as `slim`.
    Floating,
    /// One or two numeric components (`3`, `3.11-slim`).
    Major,
    /// Three or more numeric components (`3.11.7-slim`).
    Exact,
    /// `@sha256:...`
    Digest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

fn repository_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([a-zA-Z0-9.\-]+(:[0-9]+)?/)?[a-z0-9]+([._\-/][a-z0-9]+)*$").expect("static regex")
    })
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]{0,127}$").expect("static regex"))
}

fn digest_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^sha256:[a-f0-9]{64}$").expect("static regex"))
}

impl ImageRef {
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = |reason: &str| BootError::InvalidConfigValueError {
            field: "base.image".to_string(),
            value: reference.to_string(),
            reason: reason.to_string(),
        };

        let (name, digest) = match reference.split_once('@') {
            Some((name, digest)) => {
                if !digest_regex().is_match(digest) {
                    return Err(invalid("Digest must be sha256:<64 hex chars>"));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // registry:port/repo:tag，只有最後一個 '/' 之後的 ':' 才是 tag
        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (repository, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&name[..split], Some(name[split + 1..].to_string()))
            }
            None => (name, None),
        };

        if !repository_regex().is_match(repository) {
            return Err(invalid("Invalid repository name"));
        }
        if let Some(tag) = &tag {
            if !tag_regex().is_match(tag) {
                return Err(invalid("Invalid tag"));
            }
        }

        Ok(Self {
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    pub fn pin_level(&self) -> PinLevel {
        if self.digest.is_some() {
            return PinLevel::Digest;
        }
        let Some(tag) = &self.tag else {
            return PinLevel::Floating;
        };

        let version = tag.split('-').next().unwrap_or_default();
        let numeric = version
            .split('.')
            .take_while(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
            .count();

        match numeric {
            0 => PinLevel::Floating,
            1 | 2 => PinLevel::Major,
            _ => PinLevel::Exact,
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_image() {
        let image = ImageRef::parse("python:3.11-slim").unwrap();
        assert_eq!(image.repository, "python");
        assert_eq!(image.tag.as_deref(), Some("3.11-slim"));
        assert_eq!(image.pin_level(), PinLevel::Major);
        assert_eq!(image.to_string(), "python:3.11-slim");
    }

    #[test]
    fn test_registry_port_is_not_a_tag() {
        let image = ImageRef::parse("registry.local:5000/team/python").unwrap();
        assert_eq!(image.repository, "registry.local:5000/team/python");
        assert!(image.tag.is_none());
        assert_eq!(image.pin_level(), PinLevel::Floating);
    }

    #[test]
    fn test_pin_levels() {
        assert_eq!(ImageRef::parse("python").unwrap().pin_level(), PinLevel::Floating);
        assert_eq!(ImageRef::parse("python:latest").unwrap().pin_level(), PinLevel::Floating);
        assert_eq!(ImageRef::parse("python:3").unwrap().pin_level(), PinLevel::Major);
        assert_eq!(ImageRef::parse("python:3.11.7-slim").unwrap().pin_level(), PinLevel::Exact);

        let digest = format!("python:3.11-slim@sha256:{}", "a".repeat(64));
        assert_eq!(ImageRef::parse(&digest).unwrap().pin_level(), PinLevel::Digest);
    }

    #[test]
    fn test_invalid_references() {
        assert!(ImageRef::parse("Python:3.11").is_err());
        assert!(ImageRef::parse("python:3.11@sha256:abc").is_err());
        assert!(ImageRef::parse("python:").is_err());
    }
}
