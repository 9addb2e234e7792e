use crate::utils::error::{BootError, Result};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    /// Everything after the name: extras, version specifiers, markers.
    pub spec: String,
}

impl Requirement {
    /// PEP 503 正規化名稱：小寫，連續的 - _ . 合併為 -
    pub fn normalized_name(&self) -> String {
        let mut out = String::with_capacity(self.name.len());
        let mut last_sep = false;
        for c in self.name.chars() {
            if matches!(c, '-' | '_' | '.') {
                if !last_sep {
                    out.push('-');
                }
                last_sep = true;
            } else {
                out.push(c.to_ascii_lowercase());
                last_sep = false;
            }
        }
        out
    }

    pub fn as_line(&self) -> String {
        if self.spec.is_empty() {
            self.name.clone()
        } else {
            format!("{}{}", self.name, self.spec)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEntry {
    Requirement(Requirement),
    /// Installer options such as `--extra-index-url`, kept verbatim.
    Option(String),
    /// URLs, VCS references, archives and local paths, passed through verbatim.
    Reference(String),
}

/// Ordered dependency list, read once per build.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DependencyManifest {
    entries: Vec<ManifestEntry>,
}

fn requirement_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9](?:[A-Za-z0-9._\-]*[A-Za-z0-9])?)\s*(\[[^\]]*\])?\s*(.*)$")
            .expect("static regex")
    })
}

impl DependencyManifest {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = read_manifest_bytes(path)?;
        Self::parse(&String::from_utf8_lossy(&bytes))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut entries = Vec::new();
        let mut pending = String::new();
        let mut pending_start = 0;

        for (index, raw) in content.lines().enumerate() {
            let line_no = index + 1;
            if pending.is_empty() {
                pending_start = line_no;
            }

            // 行尾反斜線代表接續下一行
            if let Some(continued) = raw.strip_suffix('\\') {
                pending.push_str(continued);
                pending.push(' ');
                continue;
            }
            pending.push_str(raw);

            let line = strip_comment(&pending).trim().to_string();
            pending.clear();
            if line.is_empty() {
                continue;
            }

            if line.starts_with('-') {
                entries.push(ManifestEntry::Option(line));
                continue;
            }

            match parse_requirement(&line) {
                Ok(requirement) => entries.push(ManifestEntry::Requirement(requirement)),
                Err(_) if is_direct_reference(&line) => entries.push(ManifestEntry::Reference(line)),
                Err(reason) => {
                    return Err(BootError::ManifestParseError {
                        line: pending_start,
                        reason,
                    })
                }
            }
        }

        if !pending.trim().is_empty() {
            return Err(BootError::ManifestParseError {
                line: pending_start,
                reason: "dangling line continuation".to_string(),
            });
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn requirements(&self) -> impl Iterator<Item = &Requirement> {
        self.entries.iter().filter_map(|e| match e {
            ManifestEntry::Requirement(r) => Some(r),
            _ => None,
        })
    }

    /// Named requirements and direct references, in manifest order.
    pub fn requirement_lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                ManifestEntry::Requirement(r) => Some(r.as_line()),
                ManifestEntry::Reference(line) => Some(line.clone()),
                ManifestEntry::Option(_) => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Missing manifests are build-fatal and reported as such, not as plain IO errors.
pub fn read_manifest_bytes(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => BootError::ManifestMissingError {
            path: path.display().to_string(),
        },
        _ => BootError::IoError(e),
    })
}

fn parse_requirement(line: &str) -> std::result::Result<Requirement, String> {
    let caps = requirement_regex()
        .captures(line)
        .ok_or_else(|| format!("'{}' is not a requirement", line))?;

    let extras = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    let rest = caps.get(3).map(|m| m.as_str().trim()).unwrap_or_default();
    if !rest.is_empty() && !rest.starts_with(['=', '<', '>', '!', '~', ';', '@']) {
        return Err(format!("unexpected '{}' after package name", rest));
    }

    Ok(Requirement {
        name: caps[1].to_string(),
        spec: format!("{}{}", extras, rest),
    })
}

const REFERENCE_PREFIXES: [&str; 9] = ["git+", "hg+", "svn+", "bzr+", "file:", ".", "/", "~", "$"];
const ARCHIVE_SUFFIXES: [&str; 5] = [".whl", ".tar.gz", ".tgz", ".tar.bz2", ".zip"];

/// pip 也接受的非名稱行：`https://...`、`git+...`、`./pkg`、`dist/x.whl`
fn is_direct_reference(line: &str) -> bool {
    let target = line.split(';').next().unwrap_or(line).trim();
    target.contains("://")
        || REFERENCE_PREFIXES.iter().any(|p| target.starts_with(p))
        || ARCHIVE_SUFFIXES.iter().any(|s| target.ends_with(s))
}

fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    // pip 只把前面有空白的 # 視為註解
    match line.find(" #").or_else(|| line.find("\t#")) {
        Some(i) => &line[..i],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requirements() {
        let manifest = DependencyManifest::parse(
            "# api\nfastapi==0.110.0\nuvicorn[standard] >=0.29  # server\n\npython-multipart\nnumpy; python_version >= \"3.9\"\n",
        )
        .unwrap();

        let lines = manifest.requirement_lines();
        assert_eq!(
            lines,
            vec![
                "fastapi==0.110.0",
                "uvicorn[standard]>=0.29",
                "python-multipart",
                "numpy; python_version >= \"3.9\"",
            ]
        );
    }

    #[test]
    fn test_options_are_kept_in_order() {
        let manifest =
            DependencyManifest::parse("--extra-index-url https://pypi.example/simple\nfastapi\n").unwrap();
        assert_eq!(
            manifest.entries()[0],
            ManifestEntry::Option("--extra-index-url https://pypi.example/simple".to_string())
        );
        assert_eq!(manifest.requirements().count(), 1);
    }

    #[test]
    fn test_direct_references_pass_through() {
        let manifest = DependencyManifest::parse(
            "fastapi\n\
             git+https://github.com/encode/uvicorn.git@0.29.0#egg=uvicorn\n\
             https://files.example/pkg-1.0.tar.gz\n\
             ./vendor/localpkg\n\
             dist/tool-2.0-py3-none-any.whl\n\
             starlette @ https://files.example/starlette.zip\n",
        )
        .unwrap();

        assert_eq!(
            manifest.entries()[1],
            ManifestEntry::Reference("git+https://github.com/encode/uvicorn.git@0.29.0#egg=uvicorn".to_string())
        );
        assert_eq!(
            manifest.entries()[3],
            ManifestEntry::Reference("./vendor/localpkg".to_string())
        );
        assert_eq!(manifest.requirements().count(), 2);
        assert_eq!(manifest.requirement_lines().len(), 6);
    }

    #[test]
    fn test_line_continuation() {
        let manifest = DependencyManifest::parse("fastapi \\\n  ==0.110.0\n").unwrap();
        assert_eq!(manifest.requirement_lines(), vec!["fastapi==0.110.0"]);
    }

    #[test]
    fn test_invalid_line_reports_line_number() {
        let err = DependencyManifest::parse("fastapi\nnot a package\n").unwrap_err();
        match err {
            BootError::ManifestParseError { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_normalized_name() {
        let req = Requirement {
            name: "Python_Multipart".to_string(),
            spec: String::new(),
        };
        assert_eq!(req.normalized_name(), "python-multipart");
    }

    #[test]
    fn test_missing_file_is_manifest_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = DependencyManifest::from_file(&dir.path().join("requirements.txt")).unwrap_err();
        assert!(matches!(err, BootError::ManifestMissingError { .. }));
    }
}
