//! Content hashing for layer keys.
//!
//! A layer key chains the parent key with the phase name and its inputs, so a
//! change in one phase changes every key after it and none before it.

use crate::domain::model::PhaseKind;
use crate::utils::error::{BootError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Length-prefixed field hasher. Field boundaries cannot be forged by content.
pub struct KeyBuilder {
    hasher: Sha256,
}

impl KeyBuilder {
    pub fn new(parent: Option<&str>, phase: PhaseKind) -> Self {
        let mut builder = Self {
            hasher: Sha256::new(),
        };
        builder = builder.field("parent", parent.unwrap_or_default().as_bytes());
        builder.field("phase", phase.as_str().as_bytes())
    }

    pub fn field(mut self, name: &str, value: &[u8]) -> Self {
        self.hasher.update((name.len() as u64).to_le_bytes());
        self.hasher.update(name.as_bytes());
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value);
        self
    }

    pub fn list<I, S>(self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined: Vec<String> = values.into_iter().map(|v| v.as_ref().to_string()).collect();
        self.field(name, joined.join("\0").as_bytes())
    }

    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn file_fingerprint(path: &Path) -> Result<String> {
    let data = std::fs::read(path)?;
    Ok(hash_bytes(&data))
}

/// 以排序後的相對路徑與內容計算整個目錄樹的指紋
pub fn tree_fingerprint(root: &Path, exclude: &[String], skip: &[PathBuf]) -> Result<String> {
    let mut hasher = Sha256::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || (!is_excluded(entry.file_name(), exclude)
                    && !skip.iter().any(|s| entry.path().starts_with(s)))
        });

    for entry in walker {
        let entry = entry.map_err(|e| match e.into_io_error() {
            Some(io) => BootError::IoError(io),
            None => BootError::IoError(std::io::Error::other("filesystem loop while walking tree")),
        })?;
        if entry.depth() == 0 {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| BootError::IoError(std::io::Error::other(e.to_string())))?;
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let file_type = entry.file_type();
        let content = if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            format!("link:{}", target.to_string_lossy())
        } else if file_type.is_dir() {
            "dir".to_string()
        } else {
            format!("file:{}", file_fingerprint(entry.path())?)
        };

        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update(content.as_bytes());
        hasher.update([b'\n']);
    }

    Ok(hex::encode(hasher.finalize()))
}

pub fn is_excluded(name: &std::ffi::OsStr, exclude: &[String]) -> bool {
    let name = name.to_string_lossy();
    exclude.iter().any(|e| e.as_str() == name)
}
