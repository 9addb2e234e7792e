use crate::domain::model::PhaseKind;
use crate::domain::ports::LayerStore;
use crate::utils::error::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Layer keys persisted as a JSON map, phase name -> key.
#[derive(Debug)]
pub struct JsonLayerStore {
    path: PathBuf,
    keys: BTreeMap<PhaseKind, String>,
}

impl JsonLayerStore {
    /// 檔案不存在或損壞時視為空快取，全部重新建置
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let keys = match std::fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
                tracing::warn!("⚠️ Ignoring unreadable layer cache {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self { path, keys }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&self.keys)?)?;
        Ok(())
    }
}

impl LayerStore for JsonLayerStore {
    fn cached_key(&self, phase: PhaseKind) -> Option<String> {
        self.keys.get(&phase).cloned()
    }

    fn record(&mut self, phase: PhaseKind, key: &str) -> Result<()> {
        self.keys.insert(phase, key.to_string());
        self.save()
    }

    /// 沒有東西可刪時不寫檔，失敗的建置不會因此建立 state dir
    fn invalidate_from(&mut self, phase: PhaseKind) -> Result<()> {
        if self.keys.split_off(&phase).is_empty() {
            return Ok(());
        }
        self.save()
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryLayerStore {
    keys: BTreeMap<PhaseKind, String>,
}

impl MemoryLayerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LayerStore for MemoryLayerStore {
    fn cached_key(&self, phase: PhaseKind) -> Option<String> {
        self.keys.get(&phase).cloned()
    }

    fn record(&mut self, phase: PhaseKind, key: &str) -> Result<()> {
        self.keys.insert(phase, key.to_string());
        Ok(())
    }

    fn invalidate_from(&mut self, phase: PhaseKind) -> Result<()> {
        self.keys.split_off(&phase);
        Ok(())
    }
}
