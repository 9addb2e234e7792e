use std::path::PathBuf;

pub const STATE_DIR_NAME: &str = ".boot";
pub const IMAGE_RECORD_FILE: &str = "image.json";
pub const LAYER_CACHE_FILE: &str = "layers.json";

/// Where things live on the host: the filesystem root the image is built
/// into, the build context, and the declared (absolute) workdir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: PathBuf,
    pub context: PathBuf,
    pub workdir: String,
    state_dir: Option<PathBuf>,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>, context: impl Into<PathBuf>, workdir: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            context: context.into(),
            workdir: workdir.into(),
            state_dir: None,
        }
    }

    pub fn with_state_dir(mut self, state_dir: Option<PathBuf>) -> Self {
        self.state_dir = state_dir;
        self
    }

    /// Resolves an absolute in-image path under the root.
    pub fn host_path(&self, image_path: &str) -> PathBuf {
        self.root.join(image_path.trim_start_matches('/'))
    }

    pub fn host_workdir(&self) -> PathBuf {
        self.host_path(&self.workdir)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.host_workdir().join(STATE_DIR_NAME))
    }

    pub fn image_record_path(&self) -> PathBuf {
        self.state_dir().join(IMAGE_RECORD_FILE)
    }

    pub fn layer_cache_path(&self) -> PathBuf {
        self.state_dir().join(LAYER_CACHE_FILE)
    }

    pub fn context_path(&self, relative: &str) -> PathBuf {
        self.context.join(relative)
    }
}
