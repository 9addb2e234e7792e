use crate::domain::model::LaunchSpec;
use crate::utils::error::{BootError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub recipe: RecipeInfo,
    pub base: BaseConfig,
    #[serde(default)]
    pub system: SystemConfig,
    pub workdir: WorkdirConfig,
    pub manifest: ManifestConfig,
    #[serde(default)]
    pub stage: StageConfig,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub launch: LaunchSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseConfig {
    pub image: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Apk,
    None,
}

impl PackageManager {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt",
            PackageManager::Apk => "apk",
            PackageManager::None => "none",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_package_manager")]
    pub package_manager: PackageManager,
    #[serde(default)]
    pub packages: Vec<String>,
    /// 安裝時匯出 DEBIAN_FRONTEND=noninteractive，並寫入映像環境
    #[serde(default)]
    pub noninteractive: bool,
    #[serde(default = "default_true")]
    pub clean_cache: bool,
    #[serde(default)]
    pub verify_binaries: Vec<String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            package_manager: default_package_manager(),
            packages: Vec::new(),
            noninteractive: false,
            clean_cache: true,
            verify_binaries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkdirConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestConfig {
    #[serde(default = "default_manifest_path")]
    pub path: String,
    /// `{manifest}` 會被替換成 manifest 在工作目錄中的相對路徑
    #[serde(default = "default_installer")]
    pub installer: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(default = "default_excludes")]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub ensure_dirs: Vec<String>,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            exclude: default_excludes(),
            ensure_dirs: Vec::new(),
        }
    }
}

fn default_version() -> String {
    "0.0.0".to_string()
}

fn default_package_manager() -> PackageManager {
    PackageManager::Apt
}

fn default_true() -> bool {
    true
}

pub(crate) fn default_manifest_path() -> String {
    "requirements.txt".to_string()
}

pub(crate) fn default_installer() -> Vec<String> {
    ["pip", "install", "--no-cache-dir", "-r", "{manifest}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn default_excludes() -> Vec<String> {
    [".git", "__pycache__", ".boot"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn env_reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex"))
}

impl Recipe {
    /// 從 TOML 檔案載入 recipe
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(BootError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析 recipe
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| BootError::RecipeParseError {
            message: e.to_string(),
        })
    }

    /// 替換環境變數 (例如 ${BASE_TAG})，未設定的保持原樣
    fn substitute_env_vars(content: &str) -> String {
        env_reference_regex()
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }

    /// 去重後的系統套件，保留第一次出現的順序
    pub fn system_packages(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.system
            .packages
            .iter()
            .filter(|p| seen.insert(p.as_str()))
            .cloned()
            .collect()
    }

    /// 映像層級的環境變數：[env] 加上 noninteractive 時的 DEBIAN_FRONTEND
    pub fn image_env(&self) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        if self.system.noninteractive && self.system.package_manager == PackageManager::Apt {
            env.entry("DEBIAN_FRONTEND".to_string())
                .or_insert_with(|| "noninteractive".to_string());
        }
        env
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_non_empty_string("recipe.name", &self.recipe.name)?;
        validation::validate_non_empty_string("base.image", &self.base.image)?;
        crate::core::image_ref::ImageRef::parse(&self.base.image)?;

        validation::validate_package_names("system.packages", &self.system.packages)?;
        for binary in &self.system.verify_binaries {
            validation::validate_non_empty_string("system.verify_binaries", binary)?;
        }

        validation::validate_absolute_path("workdir.path", &self.workdir.path)?;
        validation::validate_relative_path("manifest.path", &self.manifest.path)?;

        if self.manifest.installer.is_empty() {
            return Err(BootError::MissingConfigError {
                field: "manifest.installer".to_string(),
            });
        }
        if !self.manifest.installer.iter().any(|a| a.contains("{manifest}")) {
            return Err(BootError::InvalidConfigValueError {
                field: "manifest.installer".to_string(),
                value: self.manifest.installer.join(" "),
                reason: "Installer must reference {manifest}".to_string(),
            });
        }

        for dir in &self.stage.ensure_dirs {
            validation::validate_relative_path("stage.ensure_dirs", dir)?;
        }
        validation::validate_env_names("env", self.env.keys())?;

        self.validate_launch()
    }

    fn validate_launch(&self) -> Result<()> {
        let launch = &self.launch;
        validation::validate_non_empty_string("launch.server", &launch.server)?;
        validation::validate_non_empty_string("launch.host", &launch.host)?;
        validation::validate_env_names("launch.port_env", std::iter::once(&launch.port_env))?;

        // ASGI 入口格式 module:attribute
        match launch.app.split_once(':') {
            Some((module, attr)) if !module.trim().is_empty() && !attr.trim().is_empty() => {}
            _ => {
                return Err(BootError::InvalidConfigValueError {
                    field: "launch.app".to_string(),
                    value: launch.app.clone(),
                    reason: "Expected 'module:attribute', e.g. 'main:app'".to_string(),
                })
            }
        }

        if let Some(dir) = &launch.app_dir {
            validation::validate_relative_path("launch.app_dir", dir)?;
        }
        if let Some(port) = launch.fallback_port {
            validation::validate_range("launch.fallback_port", port, 1, u16::MAX)?;
        }
        if let Some(port) = launch.expose {
            validation::validate_range("launch.expose", port, 1, u16::MAX)?;
        }
        if let Some(value) = self.env.get(&launch.port_env) {
            crate::core::port::parse_port(value, "env")?;
        }
        Ok(())
    }
}

impl Validate for Recipe {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
