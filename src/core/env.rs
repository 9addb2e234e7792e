use std::collections::BTreeMap;
use std::ffi::OsString;

/// Environment injected at container start, captured once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeEnv {
    vars: BTreeMap<String, String>,
}

impl RuntimeEnv {
    pub fn from_process() -> Self {
        Self::from_os_pairs(std::env::vars_os())
    }

    /// 非 UTF-8 的變數無法傳給伺服器，直接略過
    pub fn from_os_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let vars = pairs
            .into_iter()
            .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
                (Ok(key), Ok(value)) => Some((key, value)),
                (key, _) => {
                    tracing::debug!("Skipping non UTF-8 environment variable {:?}", key);
                    None
                }
            })
            .collect();
        Self { vars }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// 空字串視為未設定，與 shell 的 ${VAR:-default} 一致
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn search_path(&self) -> Option<OsString> {
        self.get("PATH").map(OsString::from)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }
}

/// Image environment with the runtime environment laid over it.
pub fn layered(image: &BTreeMap<String, String>, runtime: &RuntimeEnv) -> BTreeMap<String, String> {
    let mut merged = image.clone();
    for (key, value) in runtime.vars() {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
