use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

const CONFIG_FILE_PATH: &str = "config.toml";
const DEFAULT_API_BASE: &str = "https://localhost:5001";
const CREDENTIALS_FILE: &str = "session.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_refresh_timeout_secs")]
    pub refresh_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_transient_retries: u32,
    #[serde(default)]
    pub http_proxy: String,
    #[serde(default)]
    pub https_proxy: String,
    /// Accept self-signed certificates, e.g. a local dev server on :5001.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_refresh_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}

fn parse_bool_env(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            data_dir: None,
            refresh_timeout_secs: default_refresh_timeout_secs(),
            max_transient_retries: default_max_retries(),
            http_proxy: String::new(),
            https_proxy: String::new(),
            accept_invalid_certs: false,
            login_path: default_login_path(),
            refresh_path: default_refresh_path(),
        }
    }
}

impl ClientConfig {
    /// Defaults, then `config.toml` in the working directory, then environment.
    pub fn load() -> Self {
        let mut config = Self::from_file(Path::new(CONFIG_FILE_PATH)).unwrap_or_default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    pub fn from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                warn!("Failed to read {:?}: {}", path, err);
                return None;
            }
        };
        match toml::from_str::<ClientConfig>(&content) {
            Ok(config) => Some(config),
            Err(err) => {
                warn!("Failed to parse {:?}: {}", path, err);
                None
            }
        }
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(api_base) = lookup("EVENTHUB_API_BASE") {
            self.api_base = api_base;
        }
        if let Some(data_dir) = lookup("EVENTHUB_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(data_dir));
        }
        if let Some(timeout) = lookup("EVENTHUB_REFRESH_TIMEOUT_SECS") {
            match timeout.trim().parse() {
                Ok(secs) => self.refresh_timeout_secs = secs,
                Err(_) => warn!("Ignoring invalid EVENTHUB_REFRESH_TIMEOUT_SECS={timeout:?}"),
            }
        }
        if let Some(retries) = lookup("EVENTHUB_MAX_RETRIES") {
            match retries.trim().parse() {
                Ok(retries) => self.max_transient_retries = retries,
                Err(_) => warn!("Ignoring invalid EVENTHUB_MAX_RETRIES={retries:?}"),
            }
        }
        if let Some(http_proxy) = lookup("HTTP_PROXY") {
            self.http_proxy = http_proxy;
        }
        if let Some(https_proxy) = lookup("HTTPS_PROXY") {
            self.https_proxy = https_proxy;
        }
        if let Some(insecure) = lookup("EVENTHUB_INSECURE") {
            self.accept_invalid_certs = parse_bool_env(&insecure);
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("eventhub")
        })
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir().join(CREDENTIALS_FILE)
    }

    /// Joins an endpoint path onto the API base.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
