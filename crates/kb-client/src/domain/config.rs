//! Bridge configuration with validation.
//!
//! Loaded from TOML; every section has defaults so an empty file is valid.
//!
//! ```toml
//! units = ["analytics.ipynb"]
//!
//! [server]
//! url = "https://notebooks.example.com"
//! request_timeout = "30s"
//!
//! [auth]
//! kind = "token"
//! token = "..."
//!
//! [kernel]
//! execute_timeout = "5m"
//! ```

use crate::domain::error::ConfigError;
use kb_types::codec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Main bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Notebook server endpoints
    pub server: ServerConfig,
    /// Authenticator selection
    pub auth: AuthConfig,
    /// Units (notebook paths) run by `start_all`, in order
    pub units: Vec<String>,
    /// Per-kernel behaviour
    pub kernel: KernelConfig,
    /// Start every unit as soon as the runtime comes up
    pub start_on_open: bool,
}

impl BridgeConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.server.url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {e}", self.server.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "{}: scheme must be http or https",
                self.server.url
            )));
        }

        if self.server.request_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("request_timeout cannot be 0".into()));
        }
        if self.kernel.execute_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("execute_timeout cannot be 0".into()));
        }

        let version = self.kernel.codec_version;
        if version == 0 || version > codec::MAX_CODEC_VERSION {
            return Err(ConfigError::InvalidCodecVersion {
                version,
                max: codec::MAX_CODEC_VERSION,
            });
        }

        Ok(())
    }
}

/// Notebook server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the notebook server
    pub url: String,
    /// Collection of execution contexts (kernels)
    pub contexts_path: String,
    /// Content store root
    pub contents_path: String,
    /// Page fetched before provisioning to obtain the XSRF cookie
    pub landing_path: String,
    /// Timeout for each HTTP request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8888".to_string(),
            contexts_path: "/api/kernels".to_string(),
            contents_path: "/api/contents".to_string(),
            landing_path: "/tree".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Registry key of the authenticator (`none`, `token`, ...)
    pub kind: String,
    pub token: Option<String>,
    /// Authenticator-specific settings; `token` reads `scheme`
    pub extra: BTreeMap<String, String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            kind: "none".to_string(),
            token: None,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Upper bound on waiting for any single reply
    #[serde(with = "humantime_serde")]
    pub execute_timeout: Duration,
    /// Highest codec version this client asks the kernel to use
    pub codec_version: u8,
    /// Username stamped on request headers
    pub username: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            execute_timeout: Duration::from_secs(300),
            codec_version: codec::MAX_CODEC_VERSION,
            username: "kernel-bridge".to_string(),
        }
    }
}
