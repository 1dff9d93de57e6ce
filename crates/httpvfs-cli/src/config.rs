//! Config file loading.
//!
//! ```toml
//! [volume]
//! preload = false
//! root_file_alias = "index.html"   # or true / false
//! proxy = "http://127.0.0.1:3128"
//!
//! [http]
//! connect_timeout_secs = 30
//!
//! [mega]
//! gateway = "https://g.api.mega.co.nz/"
//! max_retries = 0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use httpvfs::VolumeConfig;
use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: Option<u64>,
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MegaConfig {
    pub gateway: Option<Url>,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub volume: VolumeConfig,
    pub http: HttpConfig,
    pub mega: MegaConfig,
}

/// `$XDG_CONFIG_HOME/httpvfs/config.toml`.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("httpvfs").join("config.toml"))
}

/// Load `path`, or the default file if it exists, or defaults.
pub fn load(path: Option<&Path>) -> Result<CliConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match default_path() {
            Some(p) if p.exists() => p,
            _ => return Ok(CliConfig::default()),
        },
    };
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}
