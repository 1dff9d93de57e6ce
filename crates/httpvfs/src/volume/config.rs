//! Volume configuration.

use serde::{Deserialize, Serialize};
use url::Url;

/// How a root that loads as a single file is presented.
///
/// `false` leaves it as a file. `true` wraps it in a synthetic directory
/// under its own name. A string wraps it under that name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RootFileAlias {
    Enabled(bool),
    Named(String),
}

impl Default for RootFileAlias {
    fn default() -> Self {
        RootFileAlias::Enabled(false)
    }
}

impl RootFileAlias {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, RootFileAlias::Enabled(false))
    }

    /// The configured child name, if one was given.
    pub fn name(&self) -> Option<&str> {
        match self {
            RootFileAlias::Named(name) => Some(name),
            RootFileAlias::Enabled(_) => None,
        }
    }
}

impl From<bool> for RootFileAlias {
    fn from(enabled: bool) -> Self {
        RootFileAlias::Enabled(enabled)
    }
}

impl From<&str> for RootFileAlias {
    fn from(name: &str) -> Self {
        RootFileAlias::Named(name.to_string())
    }
}

/// Options for opening a volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Resolve the whole tree when the volume is opened.
    pub preload: bool,
    #[serde(alias = "rootFileAlias")]
    pub root_file_alias: RootFileAlias,
    /// Proxy for the default context.
    pub proxy: Option<Url>,
}

impl VolumeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }

    pub fn with_root_file_alias(mut self, alias: impl Into<RootFileAlias>) -> Self {
        self.root_file_alias = alias.into();
        self
    }

    pub fn with_proxy(mut self, proxy: Url) -> Self {
        self.proxy = Some(proxy);
        self
    }
}
