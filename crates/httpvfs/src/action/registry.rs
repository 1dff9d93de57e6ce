//! Host-keyed registry of drivers.

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use super::DynAction;
use crate::drivers::http::HttpDriver;
use crate::drivers::mega::MegaDriver;
use crate::http::DynHttpClient;
use crate::vfs::{VfsError, VfsResult};

/// Builds the root action for URLs on the hosts it is registered for.
pub trait Driver: Send + Sync {
    /// Driver name for logs.
    fn name(&self) -> &str;

    /// Opt out of URLs on a registered host that this driver cannot handle.
    fn accepts(&self, _url: &Url) -> bool {
        true
    }

    /// Create the action for `url`. Must not perform I/O.
    fn create_action(&self, url: &Url, http: DynHttpClient) -> VfsResult<DynAction>;
}

/// Registry of drivers keyed by host name.
///
/// Hosts are matched without a leading `www.`. Unregistered hosts, and URLs a
/// driver declines, go to the generic HTTP driver.
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn Driver>>,
    fallback: Arc<dyn Driver>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn host_key(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

impl DriverRegistry {
    /// A registry with no host drivers, only the HTTP fallback.
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
            fallback: Arc::new(HttpDriver),
        }
    }

    /// A registry with MEGA registered for its hosts.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let mega: Arc<dyn Driver> = Arc::new(MegaDriver::new());
        registry.register("mega.nz", mega.clone());
        registry.register("mega.co.nz", mega);
        registry
    }

    /// Register `driver` for `host`, replacing any previous one.
    pub fn register(&mut self, host: &str, driver: Arc<dyn Driver>) {
        self.drivers.insert(host_key(host), driver);
    }

    /// Remove the driver for `host`.
    pub fn unregister(&mut self, host: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.remove(&host_key(host))
    }

    /// Get the driver registered for `host`.
    pub fn get(&self, host: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.get(&host_key(host)).cloned()
    }

    /// List registered hosts.
    pub fn hosts(&self) -> Vec<&str> {
        self.drivers.keys().map(|s| s.as_str()).collect()
    }

    /// Pick the driver for `url`.
    pub fn driver_for(&self, url: &Url) -> Arc<dyn Driver> {
        url.host_str()
            .and_then(|host| self.get(host))
            .filter(|driver| driver.accepts(url))
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Create the action for `url` through its driver.
    pub fn create_action(&self, url: &Url, http: DynHttpClient) -> VfsResult<DynAction> {
        if url.cannot_be_a_base() {
            return Err(VfsError::invalid_url(url.as_str()));
        }
        let driver = self.driver_for(url);
        tracing::debug!(url = %url, driver = driver.name(), "binding driver");
        driver.create_action(url, http)
    }
}
