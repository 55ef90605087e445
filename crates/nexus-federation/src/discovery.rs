//! Server discovery: maps a server name to the HTTPS base URL of its
//! federation endpoint.
//!
//! 1. Name carries a port (`remote.tld:8448`, `[::1]:8448`) → used verbatim.
//! 2. `GET https://<name>/.well-known/nexus/server` names a delegate → the
//!    delegate, with the default port unless it carries one.
//! 3. Otherwise `https://<name>:<default port>`.
//!
//! Answers are cached per name for a configurable TTL.

use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use tokio::{sync::RwLock, time::Instant};
use tracing::debug;

use crate::{
    error::FederationError,
    types::{ServerName, WellKnownServer},
};

const WELL_KNOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Resolved {
    base_url: String,
    at: Instant,
}

/// Cached server-name → base-URL resolution. Clones share the cache.
#[derive(Debug, Clone)]
pub struct DiscoveryCache {
    resolved: Arc<RwLock<HashMap<ServerName, Resolved>>>,
    http: reqwest::Client,
    ttl: Duration,
    default_port: u16,
}

impl DiscoveryCache {
    pub fn new(ttl: Duration, default_port: u16) -> Result<Self, FederationError> {
        let http = reqwest::Client::builder()
            .timeout(WELL_KNOWN_TIMEOUT)
            .user_agent(concat!("Nexus-Resolver/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { resolved: Arc::new(RwLock::new(HashMap::new())), http, ttl, default_port })
    }

    /// Base URL for `server_name`, from cache while it is fresh.
    pub async fn resolve(&self, server_name: &ServerName) -> Result<String, FederationError> {
        if let Some(hit) = self.resolved.read().await.get(server_name) {
            if hit.at.elapsed() < self.ttl {
                return Ok(hit.base_url.clone());
            }
        }

        let base_url = match explicit_authority(server_name.as_str()) {
            Some(authority) => format!("https://{authority}"),
            None => match self.well_known(server_name).await {
                Some(delegate) => self.with_port(&delegate),
                None => self.with_port(server_name.as_str()),
            },
        };
        url::Url::parse(&base_url)?;
        debug!(server = %server_name, %base_url, "Discovery: resolved");

        let resolved = Resolved { base_url: base_url.clone(), at: Instant::now() };
        self.resolved.write().await.insert(server_name.clone(), resolved);
        Ok(base_url)
    }

    /// Forget a resolution, e.g. after the endpoint refused a connection.
    pub async fn invalidate(&self, server_name: &ServerName) {
        self.resolved.write().await.remove(server_name);
    }

    fn with_port(&self, name: &str) -> String {
        match explicit_authority(name) {
            Some(authority) => format!("https://{authority}"),
            None => format!("https://{name}:{}", self.default_port),
        }
    }

    async fn well_known(&self, server_name: &ServerName) -> Option<String> {
        let url = format!("https://{server_name}/.well-known/nexus/server");
        let resp = self.http.get(&url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let wk: WellKnownServer = resp.json().await.ok()?;
        Some(wk.server)
    }
}

/// `name` itself if it already names a port.
fn explicit_authority(name: &str) -> Option<&str> {
    let has_port = if name.starts_with('[') {
        name.contains("]:")
    } else {
        // Bare IPv6 literals have several colons and no port.
        name.matches(':').count() == 1
    };
    has_port.then_some(name)
}
