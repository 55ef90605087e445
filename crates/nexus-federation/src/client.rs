//! Server-to-server HTTP client.
//!
//! [`FederationClient`] is the network-facing [`RemoteTransport`]: it discovers
//! the remote endpoint, signs room queries with this server's key, and bounds
//! every request by the deadline the resolver hands it.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use nexus_federation::{client::FederationClient, discovery::DiscoveryCache, OriginKey};
//!
//! # fn main() -> Result<(), nexus_federation::FederationError> {
//! let discovery = DiscoveryCache::new(Duration::from_secs(86_400), 8448)?;
//! let key = Arc::new(OriginKey::generate());
//! let client = FederationClient::new("nexus.example.com", key, discovery)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::debug;

use crate::{
    discovery::DiscoveryCache,
    error::FederationError,
    signing::OriginKey,
    transport::RemoteTransport,
    types::{EventAuthResponse, ServerKeyDocument, ServerName, StateIdsResponse, StateResponse},
};

/// Async HTTP client for outbound server-to-server queries.
///
/// Internally uses `reqwest` with a connection pool. Requests carry no timeout
/// of their own beyond the deadline of the call.
pub struct FederationClient {
    origin: String,
    key: Arc<OriginKey>,
    http: Client,
    discovery: DiscoveryCache,
}

impl FederationClient {
    pub fn new(
        origin: impl Into<String>,
        key: Arc<OriginKey>,
        discovery: DiscoveryCache,
    ) -> Result<Self, FederationError> {
        let http = Client::builder()
            .user_agent(concat!("Nexus-Resolver/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { origin: origin.into(), key, http, discovery })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        destination: &ServerName,
        uri: &str,
        deadline: Instant,
        signed: bool,
    ) -> Result<T, FederationError> {
        let base_url = self.discovery.resolve(destination).await?;
        let url = format!("{base_url}{uri}");
        debug!(%destination, %url, "Federation GET");

        let mut req = self
            .http
            .get(&url)
            .timeout(deadline.saturating_duration_since(Instant::now()));
        if signed {
            req = req.header(
                "Authorization",
                self.key.authorization(&self.origin, destination, "GET", uri),
            );
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                if e.is_connect() {
                    self.discovery.invalidate(destination).await;
                }
                return Err(FederationError::RemoteHttp(destination.to_string(), e.to_string()));
            }
        };
        let resp = resp
            .error_for_status()
            .map_err(|e| FederationError::RemoteHttp(destination.to_string(), e.to_string()))?;
        resp.json()
            .await
            .map_err(|e| FederationError::RemoteProtocol(destination.to_string(), e.to_string()))
    }
}

#[async_trait]
impl RemoteTransport for FederationClient {
    async fn get_event_auth(
        &self,
        destination: &ServerName,
        room_id: &str,
        event_id: &str,
        deadline: Instant,
    ) -> Result<EventAuthResponse, FederationError> {
        let uri = format!(
            "/_nexus/federation/v1/event_auth/{}/{}",
            urlencoded(room_id),
            urlencoded(event_id)
        );
        self.get(destination, &uri, deadline, true).await
    }

    async fn get_state_ids(
        &self,
        destination: &ServerName,
        room_id: &str,
        event_id: &str,
        deadline: Instant,
    ) -> Result<StateIdsResponse, FederationError> {
        let uri = format!(
            "/_nexus/federation/v1/state_ids/{}?event_id={}",
            urlencoded(room_id),
            urlencoded(event_id)
        );
        self.get(destination, &uri, deadline, true).await
    }

    async fn get_state(
        &self,
        destination: &ServerName,
        room_id: &str,
        event_id: &str,
        room_version: &str,
        deadline: Instant,
    ) -> Result<StateResponse, FederationError> {
        let uri = format!(
            "/_nexus/federation/v1/state/{}?event_id={}",
            urlencoded(room_id),
            urlencoded(event_id)
        );
        debug!(%destination, room_version, "Federation: requesting full state");
        self.get(destination, &uri, deadline, true).await
    }

    async fn get_server_keys(
        &self,
        destination: &ServerName,
        deadline: Instant,
    ) -> Result<ServerKeyDocument, FederationError> {
        // Key fetch is unauthenticated: the caller may not trust us yet.
        self.get(destination, "/_nexus/key/v2/server", deadline, false).await
    }
}

fn urlencoded(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
