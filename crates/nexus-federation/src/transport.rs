//! The seam between the resolver and the network.
//!
//! Each call talks to exactly one remote server and must give up by `deadline`.
//! [`crate::client::FederationClient`] is the HTTP implementation; tests swap in
//! scripted fakes.

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{
    error::FederationError,
    types::{EventAuthResponse, ServerKeyDocument, ServerName, StateIdsResponse, StateResponse},
};

#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Auth chain of `event_id`.
    async fn get_event_auth(
        &self,
        destination: &ServerName,
        room_id: &str,
        event_id: &str,
        deadline: Instant,
    ) -> Result<EventAuthResponse, FederationError>;

    /// Auth and state event IDs of the room at `event_id`.
    async fn get_state_ids(
        &self,
        destination: &ServerName,
        room_id: &str,
        event_id: &str,
        deadline: Instant,
    ) -> Result<StateIdsResponse, FederationError>;

    /// Full auth and state events of the room at `event_id`.
    async fn get_state(
        &self,
        destination: &ServerName,
        room_id: &str,
        event_id: &str,
        room_version: &str,
        deadline: Instant,
    ) -> Result<StateResponse, FederationError>;

    /// The server's own current key document.
    async fn get_server_keys(
        &self,
        destination: &ServerName,
        deadline: Instant,
    ) -> Result<ServerKeyDocument, FederationError>;
}
