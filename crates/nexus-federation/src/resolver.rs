//! The federation resolver: the entry point the rest of the server calls when a
//! question can't be answered from local data.
//!
//! Room queries go through the host-fallback executor over the room's candidate
//! hosts; key queries go through the notary. Both honour an optional caller
//! deadline on top of their own per-attempt bounds.

use std::sync::Arc;

use anyhow::anyhow;
use tokio::time::Instant;
use tracing::info;

use crate::{
    attempt::ResolverConfig,
    error::FederationError,
    fallback::HostFallback,
    hosts::CandidateHostSource,
    notary::NotaryKeyResolver,
    store::NotaryStore,
    transport::RemoteTransport,
    types::{
        FederationEvent, KeyCriteria, KeyResolution, ResolutionRequest, ResolutionResult,
        RoomQuery, RoomQueryResult, RoomState, ServerName, StateIds,
    },
};

#[derive(Clone)]
pub struct FederationResolver {
    hosts: Arc<dyn CandidateHostSource>,
    transport: Arc<dyn RemoteTransport>,
    fallback: HostFallback,
    notary: NotaryKeyResolver,
}

impl FederationResolver {
    pub fn new(
        hosts: Arc<dyn CandidateHostSource>,
        transport: Arc<dyn RemoteTransport>,
        store: Arc<dyn NotaryStore>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            hosts,
            fallback: HostFallback::new(config.attempt_timeout),
            notary: NotaryKeyResolver::new(transport.clone(), store, config.key_fetch_timeout),
            transport,
        }
    }

    /// Remote servers known to participate in `room_id`.
    pub async fn joined_hosts(
        &self,
        room_id: &str,
        caller_deadline: Option<Instant>,
    ) -> Result<Vec<ServerName>, FederationError> {
        let lookup = self.hosts.candidate_hosts(room_id);
        let found = match caller_deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, lookup)
                .await
                .unwrap_or_else(|_| Err(anyhow!("caller deadline elapsed").into())),
            None => lookup.await,
        };
        found.map_err(|e| FederationError::CandidateHosts {
            room_id: room_id.to_owned(),
            source: Box::new(e),
        })
    }

    /// Auth chain of `event_id`, from the first candidate host that answers.
    pub async fn query_event_auth(
        &self,
        room_id: &str,
        event_id: &str,
        caller_deadline: Option<Instant>,
    ) -> Result<Vec<FederationEvent>, FederationError> {
        let query = RoomQuery::EventAuth { room_id: room_id.into(), event_id: event_id.into() };
        match self.resolve_room(&query, caller_deadline).await? {
            RoomQueryResult::EventAuth(events) => Ok(events),
            other => Err(mismatch(&query, &other)),
        }
    }

    /// Auth and state event IDs of `room_id` at `event_id`.
    pub async fn query_state_ids(
        &self,
        room_id: &str,
        event_id: &str,
        caller_deadline: Option<Instant>,
    ) -> Result<StateIds, FederationError> {
        let query = RoomQuery::StateIds { room_id: room_id.into(), event_id: event_id.into() };
        match self.resolve_room(&query, caller_deadline).await? {
            RoomQueryResult::StateIds(ids) => Ok(ids),
            other => Err(mismatch(&query, &other)),
        }
    }

    /// Full auth and state events of `room_id` at `event_id`.
    pub async fn query_state(
        &self,
        room_id: &str,
        event_id: &str,
        room_version: &str,
        caller_deadline: Option<Instant>,
    ) -> Result<RoomState, FederationError> {
        let query = RoomQuery::FullState {
            room_id: room_id.into(),
            event_id: event_id.into(),
            room_version: room_version.into(),
        };
        match self.resolve_room(&query, caller_deadline).await? {
            RoomQueryResult::FullState(state) => Ok(state),
            other => Err(mismatch(&query, &other)),
        }
    }

    /// Signing keys of `server_name` matching `criteria`.
    pub async fn query_server_keys(
        &self,
        server_name: &ServerName,
        criteria: &KeyCriteria,
        caller_deadline: Option<Instant>,
    ) -> Result<KeyResolution, FederationError> {
        self.notary.resolve_server_keys(server_name, criteria, caller_deadline).await
    }

    /// Answer any [`ResolutionRequest`].
    pub async fn resolve(
        &self,
        request: &ResolutionRequest,
        caller_deadline: Option<Instant>,
    ) -> Result<ResolutionResult, FederationError> {
        match request {
            ResolutionRequest::Room(query) => {
                self.resolve_room(query, caller_deadline).await.map(ResolutionResult::Room)
            }
            ResolutionRequest::ServerKeys { server_name, criteria } => self
                .query_server_keys(server_name, criteria, caller_deadline)
                .await
                .map(ResolutionResult::ServerKeys),
        }
    }

    async fn resolve_room(
        &self,
        query: &RoomQuery,
        caller_deadline: Option<Instant>,
    ) -> Result<RoomQueryResult, FederationError> {
        let hosts = self.joined_hosts(query.room_id(), caller_deadline).await?;
        info!(
            room_id = query.room_id(),
            query = query.kind(),
            candidates = hosts.len(),
            "Federation: resolving via candidate hosts"
        );
        self.fallback
            .resolve_via_hosts(&*self.transport, query, &hosts, caller_deadline)
            .await
    }
}

fn mismatch(query: &RoomQuery, got: &RoomQueryResult) -> FederationError {
    FederationError::Other(anyhow!("{} query produced {got:?}", query.kind()))
}
