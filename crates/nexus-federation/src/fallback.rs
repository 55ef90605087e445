//! Host-fallback query executor.
//!
//! Answers a room query by asking candidate hosts one at a time, in the order
//! given, until one of them answers. Each attempt is capped independently; the
//! first success wins and nothing is merged across hosts. When every host fails
//! only the last failure is reported.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    attempt::{bounded, caller_expired},
    error::FederationError,
    transport::RemoteTransport,
    types::{RoomQuery, RoomQueryResult, RoomState, ServerName, StateIds},
};

/// Sequential, bounded fallback over candidate hosts.
#[derive(Debug, Clone, Copy)]
pub struct HostFallback {
    attempt_timeout: Duration,
}

impl HostFallback {
    pub fn new(attempt_timeout: Duration) -> Self {
        Self { attempt_timeout }
    }

    /// Try `attempt` against each host in `hosts` until one succeeds.
    ///
    /// At most one attempt is in flight at any time. If `caller_deadline` passes,
    /// the loop stops immediately with [`FederationError::DeadlineExceeded`]
    /// instead of moving on to the next host.
    pub async fn run<T, F, Fut>(
        &self,
        room_id: &str,
        hosts: &[ServerName],
        caller_deadline: Option<Instant>,
        mut attempt: F,
    ) -> Result<T, FederationError>
    where
        F: FnMut(ServerName, Instant) -> Fut,
        Fut: Future<Output = Result<T, FederationError>>,
    {
        let mut last_err = None;

        for (n, host) in hosts.iter().enumerate() {
            if caller_expired(caller_deadline) {
                return Err(FederationError::DeadlineExceeded { host: host.clone() });
            }
            debug!(room_id, %host, attempt = n + 1, "Federation: trying candidate host");

            let outcome = bounded(host, self.attempt_timeout, caller_deadline, |deadline| {
                attempt(host.clone(), deadline)
            })
            .await;

            match outcome {
                Ok(value) => {
                    debug!(room_id, %host, attempt = n + 1, "Federation: candidate host answered");
                    return Ok(value);
                }
                Err(e @ FederationError::DeadlineExceeded { .. }) => return Err(e),
                // A transport error can surface right as the caller runs out of time.
                Err(_) if caller_expired(caller_deadline) => {
                    return Err(FederationError::DeadlineExceeded { host: host.clone() });
                }
                Err(e) => {
                    warn!(
                        room_id,
                        %host,
                        attempt = n + 1,
                        error = %e,
                        "Federation: candidate host failed"
                    );
                    last_err = Some(FederationError::attempt(host, e));
                }
            }
        }

        Err(match last_err {
            Some(last) => FederationError::AllHostsExhausted {
                attempts: hosts.len(),
                last: Box::new(last),
            },
            // Nothing was attempted.
            None => FederationError::NoCandidateHosts { room_id: room_id.to_owned() },
        })
    }

    /// Resolve `query` via the first candidate host that answers it.
    pub async fn resolve_via_hosts(
        &self,
        transport: &dyn RemoteTransport,
        query: &RoomQuery,
        hosts: &[ServerName],
        caller_deadline: Option<Instant>,
    ) -> Result<RoomQueryResult, FederationError> {
        let room_id = query.room_id();
        match query {
            RoomQuery::EventAuth { event_id, .. } => {
                let resp = self
                    .run(room_id, hosts, caller_deadline, |host, deadline| async move {
                        transport.get_event_auth(&host, room_id, event_id, deadline).await
                    })
                    .await?;
                Ok(RoomQueryResult::EventAuth(resp.auth_chain))
            }
            RoomQuery::StateIds { event_id, .. } => {
                let resp = self
                    .run(room_id, hosts, caller_deadline, |host, deadline| async move {
                        transport.get_state_ids(&host, room_id, event_id, deadline).await
                    })
                    .await?;
                Ok(RoomQueryResult::StateIds(StateIds {
                    auth_event_ids: resp.auth_chain_ids,
                    state_event_ids: resp.pdu_ids,
                }))
            }
            RoomQuery::FullState { event_id, room_version, .. } => {
                let resp = self
                    .run(room_id, hosts, caller_deadline, |host, deadline| async move {
                        transport.get_state(&host, room_id, event_id, room_version, deadline).await
                    })
                    .await?;
                Ok(RoomQueryResult::FullState(RoomState {
                    auth_events: resp.auth_chain,
                    state_events: resp.pdus,
                }))
            }
        }
    }
}
