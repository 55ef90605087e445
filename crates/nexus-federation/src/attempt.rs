//! Bounded calls to remote servers and the notary store.
//!
//! Every suspending call the resolver makes gets its own hard cap, started when
//! the call starts, and is further cut short by the caller's deadline if that
//! comes first.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::{error::FederationError, types::ServerName};

/// Fixed cap for one remote attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeouts threaded into the fallback executor and the notary resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Cap on a single room query against one candidate host.
    pub attempt_timeout: Duration,
    /// Cap on a direct key fetch, and on each notary store call.
    pub key_fetch_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            key_fetch_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

impl From<&nexus_common::config::FederationSettings> for ResolverConfig {
    fn from(settings: &nexus_common::config::FederationSettings) -> Self {
        Self {
            attempt_timeout: Duration::from_secs(settings.attempt_timeout_secs),
            key_fetch_timeout: Duration::from_secs(settings.key_fetch_timeout_secs),
        }
    }
}

/// Whether the caller's own deadline has passed.
pub fn caller_expired(caller_deadline: Option<Instant>) -> bool {
    caller_deadline.is_some_and(|d| Instant::now() >= d)
}

/// Deadline for a call starting now: `bound` from now, capped by the caller.
pub fn attempt_deadline(bound: Duration, caller_deadline: Option<Instant>) -> Instant {
    let own = Instant::now() + bound;
    match caller_deadline {
        Some(caller) => own.min(caller),
        None => own,
    }
}

/// Run `call` against `host` under [`attempt_deadline`].
///
/// `call` receives the effective deadline so it can hand it on to the network
/// layer. Errors from `call` pass through untouched; running out of time becomes
/// [`FederationError::DeadlineExceeded`] when the caller's deadline is what ran
/// out and [`FederationError::AttemptTimedOut`] otherwise.
///
/// `call` is never started once the caller's deadline has passed.
pub async fn bounded<T, F, Fut>(
    host: &ServerName,
    bound: Duration,
    caller_deadline: Option<Instant>,
    call: F,
) -> Result<T, FederationError>
where
    F: FnOnce(Instant) -> Fut,
    Fut: Future<Output = Result<T, FederationError>>,
{
    if caller_expired(caller_deadline) {
        return Err(FederationError::DeadlineExceeded { host: host.clone() });
    }
    let deadline = attempt_deadline(bound, caller_deadline);
    match tokio::time::timeout_at(deadline, call(deadline)).await {
        Ok(result) => result,
        Err(_elapsed) if caller_expired(caller_deadline) => {
            Err(FederationError::DeadlineExceeded { host: host.clone() })
        }
        Err(_elapsed) => Err(FederationError::AttemptTimedOut { host: host.clone(), after: bound }),
    }
}
