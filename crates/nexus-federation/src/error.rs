//! Federation-specific error types.

use std::time::Duration;

use thiserror::Error;

use crate::types::ServerName;

/// Errors that can occur in federation resolution.
///
/// Only [`FederationError::NoCandidateHosts`], [`FederationError::AllHostsExhausted`],
/// [`FederationError::NotaryExhausted`] and [`FederationError::DeadlineExceeded`]
/// leave the public resolver operations. The remaining variants describe a single
/// attempt or collaborator call and are absorbed by the fallback logic.
#[derive(Debug, Error)]
pub enum FederationError {
    // ── Host fallback ───────────────────────────────────────────────────────

    #[error("No candidate hosts known for room '{room_id}'")]
    NoCandidateHosts { room_id: String },

    #[error("Failed to list candidate hosts for room '{room_id}': {source}")]
    CandidateHosts {
        room_id: String,
        #[source]
        source: Box<FederationError>,
    },

    #[error("Attempt against '{host}' failed: {source}")]
    HostAttemptFailed {
        host: ServerName,
        #[source]
        source: Box<FederationError>,
    },

    #[error("Attempt against '{host}' timed out after {after:?}")]
    AttemptTimedOut { host: ServerName, after: Duration },

    #[error("Caller deadline elapsed while querying '{host}'")]
    DeadlineExceeded { host: ServerName },

    #[error("All {attempts} candidate hosts failed; last error: {last}")]
    AllHostsExhausted {
        attempts: usize,
        #[source]
        last: Box<FederationError>,
    },

    // ── Notary ──────────────────────────────────────────────────────────────

    #[error("Notary store holds no keys for '{server_name}'")]
    NotaryCacheEmpty { server_name: ServerName },

    #[error("Notary: '{server_name}' returned {fetch}, and the cache returned {store}")]
    NotaryExhausted {
        server_name: ServerName,
        fetch: Box<FederationError>,
        store: Box<FederationError>,
    },

    // ── Local signing key ───────────────────────────────────────────────────

    #[error("Failed to load signing key: {0}")]
    KeyLoad(String),

    // ── Remote communication ─────────────────────────────────────────────────

    #[error("HTTP error communicating with remote server '{0}': {1}")]
    RemoteHttp(String, String),

    #[error("Remote server '{0}' returned an unexpected response: {1}")]
    RemoteProtocol(String, String),

    // ── General ─────────────────────────────────────────────────────────────

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<reqwest::Error> for FederationError {
    fn from(e: reqwest::Error) -> Self {
        let server = e.url().map(|u| u.host_str().unwrap_or("?").to_owned()).unwrap_or_default();
        FederationError::RemoteHttp(server, e.to_string())
    }
}

impl FederationError {
    /// Wrap a per-attempt failure with the host it came from.
    pub(crate) fn attempt(host: &ServerName, source: FederationError) -> Self {
        match source {
            // Already attributed.
            e @ (Self::AttemptTimedOut { .. } | Self::DeadlineExceeded { .. }) => e,
            other => Self::HostAttemptFailed { host: host.clone(), source: Box::new(other) },
        }
    }

    /// The host the failure is attributed to, if it is a per-attempt error.
    pub fn host(&self) -> Option<&ServerName> {
        match self {
            Self::HostAttemptFailed { host, .. }
            | Self::AttemptTimedOut { host, .. }
            | Self::DeadlineExceeded { host } => Some(host),
            Self::AllHostsExhausted { last, .. } => last.host(),
            _ => None,
        }
    }
}
