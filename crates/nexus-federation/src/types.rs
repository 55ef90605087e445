//! Federation data types: server names, key material, room query shapes and
//! the wire payloads returned by remote servers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

// ─── Server names ────────────────────────────────────────────────────────────

/// The administrative domain of a server (e.g. `nexus.example.com:8448`).
///
/// Compared by plain string identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerName(String);

impl ServerName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ServerName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ─── Key material ────────────────────────────────────────────────────────────

/// Key ID in the format `<algorithm>:<version>`, e.g. `ed25519:3f9a2c`.
pub type KeyId = String;

/// Requested key IDs mapped to the freshness each must satisfy.
pub type KeyCriteria = BTreeMap<KeyId, FreshnessCriterion>;

/// The minimum `valid_until_ts` a caller will accept for a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessCriterion {
    /// Unix milliseconds. `None` accepts any stored key.
    pub minimum_valid_until_ts: Option<i64>,
}

impl FreshnessCriterion {
    /// Accept whatever is stored.
    pub const fn any() -> Self {
        Self { minimum_valid_until_ts: None }
    }

    pub const fn at_least(ts: i64) -> Self {
        Self { minimum_valid_until_ts: Some(ts) }
    }

    /// An equal timestamp is still valid.
    pub fn is_satisfied_by(&self, valid_until_ts: i64) -> bool {
        self.minimum_valid_until_ts.is_none_or(|min| valid_until_ts >= min)
    }
}

/// A single public verify key entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyKey {
    /// Base64url-encoded Ed25519 public key bytes.
    pub key: String,
}

/// A key the remote server no longer signs with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OldVerifyKey {
    pub key: String,
    /// Unix millisecond timestamp at which the key stopped being used.
    pub expired_ts: i64,
}

/// One signing key of a remote server together with its validity window.
///
/// Entries are never edited in place: a newer fetch produces a new entry that
/// supersedes the stored one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerKeyEntry {
    pub server_name: ServerName,
    pub key_id: KeyId,
    pub verify_key: VerifyKey,
    /// Unix milliseconds.
    pub valid_until_ts: i64,
}

/// The key document served by a remote server at `/_nexus/key/v2/server`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerKeyDocument {
    pub server_name: ServerName,
    pub verify_keys: HashMap<KeyId, VerifyKey>,
    #[serde(default)]
    pub old_verify_keys: HashMap<KeyId, OldVerifyKey>,
    /// Unix millisecond timestamp after which this document should be re-fetched.
    pub valid_until_ts: i64,
}

impl ServerKeyDocument {
    /// Flatten into one entry per key, ordered by key ID.
    ///
    /// Current keys inherit the document's `valid_until_ts`; old keys are valid
    /// until their `expired_ts`.
    pub fn into_entries(self) -> Vec<ServerKeyEntry> {
        let server_name = self.server_name;
        let current = self.verify_keys.into_iter().map(|(key_id, verify_key)| ServerKeyEntry {
            server_name: server_name.clone(),
            key_id,
            verify_key,
            valid_until_ts: self.valid_until_ts,
        });
        let old = self.old_verify_keys.into_iter().map(|(key_id, old)| ServerKeyEntry {
            server_name: server_name.clone(),
            key_id,
            verify_key: VerifyKey { key: old.key },
            valid_until_ts: old.expired_ts,
        });
        let mut entries: Vec<_> = current.chain(old).collect();
        entries.sort_by(|a, b| a.key_id.cmp(&b.key_id));
        entries
    }
}

// ─── Federated events ────────────────────────────────────────────────────────

/// A persistent federation event (PDU) as returned by state and auth queries.
///
/// Only the envelope is typed; content stays opaque to the resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationEvent {
    pub event_id: String,
    pub room_id: String,
    pub sender: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    pub origin_server_ts: i64,
    pub content: serde_json::Value,
    #[serde(default)]
    pub prev_events: Vec<String>,
    #[serde(default)]
    pub auth_events: Vec<String>,
    #[serde(default)]
    pub signatures: HashMap<String, HashMap<String, String>>,
}

// ─── Wire responses ──────────────────────────────────────────────────────────

/// `GET /_nexus/federation/v1/event_auth/{roomId}/{eventId}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAuthResponse {
    pub auth_chain: Vec<FederationEvent>,
}

/// `GET /_nexus/federation/v1/state_ids/{roomId}?event_id=`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateIdsResponse {
    pub auth_chain_ids: Vec<String>,
    pub pdu_ids: Vec<String>,
}

/// `GET /_nexus/federation/v1/state/{roomId}?event_id=`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateResponse {
    pub auth_chain: Vec<FederationEvent>,
    pub pdus: Vec<FederationEvent>,
}

/// Response shape for `/.well-known/nexus/server`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellKnownServer {
    /// The delegated server name (may differ from the queried hostname).
    #[serde(rename = "m.server")]
    pub server: String,
}

// ─── Resolution requests and results ─────────────────────────────────────────

/// A room-scoped query answerable by any server participating in the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomQuery {
    EventAuth { room_id: String, event_id: String },
    StateIds { room_id: String, event_id: String },
    FullState { room_id: String, event_id: String, room_version: String },
}

impl RoomQuery {
    pub fn room_id(&self) -> &str {
        match self {
            Self::EventAuth { room_id, .. }
            | Self::StateIds { room_id, .. }
            | Self::FullState { room_id, .. } => room_id,
        }
    }

    /// Short name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EventAuth { .. } => "event_auth",
            Self::StateIds { .. } => "state_ids",
            Self::FullState { .. } => "state",
        }
    }
}

/// Auth and state event IDs of a room at an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateIds {
    pub auth_event_ids: Vec<String>,
    pub state_event_ids: Vec<String>,
}

/// Full auth and state events of a room at an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomState {
    pub auth_events: Vec<FederationEvent>,
    pub state_events: Vec<FederationEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "result", rename_all = "snake_case")]
pub enum RoomQueryResult {
    EventAuth(Vec<FederationEvent>),
    StateIds(StateIds),
    FullState(RoomState),
}

/// Which path of the notary produced a key set.
///
/// Callers verifying signatures can tell trusted material from a degraded answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPath {
    /// Every requested key was in the store and fresh enough.
    Cache,
    /// Fetched from the server itself.
    Direct,
    /// The server was unreachable; stored keys returned regardless of freshness.
    DegradedCache,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyResolution {
    pub path: ResolutionPath,
    pub keys: Vec<ServerKeyEntry>,
}

/// Any query the resolver can answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionRequest {
    Room(RoomQuery),
    ServerKeys { server_name: ServerName, criteria: KeyCriteria },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResolutionResult {
    Room(RoomQueryResult),
    ServerKeys(KeyResolution),
}
