//! Scripted collaborators shared by the unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{
    error::FederationError,
    store::{MemoryNotaryStore, NotaryStore},
    transport::RemoteTransport,
    types::{
        EventAuthResponse, FederationEvent, KeyId, ServerKeyDocument, ServerKeyEntry, ServerName,
        StateIdsResponse, StateResponse, VerifyKey,
    },
};

pub(crate) fn hosts(names: &[&str]) -> Vec<ServerName> {
    names.iter().map(|n| ServerName::from(*n)).collect()
}

pub(crate) fn event(host: &str, sender: &str, event_type: &str) -> FederationEvent {
    FederationEvent {
        event_id: format!("${event_type}:{host}"),
        room_id: "!room:a.tld".into(),
        sender: sender.into(),
        event_type: event_type.into(),
        state_key: None,
        origin_server_ts: 0,
        content: serde_json::json!({}),
        prev_events: Vec::new(),
        auth_events: Vec::new(),
        signatures: HashMap::new(),
    }
}

pub(crate) fn key_doc(
    server: &str,
    keys: &[(&str, &str)],
    valid_until_ts: i64,
) -> ServerKeyDocument {
    ServerKeyDocument {
        server_name: server.into(),
        verify_keys: keys
            .iter()
            .map(|(id, key)| (id.to_string(), VerifyKey { key: key.to_string() }))
            .collect(),
        old_verify_keys: HashMap::new(),
        valid_until_ts,
    }
}

pub(crate) fn key_entry(
    server: &str,
    key_id: &str,
    key: &str,
    valid_until_ts: i64,
) -> ServerKeyEntry {
    ServerKeyEntry {
        server_name: server.into(),
        key_id: key_id.into(),
        verify_key: VerifyKey { key: key.into() },
        valid_until_ts,
    }
}

/// How a scripted host responds.
pub(crate) enum Reply {
    Ok,
    Fail(&'static str),
    /// Never answers.
    Hang,
}

/// How a scripted host responds to a key fetch.
pub(crate) enum KeyReply {
    Doc(ServerKeyDocument),
    Fail(&'static str),
    Hang,
}

/// Transport whose per-host behaviour is fixed up front. Records every call.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    replies: HashMap<String, Reply>,
    key_replies: HashMap<String, KeyReply>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, host: &str, reply: Reply) -> Self {
        self.replies.insert(host.to_owned(), reply);
        self
    }

    pub(crate) fn with_keys(mut self, host: &str, reply: KeyReply) -> Self {
        self.key_replies.insert(host.to_owned(), reply);
        self
    }

    /// Hosts contacted, in order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn answer(&self, host: &ServerName) -> Result<(), FederationError> {
        self.calls.lock().unwrap().push(host.to_string());
        match self.replies.get(host.as_str()) {
            Some(Reply::Ok) => Ok(()),
            Some(Reply::Fail(msg)) => {
                Err(FederationError::RemoteHttp(host.to_string(), (*msg).to_owned()))
            }
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(FederationError::RemoteHttp(host.to_string(), "unscripted host".into())),
        }
    }
}

#[async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn get_event_auth(
        &self,
        destination: &ServerName,
        _room_id: &str,
        _event_id: &str,
        _deadline: Instant,
    ) -> Result<EventAuthResponse, FederationError> {
        self.answer(destination).await?;
        let host = destination.as_str();
        Ok(EventAuthResponse {
            auth_chain: vec![event(host, &format!("@auth:{host}"), "m.room.member")],
        })
    }

    async fn get_state_ids(
        &self,
        destination: &ServerName,
        _room_id: &str,
        _event_id: &str,
        _deadline: Instant,
    ) -> Result<StateIdsResponse, FederationError> {
        self.answer(destination).await?;
        Ok(StateIdsResponse {
            auth_chain_ids: vec![format!("$auth:{destination}")],
            pdu_ids: vec![format!("$state:{destination}")],
        })
    }

    async fn get_state(
        &self,
        destination: &ServerName,
        _room_id: &str,
        _event_id: &str,
        _room_version: &str,
        _deadline: Instant,
    ) -> Result<StateResponse, FederationError> {
        self.answer(destination).await?;
        let host = destination.as_str();
        Ok(StateResponse {
            auth_chain: vec![event(host, "@auth:a.tld", "m.room.power_levels")],
            pdus: vec![event(host, "@creator:a.tld", "m.room.create")],
        })
    }

    async fn get_server_keys(
        &self,
        destination: &ServerName,
        _deadline: Instant,
    ) -> Result<ServerKeyDocument, FederationError> {
        self.calls.lock().unwrap().push(destination.to_string());
        match self.key_replies.get(destination.as_str()) {
            Some(KeyReply::Doc(doc)) => Ok(doc.clone()),
            Some(KeyReply::Fail(msg)) => {
                Err(FederationError::RemoteHttp(destination.to_string(), (*msg).to_owned()))
            }
            Some(KeyReply::Hang) => std::future::pending().await,
            None => {
                Err(FederationError::RemoteHttp(destination.to_string(), "unscripted host".into()))
            }
        }
    }
}

/// In-memory notary store with switchable failures.
#[derive(Default)]
pub(crate) struct FlakyStore {
    pub(crate) inner: MemoryNotaryStore,
    pub(crate) fail_reads: bool,
    pub(crate) fail_writes: bool,
    /// Reads and writes never complete.
    pub(crate) hang: bool,
    pub(crate) writes: Mutex<usize>,
}

impl FlakyStore {
    pub(crate) fn writes(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

#[async_trait]
impl NotaryStore for FlakyStore {
    async fn read(
        &self,
        server_name: &ServerName,
        key_ids: &[KeyId],
    ) -> Result<HashMap<KeyId, ServerKeyEntry>, FederationError> {
        if self.hang {
            return std::future::pending().await;
        }
        if self.fail_reads {
            return Err(FederationError::Other(anyhow::anyhow!("notary store unavailable")));
        }
        self.inner.read(server_name, key_ids).await
    }

    async fn write(
        &self,
        server_name: &ServerName,
        entries: &[ServerKeyEntry],
    ) -> Result<(), FederationError> {
        *self.writes.lock().unwrap() += 1;
        if self.hang {
            return std::future::pending().await;
        }
        if self.fail_writes {
            return Err(FederationError::Other(anyhow::anyhow!("notary store is read-only")));
        }
        self.inner.write(server_name, entries).await
    }
}
