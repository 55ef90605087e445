//! Notary key resolver.
//!
//! Resolves signing keys of a remote server in three tiers:
//!
//! 1. **Cache**: every requested key is stored and fresh enough, so answer with
//!    no network I/O.
//! 2. **Direct**: otherwise fetch the server's full key document, store it,
//!    and answer with it.
//! 3. **Degraded cache**: if the fetch fails, answer with whatever is stored
//!    for the requested keys, ignoring freshness.
//!
//! Only when the third tier also comes up empty does the call fail. The tier
//! that answered is reported in [`KeyResolution::path`].
//!
//! Once the caller's deadline has passed no further fetch or store call is
//! started; the resolution ends with [`FederationError::DeadlineExceeded`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    attempt::{bounded, caller_expired},
    error::FederationError,
    store::NotaryStore,
    transport::RemoteTransport,
    types::{KeyCriteria, KeyId, KeyResolution, ResolutionPath, ServerKeyEntry, ServerName},
};

/// Why the cache alone could not answer. Never leaves this module.
#[derive(Debug, Error)]
enum CacheShortfall {
    #[error("no key IDs requested")]
    NothingRequested,
    #[error("no stored key for key ID {key_id}")]
    Miss { key_id: KeyId },
    #[error("stored key {key_id} is no longer valid, min: {minimum} valid_until: {valid_until_ts}")]
    Stale { key_id: KeyId, minimum: i64, valid_until_ts: i64 },
    #[error("store read failed: {0}")]
    Store(FederationError),
}

/// Progress of one resolution.
enum Step {
    Start,
    CacheHit(Vec<ServerKeyEntry>),
    CacheMissOrStale(CacheShortfall),
    DirectFetchOk(Vec<ServerKeyEntry>),
    DirectFetchFailed(FederationError),
    Degraded(Vec<ServerKeyEntry>),
    TotalFailure { fetch: FederationError, store: FederationError },
}

/// Cache-then-fetch resolver for remote server signing keys.
#[derive(Clone)]
pub struct NotaryKeyResolver {
    transport: Arc<dyn RemoteTransport>,
    store: Arc<dyn NotaryStore>,
    timeout: Duration,
}

impl NotaryKeyResolver {
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        store: Arc<dyn NotaryStore>,
        timeout: Duration,
    ) -> Self {
        Self { transport, store, timeout }
    }

    /// Resolve the keys named in `criteria` for `server_name`.
    ///
    /// A single missing or stale key sends the whole request down the direct
    /// path: a fetch returns the server's full key set anyway.
    pub async fn resolve_server_keys(
        &self,
        server_name: &ServerName,
        criteria: &KeyCriteria,
        caller_deadline: Option<Instant>,
    ) -> Result<KeyResolution, FederationError> {
        let mut step = Step::Start;
        loop {
            step = match step {
                Step::Start => match self.from_cache(server_name, criteria, caller_deadline).await {
                    Ok(keys) => Step::CacheHit(keys),
                    Err(CacheShortfall::Store(e @ FederationError::DeadlineExceeded { .. })) => {
                        return Err(e);
                    }
                    Err(shortfall) => Step::CacheMissOrStale(shortfall),
                },
                Step::CacheHit(keys) => {
                    debug!(
                        server = %server_name,
                        keys = keys.len(),
                        "Notary: satisfied from cache"
                    );
                    return Ok(KeyResolution { path: ResolutionPath::Cache, keys });
                }
                Step::CacheMissOrStale(_) if caller_expired(caller_deadline) => {
                    return Err(FederationError::DeadlineExceeded { host: server_name.clone() });
                }
                Step::CacheMissOrStale(shortfall) => {
                    warn!(
                        server = %server_name,
                        reason = %shortfall,
                        "Notary: failed to satisfy keys request entirely from cache, hitting direct"
                    );
                    match self.fetch_direct(server_name, caller_deadline).await {
                        Ok(keys) => Step::DirectFetchOk(keys),
                        // Out of time: don't start another store round-trip.
                        Err(e @ FederationError::DeadlineExceeded { .. }) => return Err(e),
                        Err(e) => Step::DirectFetchFailed(e),
                    }
                }
                Step::DirectFetchOk(keys) => {
                    if caller_expired(caller_deadline) {
                        debug!(
                            server = %server_name,
                            "Notary: caller out of time, not storing keys"
                        );
                    } else {
                        self.persist(server_name, &keys, caller_deadline).await;
                    }
                    return Ok(KeyResolution { path: ResolutionPath::Direct, keys });
                }
                Step::DirectFetchFailed(fetch) => {
                    warn!(
                        server = %server_name,
                        error = %fetch,
                        "Notary: failed to ask server for keys, returning best effort keys"
                    );
                    match self.best_effort(server_name, criteria, caller_deadline).await {
                        Ok(keys) => Step::Degraded(keys),
                        Err(e @ FederationError::DeadlineExceeded { .. }) => return Err(e),
                        Err(store) => Step::TotalFailure { fetch, store },
                    }
                }
                Step::Degraded(keys) => {
                    return Ok(KeyResolution { path: ResolutionPath::DegradedCache, keys });
                }
                Step::TotalFailure { fetch, store } => {
                    return Err(FederationError::NotaryExhausted {
                        server_name: server_name.clone(),
                        fetch: Box::new(fetch),
                        store: Box::new(store),
                    });
                }
            };
        }
    }

    /// Every requested key, fresh enough, or the first reason it isn't.
    async fn from_cache(
        &self,
        server_name: &ServerName,
        criteria: &KeyCriteria,
        caller_deadline: Option<Instant>,
    ) -> Result<Vec<ServerKeyEntry>, CacheShortfall> {
        if criteria.is_empty() {
            return Err(CacheShortfall::NothingRequested);
        }
        let key_ids: Vec<KeyId> = criteria.keys().cloned().collect();
        let mut stored = self
            .read_store(server_name, &key_ids, caller_deadline)
            .await
            .map_err(CacheShortfall::Store)?;

        let mut keys = Vec::with_capacity(criteria.len());
        for (key_id, criterion) in criteria {
            let entry = stored
                .remove(key_id)
                .ok_or_else(|| CacheShortfall::Miss { key_id: key_id.clone() })?;
            if !criterion.is_satisfied_by(entry.valid_until_ts) {
                return Err(CacheShortfall::Stale {
                    key_id: key_id.clone(),
                    minimum: criterion.minimum_valid_until_ts.unwrap_or_default(),
                    valid_until_ts: entry.valid_until_ts,
                });
            }
            keys.push(entry);
        }
        Ok(keys)
    }

    /// Ask the server itself for its current key document.
    async fn fetch_direct(
        &self,
        server_name: &ServerName,
        caller_deadline: Option<Instant>,
    ) -> Result<Vec<ServerKeyEntry>, FederationError> {
        let doc = bounded(server_name, self.timeout, caller_deadline, |deadline| {
            self.transport.get_server_keys(server_name, deadline)
        })
        .await?;

        if doc.server_name != *server_name {
            return Err(FederationError::RemoteProtocol(
                server_name.to_string(),
                format!("key document is for '{}'", doc.server_name),
            ));
        }
        Ok(doc.into_entries())
    }

    /// Store freshly fetched keys. Failure only costs a future cache hit.
    async fn persist(
        &self,
        server_name: &ServerName,
        keys: &[ServerKeyEntry],
        caller_deadline: Option<Instant>,
    ) {
        let written = bounded(server_name, self.timeout, caller_deadline, |_| {
            self.store.write(server_name, keys)
        })
        .await;
        if let Err(e) = written {
            warn!(server = %server_name, error = %e, "Notary: failed to update notary keys");
        }
    }

    /// Whatever is stored for the requested keys, regardless of freshness.
    async fn best_effort(
        &self,
        server_name: &ServerName,
        criteria: &KeyCriteria,
        caller_deadline: Option<Instant>,
    ) -> Result<Vec<ServerKeyEntry>, FederationError> {
        let key_ids: Vec<KeyId> = criteria.keys().cloned().collect();
        let mut stored = self.read_store(server_name, &key_ids, caller_deadline).await?;
        let keys: Vec<ServerKeyEntry> =
            key_ids.iter().filter_map(|key_id| stored.remove(key_id)).collect();
        if keys.is_empty() {
            return Err(FederationError::NotaryCacheEmpty { server_name: server_name.clone() });
        }
        Ok(keys)
    }

    async fn read_store(
        &self,
        server_name: &ServerName,
        key_ids: &[KeyId],
        caller_deadline: Option<Instant>,
    ) -> Result<std::collections::HashMap<KeyId, ServerKeyEntry>, FederationError> {
        bounded(server_name, self.timeout, caller_deadline, |_| {
            self.store.read(server_name, key_ids)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::MemoryNotaryStore,
        testing::{FlakyStore, KeyReply, ScriptedTransport, key_doc, key_entry},
        types::FreshnessCriterion,
    };

    const SERVER: &str = "remote.tld";

    fn server() -> ServerName {
        ServerName::from(SERVER)
    }

    fn criteria(pairs: &[(&str, FreshnessCriterion)]) -> KeyCriteria {
        pairs.iter().map(|(id, c)| (id.to_string(), *c)).collect()
    }

    async fn seeded(entries: &[ServerKeyEntry]) -> FlakyStore {
        let store = FlakyStore::default();
        store.inner.write(&server(), entries).await.unwrap();
        store
    }

    fn resolver(
        transport: ScriptedTransport,
        store: FlakyStore,
    ) -> (NotaryKeyResolver, Arc<ScriptedTransport>, Arc<FlakyStore>) {
        let transport = Arc::new(transport);
        let store = Arc::new(store);
        let r = NotaryKeyResolver::new(transport.clone(), store.clone(), Duration::from_secs(30));
        (r, transport, store)
    }

    #[tokio::test]
    async fn fresh_cache_is_reused_without_network() {
        let store = seeded(&[key_entry(SERVER, "ed25519:a", "AAAA", 1_000)]).await;
        let (r, transport, _) = resolver(ScriptedTransport::new(), store);
        let wanted = criteria(&[("ed25519:a", FreshnessCriterion::at_least(1_000))]);

        for _ in 0..3 {
            let got = r.resolve_server_keys(&server(), &wanted, None).await.unwrap();
            assert_eq!(got.path, ResolutionPath::Cache);
            assert_eq!(got.keys, vec![key_entry(SERVER, "ed25519:a", "AAAA", 1_000)]);
        }
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn no_minimum_accepts_any_stored_key() {
        let store = seeded(&[key_entry(SERVER, "ed25519:a", "AAAA", 1)]).await;
        let (r, transport, _) = resolver(ScriptedTransport::new(), store);

        let wanted = criteria(&[("ed25519:a", FreshnessCriterion::any())]);
        let got = r.resolve_server_keys(&server(), &wanted, None).await.unwrap();
        assert_eq!(got.path, ResolutionPath::Cache);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn stale_key_triggers_one_fetch_and_refreshes_the_store() {
        let store = seeded(&[key_entry(SERVER, "ed25519:a", "AAAA", 1_000)]).await;
        let transport = ScriptedTransport::new()
            .with_keys(SERVER, KeyReply::Doc(key_doc(SERVER, &[("ed25519:a", "BBBB")], 5_000)));
        let (r, transport, store) = resolver(transport, store);
        let wanted = criteria(&[("ed25519:a", FreshnessCriterion::at_least(2_000))]);

        let got = r.resolve_server_keys(&server(), &wanted, None).await.unwrap();
        assert_eq!(got.path, ResolutionPath::Direct);
        assert_eq!(got.keys, vec![key_entry(SERVER, "ed25519:a", "BBBB", 5_000)]);
        assert_eq!(transport.calls(), vec![SERVER]);

        // The refreshed entry now satisfies the same criterion from cache.
        let stored = store.inner.read(&server(), &["ed25519:a".into()]).await.unwrap();
        assert_eq!(stored["ed25519:a"].valid_until_ts, 5_000);
        let again = r.resolve_server_keys(&server(), &wanted, None).await.unwrap();
        assert_eq!(again.path, ResolutionPath::Cache);
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn one_missing_key_forces_the_direct_path() {
        let store = seeded(&[key_entry(SERVER, "ed25519:a", "AAAA", 9_000)]).await;
        let transport = ScriptedTransport::new().with_keys(
            SERVER,
            KeyReply::Doc(key_doc(SERVER, &[("ed25519:a", "AAAA"), ("ed25519:b", "CCCC")], 9_000)),
        );
        let (r, transport, _) = resolver(transport, store);
        let wanted = criteria(&[
            ("ed25519:a", FreshnessCriterion::any()),
            ("ed25519:b", FreshnessCriterion::any()),
        ]);

        let got = r.resolve_server_keys(&server(), &wanted, None).await.unwrap();
        assert_eq!(got.path, ResolutionPath::Direct);
        assert_eq!(got.keys.len(), 2);
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_degrades_to_stale_cache() {
        let store = seeded(&[key_entry(SERVER, "ed25519:a", "AAAA", 1_000)]).await;
        let transport =
            ScriptedTransport::new().with_keys(SERVER, KeyReply::Fail("connection refused"));
        let (r, _, _) = resolver(transport, store);
        let wanted = criteria(&[("ed25519:a", FreshnessCriterion::at_least(2_000))]);

        let got = r.resolve_server_keys(&server(), &wanted, None).await.unwrap();
        assert_eq!(got.path, ResolutionPath::DegradedCache);
        assert_eq!(got.keys, vec![key_entry(SERVER, "ed25519:a", "AAAA", 1_000)]);
    }

    #[tokio::test]
    async fn failed_fetch_with_empty_cache_is_exhausted() {
        let transport =
            ScriptedTransport::new().with_keys(SERVER, KeyReply::Fail("connection refused"));
        let (r, _, _) = resolver(transport, FlakyStore::default());
        let wanted = criteria(&[("ed25519:a", FreshnessCriterion::any())]);

        let err = r.resolve_server_keys(&server(), &wanted, None).await.unwrap_err();
        let FederationError::NotaryExhausted { fetch, store, .. } = err else {
            panic!("expected NotaryExhausted")
        };
        assert!(fetch.to_string().contains("connection refused"));
        assert!(matches!(*store, FederationError::NotaryCacheEmpty { .. }));
    }

    #[tokio::test]
    async fn failed_fetch_and_failed_store_keep_both_causes() {
        let transport =
            ScriptedTransport::new().with_keys(SERVER, KeyReply::Fail("connection refused"));
        let store = FlakyStore { fail_reads: true, ..FlakyStore::default() };
        let (r, _, _) = resolver(transport, store);
        let wanted = criteria(&[("ed25519:a", FreshnessCriterion::any())]);

        let err = r.resolve_server_keys(&server(), &wanted, None).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("connection refused"), "{msg}");
        assert!(msg.contains("notary store unavailable"), "{msg}");
    }

    #[tokio::test]
    async fn write_failure_does_not_fail_the_resolution() {
        let transport = ScriptedTransport::new()
            .with_keys(SERVER, KeyReply::Doc(key_doc(SERVER, &[("ed25519:a", "AAAA")], 5_000)));
        let store = FlakyStore { fail_writes: true, ..FlakyStore::default() };
        let (r, _, store) = resolver(transport, store);

        let wanted = criteria(&[("ed25519:a", FreshnessCriterion::any())]);
        let got = r.resolve_server_keys(&server(), &wanted, None).await.unwrap();
        assert_eq!(got.path, ResolutionPath::Direct);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn document_for_another_server_is_rejected() {
        let store = seeded(&[key_entry(SERVER, "ed25519:a", "AAAA", 1)]).await;
        let transport = ScriptedTransport::new().with_keys(
            SERVER,
            KeyReply::Doc(key_doc("impostor.tld", &[("ed25519:a", "EVIL")], 9_000)),
        );
        let (r, _, store) = resolver(transport, store);
        let wanted = criteria(&[("ed25519:a", FreshnessCriterion::at_least(2))]);

        let got = r.resolve_server_keys(&server(), &wanted, None).await.unwrap();
        assert_eq!(got.path, ResolutionPath::DegradedCache);
        assert_eq!(got.keys[0].verify_key.key, "AAAA");
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_server_is_abandoned_after_the_bound() {
        let store = seeded(&[key_entry(SERVER, "ed25519:a", "AAAA", 1)]).await;
        let transport = ScriptedTransport::new().with_keys(SERVER, KeyReply::Hang);
        let (r, _, _) = resolver(transport, store);
        let started = Instant::now();

        let wanted = criteria(&[("ed25519:a", FreshnessCriterion::at_least(2))]);
        let got = r.resolve_server_keys(&server(), &wanted, None).await.unwrap();
        assert_eq!(got.path, ResolutionPath::DegradedCache);
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn caller_deadline_cuts_the_fetch_short() {
        let store = seeded(&[key_entry(SERVER, "ed25519:a", "AAAA", 1)]).await;
        let transport = ScriptedTransport::new().with_keys(SERVER, KeyReply::Hang);
        let (r, _, _) = resolver(transport, store);
        let started = Instant::now();

        let err = r
            .resolve_server_keys(
                &server(),
                &criteria(&[("ed25519:a", FreshnessCriterion::at_least(2))]),
                Some(started + Duration::from_secs(3)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::DeadlineExceeded { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn one_stale_key_among_fresh_ones_forces_the_direct_path() {
        let store = seeded(&[
            key_entry(SERVER, "ed25519:a", "AAAA", 9_000),
            key_entry(SERVER, "ed25519:b", "BBBB", 1_000),
        ])
        .await;
        let transport = ScriptedTransport::new().with_keys(
            SERVER,
            KeyReply::Doc(key_doc(SERVER, &[("ed25519:a", "AAAA"), ("ed25519:b", "CCCC")], 9_000)),
        );
        let (r, transport, _) = resolver(transport, store);
        let wanted = criteria(&[
            ("ed25519:a", FreshnessCriterion::at_least(5_000)),
            ("ed25519:b", FreshnessCriterion::at_least(5_000)),
        ]);

        let got = r.resolve_server_keys(&server(), &wanted, None).await.unwrap();
        assert_eq!(got.path, ResolutionPath::Direct);
        let expected = vec![
            key_entry(SERVER, "ed25519:a", "AAAA", 9_000),
            key_entry(SERVER, "ed25519:b", "CCCC", 9_000),
        ];
        assert_eq!(got.keys, expected);
        assert_eq!(transport.calls(), vec![SERVER]);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_store_read_ends_at_the_caller_deadline_without_fetching() {
        let transport = ScriptedTransport::new()
            .with_keys(SERVER, KeyReply::Doc(key_doc(SERVER, &[("ed25519:a", "AAAA")], 5_000)));
        let store = FlakyStore { hang: true, ..FlakyStore::default() };
        let (r, transport, store) = resolver(transport, store);
        let started = Instant::now();

        let err = r
            .resolve_server_keys(
                &server(),
                &criteria(&[("ed25519:a", FreshnessCriterion::any())]),
                Some(started + Duration::from_secs(2)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FederationError::DeadlineExceeded { .. }), "{err}");
        assert!(transport.calls().is_empty());
        assert_eq!(store.writes(), 0);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_makes_no_remote_call() {
        let store = seeded(&[key_entry(SERVER, "ed25519:a", "AAAA", 1)]).await;
        let transport = ScriptedTransport::new()
            .with_keys(SERVER, KeyReply::Doc(key_doc(SERVER, &[("ed25519:a", "BBBB")], 5_000)));
        let (r, transport, store) = resolver(transport, store);

        let err = r
            .resolve_server_keys(
                &server(),
                &criteria(&[("ed25519:a", FreshnessCriterion::at_least(2))]),
                Some(Instant::now()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::DeadlineExceeded { .. }), "{err}");
        assert!(transport.calls().is_empty());
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn concurrent_refreshes_store_one_version() {
        let memory = MemoryNotaryStore::new();
        let transport = Arc::new(ScriptedTransport::new().with_keys(
            SERVER,
            KeyReply::Doc(key_doc(SERVER, &[("ed25519:a", "AAAA")], 5_000)),
        ));
        let r =
            NotaryKeyResolver::new(transport, Arc::new(memory.clone()), Duration::from_secs(30));
        let wanted = criteria(&[("ed25519:a", FreshnessCriterion::any())]);

        let server = server();

        let (a, b) = tokio::join!(
            r.resolve_server_keys(&server, &wanted, None),
            r.resolve_server_keys(&server, &wanted, None),
        );
        assert_eq!(a.unwrap().keys, b.unwrap().keys);
        assert_eq!(memory.version_count(&server, "ed25519:a").await, 1);
    }
}
