//! # Nexus Resolver
//!
//! Command-line front end for federation resolution:
//! - Room queries (event auth chain, state IDs, full state) with host fallback
//! - Remote server signing keys through the notary cache
//!
//! With `NEXUS__DATABASE__URL` set, candidate hosts and the notary cache live in
//! PostgreSQL. Without it the notary cache is in memory and hosts must be passed
//! with `--via`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nexus_db::Database;
use nexus_federation::{
    FederationClient, FederationResolver, FreshnessCriterion, KeyCriteria, OriginKey,
    ResolutionRequest, ResolverConfig, RoomQuery, ServerName,
    discovery::DiscoveryCache,
    hosts::{CandidateHostSource, DbCandidateHosts, FixedCandidateHosts},
    store::{DbNotaryStore, MemoryNotaryStore, NotaryStore},
};
use tokio::time::Instant;

#[derive(Parser)]
#[command(name = "nexus-resolver")]
#[command(
    about = "Resolve room state and server keys from remote Nexus servers",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Overall deadline for the whole resolution, in seconds.
    #[arg(long, global = true)]
    deadline_secs: Option<u64>,

    /// Candidate hosts to try, in order, instead of the joined-hosts table.
    #[arg(long = "via", global = true, value_delimiter = ',')]
    via: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// List the known hosts of a room.
    Hosts { room_id: String },
    /// Record that a server joined a room (requires a database).
    RecordHost { room_id: String, event_id: String, server_name: String },
    /// Fetch the auth chain of an event.
    EventAuth { room_id: String, event_id: String },
    /// Fetch the auth and state event IDs of a room at an event.
    StateIds { room_id: String, event_id: String },
    /// Fetch the full auth and state events of a room at an event.
    State {
        room_id: String,
        event_id: String,
        #[arg(long, default_value = "10")]
        room_version: String,
    },
    /// Fetch signing keys of a remote server.
    Keys {
        server_name: String,
        /// `<key_id>` or `<key_id>=<minimum_valid_until_ms>`; repeatable.
        #[arg(long = "key", value_parser = parse_key_arg)]
        keys: Vec<KeyArg>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyArg {
    key_id: String,
    criterion: FreshnessCriterion,
}

fn parse_key_arg(raw: &str) -> Result<KeyArg, String> {
    let (key_id, criterion) = match raw.split_once('=') {
        Some((id, ts)) => {
            let ts: i64 = ts
                .parse()
                .map_err(|e| format!("invalid minimum_valid_until_ms {ts:?}: {e}"))?;
            (id, FreshnessCriterion::at_least(ts))
        }
        None => (raw, FreshnessCriterion::any()),
    };
    if key_id.is_empty() {
        return Err("key id must not be empty".into());
    }
    Ok(KeyArg { key_id: key_id.to_owned(), criterion })
}

fn criteria(keys: Vec<KeyArg>) -> KeyCriteria {
    keys.into_iter().map(|k| (k.key_id, k.criterion)).collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = nexus_common::config::init()?;

    // Initialize tracing (structured logging)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nexus=debug".into()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Nexus resolver v{}", env!("CARGO_PKG_VERSION"));

    // === Storage ===
    let db = match &config.database.url {
        Some(url) => {
            let db = Database::connect(&config.database, url).await?;
            db.migrate().await?;
            nexus_db::postgres::ping(&db.pg).await?;
            Some(db)
        }
        None => {
            tracing::warn!("No database configured; using an in-memory notary cache");
            None
        }
    };

    let hosts: Arc<dyn CandidateHostSource> = match (&db, cli.via.is_empty()) {
        (_, false) => {
            let via = cli.via.iter().map(|h| ServerName::from(h.as_str()));
            Arc::new(FixedCandidateHosts::new(via))
        }
        (Some(db), true) => Arc::new(DbCandidateHosts::new(db.pg.clone())),
        (None, true) => {
            tracing::warn!("No database and no --via hosts; room queries have no candidates");
            Arc::new(FixedCandidateHosts::default())
        }
    };
    let store: Arc<dyn NotaryStore> = match &db {
        Some(db) => Arc::new(DbNotaryStore::new(db.pg.clone())),
        None => Arc::new(MemoryNotaryStore::new()),
    };

    // === Federation signing key ===
    let key = match &config.federation.signing_key_seed_hex {
        Some(seed) => OriginKey::from_seed_hex(seed)?,
        None => {
            tracing::warn!("No signing key seed configured; generating an ephemeral key");
            OriginKey::generate()
        }
    };
    tracing::info!(
        key_id = %key.key_id,
        public_key = %key.public_key_base64(),
        "Federation signing key ready"
    );

    let discovery = DiscoveryCache::new(
        Duration::from_secs(config.federation.discovery_ttl_secs),
        config.federation.default_port,
    )?;
    let client = FederationClient::new(&config.server.name, Arc::new(key), discovery)?;
    let resolver = FederationResolver::new(
        hosts,
        Arc::new(client),
        store,
        ResolverConfig::from(&config.federation),
    );

    let deadline = cli.deadline_secs.map(|s| Instant::now() + Duration::from_secs(s));

    let output = match cli.command {
        Command::Hosts { room_id } => {
            serde_json::to_value(resolver.joined_hosts(&room_id, deadline).await?)?
        }
        Command::RecordHost { room_id, event_id, server_name } => {
            let db = db.context("record-host needs NEXUS__DATABASE__URL")?;
            nexus_db::repository::joined_hosts::insert(&db.pg, &room_id, &event_id, &server_name)
                .await?;
            serde_json::json!({
                "room_id": room_id,
                "event_id": event_id,
                "server_name": server_name,
            })
        }
        Command::EventAuth { room_id, event_id } => {
            let query = RoomQuery::EventAuth { room_id, event_id };
            run(&resolver, ResolutionRequest::Room(query), deadline).await?
        }
        Command::StateIds { room_id, event_id } => {
            let query = RoomQuery::StateIds { room_id, event_id };
            run(&resolver, ResolutionRequest::Room(query), deadline).await?
        }
        Command::State { room_id, event_id, room_version } => {
            let query = RoomQuery::FullState { room_id, event_id, room_version };
            run(&resolver, ResolutionRequest::Room(query), deadline).await?
        }
        Command::Keys { server_name, keys } => {
            let request = ResolutionRequest::ServerKeys {
                server_name: ServerName::from(server_name),
                criteria: criteria(keys),
            };
            run(&resolver, request, deadline).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(
    resolver: &FederationResolver,
    request: ResolutionRequest,
    deadline: Option<Instant>,
) -> anyhow::Result<serde_json::Value> {
    let result = resolver
        .resolve(&request, deadline)
        .await
        .context("federation resolution failed")?;
    Ok(serde_json::to_value(result)?)
}
