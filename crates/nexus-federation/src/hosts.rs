//! Candidate host sources: which remote servers may answer a room query.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::{error::FederationError, types::ServerName};

/// Supplies the servers known to have (or have had) membership in a room.
///
/// The order returned is the order the fallback executor tries them in.
#[async_trait]
pub trait CandidateHostSource: Send + Sync {
    async fn candidate_hosts(&self, room_id: &str) -> Result<Vec<ServerName>, FederationError>;
}

/// Joined hosts recorded in the `federation_joined_hosts` table.
#[derive(Clone)]
pub struct DbCandidateHosts {
    pool: PgPool,
}

impl DbCandidateHosts {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CandidateHostSource for DbCandidateHosts {
    async fn candidate_hosts(&self, room_id: &str) -> Result<Vec<ServerName>, FederationError> {
        let hosts = nexus_db::repository::joined_hosts::select_for_rooms(
            &self.pool,
            &[room_id.to_owned()],
        )
        .await
        .map_err(FederationError::Other)?;
        Ok(hosts.into_iter().map(ServerName::from).collect())
    }
}

/// The same fixed list for every room. Used when hosts are given on the
/// command line instead of read from the database.
#[derive(Debug, Clone, Default)]
pub struct FixedCandidateHosts {
    hosts: Vec<ServerName>,
}

impl FixedCandidateHosts {
    pub fn new(hosts: impl IntoIterator<Item = ServerName>) -> Self {
        Self { hosts: hosts.into_iter().collect() }
    }
}

#[async_trait]
impl CandidateHostSource for FixedCandidateHosts {
    async fn candidate_hosts(&self, _room_id: &str) -> Result<Vec<ServerName>, FederationError> {
        Ok(self.hosts.clone())
    }
}
