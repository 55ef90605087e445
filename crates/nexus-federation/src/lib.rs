//! # nexus-federation
//!
//! Resolution of questions this server cannot answer from local data, by asking
//! remote servers in other administrative domains.
//!
//! ## Architecture
//!
//! ```text
//!   caller ──► FederationResolver
//!                 │
//!                 ├── room queries ──► HostFallback ──► RemoteTransport ──► host 1, host 2, …
//!                 │        ▲                              (one at a time, 30s each)
//!                 │        └── CandidateHostSource (joined hosts of the room)
//!                 │
//!                 └── key queries ───► NotaryKeyResolver ──► NotaryStore (cache)
//!                                               └──────────► RemoteTransport (direct fetch)
//! ```
//!
//! ## Key concepts
//!
//! - **Host fallback** (`fallback.rs`): event auth chains, state IDs and full
//!   state are fetched from the room's candidate hosts strictly in sequence; the
//!   first answer wins, and only the last failure is reported.
//! - **Notary** (`notary.rs`): remote signing keys come from the store when fresh
//!   enough, otherwise from the server itself, otherwise (degraded) from the store
//!   regardless of freshness. The answering path is part of the result.
//! - **Bounded attempts** (`attempt.rs`): each remote or store call has its own
//!   cap, shortened by the caller's deadline when that is sooner.
//! - **Federation client** (`client.rs`): the reqwest-backed transport, with
//!   discovery (`discovery.rs`) and request signing (`signing.rs`).

pub mod attempt;
pub mod client;
pub mod discovery;
pub mod error;
pub mod fallback;
pub mod hosts;
pub mod notary;
pub mod resolver;
pub mod signing;
pub mod store;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use attempt::ResolverConfig;
pub use client::FederationClient;
pub use error::FederationError;
pub use resolver::FederationResolver;
pub use signing::OriginKey;
pub use types::{
    FreshnessCriterion, KeyCriteria, KeyResolution, ResolutionPath, ResolutionRequest,
    ResolutionResult, RoomQuery, ServerKeyEntry, ServerName,
};
