//! Shared building blocks for bootstrapping a replicated SQL Server
//! availability group.
//!
//! This crate holds the leaf components the formation logic in
//! `sqlha-cluster` is written against:
//!
//! - [`broadcast`] - the eventually-consistent key/value exchange between
//!   peers, with per-unit bags and a leader-written group bag.
//! - [`db`] - the [`db::DatabaseOperations`] seam, its T-SQL adapter and the
//!   login/certificate types it moves around.
//! - [`hosts`] - name resolution for replica hostnames.
//! - [`observability`] - tracing subscriber setup for binaries.
//! - [`testing`] - an in-memory SQL Server fleet for tests and simulation.
//!
//! # Broadcast layout
//!
//! ```text
//!   unit bag (one writer each)          group bag (leader only)
//!  ┌──────────────────────────┐       ┌─────────────────────────────┐
//!  │ node_name  node_address  │       │ sa_password                 │
//!  │ ready_to_cluster         │       │ master_key_password         │
//!  │ clustered  nonce         │       │ master_cert master_cert_key │
//!  └──────────────────────────┘       │ master_cert_key_password    │
//!                                      │ ag_ready                    │
//!                                      └─────────────────────────────┘
//! ```

pub mod broadcast;
pub mod db;
pub mod hosts;
pub mod observability;
pub mod testing;
pub mod types;

pub use broadcast::{
    BroadcastError, BroadcastResult, BroadcastStore, MemoryBroadcast, MemoryBroadcastHub,
};
pub use db::{DatabaseConnector, DatabaseOperations, DbError, DbFuture, DbResult};
pub use hosts::{HostsFile, MemoryResolver, NameResolver, ResolverError};
pub use types::{NodeName, UnitId};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::broadcast::{BroadcastStore, keys};
    pub use crate::db::{
        CertificatePair, Credentials, DatabaseConnector, DatabaseOperations, DbError, DbResult,
        LoginPassword, LoginSpec, ReplicaNode, SqlLogin,
    };
    pub use crate::hosts::NameResolver;
    pub use crate::types::{NodeName, UnitId};
}
