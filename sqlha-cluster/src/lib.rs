//! Decentralized formation of a SQL Server availability group.
//!
//! Every node runs the same [`ClusterNode`] logic against a shared,
//! eventually-consistent broadcast store. Nodes converge on one
//! leader-issued administrator secret, one mirroring certificate, and one
//! availability group, created once a quorum of nodes is ready.
//!
//! # Architecture
//!
//! ```text
//!   broadcast change / lifecycle event
//!                 │
//!                 ▼
//!   ┌─────────────────────────────┐
//!   │ ClusterNode::handle         │
//!   │  ├─ NodeRegistry (peers)    │
//!   │  ├─ secrets (leader only)   │──► group bag
//!   │  └─ formation               │──► unit bag (ready, clustered, nonce)
//!   └──────────────┬──────────────┘
//!                  ▼
//!        DatabaseOperations (local or peer instance)
//! ```
//!
//! A node moves through [`NodePhase::Uninitialized`],
//! [`NodePhase::ReadyToCluster`] and [`NodePhase::Clustered`]. Each phase
//! change is guarded by a persisted flag in [`LocalState`], so replaying an
//! event never repeats a completed step.
//!
//! # Usage
//!
//! ```ignore
//! use sqlha_cluster::{ClusterEvent, ClusterNode, NodeConfig, NodeContext};
//!
//! let config = NodeConfig::builder()
//!     .node_name("sql-0")
//!     .bind_address("10.0.0.1")
//!     .build()?;
//! let mut node = ClusterNode::load(config, context)?;
//! let evaluation = node.handle(ClusterEvent::Changed(None)).await?;
//! ```

pub mod config;
pub mod error;
pub mod event;
mod formation;
pub mod logins;
mod node;
pub mod provider;
pub mod registry;
pub mod secrets;
pub mod simulation;
pub mod state;

pub use config::NodeConfig;
pub use error::{ClusterError, ClusterResult};
pub use event::{ClusterEvent, Evaluation, NodePhase, Notification, WaitReason};
pub use node::{ClusterNode, NodeContext};
pub use provider::{DatabaseGrant, DatabaseRequest, HaStatus, RequestOutcome};
pub use registry::{NodeRecord, NodeRegistry};
pub use secrets::CertificateBundle;
pub use state::{JsonStateStore, LocalState, MemoryStateStore, StateStore};
