//! Database operations used by cluster formation.
//!
//! [`DatabaseOperations`] is the seam between formation logic and a SQL
//! Server instance. [`mssql::MssqlDatabase`] implements it in T-SQL over a
//! pluggable wire connection; `crate::testing::MockSqlServer` implements it in
//! memory.

pub mod mssql;
mod traits;
mod types;

pub use traits::{DatabaseConnector, DatabaseOperations, DbError, DbFuture, DbResult};
pub use types::{CertificatePair, Credentials, LoginPassword, LoginSpec, ReplicaNode, SqlLogin};
