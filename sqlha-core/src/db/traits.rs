//! Database operations traits and error types.

use super::types::{CertificatePair, Credentials, LoginSpec, ReplicaNode, SqlLogin};
use crate::types::NodeName;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// The instance could not be reached before the retry window closed.
    #[error("Couldn't connect to SQL Server {host} within {:.2} minutes", .waited.as_secs_f64() / 60.0)]
    ConnectTimeout {
        /// Host that was dialed.
        host: String,
        /// How long connection attempts were retried.
        waited: Duration,
    },

    /// A single connection attempt failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A statement was rejected by the server.
    #[error("Query failed: {0}")]
    Query(String),

    /// A result row did not have the expected shape.
    #[error("Unexpected result row: {0}")]
    UnexpectedRow(String),

    /// A referenced object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local file handling failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Type alias for async database futures.
pub type DbFuture<'a, T> = Pin<Box<dyn Future<Output = DbResult<T>> + Send + 'a>>;

/// Operations cluster formation needs from one SQL Server instance.
///
/// Every mutating operation checks for the object it would create first, so
/// repeating a call after a partial failure is safe.
pub trait DatabaseOperations: Send + Sync {
    /// Create a login, or update the password and roles of an existing one.
    ///
    /// The SID is applied only when the login is created.
    fn create_login<'a>(&'a self, spec: &'a LoginSpec) -> DbFuture<'a, ()>;

    /// Drop a login if it exists.
    fn remove_login<'a>(&'a self, name: &'a str) -> DbFuture<'a, ()>;

    /// Map a login into a database as `db_owner`.
    fn grant_access<'a>(&'a self, database: &'a str, login: &'a str) -> DbFuture<'a, ()>;

    /// Drop a database user if it exists.
    fn revoke_access<'a>(&'a self, database: &'a str, user: &'a str) -> DbFuture<'a, ()>;

    /// Create a database if missing, optionally adding it to a group.
    fn create_database<'a>(&'a self, name: &'a str, group: Option<&'a str>) -> DbFuture<'a, ()>;

    /// Create the database master key, or regenerate it with a new password.
    fn create_master_key<'a>(&'a self, password: &'a str) -> DbFuture<'a, ()>;

    /// Create the mirroring certificate and export it.
    ///
    /// The private key is encrypted with `password`.
    fn create_certificate<'a>(&'a self, password: &'a str) -> DbFuture<'a, CertificatePair>;

    /// Install an exported certificate if none exists yet.
    fn install_certificate<'a>(
        &'a self,
        pair: &'a CertificatePair,
        password: &'a str,
    ) -> DbFuture<'a, ()>;

    /// Create and start the database mirroring endpoint.
    fn create_endpoint(&self) -> DbFuture<'_, ()>;

    /// Create an availability group with the given replicas.
    ///
    /// No-op when a group with that name already exists.
    fn create_group<'a>(&'a self, name: &'a str, nodes: &'a [ReplicaNode]) -> DbFuture<'a, ()>;

    /// Join an availability group this instance is listed in.
    fn join_group<'a>(&'a self, name: &'a str) -> DbFuture<'a, ()>;

    /// Add replicas that are not yet part of the group.
    fn add_replicas<'a>(&'a self, name: &'a str, nodes: &'a [ReplicaNode]) -> DbFuture<'a, ()>;

    /// The group's current primary as seen by this instance.
    fn primary_replica<'a>(&'a self, name: &'a str) -> DbFuture<'a, Option<NodeName>>;

    /// The group's replica names as seen by this instance.
    fn replicas<'a>(&'a self, name: &'a str) -> DbFuture<'a, Vec<NodeName>>;

    /// All SQL-authenticated logins with SID, password hash and server roles.
    fn sql_logins(&self) -> DbFuture<'_, Vec<SqlLogin>>;
}

/// Opens [`DatabaseOperations`] handles for instances by host.
pub trait DatabaseConnector: Send + Sync {
    /// Connect to the instance at `host` with the given credentials.
    fn connect<'a>(
        &'a self,
        host: &'a str,
        credentials: &'a Credentials,
    ) -> DbFuture<'a, Arc<dyn DatabaseOperations>>;
}
