//! Wire connection seam and connect retry policy.

use crate::db::{DbError, DbFuture, DbResult};
use std::time::Duration;
use tokio::time::Instant;

/// A single column value returned by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// Integer column.
    Int(i64),
    /// Character column.
    Text(String),
    /// Binary column.
    Bytes(Vec<u8>),
}

impl SqlValue {
    /// Borrow a text column.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow a binary column.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// One result row.
pub type SqlRow = Vec<SqlValue>;

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct SqlTarget {
    /// Host name or address.
    pub host: String,
    /// TDS port.
    pub port: u16,
    /// Login name.
    pub login: String,
    /// Login password.
    pub password: String,
}

/// An open, autocommit connection to an instance.
pub trait SqlConnection: Send {
    /// Run a batch that returns no rows.
    fn execute<'a>(&'a mut self, sql: &'a str) -> DbFuture<'a, ()>;

    /// Run a batch and collect the rows of its first result set.
    fn query<'a>(&'a mut self, sql: &'a str) -> DbFuture<'a, Vec<SqlRow>>;
}

/// Opens wire connections. Supplied by the host process.
pub trait SqlConnector: Send + Sync {
    /// Make a single connection attempt.
    fn open<'a>(&'a self, target: &'a SqlTarget) -> DbFuture<'a, Box<dyn SqlConnection>>;
}

/// Retry policy for establishing connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    /// Pause between failed attempts.
    pub retry_interval: Duration,
    /// Give up once this much time has passed.
    pub timeout: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Connect, retrying failed attempts until the policy's timeout elapses.
pub async fn connect_with_retry(
    connector: &dyn SqlConnector,
    target: &SqlTarget,
    policy: ConnectPolicy,
) -> DbResult<Box<dyn SqlConnection>> {
    let start = Instant::now();
    let mut attempts = 0u32;
    loop {
        let elapsed = start.elapsed();
        if elapsed > policy.timeout {
            return Err(DbError::ConnectTimeout {
                host: format!("{}:{}", target.host, target.port),
                waited: policy.timeout,
            });
        }

        attempts += 1;
        match connector.open(target).await {
            Ok(conn) => {
                if attempts > 1 {
                    tracing::info!(host = %target.host, attempts, "Connected to SQL Server");
                }
                return Ok(conn);
            }
            Err(e) => {
                tracing::debug!(
                    host = %target.host,
                    attempt = attempts,
                    error = %e,
                    "SQL Server connection attempt failed"
                );
                tokio::time::sleep(policy.retry_interval).await;
            }
        }
    }
}
