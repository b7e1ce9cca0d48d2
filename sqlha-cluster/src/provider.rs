//! Databases and logins for client applications.
//!
//! Client requests are served only by the primary replica, and only once the
//! availability group exists and the floating address is up. New databases
//! are added to the group; new logins reach the secondaries through login
//! replication, triggered by a nonce write.

use crate::error::ClusterResult;
use crate::node::ClusterNode;
use crate::secrets::{SECRET_PASSWORD_LENGTH, generate_password};
use rand::rngs::OsRng;
use sqlha_core::db::LoginSpec;
use std::fmt;

/// A client's request for a database and login.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseRequest {
    /// Database to create.
    pub database: String,
    /// Login to create and map into the database.
    pub username: String,
}

impl DatabaseRequest {
    /// Create a request.
    pub fn new(database: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            username: username.into(),
        }
    }

    /// Whether both fields are filled in.
    pub fn is_complete(&self) -> bool {
        !self.database.is_empty() && !self.username.is_empty()
    }
}

/// Signal from the clustering resource manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HaStatus {
    /// This unit is part of the resource-manager cluster.
    pub clustered: bool,
    /// Floating address clients connect to.
    pub vip: String,
}

/// Connection details handed back to the client.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseGrant {
    /// Host clients should connect to.
    pub db_host: String,
    /// Password of the new login.
    pub password: String,
}

impl fmt::Debug for DatabaseGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseGrant")
            .field("db_host", &self.db_host)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What happened to a database request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Retry later: the group or the floating address is not ready.
    Deferred,
    /// This node is not the primary; another node will serve it.
    NotPrimary,
    /// The request lacks a database or username.
    Incomplete,
    /// Database and login created.
    Granted(DatabaseGrant),
}

impl ClusterNode {
    /// Create the requested database and login on the primary replica.
    pub async fn handle_database_request(
        &self,
        request: &DatabaseRequest,
        ha: &HaStatus,
    ) -> ClusterResult<RequestOutcome> {
        if !self.is_group_ready() || !ha.clustered {
            tracing::warn!("Deferring database request until the group and HA cluster are ready");
            return Ok(RequestOutcome::Deferred);
        }
        if !self.is_primary_replica().await? {
            tracing::warn!(node = %self.config.node_name, "Not the primary replica, skipping database request");
            return Ok(RequestOutcome::NotPrimary);
        }
        if !request.is_complete() {
            tracing::info!("Database request is incomplete");
            return Ok(RequestOutcome::Incomplete);
        }

        tracing::info!(database = %request.database, login = %request.username, "Handling database request");
        let password = generate_password(&mut OsRng, SECRET_PASSWORD_LENGTH);
        let db = self.local_db().await?;
        db.create_database(&request.database, Some(&self.config.group_name))
            .await?;
        db.create_login(&LoginSpec::plain(&request.username, &password))
            .await?;
        db.grant_access(&request.database, &request.username)
            .await?;
        // Secondaries pick up the new login on their next evaluation.
        self.write_nonce()?;

        Ok(RequestOutcome::Granted(DatabaseGrant {
            db_host: ha.vip.clone(),
            password,
        }))
    }

    /// Remove a departed client's login, and its database user on the primary.
    ///
    /// Returns `false` for incomplete requests.
    pub async fn handle_database_departed(&self, request: &DatabaseRequest) -> ClusterResult<bool> {
        if !request.is_complete() {
            tracing::info!("No request data, skipping departure");
            return Ok(false);
        }
        let db = self.local_db().await?;
        db.remove_login(&request.username).await?;
        if self.is_group_ready() && self.is_primary_replica().await? {
            db.revoke_access(&request.database, &request.username)
                .await?;
        }
        Ok(true)
    }
}
