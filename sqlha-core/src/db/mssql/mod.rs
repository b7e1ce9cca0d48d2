//! T-SQL implementation of [`DatabaseOperations`].
//!
//! Statements follow the SQL Server on Linux availability-group recipe with
//! `CLUSTER_TYPE = EXTERNAL`: a shared certificate authenticates mirroring
//! endpoints, and failover is left to an external resource manager.
//!
//! The wire driver is supplied through [`SqlConnector`]; each operation opens
//! its own autocommit connection, retrying per [`ConnectPolicy`].

mod connection;
pub mod tsql;

pub use connection::{
    ConnectPolicy, SqlConnection, SqlConnector, SqlRow, SqlTarget, SqlValue, connect_with_retry,
};

use crate::db::{
    CertificatePair, Credentials, DatabaseConnector, DatabaseOperations, DbError, DbFuture,
    DbResult, LoginPassword, LoginSpec, ReplicaNode, SqlLogin,
};
use crate::types::NodeName;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default TDS port.
pub const DEFAULT_PORT: u16 = 1433;
/// Default SQL Server data directory on Linux.
pub const DEFAULT_DATA_DIR: &str = "/var/opt/mssql/data";

/// Where certificate exports and seeding backups live on the node.
#[derive(Debug, Clone)]
pub struct DataFiles {
    /// Directory readable and writable by the database service.
    pub data_dir: PathBuf,
    /// Numeric `(uid, gid)` to hand restored certificate files to.
    pub owner: Option<(u32, u32)>,
}

impl Default for DataFiles {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            owner: None,
        }
    }
}

impl DataFiles {
    fn certificate_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.cer", tsql::CERTIFICATE_NAME))
    }

    fn private_key_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.pvk", tsql::CERTIFICATE_NAME))
    }

    fn backup_path(&self, database: &str) -> PathBuf {
        self.data_dir.join(format!("{database}.bak"))
    }

    fn write_owned(&self, path: &Path, contents: &[u8]) -> DbResult<()> {
        fs::write(path, contents)?;
        #[cfg(unix)]
        if let Some((uid, gid)) = self.owner {
            std::os::unix::fs::chown(path, Some(uid), Some(gid))?;
        }
        Ok(())
    }
}

/// Connection options shared by every instance handle.
#[derive(Debug, Clone)]
pub struct MssqlOptions {
    /// TDS port.
    pub port: u16,
    /// Connection retry policy.
    pub policy: ConnectPolicy,
    /// Local file locations.
    pub files: DataFiles,
}

impl Default for MssqlOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            policy: ConnectPolicy::default(),
            files: DataFiles::default(),
        }
    }
}

/// A SQL Server instance reached through a [`SqlConnector`].
pub struct MssqlDatabase {
    sql: Arc<dyn SqlConnector>,
    target: SqlTarget,
    options: MssqlOptions,
}

impl MssqlDatabase {
    /// Create a handle for one instance.
    pub fn new(
        sql: Arc<dyn SqlConnector>,
        host: impl Into<String>,
        credentials: &Credentials,
        options: MssqlOptions,
    ) -> Self {
        let target = SqlTarget {
            host: host.into(),
            port: options.port,
            login: credentials.login.clone(),
            password: credentials.password.clone(),
        };
        Self {
            sql,
            target,
            options,
        }
    }

    /// The host this handle talks to.
    pub fn host(&self) -> &str {
        &self.target.host
    }

    async fn connection(&self) -> DbResult<Box<dyn SqlConnection>> {
        connect_with_retry(self.sql.as_ref(), &self.target, self.options.policy).await
    }

    async fn exec(&self, sql: &str) -> DbResult<()> {
        let mut conn = self.connection().await?;
        conn.execute(sql).await
    }

    async fn first_text_column(&self, sql: &str) -> DbResult<Vec<String>> {
        let mut conn = self.connection().await?;
        let rows = conn.query(sql).await?;
        rows.iter()
            .map(|row| {
                row.first()
                    .and_then(SqlValue::as_text)
                    .map(str::to_string)
                    .ok_or_else(|| DbError::UnexpectedRow(format!("expected text column in {row:?}")))
            })
            .collect()
    }
}

fn hex_param(label: &str, login: &str, hex: &str) -> DbResult<String> {
    tsql::hex_literal(hex)
        .ok_or_else(|| DbError::Query(format!("invalid {label} for login {login}: not hex")))
}

fn remove_if_exists(path: &Path) -> DbResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl DatabaseOperations for MssqlDatabase {
    fn create_login<'a>(&'a self, spec: &'a LoginSpec) -> DbFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(login = %spec.name, host = %self.target.host, "Creating SQL login");
            let mut conn = self.connection().await?;
            let exists = !conn.query(&tsql::login_exists(&spec.name)).await?.is_empty();

            let mut params = vec![match &spec.password {
                LoginPassword::Plain(password) => format!("PASSWORD = {}", tsql::literal(password)),
                LoginPassword::Hashed(hash) => {
                    format!("PASSWORD = {} HASHED", hex_param("password hash", &spec.name, hash)?)
                }
            }];
            if !exists {
                if let Some(sid) = &spec.sid {
                    params.push(format!("SID = {}", hex_param("sid", &spec.name, sid)?));
                }
            }
            params.push("CHECK_POLICY = OFF".to_string());
            params.push("CHECK_EXPIRATION = OFF".to_string());

            conn.execute(&tsql::upsert_login(exists, &spec.name, &params))
                .await?;
            for role in &spec.server_roles {
                conn.execute(&tsql::add_server_role_member(role, &spec.name))
                    .await?;
            }
            Ok(())
        })
    }

    fn remove_login<'a>(&'a self, name: &'a str) -> DbFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(login = name, "Removing SQL login if it exists");
            self.exec(&tsql::drop_login(name)).await
        })
    }

    fn grant_access<'a>(&'a self, database: &'a str, login: &'a str) -> DbFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(database, login, "Granting database access");
            self.exec(&tsql::grant_db_owner(database, login, login)).await
        })
    }

    fn revoke_access<'a>(&'a self, database: &'a str, user: &'a str) -> DbFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(database, user, "Revoking database access");
            self.exec(&tsql::drop_user(database, user)).await
        })
    }

    fn create_database<'a>(&'a self, name: &'a str, group: Option<&'a str>) -> DbFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(database = name, "Creating database");
            let mut conn = self.connection().await?;
            conn.execute(&tsql::create_database(name)).await?;
            if let Some(group) = group {
                let backup = self.options.files.backup_path(name);
                tracing::info!(database = name, group, "Adding database to availability group");
                conn.execute(&tsql::add_database_to_group(
                    name,
                    group,
                    &backup.to_string_lossy(),
                ))
                .await?;
            }
            Ok(())
        })
    }

    fn create_master_key<'a>(&'a self, password: &'a str) -> DbFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(host = %self.target.host, "Creating master encryption key");
            self.exec(&tsql::create_or_regenerate_master_key(password))
                .await
        })
    }

    fn create_certificate<'a>(&'a self, password: &'a str) -> DbFuture<'a, CertificatePair> {
        Box::pin(async move {
            let files = &self.options.files;
            let cert_path = files.certificate_path();
            let key_path = files.private_key_path();
            // Backups refuse to overwrite existing files.
            remove_if_exists(&cert_path)?;
            remove_if_exists(&key_path)?;

            self.exec(&tsql::create_and_backup_certificate(
                &cert_path.to_string_lossy(),
                &key_path.to_string_lossy(),
                password,
            ))
            .await?;

            let pair = CertificatePair {
                certificate: fs::read(&cert_path)?,
                private_key: fs::read(&key_path)?,
            };
            tracing::info!(host = %self.target.host, "Created mirroring certificate");
            Ok(pair)
        })
    }

    fn install_certificate<'a>(
        &'a self,
        pair: &'a CertificatePair,
        password: &'a str,
    ) -> DbFuture<'a, ()> {
        Box::pin(async move {
            let files = &self.options.files;
            let cert_path = files.certificate_path();
            let key_path = files.private_key_path();
            files.write_owned(&cert_path, &pair.certificate)?;
            files.write_owned(&key_path, &pair.private_key)?;

            self.exec(&tsql::restore_certificate(
                &cert_path.to_string_lossy(),
                &key_path.to_string_lossy(),
                password,
            ))
            .await?;
            tracing::info!(host = %self.target.host, "Restored mirroring certificate");
            Ok(())
        })
    }

    fn create_endpoint(&self) -> DbFuture<'_, ()> {
        Box::pin(async move {
            tracing::info!(host = %self.target.host, "Creating database mirroring endpoint");
            self.exec(&tsql::create_endpoint()).await
        })
    }

    fn create_group<'a>(&'a self, name: &'a str, nodes: &'a [ReplicaNode]) -> DbFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.connection().await?;
            if !conn.query(&tsql::group_exists(name)).await?.is_empty() {
                tracing::info!(group = name, "Availability group already exists");
                return Ok(());
            }
            conn.execute(&tsql::create_group(name, nodes)).await?;
            tracing::info!(group = name, replicas = nodes.len(), "Created availability group");
            Ok(())
        })
    }

    fn join_group<'a>(&'a self, name: &'a str) -> DbFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(group = name, host = %self.target.host, "Joining availability group");
            self.exec(&tsql::join_group(name)).await
        })
    }

    fn add_replicas<'a>(&'a self, name: &'a str, nodes: &'a [ReplicaNode]) -> DbFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.connection().await?;
            for node in nodes {
                let listed = conn
                    .query(&tsql::replica_exists(name, node.name.as_str()))
                    .await?;
                if !listed.is_empty() {
                    tracing::info!(node = %node.name, "Node is already a replica");
                    continue;
                }
                tracing::info!(node = %node.name, group = name, "Adding replica");
                conn.execute(&tsql::add_replica(name, node)).await?;
            }
            Ok(())
        })
    }

    fn primary_replica<'a>(&'a self, name: &'a str) -> DbFuture<'a, Option<NodeName>> {
        Box::pin(async move {
            let names = self.first_text_column(&tsql::primary_replica(name)).await?;
            Ok(names.into_iter().next().map(NodeName::from))
        })
    }

    fn replicas<'a>(&'a self, name: &'a str) -> DbFuture<'a, Vec<NodeName>> {
        Box::pin(async move {
            let names = self.first_text_column(&tsql::replicas(name)).await?;
            Ok(names.into_iter().map(NodeName::from).collect())
        })
    }

    fn sql_logins(&self) -> DbFuture<'_, Vec<SqlLogin>> {
        Box::pin(async move {
            let mut conn = self.connection().await?;
            let rows = conn.query(&tsql::sql_logins()).await?;
            let mut logins = Vec::with_capacity(rows.len());
            for row in rows {
                let (Some(name), Some(sid), Some(hash)) = (
                    row.first().and_then(SqlValue::as_text),
                    row.get(1).and_then(SqlValue::as_bytes),
                    row.get(2).and_then(SqlValue::as_bytes),
                ) else {
                    return Err(DbError::UnexpectedRow(format!("sql_logins row {row:?}")));
                };

                let roles = conn.query(&tsql::login_roles(name)).await?;
                let server_roles = roles
                    .iter()
                    .filter_map(|r| r.first().and_then(SqlValue::as_text))
                    .map(str::to_string)
                    .collect();

                logins.push(SqlLogin {
                    name: name.to_string(),
                    sid: hex::encode(sid),
                    password_hash: hex::encode(hash),
                    server_roles,
                });
            }
            Ok(logins)
        })
    }
}

/// Opens [`MssqlDatabase`] handles over a shared wire connector.
pub struct MssqlConnector {
    sql: Arc<dyn SqlConnector>,
    options: MssqlOptions,
}

impl MssqlConnector {
    /// Create a connector.
    pub fn new(sql: Arc<dyn SqlConnector>, options: MssqlOptions) -> Self {
        Self { sql, options }
    }
}

impl DatabaseConnector for MssqlConnector {
    fn connect<'a>(
        &'a self,
        host: &'a str,
        credentials: &'a Credentials,
    ) -> DbFuture<'a, Arc<dyn DatabaseOperations>> {
        Box::pin(async move {
            let db = MssqlDatabase::new(
                Arc::clone(&self.sql),
                host,
                credentials,
                self.options.clone(),
            );
            Ok(Arc::new(db) as Arc<dyn DatabaseOperations>)
        })
    }
}

#[cfg(test)]
mod tests;
