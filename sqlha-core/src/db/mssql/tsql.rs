//! T-SQL statement text.
//!
//! Every builder quotes its inputs: string literals through [`literal`] and
//! identifiers through [`ident`].

use crate::db::ReplicaNode;

/// Name of the mirroring certificate.
pub const CERTIFICATE_NAME: &str = "dbm_certificate";
/// Name of the mirroring endpoint.
pub const ENDPOINT_NAME: &str = "Hadr_endpoint";
/// Port the mirroring endpoint listens on.
pub const ENDPOINT_PORT: u16 = 5022;

/// Quote a string literal.
pub fn literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}

/// Quote an identifier.
pub fn ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Validate and pass through a hex string for `0x` binary literals.
pub fn hex_literal(hex: &str) -> Option<String> {
    match hex::decode(hex) {
        Ok(bytes) if !bytes.is_empty() => Some(format!("0x{hex}")),
        _ => None,
    }
}

pub fn login_exists(name: &str) -> String {
    format!("SELECT name FROM sys.syslogins WHERE name = {}", literal(name))
}

/// `CREATE` or `ALTER` a login. `params` are already-rendered options.
pub fn upsert_login(exists: bool, name: &str, params: &[String]) -> String {
    let operation = if exists { "ALTER" } else { "CREATE" };
    format!("{operation} LOGIN {} WITH {}", ident(name), params.join(", "))
}

pub fn add_server_role_member(role: &str, login: &str) -> String {
    format!("ALTER SERVER ROLE {} ADD MEMBER {}", ident(role), ident(login))
}

pub fn drop_login(name: &str) -> String {
    format!(
        "IF EXISTS (SELECT * FROM sys.syslogins WHERE name = {lit})\n\
         BEGIN\n    DROP LOGIN {id}\nEND",
        lit = literal(name),
        id = ident(name)
    )
}

pub fn grant_db_owner(database: &str, user: &str, login: &str) -> String {
    format!(
        "USE {db}\n\
         IF NOT EXISTS (SELECT * FROM sys.sysusers WHERE name = {user_lit})\n\
         BEGIN\n    CREATE USER {user} FOR LOGIN {login}\nEND\n\
         ALTER ROLE db_owner ADD MEMBER {user}",
        db = ident(database),
        user_lit = literal(user),
        user = ident(user),
        login = ident(login)
    )
}

pub fn drop_user(database: &str, user: &str) -> String {
    format!("USE {}\nDROP USER IF EXISTS {}", ident(database), ident(user))
}

pub fn create_database(name: &str) -> String {
    format!(
        "IF NOT EXISTS (SELECT * FROM sys.databases WHERE name = {lit})\n\
         BEGIN\n    CREATE DATABASE {id}\nEND",
        lit = literal(name),
        id = ident(name)
    )
}

/// Switch to full recovery, take the seeding backup, and add to the group.
pub fn add_database_to_group(database: &str, group: &str, backup_path: &str) -> String {
    format!(
        "ALTER DATABASE {db} SET RECOVERY FULL\n\
         BACKUP DATABASE {db} TO DISK = {backup}\n\
         IF NOT EXISTS (\n    SELECT db.name FROM sys.dm_hadr_database_replica_states rs\n    \
         JOIN sys.databases db ON rs.database_id = db.database_id\n    \
         WHERE db.name = {db_lit})\n\
         BEGIN\n    ALTER AVAILABILITY GROUP {group} ADD DATABASE {db}\nEND",
        db = ident(database),
        db_lit = literal(database),
        backup = literal(backup_path),
        group = ident(group)
    )
}

pub fn create_or_regenerate_master_key(password: &str) -> String {
    let pw = literal(password);
    format!(
        "USE [master]\n\
         IF NOT EXISTS (SELECT * FROM sys.symmetric_keys WHERE name = '##MS_DatabaseMasterKey##')\n\
         BEGIN\n    CREATE MASTER KEY ENCRYPTION BY PASSWORD = {pw}\nEND\n\
         ELSE\nBEGIN\n    ALTER MASTER KEY REGENERATE WITH ENCRYPTION BY PASSWORD = {pw}\nEND"
    )
}

/// Create the certificate if missing and back it up to files.
pub fn create_and_backup_certificate(cert_file: &str, key_file: &str, password: &str) -> String {
    format!(
        "USE [master]\n\
         IF NOT EXISTS (SELECT * FROM sys.certificates WHERE name = '{CERTIFICATE_NAME}')\n\
         BEGIN\n    CREATE CERTIFICATE {CERTIFICATE_NAME} WITH SUBJECT = 'dbm'\nEND\n\
         BACKUP CERTIFICATE {CERTIFICATE_NAME}\n    TO FILE = {cert}\n    \
         WITH PRIVATE KEY (FILE = {key}, ENCRYPTION BY PASSWORD = {pw})",
        cert = literal(cert_file),
        key = literal(key_file),
        pw = literal(password)
    )
}

/// Restore the certificate from files if missing.
pub fn restore_certificate(cert_file: &str, key_file: &str, password: &str) -> String {
    format!(
        "USE [master]\n\
         IF NOT EXISTS (SELECT * FROM sys.certificates WHERE name = '{CERTIFICATE_NAME}')\n\
         BEGIN\n    CREATE CERTIFICATE {CERTIFICATE_NAME}\n        FROM FILE = {cert}\n        \
         WITH PRIVATE KEY (FILE = {key}, DECRYPTION BY PASSWORD = {pw})\nEND",
        cert = literal(cert_file),
        key = literal(key_file),
        pw = literal(password)
    )
}

pub fn create_endpoint() -> String {
    format!(
        "IF NOT EXISTS (SELECT * FROM sys.endpoints WHERE name = '{ENDPOINT_NAME}')\n\
         BEGIN\n    CREATE ENDPOINT [{ENDPOINT_NAME}]\n        \
         AS TCP (LISTENER_PORT = {ENDPOINT_PORT})\n        \
         FOR DATABASE_MIRRORING (\n            ROLE = ALL,\n            \
         AUTHENTICATION = CERTIFICATE {CERTIFICATE_NAME},\n            \
         ENCRYPTION = REQUIRED ALGORITHM AES)\nEND\n\
         ALTER ENDPOINT [{ENDPOINT_NAME}] STATE = STARTED"
    )
}

pub fn group_exists(name: &str) -> String {
    format!("SELECT name FROM sys.availability_groups WHERE name = {}", literal(name))
}

fn replica_clause(node: &ReplicaNode) -> String {
    format!(
        "{name} WITH (\n        ENDPOINT_URL = {url},\n        \
         AVAILABILITY_MODE = SYNCHRONOUS_COMMIT,\n        FAILOVER_MODE = EXTERNAL,\n        \
         SEEDING_MODE = AUTOMATIC)",
        name = literal(node.name.as_str()),
        url = literal(&format!("tcp://{}:{ENDPOINT_PORT}", node.address))
    )
}

pub fn create_group(name: &str, nodes: &[ReplicaNode]) -> String {
    let replicas: Vec<String> = nodes.iter().map(replica_clause).collect();
    format!(
        "CREATE AVAILABILITY GROUP {id}\n    \
         WITH (DB_FAILOVER = ON, CLUSTER_TYPE = EXTERNAL)\n    \
         FOR REPLICA ON {replicas}\n\
         ALTER AVAILABILITY GROUP {id} GRANT CREATE ANY DATABASE",
        id = ident(name),
        replicas = replicas.join(",\n    ")
    )
}

pub fn replica_exists(group: &str, node: &str) -> String {
    format!(
        "SELECT node_name FROM sys.dm_hadr_availability_replica_cluster_nodes \
         WHERE group_name = {} AND node_name = {}",
        literal(group),
        literal(node)
    )
}

pub fn add_replica(group: &str, node: &ReplicaNode) -> String {
    format!("ALTER AVAILABILITY GROUP {} ADD REPLICA ON {}", ident(group), replica_clause(node))
}

pub fn join_group(name: &str) -> String {
    format!(
        "IF NOT EXISTS (SELECT * FROM sys.availability_groups WHERE name = {lit})\n\
         BEGIN\n    ALTER AVAILABILITY GROUP {id} JOIN WITH (CLUSTER_TYPE = EXTERNAL)\nEND\n\
         ALTER AVAILABILITY GROUP {id} GRANT CREATE ANY DATABASE",
        lit = literal(name),
        id = ident(name)
    )
}

pub fn primary_replica(name: &str) -> String {
    format!(
        "SELECT States.primary_replica FROM sys.dm_hadr_availability_group_states States\n\
         INNER JOIN sys.availability_groups Groups ON States.group_id = Groups.group_id\n\
         WHERE Groups.name = {}",
        literal(name)
    )
}

pub fn replicas(name: &str) -> String {
    format!(
        "SELECT Replicas.replica_server_name FROM sys.availability_replicas Replicas\n\
         INNER JOIN sys.availability_groups Groups ON Replicas.group_id = Groups.group_id\n\
         WHERE Groups.name = {}",
        literal(name)
    )
}

pub fn sql_logins() -> String {
    "SELECT name, sid, password_hash FROM sys.sql_logins".to_string()
}

pub fn login_roles(login: &str) -> String {
    format!(
        "SELECT r.name FROM sys.server_role_members rm\n\
         INNER JOIN sys.server_principals r \
         ON (r.principal_id = rm.role_principal_id AND r.type = 'R')\n\
         INNER JOIN sys.server_principals m ON m.principal_id = rm.member_principal_id\n\
         WHERE m.name = {}",
        literal(login)
    )
}
