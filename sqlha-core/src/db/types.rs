//! Value types exchanged with database operations.

use crate::types::NodeName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Credentials for an instance administrator login.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login name.
    pub login: String,
    /// Plaintext password.
    pub password: String,
}

impl Credentials {
    /// Create credentials.
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How a login's password is supplied.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginPassword {
    /// Plaintext, hashed by the server.
    Plain(String),
    /// Lowercase hex of an existing server password hash.
    Hashed(String),
}

impl fmt::Debug for LoginPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("Plain(<redacted>)"),
            Self::Hashed(hash) => f.debug_tuple("Hashed").field(hash).finish(),
        }
    }
}

/// Parameters for creating or updating a login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSpec {
    /// Login name.
    pub name: String,
    /// Password in plaintext or hashed form.
    pub password: LoginPassword,
    /// Lowercase hex SID to create the login with.
    pub sid: Option<String>,
    /// Server roles the login should belong to.
    pub server_roles: Vec<String>,
}

impl LoginSpec {
    /// A login with a plaintext password and no roles.
    pub fn plain(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: LoginPassword::Plain(password.into()),
            sid: None,
            server_roles: Vec::new(),
        }
    }
}

/// A SQL-authenticated login as enumerated from an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlLogin {
    /// Login name.
    pub name: String,
    /// Lowercase hex SID.
    pub sid: String,
    /// Lowercase hex password hash.
    pub password_hash: String,
    /// Server roles the login is a member of.
    pub server_roles: Vec<String>,
}

impl SqlLogin {
    /// A [`LoginSpec`] that recreates this login elsewhere with the same SID and hash.
    pub fn to_replica_spec(&self) -> LoginSpec {
        LoginSpec {
            name: self.name.clone(),
            password: LoginPassword::Hashed(self.password_hash.clone()),
            sid: Some(self.sid.clone()),
            server_roles: self.server_roles.clone(),
        }
    }
}

/// An exported mirroring certificate and its encrypted private key.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificatePair {
    /// DER certificate bytes.
    pub certificate: Vec<u8>,
    /// Encrypted private key bytes.
    pub private_key: Vec<u8>,
}

impl fmt::Debug for CertificatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificatePair")
            .field("certificate_len", &self.certificate.len())
            .field("private_key_len", &self.private_key.len())
            .finish()
    }
}

/// A node to be listed as an availability-group replica.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplicaNode {
    /// Server name of the replica.
    pub name: NodeName,
    /// Address its mirroring endpoint listens on.
    pub address: String,
}

impl ReplicaNode {
    /// Create a replica entry.
    pub fn new(name: impl Into<NodeName>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}
