//! Leader-issued shared secrets.
//!
//! The leader generates the administrator password and the mirroring
//! certificate exactly once and advertises them in the group bag. Every node
//! installs the same certificate so mirroring endpoints can authenticate each
//! other.

use crate::error::{ClusterError, ClusterResult};
use crate::node::ClusterNode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use sqlha_core::BroadcastStore;
use sqlha_core::broadcast::keys;
use sqlha_core::db::CertificatePair;
use std::fmt;
use std::sync::Arc;

/// Length of the administrator password.
pub const SA_PASSWORD_LENGTH: usize = 32;
/// Length of generated key and login passwords.
pub const SECRET_PASSWORD_LENGTH: usize = 32;

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const PUNCTUATION: &[u8] = b"!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Generate an administrator password.
///
/// The result is four equal blocks of lowercase, uppercase, digits and
/// punctuation, in that order, so it always satisfies SQL Server's
/// complexity policy. Each block is `ceil(length / 4)` characters.
pub fn generate_sa_password<R: Rng>(rng: &mut R, length: usize) -> String {
    let block = length.div_ceil(4);
    let mut password = String::with_capacity(block * 4);
    for class in [LOWERCASE, UPPERCASE, DIGITS, PUNCTUATION] {
        for _ in 0..block {
            password.push(char::from(class[rng.gen_range(0..class.len())]));
        }
    }
    password
}

/// Generate an alphanumeric password.
pub fn generate_password<R: Rng>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}

/// The shared certificate and the passwords protecting it.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    /// Password for the database master key.
    pub master_key_password: String,
    /// Exported certificate and encrypted private key.
    pub certificate: CertificatePair,
    /// Password the private key is encrypted with.
    pub private_key_password: String,
}

impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("certificate", &self.certificate)
            .finish_non_exhaustive()
    }
}

impl CertificateBundle {
    /// Read the bundle from the group bag.
    ///
    /// Returns `None` unless all four fields are present.
    pub fn from_group(store: &dyn BroadcastStore) -> ClusterResult<Option<Self>> {
        let fetch = |key: &str| store.group(key).filter(|v| !v.is_empty());
        let (Some(master_key_password), Some(cert), Some(key), Some(private_key_password)) = (
            fetch(keys::MASTER_KEY_PASSWORD),
            fetch(keys::MASTER_CERT),
            fetch(keys::MASTER_CERT_KEY),
            fetch(keys::MASTER_CERT_KEY_PASSWORD),
        ) else {
            return Ok(None);
        };

        let decode = |field: &str, value: &str| {
            STANDARD
                .decode(value)
                .map_err(|e| ClusterError::InvalidBundle(format!("{field}: {e}")))
        };
        Ok(Some(Self {
            master_key_password,
            certificate: CertificatePair {
                certificate: decode(keys::MASTER_CERT, &cert)?,
                private_key: decode(keys::MASTER_CERT_KEY, &key)?,
            },
            private_key_password,
        }))
    }

    /// Group bag entries advertising this bundle.
    pub fn to_entries(&self) -> [(&'static str, String); 4] {
        [
            (keys::MASTER_KEY_PASSWORD, self.master_key_password.clone()),
            (keys::MASTER_CERT, STANDARD.encode(&self.certificate.certificate)),
            (keys::MASTER_CERT_KEY, STANDARD.encode(&self.certificate.private_key)),
            (keys::MASTER_CERT_KEY_PASSWORD, self.private_key_password.clone()),
        ]
    }
}

impl ClusterNode {
    /// Generate and advertise the administrator password if this node is
    /// the leader and none exists. Returns whether one was generated.
    pub fn ensure_sa_password(&self) -> ClusterResult<bool> {
        let broadcast = &self.ctx.broadcast;
        if broadcast.group(keys::SA_PASSWORD).is_some() || !broadcast.is_leader() {
            return Ok(false);
        }
        let password = generate_sa_password(&mut OsRng, SA_PASSWORD_LENGTH);
        broadcast.set_group(&[(keys::SA_PASSWORD, password.as_str())])?;
        tracing::info!(node = %self.config.node_name, "Generated administrator password");
        Ok(true)
    }

    /// Create and advertise the shared certificate if this node is the
    /// initialized leader and none exists. Returns whether one was created.
    pub async fn ensure_master_certificate(&mut self) -> ClusterResult<bool> {
        let broadcast = Arc::clone(&self.ctx.broadcast);
        if !broadcast.is_leader() || !self.state.initialized {
            return Ok(false);
        }
        if CertificateBundle::from_group(broadcast.as_ref())?.is_some() {
            return Ok(false);
        }

        let master_key_password = generate_password(&mut OsRng, SECRET_PASSWORD_LENGTH);
        let private_key_password = generate_password(&mut OsRng, SECRET_PASSWORD_LENGTH);
        let db = self.local_db().await?;
        db.create_master_key(&master_key_password).await?;
        let certificate = db.create_certificate(&private_key_password).await?;

        let bundle = CertificateBundle {
            master_key_password,
            certificate,
            private_key_password,
        };
        let entries = bundle.to_entries();
        let refs: Vec<(&str, &str)> = entries.iter().map(|(k, v)| (*k, v.as_str())).collect();
        broadcast.set_group(&refs)?;

        // The leader already holds the key and certificate it just exported.
        self.state.master_cert_installed = true;
        self.persist()?;
        tracing::info!(node = %self.config.node_name, "Advertised mirroring certificate");
        Ok(true)
    }

    /// Install the advertised master key and certificate locally, once.
    ///
    /// Skipped until the local instance is initialized. Returns whether the
    /// certificate was installed by this call.
    pub async fn install_master_certificate(
        &mut self,
        bundle: &CertificateBundle,
    ) -> ClusterResult<bool> {
        if !self.state.initialized {
            tracing::warn!(
                node = %self.config.node_name,
                "Local instance is not initialized yet, skipping certificate setup"
            );
            return Ok(false);
        }
        if self.state.master_cert_installed {
            tracing::debug!(node = %self.config.node_name, "Certificate already installed");
            return Ok(false);
        }

        let db = self.local_db().await?;
        db.create_master_key(&bundle.master_key_password).await?;
        db.install_certificate(&bundle.certificate, &bundle.private_key_password)
            .await?;
        self.state.master_cert_installed = true;
        self.persist()?;
        tracing::info!(node = %self.config.node_name, "Installed mirroring certificate");
        Ok(true)
    }
}
