//! Key names used on the broadcast store.

/// Unit bag: hostname-like node identity.
pub const NODE_NAME: &str = "node_name";
/// Unit bag: replication endpoint address.
pub const NODE_ADDRESS: &str = "node_address";
/// Unit bag: node installed the certificate and created its endpoint.
pub const READY_TO_CLUSTER: &str = "ready_to_cluster";
/// Unit bag: node created or joined the availability group.
pub const CLUSTERED: &str = "clustered";
/// Unit bag: opaque token rewritten to force peer re-evaluation.
pub const NONCE: &str = "nonce";

/// Group bag: shared administrator password.
pub const SA_PASSWORD: &str = "sa_password";
/// Group bag: password protecting the database master key.
pub const MASTER_KEY_PASSWORD: &str = "master_key_password";
/// Group bag: base64 certificate blob.
pub const MASTER_CERT: &str = "master_cert";
/// Group bag: base64 private key blob.
pub const MASTER_CERT_KEY: &str = "master_cert_key";
/// Group bag: password protecting the private key blob.
pub const MASTER_CERT_KEY_PASSWORD: &str = "master_cert_key_password";
/// Group bag: availability group has been created.
pub const AG_READY: &str = "ag_ready";

/// Canonical truthy flag value.
pub const TRUE: &str = "true";

/// Whether a flag value is set.
pub fn is_true(value: Option<&str>) -> bool {
    value == Some(TRUE)
}
