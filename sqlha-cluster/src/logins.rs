//! Login replication from the primary replica.
//!
//! Availability groups replicate databases but not server logins. Secondary
//! replicas copy missing SQL logins from the primary with the same SID and
//! password hash, so database users map to the same principals after a
//! failover.

use sqlha_core::db::{DatabaseOperations, DbResult};
use std::collections::BTreeSet;

/// Create on `local` every login of `primary` that `local` lacks.
///
/// Existing local logins are left untouched, including ones the primary does
/// not have. Returns the names of the logins created.
pub async fn sync_logins(
    primary: &dyn DatabaseOperations,
    local: &dyn DatabaseOperations,
) -> DbResult<Vec<String>> {
    let primary_logins = primary.sql_logins().await?;
    let existing: BTreeSet<String> = local
        .sql_logins()
        .await?
        .into_iter()
        .map(|login| login.name)
        .collect();

    let mut created = Vec::new();
    for login in primary_logins {
        if existing.contains(&login.name) {
            continue;
        }
        tracing::info!(login = %login.name, "Syncing login from the primary replica");
        local.create_login(&login.to_replica_spec()).await?;
        created.push(login.name);
    }
    Ok(created)
}
