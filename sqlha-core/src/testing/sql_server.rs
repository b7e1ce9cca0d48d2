//! Simulated SQL Server fleet.

use crate::db::{
    CertificatePair, Credentials, DatabaseConnector, DatabaseOperations, DbError, DbFuture,
    DbResult, LoginPassword, LoginSpec, ReplicaNode, SqlLogin,
};
use crate::types::NodeName;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Administrator login every instance is started with.
const ADMIN_LOGIN: &str = "sa";

/// A successful mutating call against an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbCall {
    /// Instance the call ran on.
    pub node: NodeName,
    /// What was done.
    pub op: DbOp,
}

/// Mutating operations recorded by [`MockSqlServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbOp {
    CreateLogin { name: String },
    RemoveLogin { name: String },
    GrantAccess { database: String, login: String },
    RevokeAccess { database: String, user: String },
    CreateDatabase { name: String, group: Option<String> },
    CreateMasterKey,
    CreateCertificate,
    InstallCertificate,
    CreateEndpoint,
    CreateGroup { name: String, nodes: Vec<NodeName> },
    JoinGroup { name: String },
    AddReplicas { name: String, nodes: Vec<NodeName> },
}

impl DbOp {
    /// The kind of this operation.
    pub fn kind(&self) -> DbOpKind {
        match self {
            Self::CreateLogin { .. } => DbOpKind::CreateLogin,
            Self::RemoveLogin { .. } => DbOpKind::RemoveLogin,
            Self::GrantAccess { .. } => DbOpKind::GrantAccess,
            Self::RevokeAccess { .. } => DbOpKind::RevokeAccess,
            Self::CreateDatabase { .. } => DbOpKind::CreateDatabase,
            Self::CreateMasterKey => DbOpKind::CreateMasterKey,
            Self::CreateCertificate => DbOpKind::CreateCertificate,
            Self::InstallCertificate => DbOpKind::InstallCertificate,
            Self::CreateEndpoint => DbOpKind::CreateEndpoint,
            Self::CreateGroup { .. } => DbOpKind::CreateGroup,
            Self::JoinGroup { .. } => DbOpKind::JoinGroup,
            Self::AddReplicas { .. } => DbOpKind::AddReplicas,
        }
    }
}

/// Operation kinds, used to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbOpKind {
    Connect,
    CreateLogin,
    RemoveLogin,
    GrantAccess,
    RevokeAccess,
    CreateDatabase,
    CreateMasterKey,
    CreateCertificate,
    InstallCertificate,
    CreateEndpoint,
    CreateGroup,
    JoinGroup,
    AddReplicas,
    PrimaryReplica,
    Replicas,
    SqlLogins,
}

/// Point-in-time view of an availability group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSnapshot {
    /// Current primary.
    pub primary: NodeName,
    /// Listed replicas, including the primary.
    pub replicas: Vec<NodeName>,
    /// Replicas that have joined, including the primary.
    pub joined: Vec<NodeName>,
    /// Databases replicated by the group.
    pub databases: Vec<String>,
}

#[derive(Debug, Clone)]
struct MockLogin {
    sid: String,
    password_hash: String,
    roles: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Instance {
    address: String,
    admin_password: Option<String>,
    logins: BTreeMap<String, MockLogin>,
    master_key: Option<String>,
    certificate: Option<CertificatePair>,
    endpoint: bool,
    databases: BTreeMap<String, BTreeSet<String>>,
    group: Option<String>,
}

#[derive(Debug)]
struct Group {
    primary: NodeName,
    replicas: BTreeMap<NodeName, String>,
    joined: BTreeSet<NodeName>,
    databases: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Fleet {
    instances: BTreeMap<NodeName, Instance>,
    groups: BTreeMap<String, Group>,
    calls: Vec<DbCall>,
    failures: HashMap<(NodeName, DbOpKind), u32>,
    next_sid: u64,
}

impl Fleet {
    fn resolve(&self, host: &str) -> Option<NodeName> {
        if let Some((name, _)) = self.instances.get_key_value(host) {
            return Some(name.clone());
        }
        self.instances
            .iter()
            .find(|(_, inst)| inst.address == host)
            .map(|(name, _)| name.clone())
    }

    fn take_failure(&mut self, node: &NodeName, kind: DbOpKind) -> DbResult<()> {
        let key = (node.clone(), kind);
        if let Some(left) = self.failures.get_mut(&key) {
            *left -= 1;
            if *left == 0 {
                self.failures.remove(&key);
            }
            return Err(DbError::Query(format!("injected {kind:?} failure on {node}")));
        }
        Ok(())
    }

    fn instance(&mut self, node: &NodeName) -> DbResult<&mut Instance> {
        self.instances
            .get_mut(node)
            .ok_or_else(|| DbError::NotFound(format!("instance {node}")))
    }

    fn record(&mut self, node: &NodeName, op: DbOp) {
        self.calls.push(DbCall {
            node: node.clone(),
            op,
        });
    }

    fn new_sid(&mut self) -> String {
        self.next_sid += 1;
        format!("{:032x}", 0x1000 + self.next_sid)
    }
}

fn fake_hash(password: &str) -> String {
    format!("0200{}", hex::encode(password))
}

/// Simulated fleet of SQL Server instances.
#[derive(Clone, Default)]
pub struct MockSqlServer {
    inner: Arc<Mutex<Fleet>>,
}

impl MockSqlServer {
    /// Create an empty fleet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision an instance that is not yet running.
    pub fn add_node(&self, name: impl Into<NodeName>, address: impl Into<String>) {
        let instance = Instance {
            address: address.into(),
            ..Instance::default()
        };
        self.inner.lock().instances.insert(name.into(), instance);
    }

    /// Start an instance with the given administrator password.
    ///
    /// Restarting an already running instance keeps its data.
    pub fn start(&self, name: &str, admin_password: &str) {
        let mut fleet = self.inner.lock();
        let sid = fleet.new_sid();
        if let Some(inst) = fleet.instances.get_mut(name) {
            inst.admin_password = Some(admin_password.to_string());
            inst.logins.entry(ADMIN_LOGIN.to_string()).or_insert(MockLogin {
                sid,
                password_hash: fake_hash(admin_password),
                roles: BTreeSet::from(["sysadmin".to_string()]),
            });
        }
    }

    /// Whether an instance is accepting connections.
    pub fn is_running(&self, name: &str) -> bool {
        self.inner
            .lock()
            .instances
            .get(name)
            .is_some_and(|inst| inst.admin_password.is_some())
    }

    /// Make the next `times` operations of `kind` on `node` fail.
    pub fn fail_next(&self, node: &str, kind: DbOpKind, times: u32) {
        if times > 0 {
            self.inner
                .lock()
                .failures
                .insert((NodeName::new(node), kind), times);
        }
    }

    /// Create a login directly, bypassing call recording.
    pub fn seed_login(&self, node: &str, login: SqlLogin) {
        let mut fleet = self.inner.lock();
        if let Some(inst) = fleet.instances.get_mut(node) {
            inst.logins.insert(
                login.name,
                MockLogin {
                    sid: login.sid,
                    password_hash: login.password_hash,
                    roles: login.server_roles.into_iter().collect(),
                },
            );
        }
    }

    /// All recorded calls in order.
    pub fn calls(&self) -> Vec<DbCall> {
        self.inner.lock().calls.clone()
    }

    /// Recorded calls of one kind.
    pub fn calls_of(&self, kind: DbOpKind) -> Vec<DbCall> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| c.op.kind() == kind)
            .cloned()
            .collect()
    }

    /// Snapshot a group.
    pub fn group(&self, name: &str) -> Option<GroupSnapshot> {
        self.inner.lock().groups.get(name).map(|g| GroupSnapshot {
            primary: g.primary.clone(),
            replicas: g.replicas.keys().cloned().collect(),
            joined: g.joined.iter().cloned().collect(),
            databases: g.databases.iter().cloned().collect(),
        })
    }

    /// Logins on an instance.
    pub fn logins(&self, node: &str) -> Vec<SqlLogin> {
        self.inner
            .lock()
            .instances
            .get(node)
            .map(logins_of)
            .unwrap_or_default()
    }

    /// Whether an instance holds the mirroring certificate.
    pub fn has_certificate(&self, node: &str) -> bool {
        self.inner
            .lock()
            .instances
            .get(node)
            .is_some_and(|inst| inst.certificate.is_some())
    }

    /// Whether an instance has started its mirroring endpoint.
    pub fn has_endpoint(&self, node: &str) -> bool {
        self.inner
            .lock()
            .instances
            .get(node)
            .is_some_and(|inst| inst.endpoint)
    }

    /// Users mapped into a database on an instance, if it exists there.
    pub fn database_users(&self, node: &str, database: &str) -> Option<Vec<String>> {
        self.inner
            .lock()
            .instances
            .get(node)
            .and_then(|inst| inst.databases.get(database))
            .map(|users| users.iter().cloned().collect())
    }
}

fn logins_of(inst: &Instance) -> Vec<SqlLogin> {
    inst.logins
        .iter()
        .map(|(name, login)| SqlLogin {
            name: name.clone(),
            sid: login.sid.clone(),
            password_hash: login.password_hash.clone(),
            server_roles: login.roles.iter().cloned().collect(),
        })
        .collect()
}

impl DatabaseConnector for MockSqlServer {
    fn connect<'a>(
        &'a self,
        host: &'a str,
        credentials: &'a Credentials,
    ) -> DbFuture<'a, Arc<dyn DatabaseOperations>> {
        Box::pin(async move {
            let mut fleet = self.inner.lock();
            let node = fleet.resolve(host).ok_or_else(|| DbError::ConnectTimeout {
                host: host.to_string(),
                waited: Duration::ZERO,
            })?;
            fleet.take_failure(&node, DbOpKind::Connect)?;
            let inst = fleet.instance(&node)?;
            let Some(admin_password) = inst.admin_password.as_deref() else {
                return Err(DbError::ConnectTimeout {
                    host: host.to_string(),
                    waited: Duration::ZERO,
                });
            };
            if !credentials.login.eq_ignore_ascii_case(ADMIN_LOGIN)
                || credentials.password != admin_password
            {
                return Err(DbError::Connection(format!(
                    "Login failed for user '{}'",
                    credentials.login
                )));
            }
            drop(fleet);
            Ok(Arc::new(MockSqlHandle {
                fleet: Arc::clone(&self.inner),
                node,
            }) as Arc<dyn DatabaseOperations>)
        })
    }
}

/// A connection to one simulated instance.
struct MockSqlHandle {
    fleet: Arc<Mutex<Fleet>>,
    node: NodeName,
}

impl MockSqlHandle {
    /// Run `f` against the fleet after checking for an injected failure.
    fn with<T>(
        &self,
        kind: DbOpKind,
        f: impl FnOnce(&mut Fleet, &NodeName) -> DbResult<T>,
    ) -> DbResult<T> {
        let mut fleet = self.fleet.lock();
        fleet.take_failure(&self.node, kind)?;
        f(&mut *fleet, &self.node)
    }
}

fn member_of<'f>(fleet: &'f Fleet, node: &NodeName, name: &str) -> Option<&'f Group> {
    let inst = fleet.instances.get(node)?;
    if inst.group.as_deref() != Some(name) {
        return None;
    }
    fleet.groups.get(name)
}

impl DatabaseOperations for MockSqlHandle {
    fn create_login<'a>(&'a self, spec: &'a LoginSpec) -> DbFuture<'a, ()> {
        Box::pin(async move {
            self.with(DbOpKind::CreateLogin, |fleet, node| {
                let hash = match &spec.password {
                    LoginPassword::Plain(pw) => fake_hash(pw),
                    LoginPassword::Hashed(hash) => hash.clone(),
                };
                let fresh_sid = match &spec.sid {
                    Some(sid) => sid.clone(),
                    None => fleet.new_sid(),
                };
                let inst = fleet.instance(node)?;
                let login = inst
                    .logins
                    .entry(spec.name.clone())
                    .or_insert_with(|| MockLogin {
                        sid: fresh_sid,
                        password_hash: hash.clone(),
                        roles: BTreeSet::new(),
                    });
                login.password_hash = hash;
                login.roles.extend(spec.server_roles.iter().cloned());
                fleet.record(
                    node,
                    DbOp::CreateLogin {
                        name: spec.name.clone(),
                    },
                );
                Ok(())
            })
        })
    }

    fn remove_login<'a>(&'a self, name: &'a str) -> DbFuture<'a, ()> {
        Box::pin(async move {
            self.with(DbOpKind::RemoveLogin, |fleet, node| {
                fleet.instance(node)?.logins.remove(name);
                fleet.record(
                    node,
                    DbOp::RemoveLogin {
                        name: name.to_string(),
                    },
                );
                Ok(())
            })
        })
    }

    fn grant_access<'a>(&'a self, database: &'a str, login: &'a str) -> DbFuture<'a, ()> {
        Box::pin(async move {
            self.with(DbOpKind::GrantAccess, |fleet, node| {
                let inst = fleet.instance(node)?;
                if !inst.logins.contains_key(login) {
                    return Err(DbError::Query(format!("login {login} does not exist")));
                }
                let users = inst
                    .databases
                    .get_mut(database)
                    .ok_or_else(|| DbError::NotFound(format!("database {database}")))?;
                users.insert(login.to_string());

                // Group databases carry their users to every joined replica.
                let replicated_to: Vec<NodeName> = fleet
                    .groups
                    .values()
                    .filter(|g| g.databases.contains(database))
                    .flat_map(|g| g.joined.iter().cloned())
                    .collect();
                for peer in replicated_to {
                    if let Some(users) = fleet
                        .instances
                        .get_mut(&peer)
                        .and_then(|inst| inst.databases.get_mut(database))
                    {
                        users.insert(login.to_string());
                    }
                }
                fleet.record(
                    node,
                    DbOp::GrantAccess {
                        database: database.to_string(),
                        login: login.to_string(),
                    },
                );
                Ok(())
            })
        })
    }

    fn revoke_access<'a>(&'a self, database: &'a str, user: &'a str) -> DbFuture<'a, ()> {
        Box::pin(async move {
            self.with(DbOpKind::RevokeAccess, |fleet, node| {
                let inst = fleet.instance(node)?;
                let users = inst
                    .databases
                    .get_mut(database)
                    .ok_or_else(|| DbError::NotFound(format!("database {database}")))?;
                users.remove(user);
                fleet.record(
                    node,
                    DbOp::RevokeAccess {
                        database: database.to_string(),
                        user: user.to_string(),
                    },
                );
                Ok(())
            })
        })
    }

    fn create_database<'a>(&'a self, name: &'a str, group: Option<&'a str>) -> DbFuture<'a, ()> {
        Box::pin(async move {
            self.with(DbOpKind::CreateDatabase, |fleet, node| {
                fleet
                    .instance(node)?
                    .databases
                    .entry(name.to_string())
                    .or_default();

                if let Some(group_name) = group {
                    let group_state = fleet
                        .groups
                        .get_mut(group_name)
                        .ok_or_else(|| DbError::NotFound(format!("availability group {group_name}")))?;
                    if group_state.primary != *node {
                        return Err(DbError::Query(format!(
                            "{node} is not the primary replica of {group_name}"
                        )));
                    }
                    group_state.databases.insert(name.to_string());
                    // Automatic seeding creates the database on joined replicas.
                    let joined: Vec<NodeName> = group_state.joined.iter().cloned().collect();
                    for peer in joined {
                        if let Some(inst) = fleet.instances.get_mut(&peer) {
                            inst.databases.entry(name.to_string()).or_default();
                        }
                    }
                }

                fleet.record(
                    node,
                    DbOp::CreateDatabase {
                        name: name.to_string(),
                        group: group.map(str::to_string),
                    },
                );
                Ok(())
            })
        })
    }

    fn create_master_key<'a>(&'a self, password: &'a str) -> DbFuture<'a, ()> {
        Box::pin(async move {
            self.with(DbOpKind::CreateMasterKey, |fleet, node| {
                fleet.instance(node)?.master_key = Some(password.to_string());
                fleet.record(node, DbOp::CreateMasterKey);
                Ok(())
            })
        })
    }

    fn create_certificate<'a>(&'a self, password: &'a str) -> DbFuture<'a, CertificatePair> {
        Box::pin(async move {
            self.with(DbOpKind::CreateCertificate, |fleet, node| {
                let inst = fleet.instance(node)?;
                if inst.master_key.is_none() {
                    return Err(DbError::Query(
                        "Please create a master key in the database before performing this operation"
                            .to_string(),
                    ));
                }
                let certificate = inst
                    .certificate
                    .get_or_insert_with(|| CertificatePair {
                        certificate: format!("CERT:{node}").into_bytes(),
                        private_key: Vec::new(),
                    })
                    .certificate
                    .clone();
                // The exported key is bound to the password it was encrypted with.
                let pair = CertificatePair {
                    private_key: format!("KEY:{node}:{password}").into_bytes(),
                    certificate,
                };
                fleet.record(node, DbOp::CreateCertificate);
                Ok(pair)
            })
        })
    }

    fn install_certificate<'a>(
        &'a self,
        pair: &'a CertificatePair,
        password: &'a str,
    ) -> DbFuture<'a, ()> {
        Box::pin(async move {
            self.with(DbOpKind::InstallCertificate, |fleet, node| {
                let inst = fleet.instance(node)?;
                if inst.master_key.is_none() {
                    return Err(DbError::Query(
                        "Please create a master key in the database before performing this operation"
                            .to_string(),
                    ));
                }
                if inst.certificate.is_none() {
                    let suffix = format!(":{password}");
                    if !pair.private_key.ends_with(suffix.as_bytes()) {
                        return Err(DbError::Query(
                            "The private key password is invalid".to_string(),
                        ));
                    }
                    inst.certificate = Some(pair.clone());
                }
                fleet.record(node, DbOp::InstallCertificate);
                Ok(())
            })
        })
    }

    fn create_endpoint(&self) -> DbFuture<'_, ()> {
        Box::pin(async move {
            self.with(DbOpKind::CreateEndpoint, |fleet, node| {
                let inst = fleet.instance(node)?;
                if inst.certificate.is_none() {
                    return Err(DbError::Query(
                        "Cannot find the certificate 'dbm_certificate'".to_string(),
                    ));
                }
                inst.endpoint = true;
                fleet.record(node, DbOp::CreateEndpoint);
                Ok(())
            })
        })
    }

    fn create_group<'a>(&'a self, name: &'a str, nodes: &'a [ReplicaNode]) -> DbFuture<'a, ()> {
        Box::pin(async move {
            self.with(DbOpKind::CreateGroup, |fleet, node| {
                let inst = fleet.instance(node)?;
                let (endpoint, own_address) = (inst.endpoint, inst.address.clone());
                if !endpoint {
                    return Err(DbError::Query("mirroring endpoint is not started".to_string()));
                }
                if !fleet.groups.contains_key(name) {
                    let mut replicas: BTreeMap<NodeName, String> = nodes
                        .iter()
                        .map(|n| (n.name.clone(), n.address.clone()))
                        .collect();
                    replicas.entry(node.clone()).or_insert(own_address);
                    fleet.groups.insert(
                        name.to_string(),
                        Group {
                            primary: node.clone(),
                            replicas,
                            joined: BTreeSet::from([node.clone()]),
                            databases: BTreeSet::new(),
                        },
                    );
                    fleet.instance(node)?.group = Some(name.to_string());
                }
                fleet.record(
                    node,
                    DbOp::CreateGroup {
                        name: name.to_string(),
                        nodes: nodes.iter().map(|n| n.name.clone()).collect(),
                    },
                );
                Ok(())
            })
        })
    }

    fn join_group<'a>(&'a self, name: &'a str) -> DbFuture<'a, ()> {
        Box::pin(async move {
            self.with(DbOpKind::JoinGroup, |fleet, node| {
                let group = fleet
                    .groups
                    .get_mut(name)
                    .ok_or_else(|| DbError::NotFound(format!("availability group {name}")))?;
                if !group.replicas.contains_key(node) {
                    return Err(DbError::Query(format!(
                        "{node} is not a replica of availability group {name}"
                    )));
                }
                group.joined.insert(node.clone());
                let databases: Vec<String> = group.databases.iter().cloned().collect();
                let inst = fleet.instance(node)?;
                inst.group = Some(name.to_string());
                for db in databases {
                    inst.databases.entry(db).or_default();
                }
                fleet.record(
                    node,
                    DbOp::JoinGroup {
                        name: name.to_string(),
                    },
                );
                Ok(())
            })
        })
    }

    fn add_replicas<'a>(&'a self, name: &'a str, nodes: &'a [ReplicaNode]) -> DbFuture<'a, ()> {
        Box::pin(async move {
            self.with(DbOpKind::AddReplicas, |fleet, node| {
                let group = fleet
                    .groups
                    .get_mut(name)
                    .ok_or_else(|| DbError::NotFound(format!("availability group {name}")))?;
                if group.primary != *node {
                    return Err(DbError::Query(format!(
                        "{node} is not the primary replica of {name}"
                    )));
                }
                for replica in nodes {
                    group
                        .replicas
                        .entry(replica.name.clone())
                        .or_insert_with(|| replica.address.clone());
                }
                fleet.record(
                    node,
                    DbOp::AddReplicas {
                        name: name.to_string(),
                        nodes: nodes.iter().map(|n| n.name.clone()).collect(),
                    },
                );
                Ok(())
            })
        })
    }

    fn primary_replica<'a>(&'a self, name: &'a str) -> DbFuture<'a, Option<NodeName>> {
        Box::pin(async move {
            self.with(DbOpKind::PrimaryReplica, |fleet, node| {
                Ok(member_of(fleet, node, name).map(|g| g.primary.clone()))
            })
        })
    }

    fn replicas<'a>(&'a self, name: &'a str) -> DbFuture<'a, Vec<NodeName>> {
        Box::pin(async move {
            self.with(DbOpKind::Replicas, |fleet, node| {
                Ok(member_of(fleet, node, name)
                    .map(|g| g.replicas.keys().cloned().collect())
                    .unwrap_or_default())
            })
        })
    }

    fn sql_logins(&self) -> DbFuture<'_, Vec<SqlLogin>> {
        Box::pin(async move {
            self.with(DbOpKind::SqlLogins, |fleet, node| {
                Ok(logins_of(fleet.instance(node)?))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn running(fleet: &MockSqlServer, name: &str, address: &str) -> Arc<dyn DatabaseOperations> {
        fleet.add_node(name, address);
        fleet.start(name, "pw");
        fleet
            .connect(address, &Credentials::new("SA", "pw"))
            .await
            .expect("connect")
    }

    async fn with_endpoint(db: &Arc<dyn DatabaseOperations>) {
        db.create_master_key("mk").await.unwrap();
        let pair = db.create_certificate("ck").await.unwrap();
        db.install_certificate(&pair, "ck").await.unwrap();
        db.create_endpoint().await.unwrap();
    }

    #[tokio::test]
    async fn connect_requires_running_instance_and_password() {
        let fleet = MockSqlServer::new();
        fleet.add_node("n1", "10.0.0.1");

        let creds = Credentials::new("SA", "pw");
        assert!(matches!(
            fleet.connect("10.0.0.1", &creds).await,
            Err(DbError::ConnectTimeout { .. })
        ));

        fleet.start("n1", "pw");
        assert!(fleet.connect("n1", &creds).await.is_ok());
        assert!(matches!(
            fleet.connect("10.0.0.1", &Credentials::new("SA", "nope")).await,
            Err(DbError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn plain_passwords_are_stored_as_hex_hashes() {
        let fleet = MockSqlServer::new();
        let db = running(&fleet, "n1", "10.0.0.1").await;
        db.create_login(&LoginSpec::plain("app", "ab")).await.unwrap();

        let app = fleet
            .logins("n1")
            .into_iter()
            .find(|l| l.name == "app")
            .expect("login created");
        assert_eq!(app.password_hash, "02006162");
        assert!(hex::decode(&app.password_hash).is_ok());
        assert!(hex::decode(&app.sid).is_ok());
    }

    #[tokio::test]
    async fn certificate_requires_master_key_and_matching_password() {
        let fleet = MockSqlServer::new();
        let n1 = running(&fleet, "n1", "10.0.0.1").await;
        let n2 = running(&fleet, "n2", "10.0.0.2").await;

        assert!(n1.create_certificate("ck").await.is_err());
        n1.create_master_key("mk").await.unwrap();
        let pair = n1.create_certificate("ck").await.unwrap();

        n2.create_master_key("mk").await.unwrap();
        assert!(n2.install_certificate(&pair, "wrong").await.is_err());
        n2.install_certificate(&pair, "ck").await.unwrap();
        assert!(fleet.has_certificate("n2"));
    }

    #[tokio::test]
    async fn group_membership_drives_topology_queries() {
        let fleet = MockSqlServer::new();
        let n1 = running(&fleet, "n1", "10.0.0.1").await;
        let n2 = running(&fleet, "n2", "10.0.0.2").await;
        with_endpoint(&n1).await;

        n1.create_group("ag", &[ReplicaNode::new("n1", "10.0.0.1"), ReplicaNode::new("n2", "10.0.0.2")])
            .await
            .unwrap();

        // Listed but not joined: the secondary sees nothing yet.
        assert_eq!(n2.primary_replica("ag").await.unwrap(), None);
        assert!(n2.replicas("ag").await.unwrap().is_empty());
        assert_eq!(n1.primary_replica("ag").await.unwrap(), Some(NodeName::new("n1")));

        n2.join_group("ag").await.unwrap();
        assert_eq!(n2.primary_replica("ag").await.unwrap(), Some(NodeName::new("n1")));
        assert_eq!(fleet.group("ag").unwrap().joined.len(), 2);
    }

    #[tokio::test]
    async fn join_requires_listing() {
        let fleet = MockSqlServer::new();
        let n1 = running(&fleet, "n1", "10.0.0.1").await;
        let n3 = running(&fleet, "n3", "10.0.0.3").await;
        with_endpoint(&n1).await;
        n1.create_group("ag", &[ReplicaNode::new("n1", "10.0.0.1")])
            .await
            .unwrap();

        assert!(n3.join_group("ag").await.is_err());
        n1.add_replicas("ag", &[ReplicaNode::new("n3", "10.0.0.3")])
            .await
            .unwrap();
        n3.join_group("ag").await.unwrap();
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let fleet = MockSqlServer::new();
        let n1 = running(&fleet, "n1", "10.0.0.1").await;
        fleet.fail_next("n1", DbOpKind::CreateMasterKey, 1);

        assert!(n1.create_master_key("mk").await.is_err());
        n1.create_master_key("mk").await.unwrap();
        assert_eq!(fleet.calls_of(DbOpKind::CreateMasterKey).len(), 1);
    }

    #[tokio::test]
    async fn group_databases_seed_joined_replicas() {
        let fleet = MockSqlServer::new();
        let n1 = running(&fleet, "n1", "10.0.0.1").await;
        let n2 = running(&fleet, "n2", "10.0.0.2").await;
        with_endpoint(&n1).await;
        n1.create_group("ag", &[ReplicaNode::new("n1", "10.0.0.1"), ReplicaNode::new("n2", "10.0.0.2")])
            .await
            .unwrap();
        n2.join_group("ag").await.unwrap();

        n1.create_database("orders", Some("ag")).await.unwrap();
        n1.create_login(&LoginSpec::plain("app", "pw")).await.unwrap();
        n1.grant_access("orders", "app").await.unwrap();

        assert_eq!(fleet.database_users("n2", "orders"), Some(vec!["app".to_string()]));
        assert!(n2.create_database("other", Some("ag")).await.is_err());
    }
}
