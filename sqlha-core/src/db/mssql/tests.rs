use super::*;
use parking_lot::Mutex;
use std::time::Duration;

type Responder = dyn Fn(&str) -> Vec<SqlRow> + Send + Sync;

/// Records statements and answers queries from a closure.
struct Scripted {
    log: Arc<Mutex<Vec<String>>>,
    respond: Arc<Responder>,
    failures_left: Mutex<u32>,
    attempts: Mutex<u32>,
}

impl Scripted {
    fn new(respond: impl Fn(&str) -> Vec<SqlRow> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            log: Arc::new(Mutex::new(Vec::new())),
            respond: Arc::new(respond),
            failures_left: Mutex::new(0),
            attempts: Mutex::new(0),
        })
    }

    fn failing(times: u32) -> Arc<Self> {
        let s = Self::new(|_| Vec::new());
        *s.failures_left.lock() = times;
        s
    }

    fn statements(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

struct ScriptedConn {
    log: Arc<Mutex<Vec<String>>>,
    respond: Arc<Responder>,
}

impl SqlConnection for ScriptedConn {
    fn execute<'a>(&'a mut self, sql: &'a str) -> DbFuture<'a, ()> {
        Box::pin(async move {
            self.log.lock().push(sql.to_string());
            Ok(())
        })
    }

    fn query<'a>(&'a mut self, sql: &'a str) -> DbFuture<'a, Vec<SqlRow>> {
        Box::pin(async move {
            self.log.lock().push(sql.to_string());
            Ok((self.respond)(sql))
        })
    }
}

impl SqlConnector for Scripted {
    fn open<'a>(&'a self, _target: &'a SqlTarget) -> DbFuture<'a, Box<dyn SqlConnection>> {
        Box::pin(async move {
            *self.attempts.lock() += 1;
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(DbError::Connection("login timeout".to_string()));
            }
            Ok(Box::new(ScriptedConn {
                log: Arc::clone(&self.log),
                respond: Arc::clone(&self.respond),
            }) as Box<dyn SqlConnection>)
        })
    }
}

fn database(sql: Arc<Scripted>, files: DataFiles) -> MssqlDatabase {
    MssqlDatabase::new(
        sql,
        "10.0.0.1",
        &Credentials::new("SA", "pw"),
        MssqlOptions {
            files,
            ..MssqlOptions::default()
        },
    )
}

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

#[tokio::test(start_paused = true)]
async fn connect_retries_until_success() {
    let sql = Scripted::failing(3);
    let db = database(Arc::clone(&sql), DataFiles::default());

    db.create_endpoint().await.expect("endpoint");

    assert_eq!(*sql.attempts.lock(), 4);
    assert!(sql.statements()[0].contains("CREATE ENDPOINT [Hadr_endpoint]"));
}

#[tokio::test(start_paused = true)]
async fn connect_gives_up_after_timeout() {
    let sql = Scripted::failing(u32::MAX);
    let db = database(Arc::clone(&sql), DataFiles::default());

    let err = db.create_endpoint().await.unwrap_err();

    assert!(matches!(err, DbError::ConnectTimeout { waited, .. } if waited == Duration::from_secs(300)));
    // One attempt every five seconds across the five minute window.
    assert_eq!(*sql.attempts.lock(), 61);
}

#[tokio::test]
async fn create_login_sets_sid_only_on_create() {
    let sql = Scripted::new(|_| Vec::new());
    let db = database(Arc::clone(&sql), DataFiles::default());
    let spec = SqlLogin {
        name: "app".to_string(),
        sid: "0a0b".to_string(),
        password_hash: "0200ff".to_string(),
        server_roles: vec!["dbcreator".to_string()],
    }
    .to_replica_spec();

    db.create_login(&spec).await.expect("create");

    let statements = sql.statements();
    assert_eq!(
        statements[1],
        "CREATE LOGIN [app] WITH PASSWORD = 0x0200ff HASHED, SID = 0x0a0b, \
         CHECK_POLICY = OFF, CHECK_EXPIRATION = OFF"
    );
    assert_eq!(statements[2], "ALTER SERVER ROLE [dbcreator] ADD MEMBER [app]");
}

#[tokio::test]
async fn create_login_alters_existing_login() {
    let sql = Scripted::new(|q| {
        if q.contains("sys.syslogins") {
            vec![vec![text("app")]]
        } else {
            Vec::new()
        }
    });
    let db = database(Arc::clone(&sql), DataFiles::default());
    let mut spec = LoginSpec::plain("app", "s3cret");
    spec.sid = Some("0a".to_string());

    db.create_login(&spec).await.expect("alter");

    assert_eq!(
        sql.statements()[1],
        "ALTER LOGIN [app] WITH PASSWORD = N's3cret', CHECK_POLICY = OFF, CHECK_EXPIRATION = OFF"
    );
}

#[tokio::test]
async fn create_login_rejects_non_hex_hash() {
    let sql = Scripted::new(|_| Vec::new());
    let db = database(sql, DataFiles::default());
    let spec = LoginSpec {
        name: "app".to_string(),
        password: LoginPassword::Hashed("zz".to_string()),
        sid: None,
        server_roles: Vec::new(),
    };

    assert!(matches!(db.create_login(&spec).await, Err(DbError::Query(_))));
}

#[tokio::test]
async fn create_group_skips_existing_group() {
    let sql = Scripted::new(|q| {
        if q.contains("sys.availability_groups") {
            vec![vec![text("juju-ag")]]
        } else {
            Vec::new()
        }
    });
    let db = database(Arc::clone(&sql), DataFiles::default());

    db.create_group("juju-ag", &[ReplicaNode::new("n1", "10.0.0.1")])
        .await
        .expect("create");

    assert_eq!(sql.statements().len(), 1);
}

#[tokio::test]
async fn add_replicas_skips_listed_nodes() {
    let sql = Scripted::new(|q| {
        if q.contains("replica_cluster_nodes") && q.contains("N'n2'") {
            vec![vec![text("n2")]]
        } else {
            Vec::new()
        }
    });
    let db = database(Arc::clone(&sql), DataFiles::default());
    let nodes = [ReplicaNode::new("n2", "10.0.0.2"), ReplicaNode::new("n3", "10.0.0.3")];

    db.add_replicas("juju-ag", &nodes).await.expect("add");

    let adds: Vec<_> = sql
        .statements()
        .into_iter()
        .filter(|s| s.contains("ADD REPLICA"))
        .collect();
    assert_eq!(adds.len(), 1);
    assert!(adds[0].contains("N'n3'"));
}

#[tokio::test]
async fn topology_queries_read_first_column() {
    let sql = Scripted::new(|q| {
        if q.contains("primary_replica") {
            vec![vec![text("n1")]]
        } else if q.contains("replica_server_name") {
            vec![vec![text("n1")], vec![text("n2")]]
        } else {
            Vec::new()
        }
    });
    let db = database(sql, DataFiles::default());

    assert_eq!(db.primary_replica("juju-ag").await.unwrap(), Some(NodeName::new("n1")));
    assert_eq!(
        db.replicas("juju-ag").await.unwrap(),
        vec![NodeName::new("n1"), NodeName::new("n2")]
    );
}

#[tokio::test]
async fn primary_replica_is_none_without_rows() {
    let sql = Scripted::new(|_| Vec::new());
    let db = database(sql, DataFiles::default());

    assert_eq!(db.primary_replica("juju-ag").await.unwrap(), None);
}

#[tokio::test]
async fn sql_logins_hex_encodes_binary_columns() {
    let sql = Scripted::new(|q| {
        if q.starts_with("SELECT name, sid") {
            vec![vec![
                text("app"),
                SqlValue::Bytes(vec![0x0a, 0xff]),
                SqlValue::Bytes(vec![0x02, 0x00]),
            ]]
        } else if q.contains("server_role_members") {
            vec![vec![text("sysadmin")]]
        } else {
            Vec::new()
        }
    });
    let db = database(sql, DataFiles::default());

    let logins = db.sql_logins().await.expect("logins");

    assert_eq!(
        logins,
        vec![SqlLogin {
            name: "app".to_string(),
            sid: "0aff".to_string(),
            password_hash: "0200".to_string(),
            server_roles: vec!["sysadmin".to_string()],
        }]
    );
}

#[tokio::test]
async fn install_certificate_writes_files_before_restore() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let sql = Scripted::new(|_| Vec::new());
    let db = database(
        Arc::clone(&sql),
        DataFiles {
            data_dir: dir.path().to_path_buf(),
            owner: None,
        },
    );
    let pair = CertificatePair {
        certificate: b"cert".to_vec(),
        private_key: b"key".to_vec(),
    };

    db.install_certificate(&pair, "pw").await.expect("install");

    assert_eq!(fs::read(dir.path().join("dbm_certificate.cer")).unwrap(), b"cert");
    assert_eq!(fs::read(dir.path().join("dbm_certificate.pvk")).unwrap(), b"key");
    assert!(sql.statements()[0].contains("DECRYPTION BY PASSWORD = N'pw'"));
}

#[tokio::test]
async fn create_database_adds_to_group_with_backup() {
    let sql = Scripted::new(|_| Vec::new());
    let db = database(
        Arc::clone(&sql),
        DataFiles {
            data_dir: PathBuf::from("/data"),
            owner: None,
        },
    );

    db.create_database("orders", Some("juju-ag")).await.expect("create");

    let statements = sql.statements();
    assert_eq!(statements.len(), 2);
    assert!(statements[1].contains("BACKUP DATABASE [orders] TO DISK = N'/data/orders.bak'"));
    assert!(statements[1].contains("ALTER AVAILABILITY GROUP [juju-ag] ADD DATABASE [orders]"));
}
