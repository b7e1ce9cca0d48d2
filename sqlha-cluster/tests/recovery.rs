//! Failure injection, restarts and resumption.

mod common;

use common::{GROUP, TestCluster};
use sqlha_cluster::{JsonStateStore, LocalState, NodePhase, StateStore};
use sqlha_core::testing::DbOpKind;

#[tokio::test]
async fn failed_group_creation_resumes() {
    let mut cluster = TestCluster::new(3);
    cluster.sim.fleet().fail_next("n1", DbOpKind::CreateGroup, 1);

    let report = cluster.form().await;
    assert!(
        report.failures.iter().any(|(unit, _)| unit == &cluster.units[0]),
        "expected a failure on the leader"
    );

    cluster.retry_all().await;
    cluster.retry_all().await;

    assert!(cluster.all_clustered(), "{:?}", cluster.sim.phases());
    assert_eq!(cluster.sim.fleet().calls_of(DbOpKind::CreateGroup).len(), 1);
    assert_eq!(cluster.sim.hub().group_writes(sqlha_core::broadcast::keys::AG_READY), 1);
}

#[tokio::test]
async fn failed_join_resumes() {
    let mut cluster = TestCluster::new(3);
    cluster.sim.fleet().fail_next("n2", DbOpKind::JoinGroup, 1);

    let report = cluster.form().await;
    assert!(!report.failures.is_empty());

    cluster.retry_all().await;

    assert!(cluster.all_clustered(), "{:?}", cluster.sim.phases());
    let joins = cluster.sim.fleet().calls_of(DbOpKind::JoinGroup);
    assert_eq!(joins.iter().filter(|c| c.node.as_str() == "n2").count(), 1);
}

#[tokio::test]
async fn failed_endpoint_is_retried_without_reinstalling_the_certificate() {
    let mut cluster = TestCluster::new(3);
    cluster.sim.fleet().fail_next("n3", DbOpKind::CreateEndpoint, 1);

    cluster.form().await;
    cluster.retry_all().await;

    assert!(cluster.all_clustered(), "{:?}", cluster.sim.phases());
    let fleet = cluster.sim.fleet();
    let on_n3 = |kind| {
        fleet
            .calls_of(kind)
            .iter()
            .filter(|c| c.node.as_str() == "n3")
            .count()
    };
    assert_eq!(on_n3(DbOpKind::InstallCertificate), 1);
    assert_eq!(on_n3(DbOpKind::CreateEndpoint), 1);
}

#[tokio::test]
async fn unreachable_instance_fails_the_evaluation() {
    let mut cluster = TestCluster::new(3);
    cluster.sim.fleet().fail_next("n2", DbOpKind::Connect, 1);

    let report = cluster.form().await;
    assert!(report.failures.iter().any(|(unit, _)| unit == &cluster.units[1]));

    cluster.retry_all().await;
    assert!(cluster.all_clustered(), "{:?}", cluster.sim.phases());
}

#[tokio::test]
async fn restart_resumes_from_persisted_state() {
    let mut cluster = TestCluster::persistent(3);
    cluster.form().await;
    assert!(cluster.all_clustered());
    let calls_before = cluster.sim.fleet().calls();

    for unit in cluster.units.clone() {
        cluster.sim.restart(&unit).unwrap();
    }
    cluster.retry_all().await;

    assert!(cluster.all_clustered());
    assert_eq!(cluster.sim.fleet().calls(), calls_before);

    let path = cluster.state_file(1).unwrap();
    let saved: LocalState = JsonStateStore::new(path).load().unwrap().unwrap();
    assert!(saved.initialized);
    assert!(saved.master_cert_installed);
    assert!(saved.mirroring_endpoint_ready);
    assert!(saved.availability_group_joined);
    assert_eq!(saved.registry.len(), 3);
}

#[tokio::test]
async fn restarted_leader_keeps_its_registry_while_waiting() {
    let mut cluster = TestCluster::persistent(2);
    cluster.form().await;
    assert_eq!(cluster.node(0).phase(), NodePhase::ReadyToCluster);

    let leader = cluster.units[0].clone();
    cluster.sim.restart(&leader).unwrap();
    assert_eq!(cluster.node(0).registry().len(), 2);
    assert_eq!(cluster.node(0).phase(), NodePhase::ReadyToCluster);

    cluster.add_node();
    cluster.settle().await;

    assert!(cluster.all_clustered(), "{:?}", cluster.sim.phases());
    assert!(cluster.sim.fleet().group(GROUP).is_some());
}
