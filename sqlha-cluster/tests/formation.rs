//! End-to-end availability-group formation tests.

mod common;

use common::{GROUP, TestCluster, names};
use sqlha_cluster::{ClusterEvent, NodePhase, WaitReason};
use sqlha_core::NodeName;
use sqlha_core::broadcast::keys;
use sqlha_core::testing::{DbOp, DbOpKind};

#[tokio::test]
async fn three_nodes_form_one_group() {
    let mut cluster = TestCluster::new(3);

    let report = cluster.form().await;

    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert!(cluster.all_clustered());

    let creates = cluster.sim.fleet().calls_of(DbOpKind::CreateGroup);
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0].node.as_str(), "n1");
    let DbOp::CreateGroup { name, nodes } = &creates[0].op else {
        panic!("unexpected op {:?}", creates[0].op);
    };
    assert_eq!(name, GROUP);
    assert_eq!(names(nodes), vec!["n1", "n2", "n3"]);

    let group = cluster.sim.fleet().group(GROUP).expect("group exists");
    assert_eq!(group.primary.as_str(), "n1");
    assert_eq!(names(&group.joined), vec!["n1", "n2", "n3"]);

    let hub = cluster.sim.hub();
    assert_eq!(hub.group_writes(keys::AG_READY), 1);
    assert_eq!(hub.group_writes(keys::SA_PASSWORD), 1);
    assert_eq!(hub.group_writes(keys::MASTER_CERT), 1);
}

#[tokio::test]
async fn every_node_gets_the_replication_channel() {
    let mut cluster = TestCluster::new(3);
    cluster.form().await;

    let fleet = cluster.sim.fleet();
    for name in ["n1", "n2", "n3"] {
        assert!(fleet.has_certificate(name), "{name} has no certificate");
        assert!(fleet.has_endpoint(name), "{name} has no endpoint");
    }
    // Only the leader generates the certificate; the rest install its export.
    assert_eq!(fleet.calls_of(DbOpKind::CreateCertificate).len(), 1);
    assert_eq!(fleet.calls_of(DbOpKind::InstallCertificate).len(), 2);
    assert_eq!(fleet.calls_of(DbOpKind::CreateEndpoint).len(), 3);
}

#[tokio::test]
async fn all_nodes_share_the_leader_password() {
    let mut cluster = TestCluster::new(3);
    cluster.form().await;

    let password = cluster.node(0).sa_password().expect("password advertised");
    assert_eq!(password.len(), 32);
    for i in 1..3 {
        assert_eq!(cluster.node(i).sa_password().as_deref(), Some(password.as_str()));
    }
}

#[tokio::test]
async fn two_nodes_wait_for_quorum() {
    let mut cluster = TestCluster::new(2);

    let report = cluster.form().await;

    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert!(cluster.sim.fleet().group(GROUP).is_none());
    assert!(cluster.sim.fleet().calls_of(DbOpKind::CreateGroup).is_empty());
    assert_eq!(cluster.node(0).phase(), NodePhase::ReadyToCluster);
    assert_eq!(cluster.node(1).phase(), NodePhase::ReadyToCluster);
    assert!(!cluster.node(0).is_group_ready());
    for (i, name) in ["n1", "n2"].into_iter().enumerate() {
        let me = cluster.node(i).registry().get(name).expect("self recorded");
        assert!(me.ready_to_cluster, "{name} should record itself ready");
        assert!(!me.clustered);
    }

    let leader = cluster.units[0].clone();
    let eval = cluster.sim.poke(&leader).await.unwrap();
    assert!(eval.is_waiting_on(&WaitReason::Quorum {
        ready: 2,
        required: 3
    }));

    let follower = cluster.units[1].clone();
    let eval = cluster.sim.poke(&follower).await.unwrap();
    assert!(eval.is_waiting_on(&WaitReason::GroupNotReady));
}

#[tokio::test]
async fn third_node_completes_the_quorum() {
    let mut cluster = TestCluster::new(2);
    cluster.form().await;
    assert!(cluster.sim.fleet().group(GROUP).is_none());

    cluster.add_node();
    let report = cluster.settle().await;

    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert!(cluster.all_clustered());
    assert_eq!(cluster.sim.fleet().calls_of(DbOpKind::CreateGroup).len(), 1);
    assert!(cluster.sim.fleet().calls_of(DbOpKind::AddReplicas).is_empty());
}

#[tokio::test]
async fn replaying_events_repeats_nothing() {
    let mut cluster = TestCluster::new(3);
    cluster.form().await;
    let calls_before = cluster.sim.fleet().calls();
    let nonce_before = cluster.sim.hub().unit_bag(&cluster.units[0]).get(keys::NONCE).cloned();

    cluster.retry_all().await;
    let leader = cluster.units[0].clone();
    cluster
        .sim
        .deliver(&leader, ClusterEvent::LeaderElected)
        .await
        .unwrap();
    cluster
        .sim
        .deliver(&leader, ClusterEvent::UnitInitialized)
        .await
        .unwrap();
    cluster.settle().await;

    assert_eq!(cluster.sim.fleet().calls(), calls_before);
    let hub = cluster.sim.hub();
    assert_eq!(hub.group_writes(keys::AG_READY), 1);
    assert_eq!(hub.group_writes(keys::SA_PASSWORD), 1);
    assert_eq!(hub.unit_bag(&leader).get(keys::NONCE).cloned(), nonce_before);
}

#[tokio::test]
async fn late_node_is_added_as_replica() {
    let mut cluster = TestCluster::new(3);
    cluster.form().await;

    cluster.add_node();
    let report = cluster.settle().await;

    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert!(cluster.all_clustered());

    let fleet = cluster.sim.fleet();
    assert_eq!(fleet.calls_of(DbOpKind::CreateGroup).len(), 1);
    let adds = fleet.calls_of(DbOpKind::AddReplicas);
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0].node.as_str(), "n1");
    let DbOp::AddReplicas { nodes, .. } = &adds[0].op else {
        panic!("unexpected op {:?}", adds[0].op);
    };
    assert_eq!(names(nodes), vec!["n4"]);

    let group = fleet.group(GROUP).unwrap();
    assert_eq!(names(&group.replicas), vec!["n1", "n2", "n3", "n4"]);
    assert_eq!(names(&group.joined), vec!["n1", "n2", "n3", "n4"]);
}

#[tokio::test]
async fn two_late_nodes_are_added_in_one_call() {
    let mut cluster = TestCluster::new(3);
    cluster.form().await;

    cluster.add_node();
    cluster.add_node();
    let report = cluster.settle().await;

    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert!(cluster.all_clustered(), "{:?}", cluster.sim.phases());

    let adds = cluster.sim.fleet().calls_of(DbOpKind::AddReplicas);
    assert_eq!(adds.len(), 1, "{adds:?}");
    let DbOp::AddReplicas { nodes, .. } = &adds[0].op else {
        panic!("unexpected op {:?}", adds[0].op);
    };
    assert_eq!(names(nodes), vec!["n4", "n5"]);

    let group = cluster.sim.fleet().group(GROUP).unwrap();
    assert_eq!(names(&group.joined), vec!["n1", "n2", "n3", "n4", "n5"]);
}

#[tokio::test]
async fn newly_elected_late_leader_waits_for_the_primary() {
    let mut cluster = TestCluster::new(3);
    cluster.form().await;
    let late = cluster.add_node();
    cluster.sim.elect(&late).unwrap();

    // Handled before any pending change event reaches the new node.
    let eval = cluster
        .sim
        .deliver(&late, ClusterEvent::LeaderElected)
        .await
        .expect("evaluation waits instead of failing");

    assert!(eval.is_waiting_on(&WaitReason::NotListed {
        primary: NodeName::new("n1")
    }));
    let node = cluster.sim.node(&late).unwrap();
    assert_eq!(node.registry().len(), 4);
    assert!(!node.is_primary_replica().await.unwrap());
    assert!(cluster.sim.fleet().calls_of(DbOpKind::AddReplicas).is_empty());

    let report = cluster.settle().await;
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert!(cluster.all_clustered(), "{:?}", cluster.sim.phases());
    assert_eq!(cluster.sim.fleet().calls_of(DbOpKind::CreateGroup).len(), 1);
    let adds = cluster.sim.fleet().calls_of(DbOpKind::AddReplicas);
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0].node.as_str(), "n1");
}

#[tokio::test]
async fn registries_converge_and_resolve_every_peer() {
    let mut cluster = TestCluster::new(3);
    cluster.form().await;

    for i in 0..3 {
        let registry = cluster.node(i).registry();
        assert_eq!(registry.len(), 3);
        for (name, record) in registry.iter() {
            assert!(record.ready_to_cluster, "{name} not ready in node {i}");
            assert!(record.clustered, "{name} not clustered in node {i}");
        }
    }
    let resolver = cluster.sim.resolver();
    assert_eq!(resolver.resolve("n1").as_deref(), Some("10.0.0.1"));
    assert_eq!(resolver.resolve("n3").as_deref(), Some("10.0.0.3"));
}

#[tokio::test]
async fn leadership_change_keeps_the_primary() {
    let mut cluster = TestCluster::new(3);
    cluster.form().await;

    let new_leader = cluster.units[1].clone();
    cluster.sim.elect(&new_leader).unwrap();
    let report = cluster.settle().await;

    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert!(cluster.node(0).is_primary_replica().await.unwrap());
    assert!(!cluster.node(1).is_primary_replica().await.unwrap());
    assert!(!cluster.node(2).is_primary_replica().await.unwrap());

    let hub = cluster.sim.hub();
    assert_eq!(hub.group_writes(keys::SA_PASSWORD), 1);
    assert_eq!(hub.group_writes(keys::MASTER_CERT), 1);
    assert_eq!(cluster.sim.fleet().calls_of(DbOpKind::CreateGroup).len(), 1);
}

#[tokio::test]
async fn roles_follow_leadership_until_the_group_exists() {
    let mut cluster = TestCluster::new(2);
    cluster.form().await;

    // No group: the leader acts as primary.
    assert!(cluster.node(0).is_primary_replica().await.unwrap());
    assert!(!cluster.node(1).is_primary_replica().await.unwrap());
    assert_eq!(cluster.node(0).ag_primary_replica().await.unwrap(), None);
    assert!(cluster.node(1).ag_replicas().await.unwrap().is_empty());
}
