//! End-to-end convergence over the in-memory transport.

use std::time::Duration;

use starsync::{ComponentId, NodeId, SyncMessage, SyncerError};
use starsync_testkit::fixtures::{recording_receiver, scripted_reporter, TestCluster};

const TICK: Option<Duration> = Some(Duration::from_millis(10));
const PATIENCE: Duration = Duration::from_secs(2);

/// Leader and follower each publish one component; both observe the
/// other's state within a publish period or two.
#[tokio::test]
async fn two_node_exchange() {
    let cluster = TestCluster::start(1).await;
    let leader = cluster.leader.clone();
    let follower = cluster.followers[0].clone();

    let (leader_reporter, leader_script) =
        scripted_reporter(leader.node_id(), ComponentId::Resources);
    let (leader_receiver, leader_log) = recording_receiver();
    leader.register(ComponentId::Resources, Some(Box::new(leader_reporter)), None, TICK);
    leader.register(ComponentId::Scheduler, None, Some(Box::new(leader_receiver)), None);

    let (follower_reporter, follower_script) =
        scripted_reporter(follower.node_id(), ComponentId::Scheduler);
    let (follower_receiver, follower_log) = recording_receiver();
    follower.register(ComponentId::Scheduler, Some(Box::new(follower_reporter)), None, TICK);
    follower.register(ComponentId::Resources, None, Some(Box::new(follower_receiver)), None);

    leader_script.publish(1, &b"x"[..]);
    cluster
        .wait_until(PATIENCE, "follower to observe x", || {
            !follower_log.is_empty()
        })
        .await;
    let delivered = follower_log.messages();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].origin(), leader.node_id());
    assert_eq!(delivered[0].version(), 1);
    assert_eq!(delivered[0].payload().as_ref(), b"x");

    follower_script.publish(1, &b"y"[..]);
    cluster
        .wait_until(PATIENCE, "leader to observe y", || !leader_log.is_empty())
        .await;
    let delivered = leader_log.messages();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].origin(), follower.node_id());
    assert_eq!(delivered[0].version(), 1);
    assert_eq!(delivered[0].payload().as_ref(), b"y");

    cluster.wait_converged(PATIENCE).await;
    cluster.shutdown();
}

/// Versions delivered to a receiver strictly increase even when updates
/// burst faster than the wire.
#[tokio::test]
async fn delivered_versions_strictly_increase() {
    let cluster = TestCluster::start(2).await;
    let (receiver, log) = recording_receiver();
    cluster.followers[1].register(ComponentId::Resources, None, Some(Box::new(receiver)), None);

    let origin = NodeId::from_bytes([7; 16]);
    for version in 1..=50 {
        cluster.leader.update(SyncMessage::snapshot(
            origin,
            ComponentId::Resources,
            version,
            version.to_string(),
        ));
    }

    cluster
        .wait_until(PATIENCE, "final version to arrive", || {
            log.versions_for(origin, ComponentId::Resources).last() == Some(&50)
        })
        .await;

    let versions = log.versions_for(origin, ComponentId::Resources);
    assert!(
        versions.windows(2).all(|w| w[0] < w[1]),
        "versions not strictly increasing: {:?}",
        versions
    );
    cluster.shutdown();
}

/// A quiet cluster converges on every view, including nodes that only
/// listen.
#[tokio::test]
async fn cluster_converges_across_three_followers() {
    let cluster = TestCluster::start(3).await;

    for (i, node) in cluster.nodes().enumerate() {
        let (reporter, script) = scripted_reporter(node.node_id(), ComponentId::Resources);
        node.register(ComponentId::Resources, Some(Box::new(reporter)), None, TICK);
        script.publish(1, format!("state-{}", i).into_bytes());
        script.publish(2, format!("state-{}b", i).into_bytes());
    }

    // Every node ends up holding one entry per participant, at version 2.
    let deadline = tokio::time::Instant::now() + PATIENCE;
    'settling: loop {
        let mut settled = true;
        for node in cluster.nodes() {
            let state = node.cluster_state().await.unwrap();
            if state.len() != 4 || state.iter().any(|m| m.version() != 2) {
                settled = false;
                break;
            }
        }
        if settled {
            break 'settling;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "cluster never settled"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(cluster.converged().await);
    cluster.shutdown();
}

/// No receiver is ever handed a message its own node produced.
#[tokio::test]
async fn no_self_echo() {
    let cluster = TestCluster::start(2).await;

    let mut logs = Vec::new();
    for node in cluster.nodes() {
        let (reporter, script) = scripted_reporter(node.node_id(), ComponentId::Health);
        let (receiver, log) = recording_receiver();
        node.register(
            ComponentId::Health,
            Some(Box::new(reporter)),
            Some(Box::new(receiver)),
            TICK,
        );
        script.publish(1, node.node_id().to_hex().into_bytes());
        logs.push((node.node_id(), log));
    }

    for (node_id, log) in &logs {
        // Two peers' states arrive; our own never does.
        cluster
            .wait_until(PATIENCE, "peer states to arrive", || log.len() >= 2)
            .await;
        assert!(log.messages().iter().all(|m| m.origin() != *node_id));
    }
    cluster.wait_converged(PATIENCE).await;
    cluster.shutdown();
}

/// A dropped follower disappears from the leader's peer set and fan-out
/// carries on to the rest.
#[tokio::test]
async fn disconnect_cleans_up() {
    let cluster = TestCluster::start(2).await;
    let dropped = cluster.followers[1].clone();
    let dropped_id = dropped.node_id();

    dropped.shutdown();
    let deadline = tokio::time::Instant::now() + PATIENCE;
    loop {
        let peers = cluster.leader.connected_peers().await.unwrap();
        if !peers.contains(&dropped_id) {
            assert_eq!(peers.len(), 1);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "peer never removed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Fan-out after the removal still reaches the survivor.
    let (receiver, log) = recording_receiver();
    cluster.followers[0].register(ComponentId::Commands, None, Some(Box::new(receiver)), None);
    let origin = NodeId::from_bytes([9; 16]);
    cluster
        .leader
        .update(SyncMessage::snapshot(origin, ComponentId::Commands, 1, &b"go"[..]));
    cluster
        .wait_until(PATIENCE, "survivor to observe update", || !log.is_empty())
        .await;

    cluster.leader.shutdown();
    cluster.followers[0].shutdown();
}

/// A follower reconnecting under the same id starts from a fresh session
/// and is brought current by the replay.
#[tokio::test]
async fn reconnect_replays_current_view() {
    let mut cluster = TestCluster::start(1).await;
    let first = cluster.followers[0].clone();
    let follower_id = first.node_id();

    let origin = NodeId::from_bytes([5; 16]);
    cluster
        .leader
        .update(SyncMessage::snapshot(origin, ComponentId::Resources, 3, &b"pre"[..]));
    cluster.wait_converged(PATIENCE).await;

    first.shutdown();
    let deadline = tokio::time::Instant::now() + PATIENCE;
    while !cluster.leader.connected_peers().await.unwrap().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "peer never removed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cluster.followers.clear();

    let rejoined = cluster.add_follower(follower_id).await;
    let deadline = tokio::time::Instant::now() + PATIENCE;
    loop {
        let state = rejoined.cluster_state().await.unwrap();
        if state.iter().any(|m| m.origin() == origin && m.version() == 3) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "replay never arrived"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cluster.shutdown();
}

/// A second leader connection is a host error.
#[tokio::test]
async fn double_leader_is_rejected() {
    let cluster = TestCluster::start(1).await;
    let follower = cluster.followers[0].clone();

    let result = follower
        .connect_to_leader(Box::new(cluster.endpoint.clone()))
        .await;
    assert!(matches!(result, Err(SyncerError::LeaderAlreadyConnected)));
    cluster.shutdown();
}
