//! Integration tests for member lifecycle: start, stop, restart, clean.

use kafkarig::{BrokerId, ClusterService, HarnessError, HarnessSettings, Signal, TopicSpec};
use std::time::Duration;

use crate::test_utilities::{ScriptedNode, as_remote_nodes, create_test_cluster};

#[test_log::test(tokio::test)]
async fn test_start_brings_every_member_up() {
    let (service, nodes) = create_test_cluster(3);

    service.start().await.unwrap();

    for member in service.members() {
        assert!(service.is_alive(member.id()).await, "{member} should be alive");
        assert!(!member.known_pids().is_empty());
    }
    for (idx, node) in nodes.iter().enumerate() {
        let props = node.file("/mnt/kafka/kafka.properties").unwrap();
        assert!(props.starts_with(&format!("broker.id={}\n", idx + 1)));
        assert!(props.contains("zookeeper.connect=zk1:2181\n"));
        assert!(node.file("/mnt/kafka/log4j.properties").is_some());
        assert_eq!(node.commands_containing("mkdir -p '/mnt/kafka'").len(), 1);
    }
}

#[test_log::test(tokio::test)]
async fn test_start_creates_topics_after_members() {
    let (service, nodes) = create_test_cluster(2);
    let service = service.with_topics(vec![
        TopicSpec::new("orders", 3, 2),
        TopicSpec::new("payments", 1, 1),
    ]);
    nodes[0].respond("--describe", "Topic:orders\tPartitionCount:3\tReplicationFactor:2");

    service.start().await.unwrap();

    // Topic tooling runs on the first member's node, after both brokers launched.
    let commands = nodes[0].commands();
    let launch = commands
        .iter()
        .position(|cmd| cmd.contains("kafka-server-start"))
        .unwrap();
    let creates: Vec<_> = commands
        .iter()
        .enumerate()
        .filter(|(_, cmd)| cmd.contains("--create"))
        .collect();
    assert_eq!(creates.len(), 2);
    assert!(creates.iter().all(|(idx, _)| *idx > launch));
    assert!(creates[0].1.contains("--topic 'orders' --partitions 3 --replication-factor 2"));
    assert!(creates[1].1.contains("--topic 'payments'"));
    assert!(nodes[1].commands_containing("--create").is_empty());
    assert!(!nodes[1].broker_pids().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_start_fails_without_process() {
    let (service, nodes) = create_test_cluster(2);
    nodes[1].fail_launches();

    let result = service.start().await;

    assert!(matches!(
        result,
        Err(HarnessError::StartupFailure { ref member, .. }) if member == "broker-2@worker2"
    ));
    assert!(result.unwrap_err().is_fatal_lifecycle());
    assert!(service.is_alive(BrokerId(1)).await);
}

#[test_log::test(tokio::test)]
async fn test_failed_pid_query_reads_as_not_alive() {
    let (service, nodes) = create_test_cluster(1);
    nodes[0].fail_pid_queries(true);

    assert!(!service.is_alive(BrokerId(1)).await);
    assert!(matches!(
        service.pids(BrokerId(1)).await,
        Err(HarnessError::ProcessQuery { ref host, .. }) if host == "worker1"
    ));
    assert!(matches!(
        service.start_member(BrokerId(1)).await,
        Err(HarnessError::StartupFailure { .. })
    ));
}

#[test_log::test(tokio::test)]
async fn test_stop_then_wait_reports_not_alive() {
    let (service, nodes) = create_test_cluster(2);
    service.start().await.unwrap();
    let pid = nodes[0].broker_pids()[0];

    service.stop_member(BrokerId(1), true).await.unwrap();
    service.wait_until_stopped(BrokerId(1)).await.unwrap();

    assert!(!service.is_alive(BrokerId(1)).await);
    assert!(service.is_alive(BrokerId(2)).await);
    assert!(service.member(BrokerId(1)).unwrap().known_pids().is_empty());
    assert_eq!(nodes[0].commands_containing(&format!("kill -TERM {pid}")).len(), 1);
    assert_eq!(nodes[0].commands_containing("rm -f '/mnt/kafka/kafka.pid'").len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_unclean_stop_uses_sigkill() {
    let (service, nodes) = create_test_cluster(1);
    service.start().await.unwrap();
    nodes[0].set_stubborn(true);

    service.stop_member(BrokerId(1), false).await.unwrap();
    service.wait_until_stopped(BrokerId(1)).await.unwrap();

    assert_eq!(nodes[0].commands_containing("kill -KILL").len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_stubborn_member_times_out() {
    let (service, nodes) = create_test_cluster(1);
    service.start().await.unwrap();
    nodes[0].set_stubborn(true);

    service.stop_member(BrokerId(1), true).await.unwrap();
    let result = service.wait_until_stopped(BrokerId(1)).await;

    assert!(matches!(result, Err(HarnessError::TerminationTimeout { .. })));
    assert!(result.unwrap_err().is_timeout());
    assert!(service.is_alive(BrokerId(1)).await);

    // Cleanup escalates to SIGKILL.
    service.clean_member(BrokerId(1)).await.unwrap();
    assert!(!service.is_alive(BrokerId(1)).await);
}

#[test_log::test(tokio::test)]
async fn test_failed_signal_surfaces_on_stop() {
    let (service, nodes) = create_test_cluster(1);
    service.start().await.unwrap();
    nodes[0].fail_commands_containing("kill -TERM");

    let result = service.stop_member(BrokerId(1), true).await;

    assert!(matches!(result, Err(HarnessError::CommandFailed { .. })));
    // Soft signalling tolerates the same failure.
    service
        .signal_member(BrokerId(1), Signal::Term, true)
        .await
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn test_restart_relaunches_member() {
    let (service, nodes) = create_test_cluster(1);
    service.start().await.unwrap();
    let before = nodes[0].broker_pids();

    service
        .restart_member(BrokerId(1), Duration::from_millis(5), true)
        .await
        .unwrap();

    let after = nodes[0].broker_pids();
    assert_eq!(after.len(), 1);
    assert_ne!(before, after);
    assert_eq!(service.member(BrokerId(1)).unwrap().known_pids(), after);
    assert_eq!(nodes[0].commands_containing("kafka-server-start").len(), 2);
}

#[test_log::test(tokio::test)]
async fn test_failed_restart_leaves_member_stopped() {
    let (service, nodes) = create_test_cluster(1);
    service.start().await.unwrap();
    nodes[0].fail_launches();

    let result = service
        .restart_member(BrokerId(1), Duration::from_millis(5), true)
        .await;

    assert!(matches!(result, Err(HarnessError::StartupFailure { .. })));
    assert!(!service.is_alive(BrokerId(1)).await);
    assert!(service.member(BrokerId(1)).unwrap().known_pids().is_empty());
    assert!(nodes[0].broker_pids().is_empty());
    assert!(nodes[0].file("/mnt/kafka/kafka.pid").is_none());
}

#[test_log::test(tokio::test)]
async fn test_clean_is_idempotent() {
    let (service, nodes) = create_test_cluster(2);
    service.start().await.unwrap();

    service.clean().await.unwrap();
    service.clean().await.unwrap();

    for node in &nodes {
        assert!(node.broker_pids().is_empty());
        assert_eq!(node.commands_containing("rm -rf '/mnt/kafka'").len(), 2);
    }
}

#[test_log::test(tokio::test)]
async fn test_clean_tolerates_failed_kill() {
    let (service, nodes) = create_test_cluster(1);
    service.start().await.unwrap();
    let pid = nodes[0].broker_pids()[0];
    nodes[0].fail_commands_containing("kill -KILL");

    service.clean_member(BrokerId(1)).await.unwrap();

    assert_eq!(nodes[0].commands_containing(&format!("kill -KILL {pid}")).len(), 1);
    assert_eq!(nodes[0].commands_containing("rm -rf").len(), 1);
    assert!(service.member(BrokerId(1)).unwrap().known_pids().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_clean_of_stopped_member_sends_no_signal() {
    let (service, nodes) = create_test_cluster(1);
    service.start().await.unwrap();
    service.stop_member(BrokerId(1), true).await.unwrap();
    service.wait_until_stopped(BrokerId(1)).await.unwrap();

    service.clean_member(BrokerId(1)).await.unwrap();

    assert!(nodes[0].commands_containing("kill -KILL").is_empty());
    assert!(nodes[0].file("/mnt/kafka/kafka.properties").is_none());
}

#[test_log::test(tokio::test)]
async fn test_colocated_members_stop_independently() {
    let node = ScriptedNode::new("worker1");
    let nodes = as_remote_nodes(&[node.clone(), node.clone()]);
    let service = ClusterService::new(nodes, "zk1:2181", HarnessSettings::immediate());

    service.start().await.unwrap();
    let first = service.member(BrokerId(1)).unwrap().known_pids();
    let second = service.member(BrokerId(2)).unwrap().known_pids();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_ne!(first, second);
    assert_eq!(node.file("/mnt/kafka/kafka.pid"), Some(format!("{}\n", first[0])));
    assert_eq!(node.file("/mnt/kafka-2/kafka.pid"), Some(format!("{}\n", second[0])));
    assert!(node.file("/mnt/kafka-2/kafka.properties").unwrap().contains("port=9093\n"));

    service.stop_member(BrokerId(1), true).await.unwrap();
    service.wait_until_stopped(BrokerId(1)).await.unwrap();

    assert!(!service.is_alive(BrokerId(1)).await);
    assert!(service.is_alive(BrokerId(2)).await);
    assert_eq!(node.broker_pids(), second);
    assert_eq!(node.commands_containing("kill -"), vec![format!("kill -TERM {}", first[0])]);
    assert_eq!(service.pids(BrokerId(2)).await.unwrap(), second);
    assert_eq!(service.bootstrap_servers(), "worker1:9092,worker1:9093");
}

#[test_log::test(tokio::test)]
async fn test_pid_file_survives_a_fresh_service() {
    let (service, nodes) = create_test_cluster(1);
    service.start().await.unwrap();
    let pid = nodes[0].broker_pids()[0];

    // A second process over the same host knows nothing but the pid file.
    let fresh = ClusterService::new(
        as_remote_nodes(&nodes),
        "zk1:2181",
        HarnessSettings::immediate(),
    );
    assert!(fresh.member(BrokerId(1)).unwrap().known_pids().is_empty());
    assert_eq!(fresh.pids(BrokerId(1)).await.unwrap(), vec![pid]);

    fresh.stop_member(BrokerId(1), true).await.unwrap();
    fresh.wait_until_stopped(BrokerId(1)).await.unwrap();
    assert!(nodes[0].broker_pids().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_unknown_member() {
    let (service, _nodes) = create_test_cluster(1);

    assert!(matches!(
        service.stop_member(BrokerId(4), true).await,
        Err(HarnessError::UnknownMember { broker_id: 4 })
    ));
    assert!(!service.is_alive(BrokerId(4)).await);
}

#[test]
fn test_bootstrap_servers_follow_member_order() {
    let (service, _nodes) = create_test_cluster(3);

    assert_eq!(
        service.bootstrap_addresses(),
        vec!["worker1:9092", "worker2:9092", "worker3:9092"]
    );
    assert_eq!(
        service.bootstrap_servers(),
        "worker1:9092,worker2:9092,worker3:9092"
    );
}
