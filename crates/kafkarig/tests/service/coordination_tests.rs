//! Integration tests for coordination-service queries: leadership, topic
//! description and partition reassignment.

use kafkarig::{
    BrokerId, HarnessError, PartitionId, ReassignmentPlan, RetryPolicy, Signal, TopicSpec,
    scrape::ReassignmentStatus,
};
use std::time::Duration;

use crate::test_utilities::{create_test_cluster, partition_state_output};

const STATE_QUERY: &str = "get '/brokers/topics/orders/partitions/0/state'";

fn fast_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(5))
}

#[test_log::test(tokio::test)]
async fn test_leader_resolves_member() {
    let (service, nodes) = create_test_cluster(3);
    nodes[0].respond(STATE_QUERY, &partition_state_output(2, &[2, 1]));

    let leader = service.leader("orders", PartitionId(0)).await.unwrap();
    assert_eq!(leader.id(), BrokerId(2));
    assert_eq!(leader.hostname(), "worker2");

    // Unchanged state yields the same member on every query.
    let again = service.leader("orders", PartitionId(0)).await.unwrap();
    assert_eq!(again.id(), leader.id());

    let state = service
        .partition_state("orders", PartitionId(0))
        .await
        .unwrap();
    assert_eq!(state.in_sync_replicas, vec![BrokerId(2), BrokerId(1)]);
    assert_eq!(state.leader_epoch, Some(0));
    assert_eq!(nodes[0].commands_containing(STATE_QUERY).len(), 3);
    assert!(nodes[0].commands_containing(STATE_QUERY)[0].contains("-server 'zk1:2181'"));
}

#[test_log::test(tokio::test)]
async fn test_leader_without_state_line_fails() {
    let (service, nodes) = create_test_cluster(2);
    nodes[0].respond(
        STATE_QUERY,
        "Connecting to zk1:2181\nWATCHER::\nNode does not exist: /brokers/topics/orders/partitions/0/state",
    );

    let result = service.leader("orders", PartitionId(0)).await;

    assert!(matches!(
        result,
        Err(HarnessError::CoordinationQueryFailure { ref reason, .. })
            if reason.contains("topic orders and partition 0")
    ));
}

#[test_log::test(tokio::test)]
async fn test_leaderless_or_foreign_leader_is_unknown_member() {
    let (service, nodes) = create_test_cluster(2);
    nodes[0].respond_sequence(
        STATE_QUERY,
        &[
            &partition_state_output(-1, &[]),
            &partition_state_output(7, &[7]),
        ],
    );

    assert!(matches!(
        service.leader("orders", PartitionId(0)).await,
        Err(HarnessError::UnknownMember { broker_id: -1 })
    ));
    assert!(matches!(
        service.leader("orders", PartitionId(0)).await,
        Err(HarnessError::UnknownMember { broker_id: 7 })
    ));
}

#[test_log::test(tokio::test)]
async fn test_await_leader_retries_until_state_appears() {
    let (service, nodes) = create_test_cluster(2);
    let elected = partition_state_output(1, &[1, 2]);
    nodes[0].respond_sequence(STATE_QUERY, &["WATCHER::", "WATCHER::", &elected]);

    let leader = service
        .await_leader("orders", PartitionId(0), fast_retries(5))
        .await
        .unwrap();

    assert_eq!(leader.id(), BrokerId(1));
    assert_eq!(nodes[0].commands_containing(STATE_QUERY).len(), 3);
}

#[test_log::test(tokio::test)]
async fn test_await_leader_gives_up_after_budget() {
    let (service, nodes) = create_test_cluster(1);
    nodes[0].respond(STATE_QUERY, "WATCHER::");

    let result = service
        .await_leader("orders", PartitionId(0), fast_retries(3))
        .await;

    assert!(matches!(
        result,
        Err(HarnessError::CoordinationQueryFailure { .. })
    ));
    assert_eq!(nodes[0].commands_containing(STATE_QUERY).len(), 3);
}

#[test_log::test(tokio::test)]
async fn test_signal_leader_targets_leader_node_only() {
    let (service, nodes) = create_test_cluster(2);
    service.start().await.unwrap();
    nodes[0].respond(STATE_QUERY, &partition_state_output(2, &[2, 1]));
    let pid = nodes[1].broker_pids()[0];

    let leader = service
        .signal_leader("orders", PartitionId(0), Signal::Stop)
        .await
        .unwrap();

    assert_eq!(leader, BrokerId(2));
    assert_eq!(nodes[1].commands_containing(&format!("kill -STOP {pid}")).len(), 1);
    assert!(nodes[0].commands_containing("kill -").is_empty());
}

#[test_log::test(tokio::test)]
async fn test_create_topic_reports_tool_failure() {
    let (service, nodes) = create_test_cluster(1);
    nodes[0].fail_commands_containing("--create");

    let result = service.create_topic(&TopicSpec::new("orders", 1, 1)).await;

    assert!(matches!(result, Err(HarnessError::CommandFailed { .. })));
}

#[test_log::test(tokio::test)]
async fn test_create_topic_rejects_invalid_spec() {
    let (service, nodes) = create_test_cluster(1);

    let result = service.create_topic(&TopicSpec::new("orders", 0, 1)).await;

    assert!(matches!(result, Err(HarnessError::InvalidTopic { .. })));
    assert!(nodes[0].commands_containing("kafka-topics.sh").is_empty());
}

#[test_log::test(tokio::test)]
async fn test_create_topic_tolerates_missing_description() {
    let (service, nodes) = create_test_cluster(1);

    service
        .create_topic(&TopicSpec::new("orders", 2, 1).with_config("retention.ms", "1000"))
        .await
        .unwrap();

    let create = &nodes[0].commands_containing("--create")[0];
    assert!(create.contains("--config 'retention.ms=1000'"));
    assert!(matches!(
        service.describe_topic("orders").await,
        Err(HarnessError::CoordinationQueryFailure { .. })
    ));
}

#[test_log::test(tokio::test)]
async fn test_describe_topic_returns_raw_output() {
    let (service, nodes) = create_test_cluster(1);
    let description = "Topic:orders\tPartitionCount:1\tReplicationFactor:1\tConfigs:\n\
                       \tTopic: orders\tPartition: 0\tLeader: 1\tReplicas: 1\tIsr: 1\n";
    nodes[0].respond("--topic 'orders' --describe", description);

    assert_eq!(service.describe_topic("orders").await.unwrap(), description);
}

#[test_log::test(tokio::test)]
async fn test_verify_reassignment() {
    let (service, nodes) = create_test_cluster(3);
    let plan = ReassignmentPlan::new().with_partition("orders", PartitionId(0), [BrokerId(2), BrokerId(3)]);
    nodes[0].respond_sequence(
        "--verify",
        &[
            "Status of partition reassignment:\nReassignment of partition [orders,0] is still in progress",
            "Status of partition reassignment:\nReassignment of partition [orders,0] completed successfully",
            "Some unexpected banner",
        ],
    );

    assert!(!service.verify_reassignment(&plan).await.unwrap());
    assert!(service.verify_reassignment(&plan).await.unwrap());
    // Output without the in-progress marker counts as complete.
    assert!(service.verify_reassignment(&plan).await.unwrap());
    assert_eq!(
        service.reassignment_status(&plan).await.unwrap(),
        ReassignmentStatus::Unrecognized
    );

    let uploads: Vec<_> = nodes[0]
        .uploads()
        .into_iter()
        .filter(|(path, _)| path.starts_with("/tmp/") && path.ends_with("_reassign.json"))
        .collect();
    assert_eq!(uploads.len(), 4, "each run uses a fresh plan file");
    let paths: std::collections::HashSet<_> = uploads.iter().map(|(path, _)| path).collect();
    assert_eq!(paths.len(), 4);
    assert!(nodes[0].file(&uploads[0].0).is_none(), "plan files are removed after use");
    let plan_json: serde_json::Value = serde_json::from_str(&uploads[0].1).unwrap();
    assert_eq!(plan_json["partitions"][0]["replicas"], serde_json::json!([2, 3]));
    assert_eq!(nodes[0].commands_containing("rm -f '/tmp/").len(), 4);
}

#[test_log::test(tokio::test)]
async fn test_execute_reassignment() {
    let (service, nodes) = create_test_cluster(2);
    let plan = ReassignmentPlan::new().with_partition("orders", PartitionId(0), [BrokerId(1)]);
    nodes[0].respond("--execute", "Successfully started reassignment of partitions");

    let output = service.execute_reassignment(&plan).await.unwrap();

    assert!(output.contains("Successfully started"));
    let cmd = &nodes[0].commands_containing("kafka-reassign-partitions.sh")[0];
    assert!(cmd.starts_with("/opt/kafka/bin/kafka-reassign-partitions.sh --zookeeper 'zk1:2181'"));
    assert!(cmd.ends_with("--execute"));
}
