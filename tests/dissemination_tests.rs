//! Binary-tree job dissemination: the descriptor reaches every allocated
//! node exactly once, acknowledgements aggregate back to the controller,
//! and every node executes exactly once.

use matrix_lite::config::{ClusterConfig, CommCosts, PeerSettings};
use matrix_lite::job::{JobId, JobSpec};
use matrix_lite::sim::Cluster;

fn spec(node_count: usize) -> JobSpec {
    JobSpec {
        name: "tree".to_string(),
        node_count,
        working_dir: "/tmp".to_string(),
        command: "/bin/true".to_string(),
        args: Vec::new(),
        duration: 2_000,
    }
}

#[test]
fn test_seven_node_tree_reaches_everyone_once() {
    let mut cluster = Cluster::new(
        ClusterConfig::new(8, 8).unwrap(),
        PeerSettings::default(),
        CommCosts::default(),
        42,
    );
    cluster.assign_workload(vec![spec(7)]);
    cluster.bootstrap();
    cluster.run_to_completion(200_000);

    assert!(cluster.stats().all_finished());
    let job_id = JobId::new(0, 0);
    // Registration order is the peer order, so the job lands on peers 0-6.
    for peer in 0..7u64 {
        let tracked = cluster
            .peer(peer)
            .tracked
            .get(&job_id)
            .unwrap_or_else(|| panic!("peer {peer} never saw the job"));
        assert_eq!(
            tracked.executes_received, 1,
            "peer {peer} must execute exactly once"
        );
        assert!(tracked.acked_up);
    }
    assert!(cluster.peer(7).tracked.is_empty());

    // The root saw the whole subtree: one transmit and one ack per node.
    let root = cluster.peer(0).tracked.get(&job_id).expect("root entry");
    assert_eq!(root.pos, 0);
    assert_eq!(root.acc_weight, 14);
    assert!(root.done_sent);
}

#[test]
fn test_single_node_job_short_circuits_the_tree() {
    let mut cluster = Cluster::new(
        ClusterConfig::new(4, 4).unwrap(),
        PeerSettings::default(),
        CommCosts::default(),
        42,
    );
    cluster.assign_workload(vec![spec(1)]);
    cluster.bootstrap();
    cluster.run_to_completion(100_000);

    assert!(cluster.stats().all_finished());
    let job_id = JobId::new(0, 0);
    let only = cluster
        .peer(0)
        .tracked
        .get(&job_id)
        .expect("the single node tracks the job");
    assert_eq!(only.acc_weight, 2);
    assert_eq!(only.executes_received, 1);
    assert!(only.done_sent);
}
