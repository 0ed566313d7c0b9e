//! End-to-end allocation behavior inside a single partition: jobs claim
//! slots from the pooled resource record by compare-and-swap and give
//! every slot back when they finish.

use matrix_lite::config::{ClusterConfig, CommCosts, PeerSettings};
use matrix_lite::job::JobSpec;
use matrix_lite::kvs::{keys, KvValue};
use matrix_lite::sim::Cluster;

fn spec(name: &str, node_count: usize, duration: u64) -> JobSpec {
    JobSpec {
        name: name.to_string(),
        node_count,
        working_dir: "/tmp".to_string(),
        command: "/bin/sleep".to_string(),
        args: vec![duration.to_string()],
        duration,
    }
}

fn pool_size(cluster: &Cluster, ctrl: u64, num_peers: u64) -> usize {
    let key = keys::resource_key(ctrl);
    let shard = keys::shard_for(&key, num_peers);
    match cluster.peer(shard).store.lookup(&key) {
        Some(KvValue::Resource(r)) => r.available(),
        other => panic!("missing pool record for controller {ctrl}: {other:?}"),
    }
}

#[test]
fn test_single_job_runs_and_returns_all_slots() {
    let mut cluster = Cluster::new(
        ClusterConfig::new(4, 4).unwrap(),
        PeerSettings::default(),
        CommCosts::default(),
        42,
    );
    cluster.assign_workload(vec![spec("three-wide", 3, 1_000)]);
    cluster.bootstrap();
    cluster.run_to_completion(100_000);

    assert!(cluster.stats().all_finished());
    assert_eq!(cluster.peer(0).jobs_finished, 1);
    let job = cluster
        .peer(0)
        .jobs
        .values()
        .next()
        .expect("job record kept after completion");
    assert!(job.submitted > 0);
    assert!(job.finished > job.submitted);
    assert!(job.allocated.is_empty(), "slots must be given back");
    assert!(job.contribs.is_empty(), "release walk must run to the end");
    assert_eq!(pool_size(&cluster, 0, 4), 4);
}

#[test]
fn test_sequential_jobs_reuse_the_pool() {
    let mut cluster = Cluster::new(
        ClusterConfig::new(4, 4).unwrap(),
        PeerSettings::default(),
        CommCosts::default(),
        7,
    );
    cluster.assign_workload(vec![
        spec("a", 2, 500),
        spec("b", 4, 500),
        spec("c", 2, 500),
    ]);
    cluster.bootstrap();
    cluster.run_to_completion(500_000);

    assert!(cluster.stats().all_finished());
    assert_eq!(cluster.peer(0).jobs_finished, 3);
    assert_eq!(cluster.stats().lost_notifications(), 0);
    assert_eq!(pool_size(&cluster, 0, 4), 4);
}

#[test]
fn test_impossible_job_releases_and_waits_for_reschedule() {
    // Two peers total but the job wants three: allocation retries until
    // the budget runs out, releases what it grabbed, and parks behind a
    // cooldown far beyond the test horizon.
    let settings = PeerSettings {
        allocation_retry_limit: 3,
        sleep_before_retry: 1_000_000_000,
        ..PeerSettings::default()
    };
    let mut cluster = Cluster::new(
        ClusterConfig::new(2, 2).unwrap(),
        settings,
        CommCosts::default(),
        42,
    );
    cluster.assign_workload(vec![spec("too-big", 3, 1_000)]);
    cluster.bootstrap();
    cluster.run_until_time(10_000_000);

    assert_eq!(cluster.stats().jobs_finished(), 0);
    let job = cluster
        .peer(0)
        .jobs
        .values()
        .next()
        .expect("job record exists");
    assert!(job.allocated.is_empty(), "partial grab must be released");
    assert!(job.contribs.is_empty());
    // Both slots are back in the pool while the job waits.
    assert_eq!(pool_size(&cluster, 0, 2), 2);
}
