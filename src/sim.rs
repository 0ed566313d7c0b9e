//! Discrete-event simulation driver.
//!
//! The cluster owns every peer and a single virtual-time event queue.
//! Delivering a message runs exactly one handler; everything the handler
//! wants to say becomes future events. Ties on delivery time break by
//! insertion order, so a given seed always replays the same history.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{ClusterConfig, CommCosts, PeerSettings};
use crate::job::JobSpec;
use crate::message::Message;
use crate::peer::{Context, Peer};
use crate::stats::ClusterStats;

#[derive(Debug)]
struct Event {
    at: u64,
    seq: u64,
    msg: Message,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Event {}

impl Ord for Event {
    // BinaryHeap is a max-heap; invert so the earliest event pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The whole simulated cluster.
pub struct Cluster {
    config: ClusterConfig,
    costs: CommCosts,
    peers: Vec<Peer>,
    rng: StdRng,
    queue: BinaryHeap<Event>,
    next_seq: u64,
    stats: Arc<ClusterStats>,
    events_processed: u64,
    now: u64,
}

impl Cluster {
    pub fn new(config: ClusterConfig, settings: PeerSettings, costs: CommCosts, seed: u64) -> Self {
        let stats = Arc::new(ClusterStats::new());
        let peers = (0..config.num_peers)
            .map(|id| Peer::new(id, config, settings, Arc::clone(&stats)))
            .collect();
        Self {
            config,
            costs,
            peers,
            rng: StdRng::seed_from_u64(seed),
            queue: BinaryHeap::new(),
            next_seq: 0,
            stats,
            events_processed: 0,
            now: 0,
        }
    }

    pub fn stats(&self) -> &ClusterStats {
        &self.stats
    }

    pub fn peer(&self, id: u64) -> &Peer {
        &self.peers[id as usize]
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    /// Spread a workload round-robin over the controllers. Each job is
    /// counted towards the cluster total up front so the final report can
    /// tell when everything has drained.
    pub fn assign_workload(&mut self, specs: Vec<JobSpec>) {
        let controllers: Vec<u64> = self.config.controllers().collect();
        let mut buckets: Vec<Vec<JobSpec>> = vec![Vec::new(); controllers.len()];
        self.stats.add_jobs(specs.len() as u64);
        for (i, spec) in specs.into_iter().enumerate() {
            buckets[i % controllers.len()].push(spec);
        }
        for (ctrl, bucket) in controllers.into_iter().zip(buckets) {
            self.peers[ctrl as usize].queue_workload(bucket);
        }
    }

    /// Enqueue one message for delivery at an absolute virtual time.
    pub fn inject(&mut self, at: u64, msg: Message) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Event { at, seq, msg });
    }

    /// Have every peer register with its controller. Controllers start
    /// their workloads on their own once the partition's resource pool is
    /// seeded, so this is the only external kick the cluster needs.
    pub fn bootstrap(&mut self) {
        tracing::info!(
            peers = self.config.num_peers,
            partition_size = self.config.partition_size,
            "Bootstrapping cluster"
        );
        for id in 0..self.config.num_peers {
            let mut ctx = Context::new(0, self.costs, &mut self.rng);
            self.peers[id as usize].register(&mut ctx);
            for (at, msg) in ctx.out {
                self.inject(at, msg);
            }
        }
    }

    /// Deliver the next event. Returns false when the queue is empty.
    pub fn step(&mut self) -> bool {
        let Some(event) = self.queue.pop() else {
            return false;
        };
        self.now = event.at;
        self.events_processed += 1;
        let dest = event.msg.dest as usize;
        let mut ctx = Context::new(event.at, self.costs, &mut self.rng);
        self.peers[dest].handle(event.msg, &mut ctx);
        for (at, msg) in ctx.out {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.queue.push(Event { at, seq, msg });
        }
        true
    }

    /// Run until the queue drains or `max_events` deliveries happen.
    /// Returns the number of events delivered.
    pub fn run(&mut self, max_events: u64) -> u64 {
        let mut delivered = 0;
        while delivered < max_events && self.step() {
            delivered += 1;
        }
        delivered
    }

    /// Run while the next event is at or before `deadline`. Later events
    /// stay queued.
    pub fn run_until_time(&mut self, deadline: u64) -> u64 {
        let mut delivered = 0;
        while let Some(event) = self.queue.peek() {
            if event.at > deadline {
                break;
            }
            self.step();
            delivered += 1;
        }
        delivered
    }

    /// Drive the cluster until every queued job has finished and its
    /// trailing traffic has drained, or the event budget runs out.
    pub fn run_to_completion(&mut self, max_events: u64) -> u64 {
        let mut delivered = 0;
        // A job is counted finished before its release walk completes, so
        // the stop condition is the queue itself draining, not the
        // finished-job count.
        while delivered < max_events && self.step() {
            delivered += 1;
        }
        if !self.stats.all_finished() {
            tracing::warn!(
                finished = self.stats.jobs_finished(),
                total = self.stats.jobs_total(),
                "Run ended with jobs outstanding"
            );
        }
        delivered
    }

    /// Final summary over all peers.
    pub fn report(&self) {
        let finished = self.stats.jobs_finished();
        let total = self.stats.jobs_total();
        let messages = self.stats.messages();
        let lost = self.stats.lost_notifications();
        tracing::info!(
            finished,
            total,
            messages,
            lost_notifications = lost,
            events = self.events_processed,
            virtual_time_us = self.now,
            "Simulation finished"
        );
        for ctrl in self.config.controllers() {
            let peer = &self.peers[ctrl as usize];
            let elapsed = peer.clocks.ctrl.fwd.get();
            if peer.jobs_finished > 0 && elapsed > 0 {
                tracing::info!(
                    controller = ctrl,
                    jobs = peer.jobs_finished,
                    throughput = peer.jobs_finished as f64 / elapsed as f64 * 1e6,
                    "Controller throughput (jobs/s)"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_cluster() -> Cluster {
        Cluster::new(
            ClusterConfig::new(4, 4).unwrap(),
            PeerSettings::default(),
            CommCosts::default(),
            42,
        )
    }

    #[test]
    fn test_events_pop_in_time_order() {
        let mut heap = BinaryHeap::new();
        heap.push(Event {
            at: 300,
            seq: 0,
            msg: Message::new(0, 1, crate::message::Payload::Registration { node: 0 }),
        });
        heap.push(Event {
            at: 100,
            seq: 1,
            msg: Message::new(0, 1, crate::message::Payload::Registration { node: 0 }),
        });
        heap.push(Event {
            at: 100,
            seq: 2,
            msg: Message::new(0, 1, crate::message::Payload::Registration { node: 0 }),
        });
        let first = heap.pop().unwrap();
        let second = heap.pop().unwrap();
        let third = heap.pop().unwrap();
        assert_eq!((first.at, first.seq), (100, 1));
        assert_eq!((second.at, second.seq), (100, 2));
        assert_eq!(third.at, 300);
    }

    #[test]
    fn test_bootstrap_seeds_resource_pool() {
        let mut cluster = tiny_cluster();
        cluster.bootstrap();
        // Registrations, the pool insert, and its reply all drain with no
        // workload queued.
        let delivered = cluster.run(1_000);
        assert!(delivered >= 5);
        assert!(!cluster.step());
        let shard = keys_shard(&cluster);
        assert!(cluster.peer(shard).store.lookup("node-0").is_some());
    }

    fn keys_shard(cluster: &Cluster) -> u64 {
        crate::kvs::keys::shard_for("node-0", cluster.config.num_peers)
    }

    #[test]
    fn test_run_to_completion_drains_trailing_release_traffic() {
        let mut cluster = tiny_cluster();
        cluster.assign_workload(vec![crate::job::JobSpec {
            name: "one".to_string(),
            node_count: 2,
            working_dir: "/tmp".to_string(),
            command: "/bin/true".to_string(),
            args: Vec::new(),
            duration: 500,
        }]);
        cluster.bootstrap();
        cluster.run_to_completion(100_000);
        assert!(cluster.stats.all_finished());
        // The last job is counted finished while its release walk is
        // still in flight; the run must deliver that tail too.
        assert!(cluster.queue.is_empty());
        let job = cluster.peer(0).jobs.values().next().expect("job record");
        assert!(job.contribs.is_empty());
    }

    #[test]
    fn test_run_until_time_leaves_later_events_queued() {
        let mut cluster = tiny_cluster();
        cluster.inject(
            50,
            Message::new(0, 1, crate::message::Payload::Registration { node: 0 }),
        );
        cluster.inject(
            5_000,
            Message::new(0, 1, crate::message::Payload::Registration { node: 1 }),
        );
        assert_eq!(cluster.run_until_time(100), 1);
        assert_eq!(cluster.run(10), 1);
    }
}
