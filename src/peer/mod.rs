//! The protocol engine: one [`Peer`] plays controller, key-value shard,
//! and compute daemon at once, processing one delivered message at a time.
//!
//! Handlers never block: long-latency steps (execution, callback polling,
//! allocation cooldowns) become future scheduled messages pushed into the
//! [`Context`] outbox, so a peer stays responsive while jobs are mid-flight.

pub mod controller;
pub mod daemon;
pub mod shard;

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;

use crate::clock::PeerClocks;
use crate::config::{ClusterConfig, CommCosts, PeerSettings};
use crate::job::{Job, JobId, JobSpec};
use crate::kvs::{keys, KvRequest, ShardStore};
use crate::message::{Message, NodeId, Payload};
use crate::resource::Resource;
use crate::stats::ClusterStats;

pub use daemon::TrackedJob;

/// Per-delivery handler context: the current virtual time, the cost model,
/// a deterministic RNG, and the outbox of messages to schedule.
pub struct Context<'a> {
    pub now: u64,
    pub costs: CommCosts,
    pub rng: &'a mut StdRng,
    /// (absolute delivery time, message) pairs produced by the handler.
    pub out: Vec<(u64, Message)>,
}

impl<'a> Context<'a> {
    pub fn new(now: u64, costs: CommCosts, rng: &'a mut StdRng) -> Self {
        Self {
            now,
            costs,
            rng,
            out: Vec::new(),
        }
    }

    /// Send `msg` at `send_time` (a role clock reading); delivery happens
    /// after the size-dependent wire cost on top of that.
    pub fn send(&mut self, msg: Message, send_time: u64) {
        let at = send_time + self.costs.comm_overhead(msg.wire_len());
        self.out.push((at, msg));
    }

    /// Deliver `msg` after a plain delay, with no wire cost. Used for
    /// self-scheduled wake-ups and shard-local callback re-checks.
    pub fn wake(&mut self, delay: u64, msg: Message) {
        self.out.push((self.now + delay, msg));
    }
}

/// One cluster member. Owns its shard of the key-value store, the jobs it
/// originated, and its copies of jobs it executes; everything else it
/// learns through messages.
pub struct Peer {
    pub id: NodeId,
    /// The controller this peer registers with at bootstrap.
    pub ctrl_id: NodeId,
    pub(crate) config: ClusterConfig,
    pub(crate) settings: PeerSettings,
    pub clocks: PeerClocks,
    pub msg_count: u64,
    pub(crate) stats: Arc<ClusterStats>,

    // Controller role.
    pub(crate) registrations: u64,
    pub(crate) pool: Resource,
    pub(crate) workload: Vec<JobSpec>,
    pub(crate) next_job: usize,
    pub jobs_finished: u64,
    pub jobs: HashMap<JobId, Job>,
    pub(crate) controller_keys: Vec<String>,

    // Compute daemon role.
    pub tracked: HashMap<JobId, TrackedJob>,

    // Key-value shard role.
    pub store: ShardStore,
}

impl Peer {
    pub fn new(
        id: NodeId,
        config: ClusterConfig,
        settings: PeerSettings,
        stats: Arc<ClusterStats>,
    ) -> Self {
        let controller_keys = config.controllers().map(keys::resource_key).collect();
        Self {
            id,
            ctrl_id: config.ctrl_of(id),
            config,
            settings,
            clocks: PeerClocks::default(),
            msg_count: 0,
            stats,
            registrations: 0,
            pool: Resource::default(),
            workload: Vec::new(),
            next_job: 0,
            jobs_finished: 0,
            jobs: HashMap::new(),
            controller_keys,
            tracked: HashMap::new(),
            store: ShardStore::new(),
        }
    }

    /// Append jobs this controller will run once its partition registers.
    pub fn queue_workload(&mut self, specs: impl IntoIterator<Item = JobSpec>) {
        self.workload.extend(specs);
    }

    pub fn workload_len(&self) -> usize {
        self.workload.len()
    }

    /// Bootstrap step: announce this node to its controller.
    pub fn register(&mut self, ctx: &mut Context<'_>) {
        let t = self
            .clocks
            .daemon
            .fwd
            .advance(ctx.now, ctx.costs.send_overhead);
        ctx.send(
            Message::new(self.id, self.ctrl_id, Payload::Registration { node: self.id }),
            t,
        );
    }

    /// Dispatch one delivered message. Failures are reported and the
    /// message dropped; nothing here terminates the peer.
    pub fn handle(&mut self, msg: Message, ctx: &mut Context<'_>) {
        if msg.countable() {
            self.msg_count += 1;
            self.stats.record_message();
        }
        let src = msg.src;
        let result = match msg.payload {
            Payload::Registration { node } => self.on_registration(node, ctx),
            Payload::Kv(req) => {
                self.on_kv_request(src, req, ctx);
                Ok(())
            }
            Payload::KvReturn(resp) => self.on_kv_response(resp, ctx),
            Payload::Reallocation { job_id } => self.on_reallocation(job_id, ctx),
            Payload::TransmitJob(desc) => self.on_transmit(src, *desc, ctx),
            Payload::TransmitAck { job_id, weight } => {
                self.on_transmit_ack(src, job_id, weight, ctx)
            }
            Payload::ExecuteJob { job_id } => self.on_execute(job_id, ctx),
            Payload::OneFinished { job_id } => self.on_one_finished(job_id, ctx),
            Payload::JobDone { job_id } => self.on_job_done(job_id, ctx),
        };
        if let Err(e) = result {
            tracing::warn!(peer = self.id, error = %e, "Message dropped");
        }
    }

    /// Route a key-value request to the shard owning its key, stamped with
    /// the controller role's forwarding clock.
    pub(crate) fn kv_send(&mut self, req: KvRequest, ctx: &mut Context<'_>) {
        let t = self
            .clocks
            .ctrl
            .fwd
            .advance(ctx.now, ctx.costs.send_overhead);
        let dest = keys::shard_for(&req.key, self.config.num_peers);
        ctx.send(Message::new(self.id, dest, Payload::Kv(req)), t);
    }
}
