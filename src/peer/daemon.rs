//! Compute daemon role: binary-tree job dissemination, simulated
//! execution, and completion aggregation at the tree root.
//!
//! A node at position `p` of the ordered node list parents positions
//! `2p+1` and `2p+2`. The left child is always tried first; the right
//! child is sent the job when the left child's subtree acknowledges. A
//! node acknowledges upward only once its whole subtree has, carrying the
//! count of transmit and ack deliveries confirmed underneath, so the
//! disseminating controller can check the `2 × node_count` threshold
//! without any shared job table.

use crate::error::{MatrixError, Result};
use crate::job::{JobDescriptor, JobId};
use crate::message::{Message, NodeId, Payload};
use crate::peer::{Context, Peer};

/// A compute daemon's own copy of a job it takes part in.
#[derive(Debug, Clone)]
pub struct TrackedJob {
    pub desc: JobDescriptor,
    /// Who sent us the job: the parent in the tree, or the disseminating
    /// controller for the root.
    pub parent: NodeId,
    /// This peer's position in the ordered node list.
    pub pos: usize,
    /// Transmit and ack deliveries confirmed in this subtree so far,
    /// starting with our own transmit receipt and our eventual ack.
    pub acc_weight: u64,
    pub left_acked: bool,
    pub right_sent: bool,
    pub right_acked: bool,
    pub acked_up: bool,
    pub exec_started: u64,
    pub executes_received: u32,
    /// Root only: own simulated execution has finished.
    pub own_done: bool,
    /// Root only: completion signals received from the other nodes.
    pub finished_signals: usize,
    pub done_sent: bool,
}

impl TrackedJob {
    fn new(desc: JobDescriptor, parent: NodeId, pos: usize) -> Self {
        Self {
            desc,
            parent,
            pos,
            acc_weight: 2,
            left_acked: false,
            right_sent: false,
            right_acked: false,
            acked_up: false,
            exec_started: 0,
            executes_received: 0,
            own_done: false,
            finished_signals: 0,
            done_sent: false,
        }
    }

    pub fn left_child(&self) -> Option<NodeId> {
        self.desc.nodes.get(2 * self.pos + 1).copied()
    }

    pub fn right_child(&self) -> Option<NodeId> {
        self.desc.nodes.get(2 * self.pos + 2).copied()
    }

    /// Every child that exists has acknowledged its subtree.
    fn subtree_confirmed(&self) -> bool {
        (self.left_child().is_none() || self.left_acked)
            && (self.right_child().is_none() || self.right_acked)
    }
}

impl Peer {
    /// A job arrived down the tree: keep our own copy, start the left
    /// subtree, or acknowledge immediately if we are a leaf.
    pub(crate) fn on_transmit(
        &mut self,
        src: NodeId,
        desc: JobDescriptor,
        ctx: &mut Context<'_>,
    ) -> Result<()> {
        self.clocks
            .daemon
            .fwd
            .advance(ctx.now, ctx.costs.recv_overhead);
        let job_id = desc.id;
        let pos = desc
            .nodes
            .iter()
            .position(|&n| n == self.id)
            .ok_or(MatrixError::NotInNodeList {
                peer: self.id,
                job: job_id,
            })?;
        tracing::debug!(peer = self.id, job_id = %job_id, pos, "Job received");
        let mut tracked = TrackedJob::new(desc, src, pos);
        match tracked.left_child() {
            Some(left) => {
                let fwd = Box::new(tracked.desc.clone());
                self.tracked.insert(job_id, tracked);
                let t = self
                    .clocks
                    .daemon
                    .fwd
                    .advance(ctx.now, ctx.costs.send_overhead);
                ctx.send(Message::new(self.id, left, Payload::TransmitJob(fwd)), t);
            }
            None => {
                // Leaf: the subtree is just us.
                tracked.acked_up = true;
                let parent = tracked.parent;
                let weight = tracked.acc_weight;
                self.tracked.insert(job_id, tracked);
                let t = self
                    .clocks
                    .daemon
                    .fwd
                    .advance(ctx.now, ctx.costs.send_overhead);
                ctx.send(
                    Message::new(self.id, parent, Payload::TransmitAck { job_id, weight }),
                    t,
                );
            }
        }
        Ok(())
    }

    /// A subtree acknowledgement arrived. Route it to the daemon role if
    /// it comes from one of our tree children, else to the controller
    /// role if we disseminated this job.
    pub(crate) fn on_transmit_ack(
        &mut self,
        src: NodeId,
        job_id: JobId,
        weight: u64,
        ctx: &mut Context<'_>,
    ) -> Result<()> {
        if let Some(t) = self.tracked.get(&job_id) {
            if t.left_child() == Some(src) || t.right_child() == Some(src) {
                return self.on_child_ack(src, job_id, weight, ctx);
            }
        }
        if self.jobs.contains_key(&job_id) {
            return self.on_dissemination_confirmed(job_id, weight, ctx);
        }
        Err(MatrixError::UnknownJob(job_id))
    }

    fn on_child_ack(
        &mut self,
        src: NodeId,
        job_id: JobId,
        weight: u64,
        ctx: &mut Context<'_>,
    ) -> Result<()> {
        self.clocks
            .daemon
            .fwd
            .advance(ctx.now, ctx.costs.recv_overhead);
        let t = self
            .tracked
            .get_mut(&job_id)
            .ok_or(MatrixError::UnknownJob(job_id))?;
        t.acc_weight += weight;
        let from_left = t.left_child() == Some(src);
        if from_left {
            t.left_acked = true;
        } else {
            t.right_acked = true;
        }

        // The left subtree is in; fan out to the right one.
        if from_left && !t.right_sent {
            if let Some(right) = t.right_child() {
                t.right_sent = true;
                let fwd = Box::new(t.desc.clone());
                let time = self
                    .clocks
                    .daemon
                    .fwd
                    .advance(ctx.now, ctx.costs.send_overhead);
                ctx.send(Message::new(self.id, right, Payload::TransmitJob(fwd)), time);
                return Ok(());
            }
        }

        if t.subtree_confirmed() && !t.acked_up {
            t.acked_up = true;
            let parent = t.parent;
            let acc = t.acc_weight;
            let time = self
                .clocks
                .daemon
                .fwd
                .advance(ctx.now, ctx.costs.send_overhead);
            ctx.send(
                Message::new(
                    self.id,
                    parent,
                    Payload::TransmitAck {
                        job_id,
                        weight: acc,
                    },
                ),
                time,
            );
        }
        Ok(())
    }

    /// Simulated execution: advance the daemon processing clock by the
    /// job's duration, then report completion to the tree root (or start
    /// waiting for the others if we are the root).
    pub(crate) fn on_execute(&mut self, job_id: JobId, ctx: &mut Context<'_>) -> Result<()> {
        let t = self
            .tracked
            .get_mut(&job_id)
            .ok_or(MatrixError::UnknownJob(job_id))?;
        t.executes_received += 1;
        if t.exec_started == 0 {
            t.exec_started = ctx.now;
        }
        let duration = t.desc.duration;
        self.clocks.daemon.proc.advance(ctx.now, duration);
        self.clocks.daemon.fwd.raise_to(self.clocks.daemon.proc);
        if t.pos != 0 {
            let root = t.desc.nodes[0];
            let time = self
                .clocks
                .daemon
                .fwd
                .advance(ctx.now, ctx.costs.send_overhead);
            ctx.send(
                Message::new(self.id, root, Payload::OneFinished { job_id }),
                time,
            );
        } else {
            t.own_done = true;
            self.maybe_job_done(job_id, ctx);
        }
        Ok(())
    }

    /// Root only: another node finished its share of the job.
    pub(crate) fn on_one_finished(&mut self, job_id: JobId, ctx: &mut Context<'_>) -> Result<()> {
        self.clocks
            .daemon
            .fwd
            .advance(ctx.now, ctx.costs.recv_overhead);
        let t = self
            .tracked
            .get_mut(&job_id)
            .ok_or(MatrixError::UnknownJob(job_id))?;
        t.finished_signals += 1;
        self.maybe_job_done(job_id, ctx);
        Ok(())
    }

    /// Once the root's own execution and all `node_count - 1` peer
    /// signals are in, report the job done to this daemon's controller.
    fn maybe_job_done(&mut self, job_id: JobId, ctx: &mut Context<'_>) {
        let Some(t) = self.tracked.get_mut(&job_id) else {
            return;
        };
        if t.own_done && !t.done_sent && t.finished_signals + 1 == t.desc.node_count {
            t.done_sent = true;
            tracing::debug!(peer = self.id, job_id = %job_id, "All nodes finished, reporting job done");
            let time = self
                .clocks
                .daemon
                .fwd
                .advance(ctx.now, ctx.costs.send_overhead);
            ctx.send(
                Message::new(self.id, self.ctrl_id, Payload::JobDone { job_id }),
                time,
            );
        }
    }
}
