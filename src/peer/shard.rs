//! Key-value shard role: executes store operations for remote requesters
//! and drives the bounded-retry callback-wait polling loop.

use crate::kvs::store::CallbackOutcome;
use crate::kvs::{KvOp, KvRequest, KvResponse, KvValue};
use crate::message::{Message, NodeId, Payload};
use crate::peer::{Context, Peer};

impl Peer {
    /// Execute one request against this peer's shard and reply to the
    /// requester, except for callback attempts that are still within
    /// their retry budget: those re-schedule themselves locally instead
    /// of replying.
    pub(crate) fn on_kv_request(&mut self, src: NodeId, req: KvRequest, ctx: &mut Context<'_>) {
        // Re-checks were already accounted for when the original request
        // arrived.
        if !req.recheck {
            self.clocks
                .kvs
                .fwd
                .advance(ctx.now, ctx.costs.recv_overhead);
            self.clocks.kvs.proc.raise_to(self.clocks.kvs.fwd);
            self.clocks
                .kvs
                .proc
                .advance(ctx.now, ctx.costs.kvs_proc_time);
        }

        let (ok, value) = match req.op {
            KvOp::Insert => match req.value.clone() {
                Some(v) => {
                    self.store.insert(req.key.clone(), v.clone());
                    (true, Some(v))
                }
                None => {
                    tracing::warn!(peer = self.id, key = %req.key, "Insert without a value");
                    (true, None)
                }
            },
            KvOp::Lookup => (true, self.store.lookup(&req.key).cloned()),
            KvOp::CompareAndSwap => match req.attempt.clone() {
                Some(attempt) => {
                    let (ok, current) =
                        self.store
                            .compare_and_swap(&req.key, req.value.as_ref(), attempt);
                    if !ok {
                        tracing::debug!(peer = self.id, key = %req.key, "Compare-and-swap lost");
                    }
                    (ok, current)
                }
                None => {
                    tracing::warn!(peer = self.id, key = %req.key, "Compare-and-swap without an attempt value");
                    (false, self.store.lookup(&req.key).cloned())
                }
            },
            KvOp::Callback => {
                match self
                    .store
                    .callback_check(&req.key, self.settings.callback_retry_limit)
                {
                    CallbackOutcome::Done => (true, Some(KvValue::Done)),
                    CallbackOutcome::Exhausted => (false, None),
                    CallbackOutcome::Retry => {
                        // Not done yet: re-check locally after the poll
                        // interval, keeping the original requester as the
                        // source so an eventual reply reaches them.
                        let mut again = req;
                        again.recheck = true;
                        ctx.wake(
                            self.settings.callback_poll_interval,
                            Message::new(src, self.id, Payload::Kv(again)),
                        );
                        return;
                    }
                }
            }
        };

        self.clocks.kvs.fwd.raise_to(self.clocks.kvs.proc);
        let t = self
            .clocks
            .kvs
            .fwd
            .advance(ctx.now, ctx.costs.send_overhead);
        let resp = KvResponse {
            key: req.key,
            job_id: req.job_id,
            op: req.op,
            purpose: req.purpose,
            value,
            ok,
        };
        ctx.send(Message::new(self.id, src, Payload::KvReturn(resp)), t);
    }
}
