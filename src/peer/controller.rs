//! Controller role: accumulates daemon registrations into a resource
//! pool, runs the optimistic compare-and-swap allocator, persists job
//! routing metadata, launches dissemination, and unwinds held resources
//! on completion or allocation failure.

use rand::Rng;

use crate::error::{MatrixError, Result};
use crate::job::{Job, JobId, StagedAllocation};
use crate::kvs::{keys, KvOp, KvPurpose, KvRequest, KvResponse, KvValue, ReleaseReason};
use crate::message::{Message, NodeId, Payload};
use crate::peer::{Context, Peer};
use crate::resource::Resource;

fn correlated_job(resp: &KvResponse) -> Result<JobId> {
    resp.job_id.ok_or_else(|| MatrixError::UnexpectedValue {
        key: resp.key.clone(),
    })
}

impl Peer {
    /// A compute daemon announced itself. Once the whole partition has
    /// registered, the pooled slots are inserted into the store under
    /// this controller's key.
    pub(crate) fn on_registration(&mut self, node: NodeId, ctx: &mut Context<'_>) -> Result<()> {
        self.clocks
            .ctrl
            .fwd
            .advance(ctx.now, ctx.costs.recv_overhead);
        self.registrations += 1;
        self.pool.push(node);
        if self.registrations == self.config.partition_size {
            tracing::info!(
                ctrl = self.id,
                slots = self.pool.available(),
                "Partition registered, seeding resource pool"
            );
            let req = KvRequest::insert(
                keys::resource_key(self.id),
                KvValue::Resource(self.pool.clone()),
                None,
                KvPurpose::SeedResource,
            );
            self.kv_send(req, ctx);
        }
        Ok(())
    }

    /// Route a shard reply to the protocol step that was waiting on it.
    /// The success flag is authoritative; a failed compare-and-swap
    /// carries the observed current value for the retry.
    pub(crate) fn on_kv_response(&mut self, resp: KvResponse, ctx: &mut Context<'_>) -> Result<()> {
        self.clocks
            .ctrl
            .fwd
            .advance(ctx.now, ctx.costs.recv_overhead);
        match (resp.ok, resp.op, resp.purpose) {
            // Allocation: fetched record, or lost swap carrying fresh data.
            (true, KvOp::Lookup, KvPurpose::LookupResource)
            | (false, KvOp::CompareAndSwap, KvPurpose::AllocateResource) => {
                self.try_allocate(resp, ctx)
            }
            (true, KvOp::CompareAndSwap, KvPurpose::AllocateResource) => {
                self.on_allocation_won(resp, ctx)
            }

            // Release walk: fetched record, lost swap, won swap.
            (true, KvOp::Lookup, KvPurpose::ReleaseResource(reason))
            | (false, KvOp::CompareAndSwap, KvPurpose::ReleaseResource(reason)) => {
                self.release_swap(resp, reason, ctx)
            }
            (true, KvOp::CompareAndSwap, KvPurpose::ReleaseResource(reason)) => {
                self.on_release_step_won(resp, reason, ctx)
            }

            // Bootstrap and the job metadata persistence chain.
            (true, KvOp::Insert, KvPurpose::SeedResource) => {
                self.start_next_job(ctx);
                Ok(())
            }
            (true, KvOp::Insert, KvPurpose::JobOriginCtrl) => self.persist_ctrl_list(&resp, ctx),
            (true, KvOp::Insert, KvPurpose::JobCtrls | KvPurpose::JobShare) => {
                self.persist_next_share(&resp, ctx)
            }

            // Completion paths.
            (true, KvOp::Lookup, KvPurpose::JobOriginCtrl) => self.on_origin_resolved(resp, ctx),
            (true, KvOp::Insert, KvPurpose::NotifyFinished) => {
                // The origin controller's pending callback-wait takes it
                // from here.
                Ok(())
            }
            (true, KvOp::Callback, KvPurpose::AwaitNotification) => {
                let job_id = correlated_job(&resp)?;
                tracing::debug!(peer = self.id, job_id = %job_id, "Completion marker observed");
                self.finalize(job_id, ctx)
            }
            (false, KvOp::Callback, KvPurpose::AwaitNotification) => {
                let job_id = correlated_job(&resp)?;
                tracing::warn!(
                    peer = self.id,
                    job_id = %job_id,
                    "Completion notification lost: callback retries exhausted"
                );
                self.stats.record_lost_notification();
                Ok(())
            }

            (ok, op, purpose) => {
                tracing::warn!(
                    peer = self.id,
                    ok,
                    ?op,
                    ?purpose,
                    key = %resp.key,
                    "Unexpected key-value response"
                );
                Ok(())
            }
        }
    }

    /// Begin allocating the next queued workload entry, if any.
    pub(crate) fn start_next_job(&mut self, ctx: &mut Context<'_>) {
        if self.next_job >= self.workload.len() {
            return;
        }
        self.clocks
            .ctrl
            .proc
            .advance(ctx.now, ctx.costs.job_proc_time);
        let seq = self.next_job as u64;
        let spec = self.workload[self.next_job].clone();
        self.next_job += 1;
        let id = JobId::new(self.id, seq);
        tracing::info!(peer = self.id, job_id = %id, nodes = spec.node_count, "Job created");
        self.jobs.insert(id, Job::new(id, self.id, spec, ctx.now));
        self.clocks.ctrl.fwd.raise_to(self.clocks.ctrl.proc);
        self.lookup_resource(keys::resource_key(self.id), id, ctx);
    }

    /// A released job's cooldown expired; retry allocation from scratch,
    /// starting again from this controller's own pool.
    pub(crate) fn on_reallocation(&mut self, job_id: JobId, ctx: &mut Context<'_>) -> Result<()> {
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(MatrixError::UnknownJob(job_id))?;
        job.retries = 0;
        self.clocks.ctrl.fwd.raise_to(self.clocks.ctrl.proc);
        self.lookup_resource(keys::resource_key(self.id), job_id, ctx);
        Ok(())
    }

    fn lookup_resource(&mut self, key: String, job_id: JobId, ctx: &mut Context<'_>) {
        self.kv_send(
            KvRequest::lookup(key, Some(job_id), KvPurpose::LookupResource),
            ctx,
        );
    }

    /// Pick an alternate controller key uniformly at random.
    fn random_lookup(&mut self, job_id: JobId, ctx: &mut Context<'_>) {
        let idx = ctx.rng.gen_range(0..self.controller_keys.len());
        let key = self.controller_keys[idx].clone();
        self.lookup_resource(key, job_id, ctx);
    }

    /// One allocation attempt against an observed resource record: stage
    /// a split and race for it with compare-and-swap, or fall back to an
    /// alternate pool / give up when the record is exhausted.
    fn try_allocate(&mut self, resp: KvResponse, ctx: &mut Context<'_>) -> Result<()> {
        let job_id = correlated_job(&resp)?;
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(MatrixError::UnknownJob(job_id))?;
        job.staged = None;
        let observed = match resp.value {
            Some(KvValue::Resource(r)) => r,
            None => Resource::default(),
            Some(_) => return Err(MatrixError::UnexpectedValue { key: resp.key }),
        };
        let take = job.remaining().min(observed.available());
        if take > 0 {
            let (keep, rest) = observed.split(take);
            job.staged = Some(StagedAllocation {
                key: resp.key.clone(),
                share: keep,
            });
            tracing::debug!(
                peer = self.id,
                job_id = %job_id,
                key = %resp.key,
                take,
                seen = observed.available(),
                "Racing for slots"
            );
            let req = KvRequest::compare_and_swap(
                resp.key,
                Some(KvValue::Resource(observed)),
                KvValue::Resource(rest),
                Some(job_id),
                KvPurpose::AllocateResource,
            );
            self.kv_send(req, ctx);
        } else {
            job.retries += 1;
            if job.retries < self.settings.allocation_retry_limit {
                self.random_lookup(job_id, ctx);
            } else {
                tracing::info!(
                    peer = self.id,
                    job_id = %job_id,
                    held = self.jobs[&job_id].allocated.len(),
                    "Allocation exhausted, releasing partial resources"
                );
                self.release(job_id, ReleaseReason::AllocationFailed, ctx)?;
            }
        }
        Ok(())
    }

    /// A staged split won its swap: fold the share into the job, then
    /// keep allocating or move on to persisting routing metadata.
    fn on_allocation_won(&mut self, resp: KvResponse, ctx: &mut Context<'_>) -> Result<()> {
        let job_id = correlated_job(&resp)?;
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(MatrixError::UnknownJob(job_id))?;
        let StagedAllocation { key, share } = job
            .staged
            .take()
            .ok_or(MatrixError::NoStagedAllocation(job_id))?;
        job.absorb_share(key, share);
        if !job.fully_allocated() {
            self.random_lookup(job_id, ctx);
            return Ok(());
        }
        tracing::info!(
            peer = self.id,
            job_id = %job_id,
            contributors = self.jobs[&job_id].contribs.len(),
            "Job fully allocated"
        );
        // Overlap the next job's allocation with this one's metadata
        // persistence.
        self.start_next_job(ctx);
        let req = KvRequest::insert(
            keys::origin_key(job_id),
            KvValue::Controller(self.id),
            Some(job_id),
            KvPurpose::JobOriginCtrl,
        );
        self.kv_send(req, ctx);
        Ok(())
    }

    /// Second link of the persistence chain: the ordered list of
    /// contributing controller keys.
    fn persist_ctrl_list(&mut self, resp: &KvResponse, ctx: &mut Context<'_>) -> Result<()> {
        let job_id = correlated_job(resp)?;
        let job = self
            .jobs
            .get(&job_id)
            .ok_or(MatrixError::UnknownJob(job_id))?;
        let list: Vec<String> = job.contribs.iter().map(|(k, _)| k.clone()).collect();
        let req = KvRequest::insert(
            keys::ctrls_key(job_id, self.id),
            KvValue::Controllers(list),
            Some(job_id),
            KvPurpose::JobCtrls,
        );
        self.kv_send(req, ctx);
        Ok(())
    }

    /// Remaining links: one insert per contributed share, chained off the
    /// previous insert's response; the last response launches the job.
    fn persist_next_share(&mut self, resp: &KvResponse, ctx: &mut Context<'_>) -> Result<()> {
        let job_id = correlated_job(resp)?;
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(MatrixError::UnknownJob(job_id))?;
        if resp.purpose == KvPurpose::JobShare {
            job.persist_cursor += 1;
        } else {
            job.persist_cursor = 0;
        }
        let cursor = job.persist_cursor;
        if cursor < job.contribs.len() {
            let (ctrl_key, share) = job.contribs[cursor].clone();
            let req = KvRequest::insert(
                keys::share_key(job_id, self.id, &ctrl_key),
                KvValue::Resource(share),
                Some(job_id),
                KvPurpose::JobShare,
            );
            self.kv_send(req, ctx);
        } else {
            self.launch(job_id, ctx)?;
        }
        Ok(())
    }

    /// Start dissemination: send the descriptor to the first node of the
    /// ordered list; the binary tree fans it out from there.
    fn launch(&mut self, job_id: JobId, ctx: &mut Context<'_>) -> Result<()> {
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(MatrixError::UnknownJob(job_id))?;
        job.submitted = ctx.now;
        let desc = job.descriptor();
        let first = desc.nodes[0];
        tracing::info!(
            peer = self.id,
            job_id = %job_id,
            nodes = ?desc.nodes,
            "Launching job down the dissemination tree"
        );
        let t = self
            .clocks
            .ctrl
            .fwd
            .advance(ctx.now, ctx.costs.send_overhead);
        ctx.send(
            Message::new(self.id, first, Payload::TransmitJob(Box::new(desc))),
            t,
        );
        Ok(())
    }

    /// The whole dissemination tree confirmed: instruct every allocated
    /// node to execute. If completion will be reported to a different
    /// controller than this job's origin, start waiting on the completion
    /// marker now.
    pub(crate) fn on_dissemination_confirmed(
        &mut self,
        job_id: JobId,
        weight: u64,
        ctx: &mut Context<'_>,
    ) -> Result<()> {
        self.clocks
            .ctrl
            .fwd
            .advance(ctx.now, ctx.costs.recv_overhead);
        let job = self
            .jobs
            .get(&job_id)
            .ok_or(MatrixError::UnknownJob(job_id))?;
        let expected = 2 * job.required() as u64;
        if weight != expected {
            tracing::warn!(
                peer = self.id,
                job_id = %job_id,
                weight,
                expected,
                "Ack aggregate does not match dissemination threshold"
            );
        }
        let desc = job.descriptor();
        let t = self.clocks.ctrl.fwd.get();
        for &node in &desc.nodes {
            ctx.send(
                Message::new(self.id, node, Payload::ExecuteJob { job_id }),
                t,
            );
        }
        if self.config.ctrl_of(desc.nodes[0]) != self.id {
            // "Job done" will land on the first node's controller, not on
            // this one; poll the store for the completion marker instead.
            let req = KvRequest::callback(
                keys::fin_key(job_id),
                Some(job_id),
                KvPurpose::AwaitNotification,
            );
            let dest = keys::shard_for(&req.key, self.config.num_peers);
            ctx.send(Message::new(self.id, dest, Payload::Kv(req)), t);
        }
        Ok(())
    }

    /// The tree root reported completion; find out which controller
    /// originated the job before finalizing or notifying.
    pub(crate) fn on_job_done(&mut self, job_id: JobId, ctx: &mut Context<'_>) -> Result<()> {
        self.clocks
            .ctrl
            .fwd
            .advance(ctx.now, ctx.costs.recv_overhead);
        self.kv_send(
            KvRequest::lookup(
                keys::origin_key(job_id),
                Some(job_id),
                KvPurpose::JobOriginCtrl,
            ),
            ctx,
        );
        Ok(())
    }

    /// The origin lookup came back: finalize locally, or leave a
    /// completion marker for the real origin's callback-wait.
    fn on_origin_resolved(&mut self, resp: KvResponse, ctx: &mut Context<'_>) -> Result<()> {
        let job_id = correlated_job(&resp)?;
        let origin = match resp.value {
            Some(KvValue::Controller(c)) => c,
            _ => return Err(MatrixError::UnexpectedValue { key: resp.key }),
        };
        if origin == self.id {
            self.finalize(job_id, ctx)
        } else {
            tracing::debug!(
                peer = self.id,
                job_id = %job_id,
                origin,
                "Job originated elsewhere, inserting completion marker"
            );
            let req = KvRequest::insert(
                keys::fin_key(job_id),
                KvValue::Done,
                Some(job_id),
                KvPurpose::NotifyFinished,
            );
            self.kv_send(req, ctx);
            Ok(())
        }
    }

    /// Count the job as done and give back everything it held.
    fn finalize(&mut self, job_id: JobId, ctx: &mut Context<'_>) -> Result<()> {
        let back = self.clocks.ctrl.fwd.get();
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(MatrixError::UnknownJob(job_id))?;
        if job.finished == 0 {
            job.finished = ctx.now;
        }
        job.notified = back;
        self.jobs_finished += 1;
        self.stats.record_job_finished();
        tracing::info!(peer = self.id, job_id = %job_id, "Job finished");
        self.release(job_id, ReleaseReason::Completed, ctx)
    }

    /// Walk the contributing-controller list from the front, returning
    /// each held share via lookup-then-swap. An empty list means release
    /// is complete.
    pub(crate) fn release(
        &mut self,
        job_id: JobId,
        reason: ReleaseReason,
        ctx: &mut Context<'_>,
    ) -> Result<()> {
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(MatrixError::UnknownJob(job_id))?;
        match job.contribs.first() {
            Some((key, _)) => {
                let key = key.clone();
                self.kv_send(
                    KvRequest::lookup(key, Some(job_id), KvPurpose::ReleaseResource(reason)),
                    ctx,
                );
            }
            None => {
                job.allocated.clear();
                match reason {
                    ReleaseReason::AllocationFailed => {
                        tracing::info!(
                            peer = self.id,
                            job_id = %job_id,
                            delay = self.settings.sleep_before_retry,
                            "Rescheduling job after cooldown"
                        );
                        ctx.wake(
                            self.settings.sleep_before_retry,
                            Message::new(self.id, self.id, Payload::Reallocation { job_id }),
                        );
                    }
                    ReleaseReason::Completed => self.report(),
                }
            }
        }
        Ok(())
    }

    /// Merge the front share back into the observed record and race for
    /// the swap. A lost swap comes back here with the fresh value.
    fn release_swap(
        &mut self,
        resp: KvResponse,
        reason: ReleaseReason,
        ctx: &mut Context<'_>,
    ) -> Result<()> {
        let job_id = correlated_job(&resp)?;
        let job = self
            .jobs
            .get(&job_id)
            .ok_or(MatrixError::UnknownJob(job_id))?;
        let observed = match resp.value {
            Some(KvValue::Resource(r)) => Some(r),
            None => None,
            Some(_) => return Err(MatrixError::UnexpectedValue { key: resp.key }),
        };
        let (_, share) = job
            .contribs
            .first()
            .ok_or(MatrixError::UnknownJob(job_id))?;
        let mut merged = observed.clone().unwrap_or_default();
        merged.merge(share);
        let req = KvRequest::compare_and_swap(
            resp.key,
            observed.map(KvValue::Resource),
            KvValue::Resource(merged),
            Some(job_id),
            KvPurpose::ReleaseResource(reason),
        );
        self.kv_send(req, ctx);
        Ok(())
    }

    /// One share went home: pop it and continue down the list.
    fn on_release_step_won(
        &mut self,
        resp: KvResponse,
        reason: ReleaseReason,
        ctx: &mut Context<'_>,
    ) -> Result<()> {
        let job_id = correlated_job(&resp)?;
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(MatrixError::UnknownJob(job_id))?;
        if !job.contribs.is_empty() {
            job.contribs.remove(0);
        }
        self.release(job_id, reason, ctx)
    }

    /// End-of-workload throughput reporting from the controller-role
    /// forwarding high-water mark.
    fn report(&self) {
        if !self.workload.is_empty() && self.jobs_finished as usize == self.workload.len() {
            let elapsed = self.clocks.ctrl.fwd.get().max(1);
            tracing::info!(
                peer = self.id,
                jobs = self.jobs_finished,
                elapsed,
                throughput = self.jobs_finished as f64 / elapsed as f64 * 1e6,
                "Controller workload complete"
            );
        }
        if self.stats.all_finished() {
            let elapsed = self.clocks.ctrl.fwd.get().max(1);
            tracing::info!(
                jobs = self.stats.jobs_finished(),
                messages = self.stats.messages(),
                elapsed,
                throughput = self.stats.jobs_finished() as f64 / elapsed as f64 * 1e6,
                "All jobs complete"
            );
        }
    }
}
