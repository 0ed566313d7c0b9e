//! The partitioned key-value store: request/response types, key routing,
//! and the per-peer shard.
//!
//! Every peer owns exactly one shard; the shard for a key is picked by
//! hashing the key over the number of peers. Contention between
//! controllers racing for the same resource record is expressed entirely
//! through compare-and-swap, never through shared memory.

pub mod keys;
pub mod store;

use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::message::NodeId;
use crate::resource::Resource;

pub use store::ShardStore;

/// Why a job's held resources are being returned to their shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseReason {
    /// Allocation gave up; the job will be rescheduled after a cooldown.
    AllocationFailed,
    /// The job ran to completion.
    Completed,
}

/// The four shard operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvOp {
    Insert,
    Lookup,
    CompareAndSwap,
    Callback,
}

/// What the requester is doing; routes the eventual response to the right
/// protocol step on the requester side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvPurpose {
    /// Seed a freshly registered partition's resource pool.
    SeedResource,
    /// Fetch a resource record ahead of an allocation attempt.
    LookupResource,
    /// Compare-and-swap claiming part of a resource record.
    AllocateResource,
    /// Lookup or compare-and-swap returning a held share to its shard.
    ReleaseResource(ReleaseReason),
    /// The job-id to origin-controller mapping.
    JobOriginCtrl,
    /// The ordered contributing-controller list of a job.
    JobCtrls,
    /// One contributing controller's resource share of a job.
    JobShare,
    /// Insert of the completion marker for a remote origin controller.
    NotifyFinished,
    /// Callback-wait for the completion marker.
    AwaitNotification,
}

/// Values a shard can hold. Closed set so responses are matched
/// exhaustively instead of downcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KvValue {
    Resource(Resource),
    Controller(NodeId),
    Controllers(Vec<String>),
    /// Completion marker observed by callback-wait.
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvRequest {
    pub key: String,
    /// Insert: the value to store. Compare-and-swap: the expected value.
    pub value: Option<KvValue>,
    /// Compare-and-swap: the replacement stored on a match.
    pub attempt: Option<KvValue>,
    /// Correlates the response with a job on the requester side.
    pub job_id: Option<JobId>,
    pub op: KvOp,
    pub purpose: KvPurpose,
    /// Set only on shard-local callback re-checks; those skip message
    /// accounting and receive-cost bookkeeping.
    pub recheck: bool,
}

impl KvRequest {
    pub fn insert(key: String, value: KvValue, job_id: Option<JobId>, purpose: KvPurpose) -> Self {
        Self {
            key,
            value: Some(value),
            attempt: None,
            job_id,
            op: KvOp::Insert,
            purpose,
            recheck: false,
        }
    }

    pub fn lookup(key: String, job_id: Option<JobId>, purpose: KvPurpose) -> Self {
        Self {
            key,
            value: None,
            attempt: None,
            job_id,
            op: KvOp::Lookup,
            purpose,
            recheck: false,
        }
    }

    pub fn compare_and_swap(
        key: String,
        expected: Option<KvValue>,
        attempt: KvValue,
        job_id: Option<JobId>,
        purpose: KvPurpose,
    ) -> Self {
        Self {
            key,
            value: expected,
            attempt: Some(attempt),
            job_id,
            op: KvOp::CompareAndSwap,
            purpose,
            recheck: false,
        }
    }

    pub fn callback(key: String, job_id: Option<JobId>, purpose: KvPurpose) -> Self {
        Self {
            key,
            value: None,
            attempt: None,
            job_id,
            op: KvOp::Callback,
            purpose,
            recheck: false,
        }
    }
}

/// Shard reply. `ok` is authoritative: inserts and lookups always succeed,
/// compare-and-swap succeeds iff the observed value matched, callback
/// succeeds iff the completion marker was observed before the retry budget
/// ran out. On a failed compare-and-swap `value` carries the observed
/// current value so the caller can retry against fresh data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvResponse {
    pub key: String,
    pub job_id: Option<JobId>,
    pub op: KvOp,
    pub purpose: KvPurpose,
    pub value: Option<KvValue>,
    pub ok: bool,
}
