use crate::error::{MatrixError, Result};
use crate::message::NodeId;

/// Retry and polling knobs for the coordination protocol.
///
/// These mirror the per-peer configuration surface: how long a failed job
/// sleeps before a fresh allocation attempt, how often a key-value shard
/// re-checks a pending callback, and the two bounded-retry limits that keep
/// the protocol from hanging (callback polling and resource allocation).
#[derive(Debug, Clone, Copy)]
pub struct PeerSettings {
    /// Delay before a job whose allocation failed is retried from scratch.
    pub sleep_before_retry: u64,
    /// Interval between shard-side re-checks of a pending callback.
    pub callback_poll_interval: u64,
    /// Number of re-checks a shard performs before failing a callback.
    pub callback_retry_limit: u32,
    /// Number of exhausted-pool lookups a job tolerates before releasing
    /// everything it holds and rescheduling.
    pub allocation_retry_limit: u32,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            sleep_before_retry: 5_000,
            callback_poll_interval: 1_000,
            callback_retry_limit: 1_000,
            allocation_retry_limit: 64,
        }
    }
}

/// Virtual-time cost model for the transport and processing substrate.
///
/// All values are in abstract ticks. The wire cost of a message is its
/// serialized length times `per_byte`, on top of the fixed per-direction
/// send/receive constants charged against the sender's and receiver's
/// role clocks.
#[derive(Debug, Clone, Copy)]
pub struct CommCosts {
    pub send_overhead: u64,
    pub recv_overhead: u64,
    /// Processing cost of one key-value operation on the shard owner.
    pub kvs_proc_time: u64,
    /// Controller-side cost of turning a workload line into a job record.
    pub job_proc_time: u64,
    /// Wire cost per serialized payload byte.
    pub per_byte: u64,
}

impl CommCosts {
    /// Wire cost for a message of `len` serialized bytes.
    pub fn comm_overhead(&self, len: usize) -> u64 {
        len as u64 * self.per_byte
    }
}

impl Default for CommCosts {
    fn default() -> Self {
        Self {
            send_overhead: 100,
            recv_overhead: 100,
            kvs_proc_time: 50,
            job_proc_time: 100,
            per_byte: 1,
        }
    }
}

/// Static cluster topology known to every peer.
///
/// Peers are numbered `0..num_peers`. Every `partition_size`-th peer is a
/// controller; the peers of a partition (the controller included) register
/// with their controller at bootstrap, so each controller seeds one resource
/// pool of `partition_size` node identifiers.
#[derive(Debug, Clone, Copy)]
pub struct ClusterConfig {
    pub num_peers: u64,
    pub partition_size: u64,
}

impl ClusterConfig {
    /// A topology is valid when the peer count is a positive multiple of
    /// the partition size.
    pub fn new(num_peers: u64, partition_size: u64) -> Result<Self> {
        if num_peers == 0 || partition_size == 0 || num_peers % partition_size != 0 {
            return Err(MatrixError::InvalidTopology {
                num_peers,
                partition_size,
            });
        }
        Ok(Self {
            num_peers,
            partition_size,
        })
    }

    /// The controller responsible for a given peer.
    pub fn ctrl_of(&self, peer: NodeId) -> NodeId {
        peer / self.partition_size * self.partition_size
    }

    pub fn is_controller(&self, peer: NodeId) -> bool {
        peer % self.partition_size == 0
    }

    pub fn controllers(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.num_peers).step_by(self.partition_size as usize)
    }
}
