use serde::{Deserialize, Serialize};

use crate::job::{JobDescriptor, JobId};
use crate::kvs::{KvRequest, KvResponse};

/// Peer identifier. Peers are numbered densely from zero.
pub type NodeId = u64;

/// Everything a peer can receive, one variant per message kind with a
/// typed payload. Dispatch is an exhaustive match, so a new kind cannot
/// be forgotten anywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    /// A compute daemon announcing itself to its controller at bootstrap.
    Registration { node: NodeId },
    /// A key-value operation bound for the receiving peer's shard.
    Kv(KvRequest),
    /// A shard's reply to an earlier key-value request.
    KvReturn(KvResponse),
    /// Self-scheduled wake-up retrying a job's allocation from scratch.
    Reallocation { job_id: JobId },
    /// Job dissemination down the binary tree.
    TransmitJob(Box<JobDescriptor>),
    /// Subtree acknowledgement travelling back up the tree. `weight`
    /// counts the transmit and ack deliveries confirmed underneath.
    TransmitAck { job_id: JobId, weight: u64 },
    /// Instruction to start executing a disseminated job.
    ExecuteJob { job_id: JobId },
    /// A non-root daemon reporting completion to the tree root.
    OneFinished { job_id: JobId },
    /// The tree root reporting whole-job completion to its controller.
    JobDone { job_id: JobId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub src: NodeId,
    pub dest: NodeId,
    pub payload: Payload,
}

impl Message {
    pub fn new(src: NodeId, dest: NodeId, payload: Payload) -> Self {
        Self { src, dest, payload }
    }

    /// Whether this delivery counts towards message statistics.
    /// Wake-ups, execute fan-out, and shard-local callback re-checks are
    /// bookkeeping, not protocol traffic.
    pub fn countable(&self) -> bool {
        match &self.payload {
            Payload::Reallocation { .. } | Payload::ExecuteJob { .. } => false,
            Payload::Kv(req) => !req.recheck,
            _ => true,
        }
    }

    /// Serialized payload size, used for the wire-cost term of delivery
    /// latency.
    pub fn wire_len(&self) -> usize {
        serde_json::to_vec(self).map(|b| b.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvs::{KvPurpose, KvValue};

    #[test]
    fn test_countable_classification() {
        let reg = Message::new(1, 0, Payload::Registration { node: 1 });
        assert!(reg.countable());

        let wake = Message::new(
            0,
            0,
            Payload::Reallocation {
                job_id: JobId::new(0, 0),
            },
        );
        assert!(!wake.countable());

        let exec = Message::new(
            0,
            1,
            Payload::ExecuteJob {
                job_id: JobId::new(0, 0),
            },
        );
        assert!(!exec.countable());

        let mut req = KvRequest::insert(
            "node-0".to_string(),
            KvValue::Controller(0),
            None,
            KvPurpose::SeedResource,
        );
        assert!(Message::new(0, 2, Payload::Kv(req.clone())).countable());
        req.recheck = true;
        assert!(!Message::new(2, 2, Payload::Kv(req)).countable());
    }

    #[test]
    fn test_wire_len_grows_with_payload() {
        let small = Message::new(0, 1, Payload::Registration { node: 1 });
        let big = Message::new(
            0,
            1,
            Payload::Kv(KvRequest::insert(
                "a-rather-long-key-name".to_string(),
                KvValue::Controllers(vec!["node-0".to_string(), "node-4".to_string()]),
                Some(JobId::new(0, 0)),
                KvPurpose::JobCtrls,
            )),
        );
        assert!(small.wire_len() > 0);
        assert!(big.wire_len() > small.wire_len());
    }
}
