use serde::{Deserialize, Serialize};

use crate::message::NodeId;
use crate::resource::Resource;

/// Identifies a job: the controller that created it plus a per-controller
/// monotonic sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId {
    pub client: NodeId,
    pub seq: u64,
}

impl JobId {
    pub fn new(client: NodeId, seq: u64) -> Self {
        Self { client, seq }
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}.{}", self.client, self.seq)
    }
}

/// A parsed workload line: what to run and on how many nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub node_count: usize,
    pub working_dir: String,
    pub command: String,
    pub args: Vec<String>,
    /// Simulated execution time in virtual ticks.
    pub duration: u64,
}

/// The wire form of a job: everything a compute daemon needs to take part
/// in dissemination and execution. Passed by value inside messages; a peer
/// receiving one keeps its own copy rather than sharing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: JobId,
    pub origin: NodeId,
    pub node_count: usize,
    /// Allocated nodes in dissemination (numeric) order.
    pub nodes: Vec<NodeId>,
    pub working_dir: String,
    pub command: String,
    pub duration: u64,
}

/// A compare-and-swap attempt in flight: the controller key it targets and
/// the slice of the pool the job will keep if the swap wins.
#[derive(Debug, Clone)]
pub struct StagedAllocation {
    pub key: String,
    pub share: Resource,
}

/// Per-job state tracked by the originating controller.
///
/// Never deleted; a finished job stays in the table so its timestamps can
/// be reported. The contributing-controller list is kept in acquisition
/// order because release unwinds it from the front.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub origin: NodeId,
    pub spec: JobSpec,
    /// Nodes acquired so far; never longer than `spec.node_count`.
    pub allocated: Vec<NodeId>,
    /// (controller resource key, contributed share), acquisition order.
    pub contribs: Vec<(String, Resource)>,
    /// Exhausted-pool lookups since the last fresh attempt.
    pub retries: u32,
    pub staged: Option<StagedAllocation>,
    /// Next entry of `contribs` to persist during the metadata chain.
    pub persist_cursor: usize,
    pub created: u64,
    pub submitted: u64,
    pub finished: u64,
    pub notified: u64,
}

impl Job {
    pub fn new(id: JobId, origin: NodeId, spec: JobSpec, created: u64) -> Self {
        Self {
            id,
            origin,
            spec,
            allocated: Vec::new(),
            contribs: Vec::new(),
            retries: 0,
            staged: None,
            persist_cursor: 0,
            created,
            submitted: 0,
            finished: 0,
            notified: 0,
        }
    }

    pub fn required(&self) -> usize {
        self.spec.node_count
    }

    pub fn remaining(&self) -> usize {
        self.spec.node_count.saturating_sub(self.allocated.len())
    }

    pub fn fully_allocated(&self) -> bool {
        self.allocated.len() >= self.spec.node_count
    }

    /// Fold a won share into the job: merge into the existing entry for
    /// this controller key, or append a new one, and extend the node list.
    pub fn absorb_share(&mut self, key: String, share: Resource) {
        self.allocated.extend_from_slice(&share.nodes);
        match self.contribs.iter_mut().find(|(k, _)| *k == key) {
            Some((_, held)) => held.merge(&share),
            None => self.contribs.push((key, share)),
        }
    }

    /// Descriptor for dissemination, with the node list in numeric order.
    pub fn descriptor(&self) -> JobDescriptor {
        let mut nodes = self.allocated.clone();
        nodes.sort_unstable();
        JobDescriptor {
            id: self.id,
            origin: self.origin,
            node_count: self.spec.node_count,
            nodes,
            working_dir: self.spec.working_dir.clone(),
            command: self.spec.command.clone(),
            duration: self.spec.duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(n: usize) -> JobSpec {
        JobSpec {
            name: "sleep".to_string(),
            node_count: n,
            working_dir: "/tmp".to_string(),
            command: "sleep".to_string(),
            args: vec!["1".to_string()],
            duration: 1_000,
        }
    }

    #[test]
    fn test_job_id_display() {
        assert_eq!(JobId::new(4, 2).to_string(), "n4.2");
    }

    #[test]
    fn test_absorb_share_appends_then_merges() {
        let mut job = Job::new(JobId::new(0, 0), 0, spec(4), 0);
        job.absorb_share("node-0".to_string(), Resource::new(vec![1, 2]));
        job.absorb_share("node-4".to_string(), Resource::new(vec![5]));
        job.absorb_share("node-0".to_string(), Resource::new(vec![3]));

        assert_eq!(job.allocated, vec![1, 2, 5, 3]);
        assert_eq!(job.contribs.len(), 2);
        assert_eq!(job.contribs[0].0, "node-0");
        assert_eq!(job.contribs[0].1.nodes, vec![1, 2, 3]);
        assert_eq!(job.contribs[1].1.nodes, vec![5]);
        assert!(job.fully_allocated());
    }

    #[test]
    fn test_descriptor_orders_nodes() {
        let mut job = Job::new(JobId::new(0, 0), 0, spec(3), 0);
        job.absorb_share("node-4".to_string(), Resource::new(vec![6, 4]));
        job.absorb_share("node-0".to_string(), Resource::new(vec![1]));
        let desc = job.descriptor();
        assert_eq!(desc.nodes, vec![1, 4, 6]);
        // The job's own view keeps acquisition order.
        assert_eq!(job.allocated, vec![6, 4, 1]);
    }

    #[test]
    fn test_remaining() {
        let mut job = Job::new(JobId::new(0, 0), 0, spec(3), 0);
        assert_eq!(job.remaining(), 3);
        job.absorb_share("node-0".to_string(), Resource::new(vec![1, 2]));
        assert_eq!(job.remaining(), 1);
    }
}
