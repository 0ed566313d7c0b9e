use thiserror::Error;

use crate::job::JobId;

#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("{num_peers} peers cannot be partitioned into groups of {partition_size}")]
    InvalidTopology { num_peers: u64, partition_size: u64 },

    #[error("Malformed job descriptor: {0}")]
    MalformedJob(String),

    #[error("Job not tracked by this peer: {0}")]
    UnknownJob(JobId),

    #[error("Unexpected value stored under key {key:?}")]
    UnexpectedValue { key: String },

    #[error("Peer {peer} is not in the node list of job {job}")]
    NotInNodeList { peer: u64, job: JobId },

    #[error("No allocation staged for job {0}")]
    NoStagedAllocation(JobId),

    #[error("Workload error: {0}")]
    Workload(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MatrixError>;
