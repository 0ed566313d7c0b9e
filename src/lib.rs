//! matrix-lite: a discrete-event simulation of a symmetric compute
//! cluster. Every peer is at once a job controller, a shard of a
//! partitioned key-value store, and a compute daemon; all coordination
//! (resource allocation by compare-and-swap, binary-tree job
//! dissemination, completion callbacks) happens through messages over a
//! virtual-time event queue.

pub mod clock;
pub mod config;
pub mod error;
pub mod job;
pub mod kvs;
pub mod message;
pub mod peer;
pub mod resource;
pub mod sim;
pub mod stats;
pub mod workload;
