//! Key shapes and shard routing.
//!
//! Keys are opaque strings. The notable shapes:
//! `node-<ctrl>` holds a controller's resource pool, `<job>` its origin
//! controller, `<job>node-<requester>` the contributing-controller list,
//! `<job>node-<requester><ctrl-key>` one contributed share, and
//! `<job>Fin` the completion marker.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::job::JobId;
use crate::message::NodeId;

/// Key under which a controller's resource pool lives.
pub fn resource_key(ctrl: NodeId) -> String {
    format!("node-{ctrl}")
}

/// Key mapping a job to its origin controller.
pub fn origin_key(job: JobId) -> String {
    job.to_string()
}

/// Key holding the ordered contributing-controller list of a job.
pub fn ctrls_key(job: JobId, requester: NodeId) -> String {
    format!("{job}{}", resource_key(requester))
}

/// Key holding one contributing controller's share of a job.
pub fn share_key(job: JobId, requester: NodeId, contrib_key: &str) -> String {
    format!("{job}{}{contrib_key}", resource_key(requester))
}

/// Key under which the completion marker of a job is inserted.
pub fn fin_key(job: JobId) -> String {
    format!("{job}Fin")
}

/// The peer whose shard owns `key`.
pub fn shard_for(key: &str, num_peers: u64) -> NodeId {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish() % num_peers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shapes() {
        let job = JobId::new(4, 1);
        assert_eq!(resource_key(4), "node-4");
        assert_eq!(origin_key(job), "n4.1");
        assert_eq!(ctrls_key(job, 4), "n4.1node-4");
        assert_eq!(share_key(job, 4, "node-0"), "n4.1node-4node-0");
        assert_eq!(fin_key(job), "n4.1Fin");
    }

    #[test]
    fn test_shard_routing_is_deterministic_and_in_range() {
        for key in ["node-0", "n0.3Fin", "n4.1node-4node-0"] {
            let a = shard_for(key, 8);
            let b = shard_for(key, 8);
            assert_eq!(a, b);
            assert!(a < 8);
        }
    }

    #[test]
    fn test_distinct_jobs_get_distinct_keys() {
        let a = JobId::new(0, 0);
        let b = JobId::new(0, 1);
        assert_ne!(fin_key(a), fin_key(b));
        assert_ne!(origin_key(a), origin_key(b));
    }
}
