use std::collections::HashMap;

use crate::kvs::KvValue;

/// Outcome of one callback-wait attempt against a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The stored value is the completion marker; the attempt counter is
    /// cleared and a success response goes out.
    Done,
    /// Not done yet and the retry budget still has room; the shard will
    /// re-check after the poll interval without replying.
    Retry,
    /// Retry budget exceeded; the counter is cleared and a failure
    /// response goes out so the requester can escalate.
    Exhausted,
}

/// One peer's shard of the partitioned store: the key-value map plus the
/// per-key attempt counters of pending callback-waits.
#[derive(Debug, Default)]
pub struct ShardStore {
    data: HashMap<String, KvValue>,
    callback_attempts: HashMap<String, u32>,
}

impl ShardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditional write; overwrites any prior value.
    pub fn insert(&mut self, key: String, value: KvValue) {
        self.data.insert(key, value);
    }

    pub fn lookup(&self, key: &str) -> Option<&KvValue> {
        self.data.get(key)
    }

    /// Store `attempt` iff the current value equals `expected` (an absent
    /// entry matches `None`). Returns whether the swap happened and the
    /// value observed before it, so a losing caller can retry.
    pub fn compare_and_swap(
        &mut self,
        key: &str,
        expected: Option<&KvValue>,
        attempt: KvValue,
    ) -> (bool, Option<KvValue>) {
        let current = self.data.get(key).cloned();
        if current.as_ref() == expected {
            self.data.insert(key.to_string(), attempt);
            (true, current)
        } else {
            (false, current)
        }
    }

    /// One polling attempt of a callback-wait on `key`, bounded by
    /// `retry_limit` re-checks.
    pub fn callback_check(&mut self, key: &str, retry_limit: u32) -> CallbackOutcome {
        let attempts = self.callback_attempts.entry(key.to_string()).or_insert(0);
        *attempts += 1;
        if self.data.get(key) == Some(&KvValue::Done) {
            self.callback_attempts.remove(key);
            CallbackOutcome::Done
        } else if *attempts > retry_limit {
            self.callback_attempts.remove(key);
            CallbackOutcome::Exhausted
        } else {
            CallbackOutcome::Retry
        }
    }

    pub fn pending_callbacks(&self) -> usize {
        self.callback_attempts.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;

    #[test]
    fn test_insert_overwrites() {
        let mut store = ShardStore::new();
        store.insert("k".to_string(), KvValue::Controller(1));
        store.insert("k".to_string(), KvValue::Controller(2));
        assert_eq!(store.lookup("k"), Some(&KvValue::Controller(2)));
        assert_eq!(store.lookup("absent"), None);
    }

    #[test]
    fn test_cas_success_and_failure() {
        let mut store = ShardStore::new();
        let old = KvValue::Resource(Resource::new(vec![1, 2]));
        let new = KvValue::Resource(Resource::new(vec![2]));
        store.insert("pool".to_string(), old.clone());

        let (ok, seen) = store.compare_and_swap("pool", Some(&old), new.clone());
        assert!(ok);
        assert_eq!(seen, Some(old.clone()));
        assert_eq!(store.lookup("pool"), Some(&new));

        // A second swap expecting the stale value loses and reports the
        // current value without touching the entry.
        let (ok, seen) = store.compare_and_swap("pool", Some(&old), KvValue::Done);
        assert!(!ok);
        assert_eq!(seen, Some(new.clone()));
        assert_eq!(store.lookup("pool"), Some(&new));
    }

    #[test]
    fn test_cas_against_absent_key() {
        let mut store = ShardStore::new();
        let (ok, seen) = store.compare_and_swap("k", None, KvValue::Done);
        assert!(ok);
        assert_eq!(seen, None);
        assert_eq!(store.lookup("k"), Some(&KvValue::Done));
    }

    #[test]
    fn test_callback_observes_done() {
        let mut store = ShardStore::new();
        store.insert("jFin".to_string(), KvValue::Done);
        assert_eq!(store.callback_check("jFin", 3), CallbackOutcome::Done);
        assert_eq!(store.pending_callbacks(), 0);
    }

    #[test]
    fn test_callback_retry_budget_is_exact() {
        let mut store = ShardStore::new();
        let limit = 3;
        // The initial attempt and each re-check poll once; the attempt
        // after `limit` re-checks fails.
        for _ in 0..limit {
            assert_eq!(store.callback_check("k", limit), CallbackOutcome::Retry);
        }
        assert_eq!(store.callback_check("k", limit), CallbackOutcome::Exhausted);
        assert_eq!(store.pending_callbacks(), 0);
    }

    #[test]
    fn test_callback_succeeds_mid_poll() {
        let mut store = ShardStore::new();
        assert_eq!(store.callback_check("k", 10), CallbackOutcome::Retry);
        store.insert("k".to_string(), KvValue::Done);
        assert_eq!(store.callback_check("k", 10), CallbackOutcome::Done);
        assert_eq!(store.pending_callbacks(), 0);
    }
}
