//! Monotonic logical clocks for virtual-time bookkeeping.
//!
//! Each peer plays three roles (controller, key-value shard, compute
//! daemon) and serializes the timestamps of the messages each role sends
//! through an independent pair of high-water-mark clocks: `proc` for
//! processing time and `fwd` for forwarding time. The clocks only ever
//! move forward; unrelated roles never couple through them.

/// A high-water-mark clock over virtual time. Never moves backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogicalClock(u64);

impl LogicalClock {
    pub fn get(self) -> u64 {
        self.0
    }

    /// Raise the clock to at least `now`, then advance it by `by`.
    /// Returns the new reading.
    pub fn advance(&mut self, now: u64, by: u64) -> u64 {
        if now > self.0 {
            self.0 = now;
        }
        self.0 += by;
        self.0
    }

    /// Raise the clock to at least the reading of `other`.
    pub fn raise_to(&mut self, other: LogicalClock) {
        if self.0 < other.0 {
            self.0 = other.0;
        }
    }
}

/// The processing/forwarding clock pair one role keeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleClocks {
    pub proc: LogicalClock,
    pub fwd: LogicalClock,
}

/// All three role clock pairs of a peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerClocks {
    pub ctrl: RoleClocks,
    pub kvs: RoleClocks,
    pub daemon: RoleClocks,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_from_behind() {
        let mut clock = LogicalClock::default();
        assert_eq!(clock.advance(100, 10), 110);
        assert_eq!(clock.get(), 110);
    }

    #[test]
    fn test_advance_keeps_high_water_mark() {
        let mut clock = LogicalClock::default();
        clock.advance(100, 50);
        // An earlier "now" must not rewind the clock.
        assert_eq!(clock.advance(20, 10), 160);
    }

    #[test]
    fn test_raise_to_is_monotonic() {
        let mut a = LogicalClock::default();
        let mut b = LogicalClock::default();
        a.advance(0, 30);
        b.advance(0, 10);
        b.raise_to(a);
        assert_eq!(b.get(), 30);
        // Raising to a lower clock is a no-op.
        let low = LogicalClock::default();
        b.raise_to(low);
        assert_eq!(b.get(), 30);
    }
}
