//! # Rolling id generation for pools and workers.
//!
//! [`RollingId`] is a monotone `i64` source that wraps from `i64::MAX` to
//! `i64::MIN` atomically instead of overflowing. Within one wrap cycle no
//! value is handed out twice, regardless of how many callers draw ids in
//! parallel.
//!
//! Pool ids are drawn from one process-wide generator; each pool owns a
//! second generator for its worker ids (see [`crate::pool`]).

use std::sync::atomic::{AtomicI64, Ordering};

/// Atomic wrap-around id source.
///
/// `next()` never returns the same value twice within a wrap cycle; at
/// `i64::MAX` the counter rolls over to `i64::MIN`.
#[derive(Debug, Default)]
pub struct RollingId {
    value: AtomicI64,
}

impl RollingId {
    /// Creates a generator starting at zero.
    pub const fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }

    /// Creates a generator starting at the given value.
    pub fn starting_at(value: i64) -> Self {
        Self {
            value: AtomicI64::new(value),
        }
    }

    /// Returns the current value without advancing it.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Returns the current value and advances the counter.
    ///
    /// At `i64::MAX` the counter is swung to `i64::MIN` in a single
    /// compare-and-swap; the caller that wins the swap receives `i64::MAX`.
    pub fn next(&self) -> i64 {
        loop {
            let current = self.value.load(Ordering::SeqCst);

            let target = if current == i64::MAX {
                i64::MIN
            } else {
                current + 1
            };

            if self
                .value
                .compare_exchange(current, target, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return current;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::RollingId;

    #[test]
    fn starts_at_zero_and_counts_up() {
        let ids = RollingId::new();
        assert_eq!(ids.next(), 0);
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.get(), 2);
    }

    #[test]
    fn wraps_from_max_to_min() {
        let ids = RollingId::starting_at(i64::MAX - 1);
        assert_eq!(ids.next(), i64::MAX - 1);
        assert_eq!(ids.next(), i64::MAX);
        assert_eq!(ids.next(), i64::MIN);
        assert_eq!(ids.next(), i64::MIN + 1);
    }

    proptest::proptest! {
        #[test]
        fn next_increments_or_wraps_from_any_start(start in proptest::prelude::any::<i64>()) {
            let ids = RollingId::starting_at(start);
            proptest::prop_assert_eq!(ids.next(), start);

            let expected = if start == i64::MAX { i64::MIN } else { start + 1 };
            proptest::prop_assert_eq!(ids.next(), expected);
        }
    }

    #[test]
    fn parallel_callers_draw_unique_ids() {
        const CALLERS: usize = 8;
        const DRAWS: usize = 2_000;

        let ids = Arc::new(RollingId::new());
        let mut joins = Vec::new();

        for _ in 0..CALLERS {
            let ids = Arc::clone(&ids);
            joins.push(std::thread::spawn(move || {
                (0..DRAWS).map(|_| ids.next()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for join in joins {
            for id in join.join().unwrap() {
                assert!(seen.insert(id), "id {id} was handed out twice");
            }
        }

        assert_eq!(seen.len(), CALLERS * DRAWS);
    }
}
