//! Simulation clock and time-ordered event queue.
//!
//! The queue is the only component with a notion of "now". Time advances
//! exclusively by popping the next pending action; it never moves backward.
//!
//! # Ordering
//!
//! Actions are ordered by due time. Actions sharing a due time fire in the
//! order they were scheduled (FIFO), which keeps iterations reproducible
//! under a fixed seed.
//!
//! # Cancellation
//!
//! Cancelling is lazy: the heap entry stays in place and is discarded when it
//! reaches the front. A cancelled action never fires, even if already due.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;
use std::time::Duration;

use crate::error::{Result, SimError};

/// Handle to a scheduled action, used to cancel it before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PendingActionHandle(u64);

impl PendingActionHandle {
    /// Insertion sequence number of the action.
    #[must_use]
    pub const fn sequence(self) -> u64 {
        self.0
    }
}

/// An action popped from the queue, ready to be fired.
#[derive(Debug)]
pub struct Fired<A> {
    /// Time the action was due (and the clock's new value).
    pub due: Duration,
    /// Handle the action was scheduled under.
    pub handle: PendingActionHandle,
    /// The action payload.
    pub action: A,
}

struct Entry<A> {
    due: Duration,
    seq: u64,
    action: A,
}

impl<A> PartialEq for Entry<A> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<A> Eq for Entry<A> {}

impl<A> PartialOrd for Entry<A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<A> Ord for Entry<A> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behavior: earliest due, then lowest sequence.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Time-ordered multiset of pending actions plus the simulation clock.
pub struct EventQueue<A> {
    now: Duration,
    next_seq: u64,
    heap: BinaryHeap<Entry<A>>,
    live: HashSet<u64>,
}

impl<A> EventQueue<A> {
    /// Create an empty queue with the clock at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_seq: 0,
            heap: BinaryHeap::new(),
            live: HashSet::new(),
        }
    }

    /// Current simulation time.
    #[must_use]
    pub const fn now(&self) -> Duration {
        self.now
    }

    /// Number of live (scheduled, not cancelled, not fired) actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether no live actions remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Schedule an action at an absolute due time.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidSchedule`] if `due` is earlier than the
    /// current time.
    pub fn schedule(&mut self, due: Duration, action: A) -> Result<PendingActionHandle> {
        if due < self.now {
            return Err(SimError::InvalidSchedule { due, now: self.now });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { due, seq, action });
        self.live.insert(seq);
        Ok(PendingActionHandle(seq))
    }

    /// Cancel a pending action.
    ///
    /// Returns `false` if the action already fired or was already cancelled.
    pub fn cancel(&mut self, handle: PendingActionHandle) -> bool {
        self.live.remove(&handle.0)
    }

    /// Whether an action is still waiting to fire.
    #[must_use]
    pub fn is_pending(&self, handle: PendingActionHandle) -> bool {
        self.live.contains(&handle.0)
    }

    /// Due time of the earliest live action, discarding cancelled entries.
    pub fn peek_time(&mut self) -> Option<Duration> {
        self.discard_cancelled_head();
        self.heap.peek().map(|entry| entry.due)
    }

    /// Pop the earliest live action due at or before `until`, advancing the
    /// clock to its due time.
    pub fn pop_next(&mut self, until: Duration) -> Option<Fired<A>> {
        self.discard_cancelled_head();
        if self.heap.peek()?.due > until {
            return None;
        }
        let entry = self.heap.pop()?;
        self.live.remove(&entry.seq);
        debug_assert!(entry.due >= self.now, "time moved backward");
        self.now = entry.due;
        Some(Fired {
            due: entry.due,
            handle: PendingActionHandle(entry.seq),
            action: entry.action,
        })
    }

    /// Move the clock forward to `time` without firing anything.
    ///
    /// Used by the driver when a run stops at its end time with work pending.
    pub fn advance_to(&mut self, time: Duration) {
        if time > self.now {
            self.now = time;
        }
    }

    /// Drop every pending action and rewind the clock to zero.
    pub fn reset(&mut self) {
        self.now = Duration::ZERO;
        self.next_seq = 0;
        self.heap.clear();
        self.live.clear();
    }

    fn discard_cancelled_head(&mut self) {
        while let Some(head) = self.heap.peek() {
            if self.live.contains(&head.seq) {
                break;
            }
            self.heap.pop();
        }
    }
}

impl<A> Default for EventQueue<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for EventQueue<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("now", &self.now)
            .field("live", &self.live.len())
            .field("next_seq", &self.next_seq)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn drain(queue: &mut EventQueue<u32>) -> Vec<(Duration, u32)> {
        let mut out = Vec::new();
        while let Some(fired) = queue.pop_next(Duration::MAX) {
            out.push((fired.due, fired.action));
        }
        out
    }

    #[test]
    fn test_pops_in_time_order() {
        let mut queue = EventQueue::new();
        queue.schedule(ms(300), 3).unwrap();
        queue.schedule(ms(100), 1).unwrap();
        queue.schedule(ms(200), 2).unwrap();

        let order: Vec<u32> = drain(&mut queue).into_iter().map(|(_, a)| a).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(queue.now(), ms(300));
    }

    #[test]
    fn test_ties_fire_in_insertion_order() {
        let mut queue = EventQueue::new();
        for action in 0..10 {
            queue.schedule(ms(500), action).unwrap();
        }
        let order: Vec<u32> = drain(&mut queue).into_iter().map(|(_, a)| a).collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_cancelled_action_never_fires() {
        let mut queue = EventQueue::new();
        let keep = queue.schedule(ms(10), 1).unwrap();
        let drop = queue.schedule(ms(10), 2).unwrap();

        assert!(queue.cancel(drop));
        assert!(!queue.cancel(drop));
        assert!(queue.is_pending(keep));
        assert_eq!(queue.len(), 1);

        assert_eq!(drain(&mut queue), vec![(ms(10), 1)]);
        assert!(!queue.is_pending(keep));
    }

    #[test]
    fn test_schedule_in_past_is_rejected() {
        let mut queue = EventQueue::new();
        queue.schedule(ms(100), 1).unwrap();
        queue.pop_next(Duration::MAX).unwrap();

        let err = queue.schedule(ms(50), 2).unwrap_err();
        assert!(matches!(err, SimError::InvalidSchedule { .. }));

        // Scheduling at exactly "now" is allowed.
        assert!(queue.schedule(ms(100), 3).is_ok());
    }

    #[test]
    fn test_pop_respects_until() {
        let mut queue = EventQueue::new();
        queue.schedule(ms(100), 1).unwrap();
        queue.schedule(ms(200), 2).unwrap();

        assert_eq!(queue.pop_next(ms(150)).map(|f| f.action), Some(1));
        assert!(queue.pop_next(ms(150)).is_none());
        assert_eq!(queue.now(), ms(100));

        queue.advance_to(ms(150));
        assert_eq!(queue.now(), ms(150));
        assert_eq!(queue.peek_time(), Some(ms(200)));
    }

    #[test]
    fn test_peek_skips_cancelled_head() {
        let mut queue = EventQueue::new();
        let first = queue.schedule(ms(5), 1).unwrap();
        queue.schedule(ms(9), 2).unwrap();
        queue.cancel(first);
        assert_eq!(queue.peek_time(), Some(ms(9)));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut queue = EventQueue::new();
        queue.schedule(ms(5), 1).unwrap();
        queue.pop_next(Duration::MAX);
        queue.schedule(ms(8), 2).unwrap();

        queue.reset();
        assert!(queue.is_empty());
        assert_eq!(queue.now(), Duration::ZERO);
        assert_eq!(queue.schedule(ms(1), 3).unwrap().sequence(), 0);
    }

    proptest! {
        #[test]
        fn prop_dequeue_is_time_ordered_and_fifo(
            times in proptest::collection::vec(0u64..50, 1..200)
        ) {
            let mut queue = EventQueue::new();
            for (index, t) in times.iter().enumerate() {
                queue.schedule(ms(*t), index as u32).unwrap();
            }

            let fired = drain(&mut queue);
            prop_assert_eq!(fired.len(), times.len());
            for pair in fired.windows(2) {
                let (t0, a0) = pair[0];
                let (t1, a1) = pair[1];
                prop_assert!(t0 <= t1);
                if t0 == t1 {
                    prop_assert!(a0 < a1, "ties must keep insertion order");
                }
            }
        }

        #[test]
        fn prop_cancelled_subset_never_fires(
            times in proptest::collection::vec(0u64..100, 1..100),
            cancel_mask in proptest::collection::vec(any::<bool>(), 100)
        ) {
            let mut queue = EventQueue::new();
            let handles: Vec<_> = times
                .iter()
                .enumerate()
                .map(|(index, t)| queue.schedule(ms(*t), index as u32).unwrap())
                .collect();
            for (index, handle) in handles.iter().enumerate() {
                if cancel_mask[index] {
                    queue.cancel(*handle);
                }
            }

            for (_, action) in drain(&mut queue) {
                prop_assert!(!cancel_mask[action as usize]);
            }
        }
    }
}
