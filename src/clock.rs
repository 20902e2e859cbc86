//! Frame timing and one-shot timers.
//!
//! All engine time is a [`Duration`] since the engine started. Timers never run
//! code on their own: [`TimerQueue::take_due`] hands out the payloads of every
//! timer whose deadline has passed, and the caller turns them into messages
//! that are applied at the start of the next tick.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    time::Duration,
};

use instant::Instant;

/// Measures the time between frames.
#[derive(Clone, Copy, Debug)]
pub struct FrameClock {
    start: Instant,
    last: Instant,
}

impl FrameClock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self { start: now, last: now }
    }

    /// Returns `(dt, now)` where `now` is the time since the clock was created.
    pub fn advance(&mut self) -> (Duration, Duration) {
        let now = Instant::now();
        let dt = now - self.last;
        self.last = now;
        (dt, now - self.start)
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Deadline ordered one-shot timers with lazy cancellation.
#[derive(Debug)]
pub struct TimerQueue<T> {
    heap: BinaryHeap<Reverse<(Duration, TimerId)>>,
    pending: HashMap<TimerId, T>,
    next_id: u64,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn arm(&mut self, deadline: Duration, payload: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.heap.push(Reverse((deadline, id)));
        self.pending.insert(id, payload);
        id
    }

    /// Cancel a timer. Returns its payload if it had not fired yet.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        self.pending.remove(&id)
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Remove and return every timer with `deadline <= now`, earliest first.
    pub fn take_due(&mut self, now: Duration) -> Vec<(TimerId, T)> {
        let mut due = Vec::new();
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if deadline > now {
                break;
            }
            self.heap.pop();
            if let Some(payload) = self.pending.remove(&id) {
                due.push((id, payload));
            }
        }
        due
    }

    pub fn next_deadline(&mut self) -> Option<Duration> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if self.pending.contains_key(&id) {
                return Some(deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Cancel everything, returning the payloads of the armed timers.
    pub fn clear(&mut self) -> Vec<T> {
        self.heap.clear();
        self.pending.drain().map(|(_, payload)| payload).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn fires_in_deadline_order() {
        let mut timers = TimerQueue::new();
        timers.arm(ms(30), "c");
        timers.arm(ms(10), "a");
        timers.arm(ms(20), "b");
        assert!(timers.take_due(ms(5)).is_empty());
        let due: Vec<_> = timers.take_due(ms(25)).into_iter().map(|(_, p)| p).collect();
        assert_eq!(due, vec!["a", "b"]);
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn cancelled_timers_never_fire() {
        let mut timers = TimerQueue::new();
        let id = timers.arm(ms(10), 1);
        timers.arm(ms(10), 2);
        assert_eq!(timers.cancel(id), Some(1));
        assert_eq!(timers.cancel(id), None);
        let due: Vec<_> = timers.take_due(ms(10)).into_iter().map(|(_, p)| p).collect();
        assert_eq!(due, vec![2]);
        assert_eq!(timers.next_deadline(), None);
    }
}
