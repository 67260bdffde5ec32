//! Cancellable callback scheduling.
//!
//! [`Timers`] is the capability the engine uses to ask for future callbacks.
//! [`EventQueue`] implements it over virtual time: the driver pops due
//! entries and dispatches them. Entries fire in non-decreasing time order
//! and entries due at the same instant fire in submission order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

pub trait Timers<T> {
    /// Current time, measured from the start of the driving loop.
    fn now(&self) -> Duration;

    fn schedule(&mut self, delay: Duration, event: T) -> TimerId;

    /// Cancelling a fired, cancelled or unknown timer does nothing.
    fn cancel(&mut self, id: TimerId);
}

#[derive(Debug)]
pub struct EventQueue<E> {
    now: Duration,
    next_id: u64,
    heap: BinaryHeap<Reverse<(Duration, u64)>>,
    pending: HashMap<u64, E>,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_id: 0,
            heap: BinaryHeap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    /// Move the clock forward. Time never goes backwards.
    pub fn advance_to(&mut self, time: Duration) {
        if time > self.now {
            self.now = time;
        }
    }

    pub fn push(&mut self, delay: Duration, event: E) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Reverse((self.now.saturating_add(delay), id)));
        self.pending.insert(id, event);
        TimerId(id)
    }

    pub fn remove(&mut self, id: TimerId) -> Option<E> {
        self.pending.remove(&id.0)
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.pending.contains_key(&id.0)
    }

    /// Due time of the next live entry.
    pub fn next_deadline(&mut self) -> Option<Duration> {
        while let Some(Reverse((at, id))) = self.heap.peek().copied() {
            if self.pending.contains_key(&id) {
                return Some(at);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop the next live entry due at or before `limit`, advancing the clock
    /// to its due time.
    pub fn pop_due(&mut self, limit: Duration) -> Option<(TimerId, E)> {
        let at = self.next_deadline().filter(|at| *at <= limit)?;
        let Reverse((_, id)) = self.heap.pop()?;
        let event = self.pending.remove(&id)?;
        self.advance_to(at);
        Some((TimerId(id), event))
    }

    /// Pop the next live entry whatever its due time.
    pub fn pop(&mut self) -> Option<(TimerId, E)> {
        self.pop_due(Duration::MAX)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<E, T: Into<E>> Timers<T> for EventQueue<E> {
    fn now(&self) -> Duration {
        self.now
    }

    fn schedule(&mut self, delay: Duration, event: T) -> TimerId {
        self.push(delay, event.into())
    }

    fn cancel(&mut self, id: TimerId) {
        self.remove(id);
    }
}
