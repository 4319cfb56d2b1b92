//! Time ordered storage for deferred work.
//!
//! # Design
//! - `Futures` is an array backed binary min-heap keyed by `(at, seq)`.
//! - `seq` is assigned on insertion, so futures due at the same instant come out
//!   in the order they went in.
//! - Capacity is managed separately from the heap operations by [`Futures::resize`].

use chrono::{DateTime, Utc};

use crate::error::MarionetteError;

/// An item paired with the time it becomes eligible to run.
#[derive(Debug)]
pub struct Future<T> {
    at: DateTime<Utc>,
    seq: u64,
    item: T,
}

impl<T> Future<T> {
    pub fn new(at: DateTime<Utc>, item: T) -> Self {
        Self { at, seq: 0, item }
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }

    pub fn item(&self) -> &T {
        &self.item
    }

    pub fn into_item(self) -> T {
        self.item
    }

    /// A zero valued timestamp cannot be scheduled; anything else, including a
    /// time in the past, is due as soon as the scheduler sees it.
    pub fn validate(&self) -> Result<(), MarionetteError> {
        if self.at == DateTime::<Utc>::default() {
            return Err(MarionetteError::Unschedulable);
        }
        Ok(())
    }

    fn precedes(&self, other: &Self) -> bool {
        (self.at, self.seq) < (other.at, other.seq)
    }
}

#[derive(Debug)]
pub struct Futures<T> {
    heap: Vec<Future<T>>,
    next_seq: u64,
}

impl<T> Futures<T> {
    /// Smallest capacity kept by [`Futures::resize`].
    pub const MIN_CAPACITY: usize = 16;

    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.heap.capacity()
    }

    /// The earliest future, without removing it.
    pub fn peek(&self) -> Option<&Future<T>> {
        self.heap.first()
    }

    /// Futures in heap order (not sorted).
    pub fn iter(&self) -> impl Iterator<Item = &Future<T>> {
        self.heap.iter()
    }

    pub fn insert(&mut self, mut future: Future<T>) {
        future.seq = self.next_seq;
        self.next_seq += 1;

        self.heap.push(future);
        self.sift_up(self.heap.len() - 1);
    }

    /// Remove and return the earliest future.
    pub fn pop(&mut self) -> Option<Future<T>> {
        if self.heap.is_empty() {
            return None;
        }

        let future = self.heap.swap_remove(0);
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some(future)
    }

    /// Remove every future due at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<T> {
        let mut due = Vec::new();
        while self.peek().is_some_and(|future| future.at <= now) {
            if let Some(future) = self.pop() {
                due.push(future.item);
            }
        }
        due
    }

    /// Drop every pending future, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.heap.len();
        self.heap.clear();
        discarded
    }

    /// Fit the capacity to the current length.
    ///
    /// The target is the next power of two of the length (at least
    /// [`Futures::MIN_CAPACITY`]). Capacity grows to the target when below it and
    /// shrinks to it once more than twice as large. Elements and their order are
    /// untouched.
    pub fn resize(&mut self) {
        let len = self.heap.len();
        let target = len.next_power_of_two().max(Self::MIN_CAPACITY);
        let capacity = self.heap.capacity();

        if capacity < target {
            self.heap.reserve_exact(target - len);
        } else if capacity > target * 2 {
            self.heap.shrink_to(target);
        }
    }

    /// Every parent precedes its children.
    pub fn is_heap(&self) -> bool {
        (1..self.heap.len()).all(|i| !self.heap[i].precedes(&self.heap[(i - 1) / 2]))
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if !self.heap[i].precedes(&self.heap[parent]) {
                break;
            }
            self.heap.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * i + 1;
            let right = left + 1;
            let mut smallest = i;

            if left < len && self.heap[left].precedes(&self.heap[smallest]) {
                smallest = left;
            }
            if right < len && self.heap[right].precedes(&self.heap[smallest]) {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.heap.swap(i, smallest);
            i = smallest;
        }
    }
}

impl<T> Default for Futures<T> {
    fn default() -> Self {
        Self::new()
    }
}
