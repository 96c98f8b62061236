//! Bounded FIFO mailbox
//!
//! A ring buffer behind one mutex. Many producers may `put` concurrently;
//! one consumer drains with `get`. A full mailbox hands the item back
//! instead of blocking, so producers decide how to back off.

use parking_lot::Mutex;
use std::fmt;

use crate::error::MailboxError;

/// Default number of slots
pub const DEFAULT_CAPACITY: usize = 10;

/// Returned by [`Mailbox::put`] when the mailbox is full; carries the item back.
pub struct Overflow<T> {
    item: T,
    capacity: usize,
}

impl<T> Overflow<T> {
    pub fn into_inner(self) -> T {
        self.item
    }

    pub fn error(&self) -> MailboxError {
        MailboxError::Overflow(self.capacity)
    }
}

impl<T> fmt::Debug for Overflow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overflow")
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<T> From<Overflow<T>> for MailboxError {
    fn from(overflow: Overflow<T>) -> Self {
        overflow.error()
    }
}

struct Ring<T> {
    head: usize,
    size: usize,
    slots: Vec<Option<T>>,
}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            head: 0,
            size: 0,
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Bounded, growable FIFO queue
pub struct Mailbox<T> {
    ring: Mutex<Ring<T>>,
}

impl<T> Mailbox<T> {
    /// Create a mailbox; a zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring::with_capacity(capacity.max(1))),
        }
    }

    /// Enqueue at the tail
    pub fn put(&self, item: T) -> Result<(), Overflow<T>> {
        let mut ring = self.ring.lock();
        let capacity = ring.capacity();
        if ring.size == capacity {
            return Err(Overflow { item, capacity });
        }
        let tail = (ring.head + ring.size) % capacity;
        ring.slots[tail] = Some(item);
        ring.size += 1;
        Ok(())
    }

    /// Dequeue from the head
    pub fn get(&self) -> Option<T> {
        let mut ring = self.ring.lock();
        if ring.size == 0 {
            return None;
        }
        let head = ring.head;
        let item = ring.slots[head].take();
        ring.head = (head + 1) % ring.capacity();
        ring.size -= 1;
        item
    }

    /// Grow to `capacity`, keeping queued items in order.
    ///
    /// Shrinking is rejected; resizing to the current capacity is a no-op.
    pub fn resize(&self, capacity: usize) -> Result<(), MailboxError> {
        let mut ring = self.ring.lock();
        let current = ring.capacity();
        if capacity < current {
            return Err(MailboxError::ShrinkRejected {
                capacity: current,
                requested: capacity,
            });
        }
        if capacity == current {
            return Ok(());
        }

        let mut grown = Ring::with_capacity(capacity);
        for offset in 0..ring.size {
            let idx = (ring.head + offset) % current;
            grown.slots[offset] = ring.slots[idx].take();
        }
        grown.size = ring.size;
        *ring = grown;
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.ring.lock().size
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<T> fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("Mailbox")
            .field("size", &ring.size)
            .field("capacity", &ring.capacity())
            .finish()
    }
}
