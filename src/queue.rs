//! Bounded blocking message queue
//!
//! Reception decouples the USB completion path from the application:
//! the pipe engine enqueues decoded messages without blocking while the
//! application dequeues with an optional timeout. A full queue drops the
//! newest element and records the overflow. `signal` wakes a blocked
//! reader without delivering data, used to abort a pending read during
//! teardown.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::constants::TIMEOUT_INFINITE;
use crate::error::{CanError, Result};

struct QueueInner<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    used: usize,
    high_water: usize,
    overflow: bool,
    overflow_count: u64,
    // true when the last wake carried data, false when it was a cancel
    wake_flag: bool,
}

/// Fixed-capacity FIFO with blocking dequeue and overflow accounting
pub struct MessageQueue<T> {
    inner: Mutex<QueueInner<T>>,
    cond: Condvar,
    capacity: usize,
}

impl<T> MessageQueue<T> {
    /// Create a queue holding at most `capacity` elements
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        MessageQueue {
            inner: Mutex::new(QueueInner {
                slots,
                head: 0,
                tail: 0,
                used: 0,
                high_water: 0,
                overflow: false,
                overflow_count: 0,
                wake_flag: false,
            }),
            cond: Condvar::new(),
            capacity,
        }
    }

    /// Append an element without blocking
    ///
    /// When the queue is full the element is dropped, the overflow flag
    /// set and the overflow counter incremented.
    pub fn enqueue(&self, item: T) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.used >= self.capacity {
            inner.overflow = true;
            inner.overflow_count += 1;
            return Err(CanError::MessageLost);
        }
        let tail = inner.tail;
        inner.slots[tail] = Some(item);
        inner.tail = (tail + 1) % self.capacity;
        inner.used += 1;
        if inner.used > inner.high_water {
            inner.high_water = inner.used;
        }
        inner.wake_flag = true;
        drop(inner);
        self.cond.notify_one();
        Ok(())
    }

    /// Remove the oldest element, blocking up to `timeout` milliseconds
    ///
    /// A timeout of 0 polls, `TIMEOUT_INFINITE` blocks without limit.
    /// Returns `ReceiverEmpty` when no element arrived in time, also
    /// after a cancel signal with the queue still empty.
    pub fn dequeue(&self, timeout: u16) -> Result<T> {
        let mut inner = self.inner.lock();
        if inner.used == 0 && timeout > 0 {
            if timeout == TIMEOUT_INFINITE {
                while inner.used == 0 {
                    self.cond.wait(&mut inner);
                    // a cancel signal wakes us with nothing to deliver
                    if inner.used == 0 && !inner.wake_flag {
                        break;
                    }
                }
            } else {
                let deadline = Instant::now() + Duration::from_millis(timeout as u64);
                while inner.used == 0 {
                    if self.cond.wait_until(&mut inner, deadline).timed_out() {
                        break;
                    }
                    if inner.used == 0 && !inner.wake_flag {
                        break;
                    }
                }
            }
        }
        if inner.used == 0 {
            return Err(CanError::ReceiverEmpty);
        }
        let head = inner.head;
        let item = inner.slots[head]
            .take()
            .ok_or(CanError::Fatal)?;
        inner.head = (head + 1) % self.capacity;
        inner.used -= 1;
        Ok(item)
    }

    /// Wake a blocked reader without delivering data
    pub fn signal(&self) {
        let mut inner = self.inner.lock();
        inner.wake_flag = false;
        drop(inner);
        self.cond.notify_all();
    }

    /// Discard all queued elements and clear the overflow flag
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        for slot in inner.slots.iter_mut() {
            *slot = None;
        }
        inner.head = 0;
        inner.tail = 0;
        inner.used = 0;
        inner.high_water = 0;
        inner.overflow = false;
        inner.overflow_count = 0;
        inner.wake_flag = false;
    }

    /// Capacity the queue was created with
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued elements
    pub fn len(&self) -> usize {
        self.inner.lock().used
    }

    /// True if no element is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest fill level seen since the last reset
    pub fn high_water_mark(&self) -> usize {
        self.inner.lock().high_water
    }

    /// True if an enqueue was dropped since the last reset or query
    ///
    /// Reading the flag clears it.
    pub fn take_overflow(&self) -> bool {
        let mut inner = self.inner.lock();
        std::mem::take(&mut inner.overflow)
    }

    /// Number of elements dropped since the last reset
    pub fn overflow_count(&self) -> u64 {
        self.inner.lock().overflow_count
    }
}
