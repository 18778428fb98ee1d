//! Bounded hand-off between the acquisition thread and frame consumers.
//!
//! Frames are copied into a fixed ring of pre-allocated slots. The producer
//! never waits for a consumer: once the ring is full each push overwrites the
//! oldest slot, so a slow reader loses the oldest frames it had not yet read.
//! Readers either take the most recent frame ([`FrameBuffer::latest`]) or walk
//! the stream in order with a [`FrameCursor`].

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::frame::{FrameGeometry, ProcessedFrame};

/// Position of an ordered reader in the frame stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCursor {
    next: u64,
}

impl FrameCursor {
    /// Index of the next frame this cursor will return
    pub fn position(&self) -> u64 {
        self.next
    }
}

/// A frame returned to an ordered reader.
#[derive(Debug, Clone)]
pub struct OrderedFrame {
    pub frame: ProcessedFrame,
    /// Frames overwritten before this reader got to them
    pub dropped: u64,
}

/// Why an ordered read returned without a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// Nothing new arrived within the timeout
    Timeout,
    /// The buffer was closed; no further frames will arrive
    Closed,
}

struct Ring {
    slots: Vec<ProcessedFrame>,
    /// Number of frames ever pushed; the next push lands in `written % len`
    written: u64,
    closed: bool,
}

impl Ring {
    fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }

    fn oldest_held(&self) -> u64 {
        self.written.saturating_sub(self.capacity())
    }

    fn slot(&self, index: u64) -> &ProcessedFrame {
        &self.slots[(index % self.capacity()) as usize]
    }
}

pub struct FrameBuffer {
    geometry: FrameGeometry,
    ring: Mutex<Ring>,
    arrived: Condvar,
}

impl FrameBuffer {
    /// Allocate `depth` slots for frames of `geometry`.
    ///
    /// # Panics
    /// Panics if depth is zero.
    pub fn new(geometry: FrameGeometry, depth: usize) -> Self {
        assert!(depth > 0, "FrameBuffer depth must be greater than 0");
        let slots = (0..depth).map(|_| ProcessedFrame::zeros(geometry)).collect();
        Self {
            geometry,
            ring: Mutex::new(Ring {
                slots,
                written: 0,
                closed: false,
            }),
            arrived: Condvar::new(),
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn depth(&self) -> usize {
        self.lock().slots.len()
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        // A panicking reader cannot leave a slot half-written: slots are
        // only written by `push`, which does not panic for matching shapes.
        self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy `frame` into the next slot and wake waiting readers.
    ///
    /// Holds the lock only for the copy. Pushes after `close` are ignored.
    ///
    /// # Panics
    /// Panics if `frame` does not have the buffer's geometry.
    pub fn push(&self, frame: &ProcessedFrame) {
        let mut ring = self.lock();
        if ring.closed {
            return;
        }
        let index = (ring.written % ring.capacity()) as usize;
        ring.slots[index].copy_from(frame);
        ring.written += 1;
        drop(ring);
        self.arrived.notify_all();
    }

    /// Snapshot of the most recently pushed frame.
    pub fn latest(&self) -> Option<ProcessedFrame> {
        let ring = self.lock();
        if ring.written == 0 {
            return None;
        }
        Some(ring.slot(ring.written - 1).clone())
    }

    /// Run `f` against the most recent frame without copying it.
    ///
    /// The producer is blocked while `f` runs, so keep it short.
    pub fn with_latest<R>(&self, f: impl FnOnce(&ProcessedFrame) -> R) -> Option<R> {
        let ring = self.lock();
        if ring.written == 0 {
            return None;
        }
        Some(f(ring.slot(ring.written - 1)))
    }

    /// Total frames pushed so far
    pub fn frames_pushed(&self) -> u64 {
        self.lock().written
    }

    /// A cursor whose first read returns the next frame pushed.
    pub fn cursor_from_now(&self) -> FrameCursor {
        FrameCursor {
            next: self.lock().written,
        }
    }

    /// A cursor starting at the oldest frame still held.
    pub fn cursor_from_oldest(&self) -> FrameCursor {
        FrameCursor {
            next: self.lock().oldest_held(),
        }
    }

    /// Return the next unread frame for `cursor`, waiting up to `timeout`.
    ///
    /// If the producer overwrote frames the cursor had not read yet, the
    /// cursor jumps to the oldest frame still held and `dropped` reports the
    /// gap. Frames already pushed are still returned after `close`; once
    /// they are exhausted reads fail with [`ReadError::Closed`].
    pub fn read_next(
        &self,
        cursor: &mut FrameCursor,
        timeout: Duration,
    ) -> Result<OrderedFrame, ReadError> {
        let deadline = Instant::now() + timeout;
        let mut ring = self.lock();

        while cursor.next >= ring.written {
            if ring.closed {
                return Err(ReadError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ReadError::Timeout);
            }
            ring = match self.arrived.wait_timeout(ring, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }

        let oldest = ring.oldest_held();
        let dropped = oldest.saturating_sub(cursor.next);
        if dropped > 0 {
            cursor.next = oldest;
        }
        let frame = ring.slot(cursor.next).clone();
        cursor.next += 1;
        Ok(OrderedFrame { frame, dropped })
    }

    /// Stop accepting frames and wake every waiting reader.
    pub fn close(&self) {
        self.lock().closed = true;
        self.arrived.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
