use ndarray::Array2;

/// Fixed-depth history of frames stored in reusable slots.
///
/// Frames are written at a cursor that wraps modulo the capacity. The moment
/// the cursor wraps back to slot 0 is a rollover; at a rollover the slots hold
/// the window oldest-first.
#[derive(Debug, Clone)]
pub struct FrameWindow {
    slots: Vec<Array2<f32>>,
    capacity: usize,
    next: usize,
    len: usize,
}

impl FrameWindow {
    /// # Panics
    /// Panics if capacity is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "FrameWindow capacity must be greater than 0");
        Self {
            slots: Vec::new(),
            capacity,
            next: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    /// The frame the next `insert` will overwrite, if the window is full.
    pub fn oldest_if_full(&self) -> Option<&Array2<f32>> {
        if self.is_full() {
            self.slots.get(self.next)
        } else {
            None
        }
    }

    /// Write `frame` at the cursor and advance it.
    ///
    /// # Returns
    /// `true` if the cursor wrapped back to slot 0.
    pub fn insert(&mut self, frame: &Array2<f32>) -> bool {
        if self.next < self.slots.len() {
            self.slots[self.next].assign(frame);
        } else {
            self.slots.push(frame.clone());
        }
        self.next = (self.next + 1) % self.capacity;
        self.len = (self.len + 1).min(self.capacity);
        self.next == 0
    }

    /// Held frames in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Array2<f32>> {
        self.slots.iter().take(self.len)
    }

    /// Change the capacity, keeping the newest frames.
    ///
    /// Shrinking evicts the oldest frames; growing leaves room to fill.
    pub fn resize(&mut self, capacity: usize) {
        assert!(capacity > 0, "FrameWindow capacity must be greater than 0");
        if self.is_full() {
            self.slots.rotate_left(self.next);
        }
        self.slots.truncate(self.len);
        if self.len > capacity {
            self.slots.drain(0..self.len - capacity);
            self.len = capacity;
        }
        self.capacity = capacity;
        self.next = self.len % capacity;
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.next = 0;
        self.len = 0;
    }
}
