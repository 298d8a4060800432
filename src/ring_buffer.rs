//! Fixed-capacity FIFO of pulse samples.
//!
//! Inserting into a full buffer evicts the oldest sample, so the buffer
//! always holds the most recent `capacity` pulses. Storage is allocated once
//! at construction and never grows.

/// Microsecond duration between two consecutive transitions.
pub type PulseSample = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RingBufferError {
    #[error("Ring buffer is empty")]
    EmptyBuffer,

    #[error("Index {index} out of range for buffer holding {size} samples")]
    IndexOutOfRange { index: i64, size: usize },
}

#[derive(Debug, Clone)]
pub struct PulseRingBuffer {
    storage: Box<[PulseSample]>,
    head: usize,
    size: usize,
}

impl PulseRingBuffer {
    /// Create an empty buffer holding at most `capacity` samples.
    ///
    /// A capacity of zero is clamped to one; [`crate::config`] rejects it
    /// before it gets here.
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0; capacity.max(1)].into_boxed_slice(),
            head: 0,
            size: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Drop every sample without touching the storage.
    pub fn reset(&mut self) {
        self.head = 0;
        self.size = 0;
    }

    /// Append a sample at the tail.
    ///
    /// Returns `true` when the buffer was full and the oldest sample was
    /// overwritten.
    pub fn put(&mut self, value: PulseSample) -> bool {
        let capacity = self.capacity();
        let tail = (self.head + self.size) % capacity;
        self.storage[tail] = value;

        if self.size == capacity {
            self.head = (self.head + 1) % capacity;
            true
        } else {
            self.size += 1;
            false
        }
    }

    /// Remove and return the oldest sample.
    pub fn get(&mut self) -> Result<PulseSample, RingBufferError> {
        if self.size == 0 {
            return Err(RingBufferError::EmptyBuffer);
        }
        let value = self.storage[self.head];
        self.head = (self.head + 1) % self.capacity();
        self.size -= 1;
        Ok(value)
    }

    /// Look at the sample `index` positions after the oldest one.
    pub fn peek(&self, index: usize) -> Result<PulseSample, RingBufferError> {
        if index >= self.size {
            return Err(RingBufferError::IndexOutOfRange {
                index: i64::try_from(index).unwrap_or(i64::MAX),
                size: self.size,
            });
        }
        Ok(self.storage[(self.head + index) % self.capacity()])
    }

    /// Signed variant of [`peek`](Self::peek): negative indices count back
    /// from the newest sample, so `-1` is the most recent one.
    ///
    /// Any index whose magnitude reaches the current size is out of range,
    /// in both directions.
    pub fn peek_signed(&self, index: i64) -> Result<PulseSample, RingBufferError> {
        let out_of_range = RingBufferError::IndexOutOfRange {
            index,
            size: self.size,
        };
        let magnitude = usize::try_from(index.unsigned_abs()).map_err(|_| out_of_range)?;
        if magnitude >= self.size {
            return Err(out_of_range);
        }

        if index < 0 {
            self.peek(self.size - magnitude)
        } else {
            self.peek(magnitude)
        }
    }

    /// Pop every sample, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = PulseSample> + '_ {
        std::iter::from_fn(move || self.get().ok())
    }
}
