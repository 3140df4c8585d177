//! Fixed-capacity rewind history for serialized machine state.
//!
//! Every emulated tick the game loop pushes an opaque snapshot produced by the
//! core. A rewind request pops the most recent snapshot first, so the store
//! behaves like a stack bounded to the last `capacity` pushes. Slot storage is
//! reserved up front and reused in place; steady-state pushes never allocate.

use thiserror::Error;

/// Errors reported by [`RewindBuffer`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewindError {
    #[error("rewind buffer needs at least one slot")]
    ZeroCapacity,
    #[error("state of {size} bytes exceeds the {max} byte slot limit")]
    StateTooLarge { size: usize, max: usize },
}

/// One reusable snapshot slot. `data` keeps its reserved capacity across
/// pushes; only its length changes.
#[derive(Debug)]
struct RewindSlot {
    data: Vec<u8>,
}

impl RewindSlot {
    fn with_capacity(max_state_size: usize) -> Self {
        Self {
            data: Vec::with_capacity(max_state_size),
        }
    }

    fn store(&mut self, bytes: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(bytes);
    }

    fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn reset(&mut self) {
        self.data.clear();
    }
}

/// Circular store of serialized states with most-recent-first retrieval.
///
/// `write_index` is the next slot a push lands in. A pop steps it back onto
/// the slot it returns, so a push that follows a pop overwrites the popped
/// state and any newer history is gone.
#[derive(Debug)]
pub struct RewindBuffer {
    slots: Vec<RewindSlot>,
    max_state_size: usize,
    write_index: usize,
    valid_count: usize,
}

impl RewindBuffer {
    /// Reserve `capacity` slots of `max_state_size` bytes each.
    pub fn new(capacity: usize, max_state_size: usize) -> Result<Self, RewindError> {
        if capacity == 0 {
            return Err(RewindError::ZeroCapacity);
        }
        let slots = (0..capacity)
            .map(|_| RewindSlot::with_capacity(max_state_size))
            .collect();
        log::debug!("[retro_rewind] reserved {capacity} slots of {max_state_size} bytes");
        Ok(Self {
            slots,
            max_state_size,
            write_index: 0,
            valid_count: 0,
        })
    }

    /// Capture a state. Once the buffer is full the oldest state is evicted.
    ///
    /// Oversized states are rejected before anything is written.
    pub fn push(&mut self, data: &[u8]) -> Result<(), RewindError> {
        if data.len() > self.max_state_size {
            return Err(RewindError::StateTooLarge {
                size: data.len(),
                max: self.max_state_size,
            });
        }
        if self.valid_count == self.capacity() {
            log::debug!(
                "[retro_rewind] buffer full, overwriting slot {}",
                self.write_index
            );
        }
        self.slots[self.write_index].store(data);
        self.write_index = (self.write_index + 1) % self.capacity();
        if self.valid_count < self.capacity() {
            self.valid_count += 1;
        }
        Ok(())
    }

    /// Pop the most recent state into `out`, reusing its allocation.
    ///
    /// Returns the state's length, or `None` when nothing is left to rewind.
    pub fn pop_into(&mut self, out: &mut Vec<u8>) -> Option<usize> {
        let read_index = self.step_back()?;
        let bytes = self.slots[read_index].bytes();
        out.clear();
        out.extend_from_slice(bytes);
        Some(bytes.len())
    }

    /// Pop the most recent state as an owned buffer.
    pub fn pop(&mut self) -> Option<Vec<u8>> {
        let read_index = self.step_back()?;
        Some(self.slots[read_index].bytes().to_vec())
    }

    /// Forget every state. Slot storage stays reserved.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.reset();
        }
        self.write_index = 0;
        self.valid_count = 0;
    }

    /// Fraction of slots currently holding rewindable states.
    pub fn usage(&self) -> f32 {
        self.valid_count as f32 / self.capacity() as f32
    }

    pub fn valid_count(&self) -> usize {
        self.valid_count
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn max_state_size(&self) -> usize {
        self.max_state_size
    }

    pub fn is_empty(&self) -> bool {
        self.valid_count == 0
    }

    fn step_back(&mut self) -> Option<usize> {
        if self.valid_count == 0 {
            return None;
        }
        let capacity = self.capacity();
        let read_index = (self.write_index + capacity - 1) % capacity;
        self.write_index = read_index;
        self.valid_count -= 1;
        Some(read_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(tag: u8, len: usize) -> Vec<u8> {
        vec![tag; len]
    }

    #[test]
    fn pops_in_reverse_push_order() {
        let mut buffer = RewindBuffer::new(5, 64).expect("buffer");
        for tag in 1..=4u8 {
            buffer.push(&state(tag, tag as usize * 3)).expect("push");
        }
        assert_eq!(buffer.valid_count(), 4);

        let popped: Vec<u8> = std::iter::from_fn(|| buffer.pop())
            .map(|bytes| bytes[0])
            .collect();
        assert_eq!(popped, vec![4, 3, 2, 1]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn overflow_discards_oldest_states() {
        let mut buffer = RewindBuffer::new(3, 1024).expect("buffer");
        buffer.push(&state(b'A', 100)).expect("push A");
        buffer.push(&state(b'B', 200)).expect("push B");
        buffer.push(&state(b'C', 300)).expect("push C");
        buffer.push(&state(b'D', 400)).expect("push D");
        assert_eq!(buffer.valid_count(), 3);

        let mut out = Vec::new();
        assert_eq!(buffer.pop_into(&mut out), Some(400));
        assert_eq!(out[0], b'D');
        assert_eq!(buffer.pop_into(&mut out), Some(300));
        assert_eq!(out[0], b'C');
        assert_eq!(buffer.pop_into(&mut out), Some(200));
        assert_eq!(out[0], b'B');
        assert_eq!(buffer.pop_into(&mut out), None);
        assert_eq!(buffer.valid_count(), 0);
    }

    #[test]
    fn capacity_plus_k_keeps_most_recent_capacity_states() {
        let capacity = 4;
        let extra = 3;
        let mut buffer = RewindBuffer::new(capacity, 8).expect("buffer");
        for tag in 0..(capacity + extra) as u8 {
            buffer.push(&[tag]).expect("push");
        }
        let popped: Vec<u8> = (0..capacity)
            .map(|_| buffer.pop().expect("state available")[0])
            .collect();
        assert_eq!(popped, vec![6, 5, 4, 3]);
        assert!(buffer.pop().is_none());
    }

    #[test]
    fn empty_buffer_pop_fails() {
        let mut buffer = RewindBuffer::new(2, 16).expect("buffer");
        assert!(buffer.pop().is_none());
        assert_eq!(buffer.valid_count(), 0);

        buffer.push(&[1, 2, 3]).expect("push");
        buffer.clear();
        let mut out = vec![9u8; 4];
        assert_eq!(buffer.pop_into(&mut out), None);
        assert_eq!(out, vec![9u8; 4]);
        assert_eq!(buffer.valid_count(), 0);
    }

    #[test]
    fn oversized_push_leaves_buffer_untouched() {
        let mut buffer = RewindBuffer::new(3, 4).expect("buffer");
        buffer.push(&[1]).expect("push");
        let err = buffer.push(&[0u8; 5]).unwrap_err();
        assert_eq!(err, RewindError::StateTooLarge { size: 5, max: 4 });
        assert_eq!(buffer.valid_count(), 1);
        assert_eq!(buffer.write_index, 1);
        assert_eq!(buffer.pop(), Some(vec![1]));
    }

    #[test]
    fn push_after_pop_overwrites_the_rewound_slot() {
        let mut buffer = RewindBuffer::new(4, 8).expect("buffer");
        buffer.push(&[1]).expect("push");
        buffer.push(&[2]).expect("push");
        buffer.push(&[3]).expect("push");

        assert_eq!(buffer.pop(), Some(vec![3]));
        buffer.push(&[9]).expect("push");
        assert_eq!(buffer.valid_count(), 3);

        assert_eq!(buffer.pop(), Some(vec![9]));
        assert_eq!(buffer.pop(), Some(vec![2]));
        assert_eq!(buffer.pop(), Some(vec![1]));
        assert_eq!(buffer.pop(), None);
    }

    #[test]
    fn clear_keeps_slot_storage_reserved() {
        let mut buffer = RewindBuffer::new(2, 32).expect("buffer");
        buffer.push(&[7u8; 32]).expect("push");
        buffer.clear();
        assert!(buffer.slots.iter().all(|slot| slot.data.capacity() >= 32));
        assert_eq!(buffer.write_index, 0);
        assert_eq!(buffer.usage(), 0.0);
    }

    #[test]
    fn usage_tracks_valid_fraction() {
        let mut buffer = RewindBuffer::new(4, 8).expect("buffer");
        buffer.push(&[1]).expect("push");
        buffer.push(&[2]).expect("push");
        assert!((buffer.usage() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(
            RewindBuffer::new(0, 8).unwrap_err(),
            RewindError::ZeroCapacity
        );
    }
}
