//! Fixed-capacity circular buffer.
//!
//! [`RingBuffer`] keeps the most recent `capacity` elements. Enqueueing into a
//! full buffer overwrites the oldest element, so callers that cannot afford to
//! lose data must drain it before it fills (see [`crate::framing`]).
//!
//! Logical index 0 is always the oldest element.

use std::ops::{Index, IndexMut, Range};

/// A fixed-capacity FIFO with random access and ring overwrite semantics.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    /// Physical index of the oldest element.
    tail: usize,
    len: usize,
}

impl<T: Copy + Default + PartialEq> RingBuffer<T> {
    /// Creates an empty buffer holding at most `capacity` elements.
    ///
    /// A zero-capacity buffer accepts nothing: every enqueue is dropped.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![T::default(); capacity],
            tail: 0,
            len: 0,
        }
    }

    /// Returns the maximum number of elements.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of buffered elements.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if the next enqueue would overwrite the oldest element.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Returns the number of elements that can be enqueued without overwriting.
    #[must_use]
    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    /// Changes the capacity, keeping the oldest `min(len, capacity)` elements.
    pub fn set_capacity(&mut self, capacity: usize) {
        if capacity == self.capacity() {
            return;
        }

        let keep = self.len.min(capacity);
        let mut slots = vec![T::default(); capacity];
        for (i, slot) in slots.iter_mut().take(keep).enumerate() {
            *slot = self[i];
        }

        self.slots = slots;
        self.tail = 0;
        self.len = keep;
    }

    /// Appends an element.
    ///
    /// Returns the overwritten element if the buffer was full.
    pub fn enqueue(&mut self, item: T) -> Option<T> {
        let capacity = self.capacity();
        if capacity == 0 {
            return Some(item);
        }

        let head = (self.tail + self.len) % capacity;
        if self.len == capacity {
            let evicted = std::mem::replace(&mut self.slots[head], item);
            self.tail = (self.tail + 1) % capacity;
            Some(evicted)
        } else {
            self.slots[head] = item;
            self.len += 1;
            None
        }
    }

    /// Appends every element of `items`, returning how many old elements were
    /// overwritten.
    pub fn extend_from_slice(&mut self, items: &[T]) -> usize {
        items
            .iter()
            .filter_map(|item| self.enqueue(*item))
            .count()
    }

    /// Removes and returns the oldest element.
    pub fn dequeue(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.tail];
        self.tail = (self.tail + 1) % self.capacity();
        self.len -= 1;
        Some(item)
    }

    /// Removes the `count` oldest elements. Removing `len()` or more empties
    /// the buffer.
    pub fn remove(&mut self, count: usize) {
        if count >= self.len {
            self.clear();
        } else {
            self.tail = (self.tail + count) % self.capacity();
            self.len -= count;
        }
    }

    /// Removes every element.
    pub fn clear(&mut self) {
        self.tail = 0;
        self.len = 0;
    }

    /// Returns the element at logical `index`, oldest first.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        (index < self.len).then(|| self.slots[self.physical(index)])
    }

    /// Returns a mutable reference to the element at logical `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index < self.len {
            let physical = self.physical(index);
            Some(&mut self.slots[physical])
        } else {
            None
        }
    }

    /// Returns the logical index of the first `item` at or after `start`.
    #[must_use]
    pub fn index_of(&self, item: T, start: usize) -> Option<usize> {
        (start..self.len).find(|&i| self[i] == item)
    }

    /// Returns the logical index where `needle` first occurs in full at or
    /// after `start`. An empty needle never matches.
    #[must_use]
    pub fn index_of_seq(&self, needle: &[T], start: usize) -> Option<usize> {
        if needle.is_empty() || needle.len() > self.len {
            return None;
        }
        (start..=self.len - needle.len())
            .find(|&i| needle.iter().enumerate().all(|(j, b)| self[i + j] == *b))
    }

    /// Inserts `item` at logical `index`, shifting newer elements back.
    ///
    /// On a full buffer the oldest element is overwritten and returned (which
    /// is `item` itself when `index` is 0).
    ///
    /// # Panics
    /// Panics if `index > len()`.
    pub fn insert(&mut self, index: usize, item: T) -> Option<T> {
        assert!(index <= self.len, "insert index {index} out of range {}", self.len);

        if index == self.len || self.capacity() == 0 {
            return self.enqueue(item);
        }

        let last = self[self.len - 1];
        for i in (index..self.len - 1).rev() {
            self[i + 1] = self[i];
        }
        self[index] = item;
        self.enqueue(last)
    }

    /// Removes and returns the element at logical `index`.
    ///
    /// # Panics
    /// Panics if `index >= len()`.
    pub fn remove_at(&mut self, index: usize) -> T {
        assert!(index < self.len, "remove index {index} out of range {}", self.len);

        let removed = self[index];
        for i in (1..=index).rev() {
            self[i] = self[i - 1];
        }
        self.dequeue();
        removed
    }

    /// Iterates the buffered elements, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len).map(move |i| self[i])
    }

    /// Copies a logical range into a new vector.
    ///
    /// # Panics
    /// Panics if the range extends past `len()`.
    #[must_use]
    pub fn copy_to_vec(&self, range: Range<usize>) -> Vec<T> {
        assert!(range.end <= self.len, "range end {} out of range {}", range.end, self.len);
        range.map(|i| self[i]).collect()
    }

    fn physical(&self, index: usize) -> usize {
        (self.tail + index) % self.capacity()
    }
}

impl<T: Copy + Default + PartialEq> Index<usize> for RingBuffer<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        assert!(index < self.len, "index {index} out of range {}", self.len);
        &self.slots[self.physical(index)]
    }
}

impl<T: Copy + Default + PartialEq> IndexMut<usize> for RingBuffer<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        assert!(index < self.len, "index {index} out of range {}", self.len);
        let physical = self.physical(index);
        &mut self.slots[physical]
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn contents(ring: &RingBuffer<u8>) -> Vec<u8> {
        ring.iter().collect()
    }

    #[test]
    fn test_enqueue_dequeue_order() {
        let mut ring = RingBuffer::new(4);
        assert!(ring.is_empty());
        for b in 1..=3u8 {
            assert_eq!(ring.enqueue(b), None);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.dequeue(), Some(1));
        assert_eq!(ring.dequeue(), Some(2));
        assert_eq!(ring.dequeue(), Some(3));
        assert_eq!(ring.dequeue(), None);
    }

    #[test]
    fn test_overwrite_drops_oldest() {
        let mut ring = RingBuffer::new(3);
        ring.extend_from_slice(b"abc");
        assert!(ring.is_full());

        assert_eq!(ring.enqueue(b'd'), Some(b'a'));
        assert_eq!(ring.extend_from_slice(b"ef"), 2);
        assert_eq!(contents(&ring), b"def");
    }

    #[test]
    fn test_zero_capacity_drops_everything() {
        let mut ring = RingBuffer::new(0);
        assert_eq!(ring.enqueue(7u8), Some(7));
        assert!(ring.is_empty());
        assert_eq!(ring.dequeue(), None);
    }

    #[test]
    fn test_remove_advances_tail() {
        let mut ring = RingBuffer::new(5);
        ring.extend_from_slice(b"hello");
        ring.remove(2);
        assert_eq!(contents(&ring), b"llo");

        // Wrap around the physical end.
        ring.extend_from_slice(b"!?");
        assert_eq!(contents(&ring), b"llo!?");

        ring.remove(10);
        assert!(ring.is_empty());
        ring.enqueue(b'x');
        assert_eq!(contents(&ring), b"x");
    }

    #[test]
    fn test_index_and_get() {
        let mut ring = RingBuffer::new(3);
        ring.extend_from_slice(b"abcd");
        assert_eq!(ring[0], b'b');
        assert_eq!(ring.get(2), Some(b'd'));
        assert_eq!(ring.get(3), None);

        ring[1] = b'X';
        *ring.get_mut(2).unwrap() = b'Y';
        assert_eq!(contents(&ring), b"bXY");
        assert!(ring.get_mut(3).is_none());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_index_out_of_range_panics() {
        let ring: RingBuffer<u8> = RingBuffer::new(2);
        let _ = ring[0];
    }

    #[test]
    fn test_index_of_seq_across_wrap() {
        let mut ring = RingBuffer::new(6);
        ring.extend_from_slice(b"xxxx");
        ring.remove(3);
        ring.extend_from_slice(b"ab\r\nc");

        assert_eq!(contents(&ring), b"xab\r\nc");
        assert_eq!(ring.index_of_seq(b"\r\n", 0), Some(3));
        assert_eq!(ring.index_of_seq(b"\r\n", 4), None);
        assert_eq!(ring.index_of(b'c', 0), Some(5));
        assert_eq!(ring.index_of_seq(b"", 0), None);
        assert_eq!(ring.index_of_seq(b"toolongneedle", 0), None);
    }

    #[test]
    fn test_insert_and_remove_at() {
        let mut ring = RingBuffer::new(5);
        ring.extend_from_slice(b"acd");
        assert_eq!(ring.insert(1, b'b'), None);
        assert_eq!(contents(&ring), b"abcd");
        assert_eq!(ring.insert(4, b'e'), None);
        assert_eq!(contents(&ring), b"abcde");

        // Full: the oldest element falls off.
        assert_eq!(ring.insert(2, b'Z'), Some(b'a'));
        assert_eq!(contents(&ring), b"bZcde");
        assert_eq!(ring.insert(0, b'!'), Some(b'!'));
        assert_eq!(contents(&ring), b"bZcde");

        assert_eq!(ring.remove_at(1), b'Z');
        assert_eq!(contents(&ring), b"bcde");
        assert_eq!(ring.remove_at(3), b'e');
        assert_eq!(ring.remove_at(0), b'b');
        assert_eq!(contents(&ring), b"cd");
    }

    #[test]
    fn test_set_capacity_keeps_oldest() {
        let mut ring = RingBuffer::new(4);
        ring.extend_from_slice(b"abcdef");
        assert_eq!(contents(&ring), b"cdef");

        ring.set_capacity(2);
        assert_eq!(ring.capacity(), 2);
        assert_eq!(contents(&ring), b"cd");

        ring.set_capacity(8);
        ring.extend_from_slice(b"xyz");
        assert_eq!(contents(&ring), b"cdxyz");
        assert_eq!(ring.free(), 3);
    }

    #[test]
    fn test_copy_to_vec() {
        let mut ring = RingBuffer::new(4);
        ring.extend_from_slice(b"123456");
        assert_eq!(ring.copy_to_vec(1..3), b"45");
        assert!(ring.copy_to_vec(0..0).is_empty());
    }

    proptest! {
        /// Without overflow the buffer is a plain FIFO.
        #[test]
        fn fifo_when_not_overflowing(data in proptest::collection::vec(any::<u8>(), 0..64), extra in 0usize..16) {
            let mut ring = RingBuffer::new(data.len() + extra);
            prop_assert_eq!(ring.extend_from_slice(&data), 0);

            let mut out = Vec::new();
            while let Some(b) = ring.dequeue() {
                out.push(b);
            }
            prop_assert_eq!(out, data);
        }

        /// Overflow keeps exactly the newest `capacity` elements.
        #[test]
        fn overflow_drops_exactly_oldest(data in proptest::collection::vec(any::<u8>(), 0..128), capacity in 1usize..32) {
            let mut ring = RingBuffer::new(capacity);
            let evicted = ring.extend_from_slice(&data);

            let kept = data.len().min(capacity);
            prop_assert_eq!(evicted, data.len() - kept);
            prop_assert_eq!(contents(&ring), data[data.len() - kept..].to_vec());
        }

        /// `remove(k)` matches draining k elements one at a time.
        #[test]
        fn bulk_remove_matches_dequeue(data in proptest::collection::vec(any::<u8>(), 0..64), k in 0usize..80) {
            let mut bulk = RingBuffer::new(48);
            let mut single = RingBuffer::new(48);
            bulk.extend_from_slice(&data);
            single.extend_from_slice(&data);

            bulk.remove(k);
            for _ in 0..k {
                single.dequeue();
            }
            prop_assert_eq!(contents(&bulk), contents(&single));
        }
    }
}
