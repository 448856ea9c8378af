//! Circular buffer laid out in a flat array of words
//!
//! The same layout backs both the shared memory segment and the in-process
//! table, so a window behaves identically whichever backend holds it.
//!
//! ```text
//! word 0   magic      (0 = never initialised)
//! word 1   retired    (1 = a resize moved the window to a new segment)
//! word 2   capacity   (max_size)
//! word 3   head       (slot of the oldest entry)
//! word 4   len
//! word 5.. slots[capacity]
//! ```
//!
//! Header values are clamped on every read. A process killed halfway
//! through a write can leave them inconsistent; that costs accuracy of the
//! window contents, never an out-of-bounds access.

const MAGIC: i64 = 0x6275_6c77_6172_6b31; // "bulwark1"
const MAGIC_AT: usize = 0;
const RETIRED_AT: usize = 1;
const CAPACITY_AT: usize = 2;
const HEAD_AT: usize = 3;
const LEN_AT: usize = 4;

/// Words taken by the header in front of the slots
pub const HEADER_WORDS: usize = 5;

/// Number of words a window of `capacity` entries occupies
#[must_use]
pub fn words_for(capacity: usize) -> usize {
    HEADER_WORDS + capacity
}

/// Read-only view of a window's words
#[derive(Debug, Clone, Copy)]
pub(crate) struct RingRef<'a> {
    words: &'a [i64],
}

impl<'a> RingRef<'a> {
    pub(crate) fn new(words: &'a [i64]) -> Self {
        Self { words }
    }

    pub(crate) fn is_initialised(self) -> bool {
        self.words.len() > HEADER_WORDS && self.words[MAGIC_AT] == MAGIC
    }

    pub(crate) fn is_retired(self) -> bool {
        self.words.len() > HEADER_WORDS && self.words[RETIRED_AT] != 0
    }

    pub(crate) fn capacity(self) -> usize {
        let room = self.words.len().saturating_sub(HEADER_WORDS);
        let stored = usize::try_from(self.words[CAPACITY_AT]).unwrap_or(room);
        stored.clamp(1, room.max(1))
    }

    fn head(self) -> usize {
        usize::try_from(self.words[HEAD_AT]).unwrap_or(0) % self.capacity()
    }

    pub(crate) fn len(self) -> usize {
        usize::try_from(self.words[LEN_AT])
            .unwrap_or(0)
            .min(self.capacity())
    }

    fn slot(self, offset: usize) -> usize {
        HEADER_WORDS + (self.head() + offset) % self.capacity()
    }

    pub(crate) fn get(self, offset: usize) -> Option<i64> {
        (offset < self.len()).then(|| self.words[self.slot(offset)])
    }

    /// Entries oldest first
    pub(crate) fn to_vec(self) -> Vec<i64> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }

    /// The `keep` most recent entries, oldest first
    pub(crate) fn newest(self, keep: usize) -> Vec<i64> {
        let entries = self.to_vec();
        let skip = entries.len().saturating_sub(keep);
        entries[skip..].to_vec()
    }
}

/// Mutable view of a window, only reachable inside a critical section
#[derive(Debug)]
pub struct Ring<'a> {
    words: &'a mut [i64],
}

impl<'a> Ring<'a> {
    pub(crate) fn new(words: &'a mut [i64]) -> Self {
        Self { words }
    }

    /// Lay out an empty window of `capacity` holding `entries`
    ///
    /// `entries` must not be longer than `capacity`, and `words` must
    /// hold at least `words_for(capacity)` words.
    pub(crate) fn format(words: &'a mut [i64], capacity: usize, entries: &[i64]) -> Self {
        debug_assert!(entries.len() <= capacity);
        debug_assert!(words.len() >= words_for(capacity));
        words.fill(0);
        words[MAGIC_AT] = MAGIC;
        words[CAPACITY_AT] = to_word(capacity);
        let mut ring = Self { words };
        for value in entries {
            ring.push(*value);
        }
        ring
    }

    fn view(&self) -> RingRef<'_> {
        RingRef::new(self.words)
    }

    pub(crate) fn retire(&mut self) {
        self.words[RETIRED_AT] = 1;
    }

    /// Number of entries currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.view().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.view().capacity()
    }

    /// Oldest entry
    #[must_use]
    pub fn first(&self) -> Option<i64> {
        self.view().get(0)
    }

    /// Newest entry
    #[must_use]
    pub fn last(&self) -> Option<i64> {
        let len = self.len();
        len.checked_sub(1).and_then(|i| self.view().get(i))
    }

    /// Entries oldest first
    #[must_use]
    pub fn to_vec(&self) -> Vec<i64> {
        self.view().to_vec()
    }

    /// Append `value`, evicting the oldest entry when full
    pub fn push(&mut self, value: i64) {
        let view = self.view();
        let (capacity, head, len) = (view.capacity(), view.head(), view.len());
        if len == capacity {
            self.words[HEADER_WORDS + head] = value;
            self.words[HEAD_AT] = to_word((head + 1) % capacity);
        } else {
            self.words[HEADER_WORDS + (head + len) % capacity] = value;
            self.words[LEN_AT] = to_word(len + 1);
        }
    }

    /// Remove the oldest entry, if any
    pub fn pop(&mut self) -> Option<i64> {
        let view = self.view();
        let oldest = view.get(0)?;
        let (capacity, head, len) = (view.capacity(), view.head(), view.len());
        self.words[HEAD_AT] = to_word((head + 1) % capacity);
        self.words[LEN_AT] = to_word(len - 1);
        Some(oldest)
    }

    /// Drop every entry, keeping the capacity
    pub fn clear(&mut self) {
        self.words[HEAD_AT] = 0;
        self.words[LEN_AT] = 0;
    }
}

fn to_word(value: usize) -> i64 {
    // capacities are bounded by the ceiling, far below i64::MAX
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    fn ring_words(capacity: usize) -> Vec<i64> {
        vec![0; words_for(capacity)]
    }

    #[test]
    fn test_push_evicts_oldest_when_full() {
        let mut words = ring_words(3);
        let mut ring = Ring::format(&mut words, 3, &[]);
        for v in [1, 2, 3, 4] {
            ring.push(v);
        }
        assert_eq!(ring.to_vec(), vec![2, 3, 4]);
        assert_eq!(ring.first(), Some(2));
        assert_eq!(ring.last(), Some(4));
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_pop_on_empty_is_none() {
        let mut words = ring_words(2);
        let mut ring = Ring::format(&mut words, 2, &[]);
        assert_eq!(ring.pop(), None);
        assert_eq!(ring.first(), None);
        assert_eq!(ring.last(), None);

        ring.push(5);
        assert_eq!(ring.pop(), Some(5));
        assert!(ring.is_empty());
    }

    #[test]
    fn test_format_with_entries() {
        let mut words = ring_words(4);
        let ring = Ring::format(&mut words, 4, &[110, 120]);
        assert_eq!(ring.to_vec(), vec![110, 120]);
        assert_eq!(ring.max_size(), 4);
        assert!(RingRef::new(&words).is_initialised());
        assert!(!RingRef::new(&words).is_retired());
    }

    #[test]
    fn test_newest_keeps_most_recent() {
        let mut words = ring_words(4);
        let mut ring = Ring::format(&mut words, 4, &[]);
        for v in [80, 90, 100, 110, 120] {
            ring.push(v);
        }
        assert_eq!(RingRef::new(&words).newest(3), vec![100, 110, 120]);
        assert_eq!(RingRef::new(&words).newest(10), vec![90, 100, 110, 120]);
    }

    #[test]
    fn test_corrupted_header_is_clamped() {
        let mut words = ring_words(3);
        Ring::format(&mut words, 3, &[1, 2]);
        words[CAPACITY_AT] = 1_000_000;
        words[HEAD_AT] = -7;
        words[LEN_AT] = 99;

        let mut ring = Ring::new(&mut words);
        assert_eq!(ring.max_size(), 3);
        assert_eq!(ring.len(), 3);
        ring.push(9);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.last(), Some(9));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push(i64),
        Pop,
        Clear,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            6 => any::<i64>().prop_map(Op::Push),
            2 => Just(Op::Pop),
            1 => Just(Op::Clear),
        ]
    }

    proptest! {
        #[test]
        fn prop_matches_bounded_fifo(capacity in 1usize..16, ops in prop::collection::vec(op(), 0..200)) {
            let mut words = ring_words(capacity);
            let mut ring = Ring::format(&mut words, capacity, &[]);
            let mut model: VecDeque<i64> = VecDeque::new();

            for op in ops {
                match op {
                    Op::Push(v) => {
                        if model.len() == capacity {
                            model.pop_front();
                        }
                        model.push_back(v);
                        ring.push(v);
                    }
                    Op::Pop => prop_assert_eq!(ring.pop(), model.pop_front()),
                    Op::Clear => {
                        model.clear();
                        ring.clear();
                    }
                }
                prop_assert!(ring.len() <= ring.max_size());
                prop_assert_eq!(ring.first(), model.front().copied());
                prop_assert_eq!(ring.last(), model.back().copied());
            }
            prop_assert_eq!(ring.to_vec(), model.into_iter().collect::<Vec<_>>());
        }
    }
}
