//! Index-keyed holding area that releases items strictly in sequence.

use std::collections::VecDeque;

use snapedit_common::error::{SnapEditError, SnapEditResult};

/// Reorder arena for out-of-order stage completions.
///
/// Slot `i` of the arena holds sequence number `next_expected + i`, so
/// releasing the head is O(1) and inserting is O(gap).
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    slots: VecDeque<Option<T>>,
    next_expected: u64,
    held: usize,
    max_gap: usize,
}

impl<T> ReorderBuffer<T> {
    /// `max_gap` bounds how far ahead of the cursor an item may arrive.
    pub fn new(max_gap: usize) -> Self {
        Self {
            slots: VecDeque::new(),
            next_expected: 0,
            held: 0,
            max_gap: max_gap.max(1),
        }
    }

    /// Park `item` under `index`.
    pub fn insert(&mut self, index: u64, item: T) -> SnapEditResult<()> {
        if index < self.next_expected {
            return Err(SnapEditError::invalid_state(format!(
                "sequence {index} was already released (next is {})",
                self.next_expected
            )));
        }
        let offset = (index - self.next_expected) as usize;
        if offset >= self.max_gap {
            return Err(SnapEditError::invalid_state(format!(
                "sequence {index} is {offset} ahead of {}, limit {}",
                self.next_expected, self.max_gap
            )));
        }
        if offset >= self.slots.len() {
            self.slots.resize_with(offset + 1, || None);
        }
        let slot = &mut self.slots[offset];
        if slot.is_some() {
            return Err(SnapEditError::invalid_state(format!(
                "sequence {index} inserted twice"
            )));
        }
        *slot = Some(item);
        self.held += 1;
        Ok(())
    }

    /// Release the item at the cursor, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<T> {
        match self.slots.front() {
            Some(Some(_)) => {}
            _ => return None,
        }
        let item = self.slots.pop_front().flatten();
        self.next_expected += 1;
        self.held -= 1;
        item
    }

    /// Release every item that is now contiguous with the cursor.
    pub fn drain_ready(&mut self) -> Vec<T> {
        let mut ready = Vec::new();
        while let Some(item) = self.pop_ready() {
            ready.push(item);
        }
        ready
    }

    /// Sequence number that will be released next.
    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Items held but not yet released.
    pub fn len(&self) -> usize {
        self.held
    }

    pub fn is_empty(&self) -> bool {
        self.held == 0
    }
}
