use std::collections::BTreeMap;

/// Holds results that complete out of order and releases them strictly by index.
#[derive(Debug)]
pub struct OrderedBuffer<T> {
    next: u64,
    pending: BTreeMap<u64, T>,
}

impl<T> OrderedBuffer<T> {
    pub fn new(start: u64) -> Self {
        Self {
            next: start,
            pending: BTreeMap::new(),
        }
    }

    /// Index the next released item must carry.
    pub fn next_index(&self) -> u64 {
        self.next
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Stores `item` and returns the longest contiguous run starting at the next expected index.
    pub fn push(&mut self, index: u64, item: T) -> Vec<(u64, T)> {
        if index < self.next {
            tracing::warn!(
                "Ignoring item {} already released, next expected {}",
                index,
                self.next
            );
            return Vec::new();
        }
        self.pending.insert(index, item);

        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next) {
            ready.push((self.next, item));
            self.next += 1;
        }
        ready
    }
}
