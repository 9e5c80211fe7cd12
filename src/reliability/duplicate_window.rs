use std::collections::VecDeque;
use rustc_hash::FxHashSet;


/// Remembers the most recent sequence numbers received from the peer, up to a fixed number.
///  Older entries are evicted in arrival order.
pub struct DuplicateWindow {
    capacity: usize,
    seen: FxHashSet<u64>,
    arrival_order: VecDeque<u64>,
}

impl DuplicateWindow {
    pub fn new(capacity: usize) -> DuplicateWindow {
        DuplicateWindow {
            capacity,
            seen: Default::default(),
            arrival_order: Default::default(),
        }
    }

    /// returns `true` if the sequence number was not in the window before
    pub fn insert(&mut self, sequence: u64) -> bool {
        if !self.seen.insert(sequence) {
            return false;
        }

        self.arrival_order.push_back(sequence);
        while self.arrival_order.len() > self.capacity {
            if let Some(evicted) = self.arrival_order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    #[cfg(test)]
    pub fn num_remembered(&self) -> usize {
        self.arrival_order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_duplicates() {
        let mut window = DuplicateWindow::new(8);
        assert!(window.insert(1));
        assert!(window.insert(2));
        assert!(!window.insert(1));
        assert!(!window.insert(2));
    }

    #[test]
    fn test_evicts_oldest() {
        let mut window = DuplicateWindow::new(2);
        assert!(window.insert(1));
        assert!(window.insert(2));
        assert!(window.insert(3));

        // 1 was evicted, so it is accepted again
        assert!(window.insert(1));
        assert!(!window.insert(3));
    }

    #[test]
    fn test_size_is_bounded() {
        let mut window = DuplicateWindow::new(4);
        for sequence in 0..10_000 {
            window.insert(sequence);
        }
        assert_eq!(window.num_remembered(), 4);
        assert_eq!(window.seen.len(), 4);
    }
}
