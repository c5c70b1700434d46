use std::collections::VecDeque;

pub const HISTORY_CAPACITY: usize = 25;

/// Bounded record of attempt ids that were already executed.
///
/// Strict FIFO: when full, the oldest insertion is evicted. Seeing an id again
/// does not refresh its position.
#[derive(Debug)]
pub struct CommandHistory {
    queue: VecDeque<String>,
    capacity: usize,
}

impl CommandHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn contains(&self, attempt_id: &str) -> bool {
        self.queue.iter().any(|id| id == attempt_id)
    }

    pub fn add(&mut self, attempt_id: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        while self.queue.len() >= self.capacity {
            self.queue.pop_front();
        }
        self.queue.push_back(attempt_id.into());
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_after_capacity() {
        let mut history = CommandHistory::default();
        for index in 1..=26 {
            history.add(format!("id-{index}"));
        }
        assert!(!history.contains("id-1"));
        for index in 2..=26 {
            assert!(history.contains(&format!("id-{index}")), "id-{index}");
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);
    }

    #[test]
    fn re_adding_does_not_refresh_position() {
        let mut history = CommandHistory::new(3);
        history.add("a");
        history.add("b");
        history.add("c");
        assert!(history.contains("a"));
        history.add("d");
        assert!(!history.contains("a"));
        assert!(history.contains("b"));
        history.add("e");
        assert!(!history.contains("b"));
        assert!(history.contains("c"));
    }

    #[test]
    fn zero_capacity_holds_nothing() {
        let mut history = CommandHistory::new(0);
        history.add("a");
        assert!(history.is_empty());
        assert!(!history.contains("a"));
    }
}
