use std::collections::{HashSet, VecDeque};

pub(crate) const HANDLED_IDS_CAPACITY: usize = 200;

/// Bounded set of command ids already handled in this session.
///
/// Once full, the oldest inserted id is forgotten first.
pub(crate) struct RecentIds {
    capacity: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl RecentIds {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    /// Returns `true` when `id` was not present and has been recorded.
    pub(crate) fn insert(&mut self, id: &str) -> bool {
        if self.members.contains(id) {
            return false;
        }
        self.members.insert(id.to_string());
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}

impl Default for RecentIds {
    fn default() -> Self {
        Self::new(HANDLED_IDS_CAPACITY)
    }
}
