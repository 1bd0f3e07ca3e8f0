use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

/// Bounded set of message ids. Oldest ids are evicted first once `cap` is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SeenRepr", into = "SeenRepr")]
pub struct SeenSet {
    cap: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl SeenSet {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            order: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    /// Returns true if the id was not present before.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.members.contains(id) {
            return false;
        }
        while self.order.len() >= self.cap {
            if let Some(old) = self.order.pop_front() {
                self.members.remove(&old);
            }
        }
        self.order.push_back(id.to_string());
        self.members.insert(id.to_string());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Shrinks (or grows) the bound, evicting oldest entries as needed.
    pub fn set_cap(&mut self, cap: usize) {
        self.cap = cap.max(1);
        while self.order.len() > self.cap {
            if let Some(old) = self.order.pop_front() {
                self.members.remove(&old);
            }
        }
    }
}

// On disk the set is just the ordered id list.
#[derive(Serialize, Deserialize)]
struct SeenRepr {
    cap: usize,
    ids: Vec<String>,
}

impl From<SeenRepr> for SeenSet {
    fn from(repr: SeenRepr) -> Self {
        let mut set = SeenSet::new(repr.cap);
        for id in &repr.ids {
            set.insert(id);
        }
        set
    }
}

impl From<SeenSet> for SeenRepr {
    fn from(set: SeenSet) -> Self {
        SeenRepr {
            cap: set.cap,
            ids: set.order.into_iter().collect(),
        }
    }
}
