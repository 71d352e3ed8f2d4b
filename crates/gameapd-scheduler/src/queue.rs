//! In-memory ordered multiset of pending and working tasks.

use gameapd_domain::GDTask;
use std::sync::{Arc, RwLock};

/// Task queue with rotation-based fairness: `next` returns the head and
/// moves it to the tail, so a task blocked on a dependency is revisited
/// only after every other task had its turn.
#[derive(Default)]
pub struct TaskQueue {
    tasks: RwLock<Vec<Arc<GDTask>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add tasks whose id is not already present.
    pub fn insert(&self, tasks: Vec<Arc<GDTask>>) {
        let mut queue = self.tasks.write().unwrap();
        for task in tasks {
            if !queue.iter().any(|t| t.id() == task.id()) {
                queue.push(task);
            }
        }
    }

    /// Head of the queue, rotated to the tail.
    pub fn next(&self) -> Option<Arc<GDTask>> {
        let mut queue = self.tasks.write().unwrap();
        if queue.is_empty() {
            return None;
        }

        let task = queue.remove(0);
        queue.push(task.clone());

        Some(task)
    }

    /// Swap-remove by id; no-op when absent.
    pub fn remove(&self, id: i64) {
        let mut queue = self.tasks.write().unwrap();
        if let Some(pos) = queue.iter().position(|t| t.id() == id) {
            queue.swap_remove(pos);
        }
    }

    pub fn find_by_id(&self, id: i64) -> Option<Arc<GDTask>> {
        self.tasks
            .read()
            .unwrap()
            .iter()
            .find(|t| t.id() == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
