use std::collections::VecDeque;
use std::sync::Mutex;

use crate::task::DataSourcePullTask;

/// A thread-safe singly-linked FIFO. `take` never blocks: an empty queue
/// returns `None` immediately so workers can fall back to idle-sleep.
#[derive(Default)]
pub struct TaskQueue {
    inner: Mutex<VecDeque<DataSourcePullTask>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, task: DataSourcePullTask) {
        self.inner.lock().unwrap().push_back(task);
    }

    pub fn take(&self) -> Option<DataSourcePullTask> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn take_on_empty_queue_returns_none() {
        let queue = TaskQueue::new();
        assert!(queue.take().is_none());
    }
}
