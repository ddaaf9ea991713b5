use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::domain::QueueSnapshot;

/// FIFO hand-off between the intake and the processor.
#[derive(Debug)]
pub struct SubmissionQueue<T> {
    pending: Mutex<VecDeque<T>>,
}

impl<T> SubmissionQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn extend(&self, values: impl IntoIterator<Item = T>) {
        self.pending.lock().extend(values);
    }

    pub fn drain(&self) -> Vec<T> {
        self.pending.lock().drain(..).collect()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            pending: self.pending.lock().len(),
        }
    }
}

impl<T> Default for SubmissionQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
