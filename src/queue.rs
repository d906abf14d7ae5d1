//! Blocking FIFO between hotplug notifier threads and the arrival consumer

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

struct State<T> {
    items: VecDeque<T>,
    cancelled: bool,
}

/// Thread-safe blocking queue with wake-on-cancel
///
/// Producers push from arbitrary threads; the consumer blocks in
/// [`HotplugQueue::pop`] until an item arrives or the queue is cancelled.
pub struct HotplugQueue<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

impl<T> Default for HotplugQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HotplugQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                cancelled: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Enqueue an item; returns false (dropping it) after cancellation
    pub fn push(&self, item: T) -> bool {
        let mut state = self.state.lock();
        if state.cancelled {
            return false;
        }
        state.items.push_back(item);
        self.ready.notify_one();
        true
    }

    /// Block until an item is available
    ///
    /// Returns `None` once the queue has been cancelled; pending items are
    /// abandoned at that point.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.cancelled {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            self.ready.wait(&mut state);
        }
    }

    /// Wake every waiter and refuse further items
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        state.items.clear();
        self.ready.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
