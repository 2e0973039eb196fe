use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard};

/// Fixed-capacity rolling window of recent samples
///
/// Owned by the poller, which is the only writer. Readers get a
/// [`WindowReader`] and only ever see copies.
pub struct SampleWindow<T> {
    data: Arc<RwLock<VecDeque<T>>>,
    capacity: usize,
}

impl<T: Clone> SampleWindow<T> {
    /// # Arguments
    /// * `capacity` - Maximum number of samples kept; older ones are evicted
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest once full
    pub fn push(&self, sample: T) {
        let mut data = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        data.push_back(sample);
        while data.len() > self.capacity {
            data.pop_front();
        }
    }

    /// Read-only handle for the presentation layer
    pub fn reader(&self) -> WindowReader<T> {
        WindowReader {
            data: Arc::clone(&self.data),
            capacity: self.capacity,
        }
    }
}

/// Read-only view onto a [`SampleWindow`]
#[derive(Clone)]
pub struct WindowReader<T> {
    data: Arc<RwLock<VecDeque<T>>>,
    capacity: usize,
}

impl<T: Clone> WindowReader<T> {
    fn read(&self) -> RwLockReadGuard<'_, VecDeque<T>> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Copy of the window, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        self.read().iter().cloned().collect()
    }

    /// The `n` most recent samples, oldest first
    pub fn recent(&self, n: usize) -> Vec<T> {
        let data = self.read();
        data.iter().skip(data.len().saturating_sub(n)).cloned().collect()
    }

    pub fn latest(&self) -> Option<T> {
        self.read().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
