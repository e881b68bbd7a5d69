//! The worker-wake semaphore of spec §4.6/§9: `sem_t wake_workers` reimplemented
//! as a counting semaphore over `Mutex`+`Condvar`. The event loop posts once per
//! entry it moves into *working*; each worker's `wait` call consumes one post.

use std::sync::{Condvar, Mutex};

#[derive(Default)]
pub struct WorkerSignal {
    count: Mutex<u64>,
    condvar: Condvar,
}

impl WorkerSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakes one waiter, or lets the next `wait` return immediately if none
    /// is currently blocked.
    pub fn post(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.condvar.notify_one();
    }

    /// Blocks until a post is available, then consumes it.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.condvar.wait(count).unwrap();
        }
        *count -= 1;
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::*;

    #[test]
    fn post_before_wait_is_not_lost() {
        let signal = WorkerSignal::new();
        signal.post();
        signal.wait(); // must not block
    }

    #[test]
    fn wakes_a_blocked_waiter() {
        let signal = Arc::new(WorkerSignal::new());
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait())
        };
        thread::sleep(Duration::from_millis(20));
        signal.post();
        waiter.join().unwrap();
    }
}
