use std::sync::{Condvar, Mutex};

/// Countdown latch a session thread parks on while blocked behind other
/// sessions. The count is managed by releasing threads under the manager
/// mutex; the owning thread only ever waits for the zero transition.
#[derive(Debug, Default)]
pub struct CountdownLatch {
    count: Mutex<u64>,
    zero: Condvar,
}

impl CountdownLatch {
    pub fn new() -> CountdownLatch {
        CountdownLatch::default()
    }

    pub fn count(&self) -> u64 {
        *self.count.lock().unwrap()
    }

    /// Replaces the count. Always notifies so the parked thread re-checks
    /// both the count and its cancellation condition.
    pub fn set_count(&self, count: u64) {
        let mut guard = self.count.lock().unwrap();
        *guard = count;
        self.zero.notify_all();
    }

    pub fn count_down(&self) {
        let mut guard = self.count.lock().unwrap();
        *guard = guard.saturating_sub(1);
        if *guard == 0 {
            self.zero.notify_all();
        }
    }

    /// Blocks until the count reaches zero or `cancelled` reports true.
    /// `cancelled` is re-checked on every wakeup so an abort flagged by
    /// another thread is never slept through.
    pub fn await_zero<F: Fn() -> bool>(&self, cancelled: F) {
        let mut guard = self.count.lock().unwrap();
        while *guard != 0 && !cancelled() {
            guard = self.zero.wait(guard).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CountdownLatch;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn zero_count_does_not_block() {
        let latch = CountdownLatch::new();
        latch.await_zero(|| false);
    }

    #[test]
    fn count_down_releases_waiter() {
        let latch = Arc::new(CountdownLatch::new());
        latch.set_count(2);
        let released = Arc::new(AtomicBool::new(false));

        let handle = {
            let latch = latch.clone();
            let released = released.clone();
            thread::spawn(move || {
                latch.await_zero(|| false);
                released.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!released.load(Ordering::SeqCst));
        latch.count_down();
        thread::sleep(Duration::from_millis(20));
        assert!(!released.load(Ordering::SeqCst));
        latch.count_down();
        handle.join().unwrap();
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn set_count_zero_releases_waiter() {
        let latch = Arc::new(CountdownLatch::new());
        latch.set_count(3);
        let handle = {
            let latch = latch.clone();
            thread::spawn(move || latch.await_zero(|| false))
        };
        thread::sleep(Duration::from_millis(20));
        latch.set_count(0);
        handle.join().unwrap();
    }

    #[test]
    fn cancellation_observed_on_wakeup() {
        let latch = Arc::new(CountdownLatch::new());
        latch.set_count(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = {
            let latch = latch.clone();
            let cancelled = cancelled.clone();
            thread::spawn(move || latch.await_zero(|| cancelled.load(Ordering::SeqCst)))
        };
        thread::sleep(Duration::from_millis(20));
        cancelled.store(true, Ordering::SeqCst);
        // a wakeup with a non-zero count must still observe the cancel
        latch.set_count(5);
        handle.join().unwrap();
        assert_eq!(latch.count(), 5);
    }
}
