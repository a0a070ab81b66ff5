use parking_lot::Mutex;
use std::sync::Arc;

type OnZero = Box<dyn FnOnce() + Send>;

/// A counted barrier that fires a callback once after `n` ticks.
///
/// The callback runs immediately when `n` is zero, and ticks past zero are
/// ignored. The callback is always invoked without any internal lock held,
/// so it may freely schedule more work.
///
/// # Examples
///
/// ```rust
/// use idxd::common::Countdown;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// let fired = Arc::new(AtomicBool::new(false));
/// let flag = fired.clone();
/// let countdown = Countdown::new(2, move || flag.store(true, Ordering::SeqCst));
/// countdown.tick();
/// assert!(!fired.load(Ordering::SeqCst));
/// countdown.tick();
/// assert!(fired.load(Ordering::SeqCst));
/// ```
#[derive(Clone)]
pub struct Countdown {
    inner: Arc<CountdownInner>,
}

struct CountdownInner {
    remaining: Mutex<usize>,
    on_zero: Mutex<Option<OnZero>>,
}

impl Countdown {
    pub fn new(count: usize, on_zero: impl FnOnce() + Send + 'static) -> Self {
        let countdown = Countdown {
            inner: Arc::new(CountdownInner {
                remaining: Mutex::new(count),
                on_zero: Mutex::new(Some(Box::new(on_zero))),
            }),
        };
        if count == 0 {
            countdown.fire();
        }
        countdown
    }

    /// Records one completion.
    pub fn tick(&self) {
        let reached_zero = {
            let mut remaining = self.inner.remaining.lock();
            if *remaining == 0 {
                return;
            }
            *remaining -= 1;
            *remaining == 0
        };
        if reached_zero {
            self.fire();
        }
    }

    pub fn remaining(&self) -> usize {
        *self.inner.remaining.lock()
    }

    fn fire(&self) {
        let callback = self.inner.on_zero.lock().take();
        if let Some(callback) = callback {
            callback();
        }
    }
}
