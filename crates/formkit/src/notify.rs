//! Change/error notification plumbing between fields and their form.

use std::panic;
use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

/// Where a field reports that its value or error changed.
///
/// A field never touches its form's data; it only raises these two signals.
pub(crate) trait Upstream {
    fn trigger_on_change(&mut self);
    fn trigger_on_error(&mut self);
}

/// Upstream of a field that is not owned by a form.
pub(crate) struct Detached;

impl Upstream for Detached {
    fn trigger_on_change(&mut self) {}
    fn trigger_on_error(&mut self) {}
}

/// Re-raise a panic caught around a user callback once its slot is restored.
pub(crate) fn resume_panic<T>(outcome: thread::Result<T>) -> T {
    match outcome {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// Notifications raised since the last flush.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Pending {
    pub change: bool,
    pub error: bool,
}

/// Form-side upstream: records signals unless a suppression scope is open.
///
/// Suppression is a counter so bulk operations can nest.
#[derive(Debug, Default)]
pub(crate) struct Notifier {
    suppressed: usize,
    pending: Pending,
}

impl Notifier {
    pub fn suppress(&mut self) {
        self.suppressed += 1;
    }

    pub fn resume(&mut self) {
        self.suppressed = self.suppressed.saturating_sub(1);
    }

    pub const fn is_suppressed(&self) -> bool {
        self.suppressed > 0
    }

    /// Drain recorded signals.
    pub fn take(&mut self) -> Pending {
        std::mem::take(&mut self.pending)
    }
}

impl Upstream for Notifier {
    fn trigger_on_change(&mut self) {
        if self.is_suppressed() {
            trace!(depth = self.suppressed, "Change notification suppressed");
            return;
        }
        self.pending.change = true;
    }

    fn trigger_on_error(&mut self) {
        if self.is_suppressed() {
            trace!(depth = self.suppressed, "Error notification suppressed");
            return;
        }
        self.pending.error = true;
    }
}

/// Trailing-edge timer for a field's change notification.
///
/// Scheduling again restarts the window, so only the last write notifies.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Debounce {
    interval: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// A window past the clock's range never comes due.
    pub fn schedule(&mut self, now: Instant) {
        self.deadline = now.checked_add(self.interval);
    }

    pub const fn cancel(&mut self) {
        self.deadline = None;
    }

    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true exactly once when the window has elapsed.
    pub fn fire_at(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_suppression() {
        let mut notifier = Notifier::default();

        notifier.suppress();
        notifier.suppress();
        notifier.trigger_on_change();
        notifier.resume();
        notifier.trigger_on_error();
        assert_eq!(notifier.take(), Pending::default());

        notifier.resume();
        notifier.trigger_on_change();
        assert_eq!(
            notifier.take(),
            Pending {
                change: true,
                error: false
            }
        );
        assert_eq!(notifier.take(), Pending::default());
    }

    #[test]
    fn test_debounce_restarts_window() {
        let start = Instant::now();
        let mut timer = Debounce::new(Duration::from_millis(1000));

        timer.schedule(start);
        timer.schedule(start + Duration::from_millis(600));
        assert!(!timer.fire_at(start + Duration::from_millis(1000)));
        assert!(timer.fire_at(start + Duration::from_millis(1600)));
        assert!(!timer.fire_at(start + Duration::from_millis(5000)));
    }

    #[test]
    fn test_debounce_unbounded_window_never_fires() {
        let start = Instant::now();
        let mut timer = Debounce::new(Duration::MAX);

        timer.schedule(start);
        assert!(timer.deadline().is_none());
        assert!(!timer.fire_at(start + Duration::from_secs(3600)));
    }

    #[test]
    fn test_resume_panic_passes_value_through() {
        assert_eq!(resume_panic(panic::catch_unwind(|| 7)), 7);

        let caught = panic::catch_unwind(|| {
            resume_panic(panic::catch_unwind(|| -> u8 { panic!("handler failed") }))
        });
        assert!(caught.is_err());
    }

    #[test]
    fn test_debounce_cancel() {
        let start = Instant::now();
        let mut timer = Debounce::new(Duration::from_millis(10));

        timer.schedule(start);
        timer.cancel();
        assert!(timer.deadline().is_none());
        assert!(!timer.fire_at(start + Duration::from_secs(1)));
    }
}
