use std::time::Duration;

use tokio::time::Instant;

/// Coalesces change notifications: the first change in a quiet period arms a
/// deadline, later changes before it fires ride along.
#[derive(Debug, Clone)]
pub struct NotifyThrottle {
    window: Duration,
    deadline: Option<Instant>,
}

impl NotifyThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn mark_dirty(&mut self, now: Instant) {
        if self.deadline.is_none() {
            self.deadline = Some(now + self.window);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Returns whether a notification was pending.
    pub fn take(&mut self) -> bool {
        self.deadline.take().is_some()
    }
}
