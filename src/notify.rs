use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Error,
}

impl Level {
    pub fn label(&self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Success => "ok",
            Level::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: Level,
    pub message: String,
    pub raised_at: Instant,
}

impl Notification {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            raised_at: Instant::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Level::Error, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Level::Success, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Level::Info, message)
    }
}

/// Transient notification queue. Entries expire `duration` after they were raised.
#[derive(Debug)]
pub struct Notifier {
    duration: Duration,
    entries: VecDeque<Notification>,
}

impl Notifier {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, notification: Notification) {
        self.entries.push_back(notification);
    }

    pub fn active(&mut self) -> Vec<Notification> {
        self.active_at(Instant::now())
    }

    pub fn active_at(&mut self, now: Instant) -> Vec<Notification> {
        let duration = self.duration;
        self.entries
            .retain(|n| now.saturating_duration_since(n.raised_at) < duration);
        self.entries.iter().cloned().collect()
    }

    /// Removes and returns everything still pending, expired or not.
    pub fn drain(&mut self) -> Vec<Notification> {
        self.entries.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_after_duration() {
        let mut notifier = Notifier::new(Duration::from_secs(5));
        let early = Notification::error("load failed");
        let raised = early.raised_at;
        notifier.push(early);
        assert_eq!(notifier.active_at(raised + Duration::from_secs(4)).len(), 1);
        assert!(notifier.active_at(raised + Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn drain_empties_queue() {
        let mut notifier = Notifier::new(Duration::from_secs(5));
        notifier.push(Notification::success("signed in"));
        notifier.push(Notification::info("3 categories"));
        let drained = notifier.drain();
        assert_eq!(drained[0].level, Level::Success);
        assert_eq!(drained.len(), 2);
        assert!(notifier.drain().is_empty());
    }
}
