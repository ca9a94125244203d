use std::time::{Duration, Instant};

pub const SAVE_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Holds at most one pending value; scheduling again replaces it and
/// restarts the delay.
#[derive(Debug)]
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<(Instant, T)>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn schedule(&mut self, value: T, now: Instant) {
        self.pending = Some((now + self.delay, value));
    }

    /// Swaps the pending value without moving its deadline.
    pub fn update(&mut self, value: T) {
        if let Some((_, pending)) = &mut self.pending {
            *pending = value;
        }
    }

    /// Returns the pending value once its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((deadline, _)) if now >= *deadline => self.pending.take().map(|(_, v)| v),
            _ => None,
        }
    }

    /// Takes the pending value regardless of its deadline.
    pub fn flush(&mut self) -> Option<T> {
        self.pending.take().map(|(_, v)| v)
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

impl<T> Default for Debouncer<T> {
    fn default() -> Self {
        Self::new(SAVE_DEBOUNCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_events_inside_the_window_write_once_with_the_latest_value() {
        let start = Instant::now();
        let mut debounce = Debouncer::default();

        debounce.schedule(1, start);
        debounce.schedule(2, start + Duration::from_millis(400));

        assert_eq!(debounce.poll(start + Duration::from_millis(1000)), None);
        assert_eq!(debounce.poll(start + Duration::from_millis(1400)), Some(2));
        assert_eq!(debounce.poll(start + Duration::from_millis(5000)), None);
    }

    #[test]
    fn flush_update_and_cancel() {
        let now = Instant::now();
        let mut debounce = Debouncer::new(Duration::from_secs(1));

        debounce.schedule("a", now);
        assert_eq!(debounce.flush(), Some("a"));
        assert_eq!(debounce.flush(), None);

        debounce.update("ignored");
        assert_eq!(debounce.flush(), None);

        debounce.schedule("b", now);
        debounce.update("c");
        assert_eq!(debounce.poll(now + Duration::from_millis(999)), None);
        assert_eq!(debounce.poll(now + Duration::from_secs(1)), Some("c"));

        debounce.schedule("d", now);
        debounce.cancel();
        assert_eq!(debounce.poll(now + Duration::from_secs(2)), None);
    }
}
