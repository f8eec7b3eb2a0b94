/*!
Recording sink for events delivered through callbacks

Hand `recorder.sink()` to any callback-based subscription, then assert on
`events()` or wait for deliveries from async tests.
*/

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

pub struct EventRecorder<T> {
    events: Arc<Mutex<Vec<T>>>,
    notify: Arc<Notify>,
}

impl<T> Clone for EventRecorder<T> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
            notify: Arc::clone(&self.notify),
        }
    }
}

impl<T> Default for EventRecorder<T> {
    fn default() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            notify: Arc::new(Notify::new()),
        }
    }
}

impl<T: Clone + Send + 'static> EventRecorder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback that records every event it is given.
    pub fn sink(&self) -> impl Fn(&T) + Send + Sync + 'static {
        let events = Arc::clone(&self.events);
        let notify = Arc::clone(&self.notify);
        move |event: &T| {
            events.lock().push(event.clone());
            notify.notify_waiters();
        }
    }

    pub fn record(&self, event: T) {
        self.events.lock().push(event);
        self.notify.notify_waiters();
    }

    pub fn events(&self) -> Vec<T> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn matching<P>(&self, predicate: P) -> Vec<T>
    where
        P: Fn(&T) -> bool,
    {
        self.events.lock().iter().filter(|e| predicate(e)).cloned().collect()
    }

    /// Removes and returns everything recorded so far.
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Waits until at least `count` events are recorded. Returns false on timeout.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a record between check and await is not lost.
            notified.as_mut().enable();
            if self.len() >= count {
                debug!(count, "recorder reached expected count");
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(expected = count, got = self.len(), "timeout waiting for events");
                return self.len() >= count;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_records_in_order() {
        let recorder = EventRecorder::new();
        let sink = recorder.sink();
        sink(&"connected");
        sink(&"progress_update");
        recorder.record("print_completed");

        assert_eq!(recorder.events(), vec!["connected", "progress_update", "print_completed"]);
        assert_eq!(recorder.matching(|e| e.starts_with("print")), vec!["print_completed"]);
        assert_eq!(recorder.drain().len(), 3);
        assert!(recorder.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_events_from_another_task() {
        let recorder: EventRecorder<u32> = EventRecorder::new();
        let sink = recorder.sink();
        tokio::spawn(async move {
            for i in 0..3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                sink(&i);
            }
        });

        assert!(recorder.wait_for(3, Duration::from_secs(2)).await);
        assert_eq!(recorder.events(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let recorder: EventRecorder<u32> = EventRecorder::new();
        recorder.record(1);
        assert!(!recorder.wait_for(2, Duration::from_millis(50)).await);
        assert!(recorder.wait_for(1, Duration::from_millis(50)).await);
    }
}
