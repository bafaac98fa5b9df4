//! Progress fan-out for in-flight loads.
//!
//! Every subscriber gets its own unbounded `crossbeam-channel`. A subscriber that drops its
//! [`ProgressStream`] is pruned on the next event; the load never blocks on a slow consumer.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use super::pipeline::LoadState;

/// One progress update.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub stage: LoadState,
    /// 0.0..=100.0, never decreasing within one load.
    pub percent: f32,
    pub message: String,
}

#[derive(Debug, Default)]
struct HubInner {
    subscribers: Vec<Sender<ProgressEvent>>,
    last: Option<ProgressEvent>,
    finished: bool,
}

/// Broadcasts [`ProgressEvent`]s of one load to any number of subscribers.
#[derive(Debug, Default)]
pub(crate) struct ProgressHub {
    inner: Mutex<HubInner>,
}

impl ProgressHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// New stream, primed with the latest event. After the load finished the stream yields the
    /// terminal event and ends.
    pub(crate) fn subscribe(&self) -> ProgressStream {
        let (tx, rx) = unbounded();
        let mut inner = self.lock();
        if let Some(last) = &inner.last {
            let _ = tx.send(last.clone());
        }
        if !inner.finished {
            inner.subscribers.push(tx);
        }
        ProgressStream { rx }
    }

    pub(crate) fn emit(&self, stage: LoadState, percent: f32, message: impl Into<String>) {
        let mut inner = self.lock();
        if inner.finished {
            return;
        }
        let floor = inner.last.as_ref().map_or(0.0, |e| e.percent);
        let event = ProgressEvent {
            stage,
            percent: percent.clamp(0.0, 100.0).max(floor),
            message: message.into(),
        };
        inner.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        inner.last = Some(event);
    }

    /// Send the terminal event and close every stream.
    pub(crate) fn finish(&self, stage: LoadState, message: impl Into<String>) {
        let percent = if stage == LoadState::Ready { 100.0 } else { 0.0 };
        self.emit(stage, percent, message);
        let mut inner = self.lock();
        inner.finished = true;
        inner.subscribers.clear();
    }
}

/// Finite iterator over the progress of one load; ends after the terminal event.
#[derive(Debug)]
pub struct ProgressStream {
    rx: Receiver<ProgressEvent>,
}

impl ProgressStream {
    /// Next event, or `None` when nothing arrived within `timeout` or the stream ended.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ProgressEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(e) => Some(e),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Iterator for ProgressStream {
    type Item = ProgressEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_monotonic_and_stream_ends() {
        let hub = ProgressHub::new();
        let stream = hub.subscribe();
        hub.emit(LoadState::Loading, 40.0, "reading");
        hub.emit(LoadState::Loading, 20.0, "late report");
        hub.finish(LoadState::Ready, "done");

        let events: Vec<ProgressEvent> = stream.collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].percent, 40.0);
        assert_eq!(events[2].stage, LoadState::Ready);
        assert_eq!(events[2].percent, 100.0);
    }

    #[test]
    fn late_subscribers_see_the_terminal_event() {
        let hub = ProgressHub::new();
        hub.emit(LoadState::Detecting, 0.0, "detecting");
        hub.finish(LoadState::Failed, "boom");
        let events: Vec<ProgressEvent> = hub.subscribe().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, LoadState::Failed);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let hub = ProgressHub::new();
        drop(hub.subscribe());
        let keep = hub.subscribe();
        hub.emit(LoadState::Loading, 10.0, "x");
        assert_eq!(hub.lock().subscribers.len(), 1);
        drop(keep);
    }
}
