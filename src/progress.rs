//! Typed progress events.
//!
//! Progress is advisory. Sinks may drop events under backpressure but a sink
//! never delivers a percent lower than one it already delivered.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// One (stage, percent) observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: String,
    /// 0-100
    pub percent: u8,
}

/// Observer for progress events
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);

    /// Build an event, clamp the percent to 100 and deliver it.
    ///
    /// Wrapping sinks override this to forward to their inner sink's `emit`,
    /// so the debug line carries the percent that is actually delivered.
    fn emit(&self, stage: &str, percent: u8) {
        let percent = percent.min(100);
        tracing::debug!(stage, percent, "progress");
        self.report(ProgressEvent {
            stage: stage.to_string(),
            percent,
        });
    }
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        self(&event)
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Bounded channel sink.
///
/// Full channels drop the event instead of blocking the pipeline, and events
/// that would move the percent backwards are discarded.
pub struct ProgressChannel {
    tx: mpsc::Sender<ProgressEvent>,
    last: Mutex<Option<u8>>,
}

impl ProgressChannel {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                last: Mutex::new(None),
            },
            rx,
        )
    }
}

impl ProgressSink for ProgressChannel {
    fn report(&self, event: ProgressEvent) {
        let mut last = self.last.lock();
        if matches!(*last, Some(prev) if event.percent < prev) {
            return;
        }
        let percent = event.percent;
        match self.tx.try_send(event) {
            Ok(()) => *last = Some(percent),
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                tracing::trace!(stage = %dropped.stage, "progress channel full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Maps an inner 0-100 range onto `lo..=hi` of an outer schedule.
pub struct Scaled<'a> {
    inner: &'a dyn ProgressSink,
    lo: u8,
    hi: u8,
}

impl<'a> Scaled<'a> {
    pub fn new(inner: &'a dyn ProgressSink, lo: u8, hi: u8) -> Self {
        let lo = lo.min(100);
        Self {
            inner,
            lo,
            hi: hi.clamp(lo, 100),
        }
    }

    fn map(&self, percent: u8) -> u8 {
        let span = u32::from(self.hi - self.lo);
        let offset = span * u32::from(percent.min(100)) / 100;
        self.lo + offset as u8
    }
}

impl ProgressSink for Scaled<'_> {
    fn report(&self, event: ProgressEvent) {
        self.inner.report(ProgressEvent {
            percent: self.map(event.percent),
            ..event
        });
    }

    fn emit(&self, stage: &str, percent: u8) {
        self.inner.emit(stage, self.map(percent));
    }
}

/// Drops events whose percent is below the last one forwarded to `inner`.
pub struct Monotonic<'a> {
    inner: &'a dyn ProgressSink,
    floor: Mutex<Option<u8>>,
}

impl<'a> Monotonic<'a> {
    pub fn new(inner: &'a dyn ProgressSink) -> Self {
        Self {
            inner,
            floor: Mutex::new(None),
        }
    }

    fn admit(&self, stage: &str, percent: u8) -> bool {
        let mut floor = self.floor.lock();
        if let Some(prev) = *floor {
            if percent < prev {
                tracing::trace!(stage, percent, floor = prev, "regressing progress event dropped");
                return false;
            }
        }
        *floor = Some(percent);
        true
    }
}

impl ProgressSink for Monotonic<'_> {
    fn report(&self, event: ProgressEvent) {
        if self.admit(&event.stage, event.percent) {
            self.inner.report(event);
        }
    }

    fn emit(&self, stage: &str, percent: u8) {
        let percent = percent.min(100);
        if self.admit(stage, percent) {
            self.inner.emit(stage, percent);
        }
    }
}
