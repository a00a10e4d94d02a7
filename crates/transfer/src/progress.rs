use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Minimum spacing between two callback invocations of one reporter.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(50);

/// Snapshot of a transfer's progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Percent complete, 0 to 100.
    pub percent: f64,
    pub bytes_done: u64,
    pub bytes_total: u64,
    /// Display label (file name), if any.
    pub label: Option<String>,
    /// Sliding-window transfer rate.
    pub bytes_per_second: f64,
    /// Time left at the current rate; `None` until a rate is known.
    pub eta: Option<Duration>,
}

impl ProgressEvent {
    /// Builds an event whose percentage is derived from the byte counts.
    pub fn new(label: Option<String>, bytes_done: u64, bytes_total: u64) -> Self {
        Self {
            percent: percent_of(bytes_done, bytes_total),
            bytes_done,
            bytes_total,
            label,
            bytes_per_second: 0.0,
            eta: None,
        }
    }

    /// Returns `true` once the transfer reached 100 %.
    pub fn is_complete(&self) -> bool {
        self.percent >= 100.0
    }
}

fn percent_of(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// What the consumer wants after seeing a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressControl {
    #[default]
    Continue,
    /// Stop dispatching new work; in-flight requests may finish.
    Stop,
}

impl From<bool> for ProgressControl {
    /// `false` requests cancellation, `true` continues.
    fn from(keep_going: bool) -> Self {
        if keep_going {
            ProgressControl::Continue
        } else {
            ProgressControl::Stop
        }
    }
}

impl From<()> for ProgressControl {
    fn from(_: ()) -> Self {
        ProgressControl::Continue
    }
}

/// Callback invoked with transfer progress.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) -> ProgressControl + Send + Sync>;

/// Wraps a closure returning anything convertible to [`ProgressControl`]
/// (`()`, `bool`, or the enum itself) into a [`ProgressCallback`].
pub fn progress_fn<F, R>(f: F) -> ProgressCallback
where
    F: Fn(&ProgressEvent) -> R + Send + Sync + 'static,
    R: Into<ProgressControl>,
{
    Arc::new(move |event| f(event).into())
}

// ---------------------------------------------------------------------------
// ProgressReporter
// ---------------------------------------------------------------------------

/// Throttled bridge between an engine and its progress callback.
///
/// Shared by every worker of one transfer. The first event and the event
/// that reaches 100 % are always delivered; others are dropped if they come
/// sooner than the minimum interval after the last delivered one. A
/// [`ProgressControl::Stop`] answer cancels the reporter's token.
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    cancel: CancellationToken,
    label: Option<String>,
    total: u64,
    min_interval: Duration,
    speed: SpeedCalculator,
    state: Mutex<ReporterState>,
}

#[derive(Default)]
struct ReporterState {
    last_emit: Option<Instant>,
    last_done: u64,
    last_event: Option<ProgressEvent>,
    finished: bool,
}

impl ProgressReporter {
    pub fn new(
        total: u64,
        label: Option<String>,
        callback: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            callback,
            cancel,
            label,
            total,
            min_interval: DEFAULT_MIN_INTERVAL,
            speed: SpeedCalculator::new(None, None),
            state: Mutex::new(ReporterState::default()),
        }
    }

    /// Overrides the throttle interval. Zero delivers every event.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Reports `bytes_done` with the percentage derived from bytes.
    pub fn update(&self, bytes_done: u64) -> ProgressControl {
        self.report(percent_of(bytes_done, self.total), bytes_done)
    }

    /// Reports an explicit percentage alongside `bytes_done`.
    ///
    /// Uploads count progress in acknowledged chunks rather than bytes.
    pub fn report(&self, percent: f64, bytes_done: u64) -> ProgressControl {
        let bytes_done = bytes_done.min(self.total);
        let event = {
            let mut s = self.state.lock().unwrap();
            if bytes_done > s.last_done {
                self.speed.add_sample(bytes_done - s.last_done);
                s.last_done = bytes_done;
            }

            let now = Instant::now();
            let is_final = percent >= 100.0;
            let due = match s.last_emit {
                None => true,
                Some(at) => now.duration_since(at) >= self.min_interval,
            };
            let event = ProgressEvent {
                percent: percent.clamp(0.0, 100.0),
                bytes_done,
                bytes_total: self.total,
                label: self.label.clone(),
                bytes_per_second: self.speed.bytes_per_second(),
                eta: self.speed.eta(self.total - bytes_done),
            };
            s.last_event = Some(event.clone());
            if s.finished || !(due || is_final) {
                None
            } else {
                s.last_emit = Some(now);
                s.finished = is_final;
                Some(event)
            }
        };

        if let Some(event) = event
            && let Some(cb) = &self.callback
            && cb(&event) == ProgressControl::Stop
        {
            tracing::debug!(label = ?self.label, "progress consumer requested stop");
            self.cancel.cancel();
        }

        if self.cancel.is_cancelled() {
            ProgressControl::Stop
        } else {
            ProgressControl::Continue
        }
    }

    /// Most recent event, delivered or throttled.
    pub fn last_event(&self) -> Option<ProgressEvent> {
        self.state.lock().unwrap().last_event.clone()
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = self.inner.lock().unwrap();
        let now = Instant::now();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Returns the average speed in bytes/second within the window.
    ///
    /// Returns 0.0 if fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap();
        if s.samples.len() < 2 {
            return 0.0;
        }

        let first = &s.samples[0];
        let last = &s.samples[s.samples.len() - 1];
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        let total_bytes: u64 = s.samples.iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    ///
    /// Returns `None` if speed is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }
}
