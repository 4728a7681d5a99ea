//! Phase/step progress events and their delivery.
//!
//! Producers (fetcher, store, asset downloader) emit [`Progress`] values in
//! order through a [`ProgressReporter`]. Consumers register a
//! [`ProgressHook`]; slow consumers wrap theirs in [`Throttled`] so bursts are
//! collapsed to the latest value without ever losing a phase's final event.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;

/// Phase of a synchronization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Fetching top-level posts.
    Posts,
    /// Fetching nested replies of posts.
    SubReplies,
    /// Merging and persisting the archive.
    Saving,
    /// Downloading media assets.
    Assets,
}

impl Step {
    /// Human-readable label used in progress text.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Posts => "Fetching posts",
            Self::SubReplies => "Fetching sub-replies",
            Self::Saving => "Archiving",
            Self::Assets => "Downloading assets",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Posts => "posts",
            Self::SubReplies => "sub-replies",
            Self::Saving => "saving",
            Self::Assets => "assets",
        })
    }
}

/// Snapshot of one phase's progress. `total_progress == 0` means the total is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub step: Step,
    pub progress: u64,
    pub total_progress: u64,
}

impl Progress {
    #[must_use]
    pub fn new(step: Step, progress: u64, total_progress: u64) -> Self {
        Self {
            step,
            progress,
            total_progress,
        }
    }

    /// Completion percentage, or `None` when the total is unknown.
    #[must_use]
    pub fn percent(&self) -> Option<f64> {
        (self.total_progress != 0)
            .then(|| (self.progress as f64 / self.total_progress as f64) * 100.0)
    }

    /// Whether this event completes a phase with a known total.
    #[must_use]
    pub fn is_phase_end(&self) -> bool {
        self.total_progress > 0 && self.progress >= self.total_progress
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.step == Step::Saving {
            return f.write_str("Archiving...");
        }
        write!(
            f,
            "{} - {} / {} (",
            self.step.label(),
            self.progress,
            self.total_progress
        )?;
        match self.percent() {
            Some(percent) => write!(f, "{percent:.2}%)"),
            None => f.write_str("0%)"),
        }
    }
}

/// Receiver of progress events.
pub trait ProgressHook: Send + Sync {
    fn on_progress(&self, progress: Progress);
}

impl<F> ProgressHook for F
where
    F: Fn(Progress) + Send + Sync,
{
    fn on_progress(&self, progress: Progress) {
        self(progress);
    }
}

/// Overwriting delivery: the receiver only ever sees the latest value.
impl ProgressHook for watch::Sender<Option<Progress>> {
    fn on_progress(&self, progress: Progress) {
        self.send_replace(Some(progress));
    }
}

pub type SharedHook = Arc<dyn ProgressHook>;

/// Emits one phase's events to every registered hook, in registration order.
///
/// Keeps `progress` non-decreasing within the phase and guarantees that a
/// finished phase ends with an event where `progress == total_progress`.
pub struct ProgressReporter<'a> {
    hooks: &'a [SharedHook],
    step: Step,
    progress: u64,
    total: u64,
    last_sent: Option<Progress>,
}

impl<'a> ProgressReporter<'a> {
    /// Start a phase. Nothing is emitted until the first advance.
    #[must_use]
    pub fn begin(hooks: &'a [SharedHook], step: Step, total: u64) -> Self {
        Self {
            hooks,
            step,
            progress: 0,
            total,
            last_sent: None,
        }
    }

    /// Raise the expected total; a lower value is ignored.
    pub fn grow_total(&mut self, total: u64) {
        self.total = self.total.max(total);
    }

    /// Report that `progress` units are complete.
    pub fn advance_to(&mut self, progress: u64) {
        self.progress = self.progress.max(progress);
        if self.total > 0 && self.progress > self.total {
            self.total = self.progress;
        }
        self.emit();
    }

    /// Report `n` more completed units.
    pub fn advance_by(&mut self, n: u64) {
        self.advance_to(self.progress.saturating_add(n));
    }

    /// End the phase. If the last event did not complete it, a final
    /// `progress == total_progress` event is emitted with the actual count
    /// (`(0, 0)` for an empty phase).
    pub fn finish(mut self) {
        self.total = self.progress;
        if self.last_sent != Some(self.current()) {
            self.emit();
        }
    }

    fn current(&self) -> Progress {
        Progress::new(self.step, self.progress, self.total)
    }

    fn emit(&mut self) {
        let progress = self.current();
        for hook in self.hooks {
            hook.on_progress(progress);
        }
        self.last_sent = Some(progress);
    }
}

#[derive(Debug, Default)]
struct ThrottleState {
    last_delivery: Option<Instant>,
    last_step: Option<Step>,
    pending: Option<Progress>,
    timer_armed: bool,
}

struct ThrottleShared {
    inner: SharedHook,
    interval: Duration,
    state: Mutex<ThrottleState>,
}

impl ThrottleShared {
    fn lock(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, state: &mut ThrottleState, progress: Progress) {
        self.inner.on_progress(progress);
        state.last_delivery = Some(Instant::now());
    }

    fn deliver_pending(&self) {
        let mut state = self.lock();
        state.timer_armed = false;
        if let Some(pending) = state.pending.take() {
            self.deliver(&mut state, pending);
        }
    }
}

/// Debouncing wrapper for a slow consumer.
///
/// Events arriving within `interval` of the previous delivery are collapsed
/// into the most recent one. The first event of a step, any event that
/// completes a phase, and a still-pending event at a step change are always
/// delivered. Inside a tokio runtime a collapsed event is delivered once the
/// interval has passed, even if the producer goes quiet; elsewhere call
/// [`Throttled::flush`] when the producer is done.
pub struct Throttled {
    shared: Arc<ThrottleShared>,
}

impl Throttled {
    #[must_use]
    pub fn new(inner: SharedHook, interval: Duration) -> Self {
        Self {
            shared: Arc::new(ThrottleShared {
                inner,
                interval,
                state: Mutex::new(ThrottleState::default()),
            }),
        }
    }

    /// Deliver the collapsed event still waiting, if any.
    pub fn flush(&self) {
        self.shared.deliver_pending();
    }

    /// Deliver whatever is pending once the current interval runs out.
    fn arm_timer(&self, state: &mut ThrottleState) {
        if state.timer_armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let wait = state.last_delivery.map_or(Duration::ZERO, |at| {
            self.shared.interval.saturating_sub(at.elapsed())
        });
        state.timer_armed = true;

        let shared = Arc::clone(&self.shared);
        runtime.spawn(async move {
            tokio::time::sleep(wait).await;
            shared.deliver_pending();
        });
    }
}

impl ProgressHook for Throttled {
    fn on_progress(&self, progress: Progress) {
        let shared = &self.shared;
        let mut state = shared.lock();

        let step_changed = state.last_step != Some(progress.step);
        if step_changed {
            if let Some(pending) = state.pending.take() {
                shared.deliver(&mut state, pending);
            }
        }
        state.last_step = Some(progress.step);

        let due = state
            .last_delivery
            .is_none_or(|at| at.elapsed() >= shared.interval);
        if due || step_changed || progress.is_phase_end() {
            state.pending = None;
            shared.deliver(&mut state, progress);
        } else {
            state.pending = Some(progress);
            self.arm_timer(&mut state);
        }
    }
}

/// Build a throttled hook feeding a `watch` channel, for consumers that poll
/// the latest progress (a UI label, a terminal status line).
#[must_use]
pub fn progress_channel(interval: Duration) -> (Arc<Throttled>, watch::Receiver<Option<Progress>>) {
    let (tx, rx) = watch::channel(None);
    (Arc::new(Throttled::new(Arc::new(tx), interval)), rx)
}
