//! runtime — the perception loop driver
//!
//! One cycle per display tick: poll the frame source, then sampler → detector
//! → smoother → HUD. Cycles never overlap and never block inside; waiting
//! between ticks is the [`Scheduler`]'s job, so tests can drive the loop with
//! a counted scheduler instead of a real refresh clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::pipeline::Pipeline;
use crate::rendering::Overlay;
use crate::tracking::TrackingSummary;
use crate::video::{FrameSource, RgbaFrame};

/// Shared stop signal. Once cancelled it stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Schedulers ───────────────────────────────────────────────────────────────

/// "Wait for the next tick." Returning `false` ends the loop.
pub trait Scheduler {
    fn next_tick(&mut self, cancel: &CancelFlag) -> bool;
}

const DEFAULT_HZ: f64 = 60.0;

/// Ticks at a fixed refresh rate, sleeping off whatever time the previous
/// cycle did not use. Late cycles are not made up for.
pub struct RefreshScheduler {
    interval: Duration,
    next: Option<Instant>,
}

impl RefreshScheduler {
    /// Rates that are not positive, or too slow to express as a
    /// `Duration`, fall back to 60 Hz.
    pub fn new(hz: f64) -> Self {
        let interval = Some(hz)
            .filter(|hz| hz.is_finite() && *hz > 0.0)
            .and_then(|hz| Duration::try_from_secs_f64(1.0 / hz).ok())
            .unwrap_or(Duration::from_secs_f64(1.0 / DEFAULT_HZ));
        Self {
            interval,
            next: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Scheduler for RefreshScheduler {
    fn next_tick(&mut self, cancel: &CancelFlag) -> bool {
        let now = Instant::now();
        let deadline = self.next.unwrap_or(now);
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        self.next = Some(deadline.max(now) + self.interval);
        !cancel.is_cancelled()
    }
}

/// Hands out a fixed number of ticks immediately.
pub struct CountedScheduler {
    remaining: u64,
}

impl CountedScheduler {
    pub fn new(ticks: u64) -> Self {
        Self { remaining: ticks }
    }
}

impl Scheduler for CountedScheduler {
    fn next_tick(&mut self, cancel: &CancelFlag) -> bool {
        if cancel.is_cancelled() || self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

// ── Loop driver ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Processed(TrackingSummary),
    /// Source not ready or frame too small; nothing changed.
    Skipped,
    /// A fault was logged and swallowed.
    Fault,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub processed: u64,
    pub skipped: u64,
    pub faults: u64,
}

type SummarySink = Box<dyn FnMut(&TrackingSummary)>;
type FrameSink = Box<dyn FnMut(&RgbaFrame, &Overlay, &TrackingSummary)>;

pub struct LoopDriver<S: FrameSource> {
    source: S,
    pipeline: Pipeline,
    cancel: CancelFlag,
    latest: Option<TrackingSummary>,
    on_summary: Option<SummarySink>,
    on_frame: Option<FrameSink>,
    stats: LoopStats,
    released: bool,
}

impl<S: FrameSource> LoopDriver<S> {
    pub fn new(source: S, pipeline: Pipeline, cancel: CancelFlag) -> Self {
        Self {
            source,
            pipeline,
            cancel,
            latest: None,
            on_summary: None,
            on_frame: None,
            stats: LoopStats::default(),
            released: false,
        }
    }

    /// Called with the tracking summary after every processed cycle.
    pub fn on_summary<F: FnMut(&TrackingSummary) + 'static>(mut self, f: F) -> Self {
        self.on_summary = Some(Box::new(f));
        self
    }

    /// Called with the source frame and the freshly drawn HUD overlay after
    /// every processed cycle.
    pub fn on_frame<F>(mut self, f: F) -> Self
    where
        F: FnMut(&RgbaFrame, &Overlay, &TrackingSummary) + 'static,
    {
        self.on_frame = Some(Box::new(f));
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn latest_summary(&self) -> Option<TrackingSummary> {
        self.latest
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run exactly one perception cycle.
    pub fn cycle(&mut self) -> CycleOutcome {
        self.stats.cycles += 1;

        let frame = match self.source.poll_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.stats.skipped += 1;
                return CycleOutcome::Skipped;
            }
            Err(e) => {
                self.stats.faults += 1;
                warn!("frame read error: {e:#}");
                return CycleOutcome::Fault;
            }
        };

        match self.pipeline.process(frame) {
            Ok(Some(summary)) => {
                self.stats.processed += 1;
                self.latest = Some(summary);
                if let Some(sink) = self.on_summary.as_mut() {
                    sink(&summary);
                }
                if let Some(sink) = self.on_frame.as_mut() {
                    sink(frame, self.pipeline.renderer().overlay(), &summary);
                }
                CycleOutcome::Processed(summary)
            }
            Ok(None) => {
                self.stats.skipped += 1;
                CycleOutcome::Skipped
            }
            Err(e) => {
                self.stats.faults += 1;
                warn!("frame processing error: {e:#}");
                CycleOutcome::Fault
            }
        }
    }

    /// Cycle once per tick until cancelled, the scheduler runs dry, or the
    /// source finishes. The source is released on every exit path.
    pub fn run<T: Scheduler>(&mut self, scheduler: &mut T) -> LoopStats {
        info!("perception loop started");
        while !self.cancel.is_cancelled() && !self.released {
            if !scheduler.next_tick(&self.cancel) || self.cancel.is_cancelled() {
                break;
            }
            self.cycle();
            if self.source.is_finished() {
                info!("frame source finished; ending session");
                self.cancel.cancel();
            }
        }
        self.release();
        info!(
            cycles = self.stats.cycles,
            processed = self.stats.processed,
            skipped = self.stats.skipped,
            faults = self.stats.faults,
            "perception loop stopped"
        );
        self.stats
    }

    /// Stop the source. Further `run` calls return immediately.
    pub fn release(&mut self) {
        if !self.released {
            debug!("releasing frame source");
            self.source.stop();
            self.released = true;
        }
    }
}

impl<S: FrameSource> Drop for LoopDriver<S> {
    fn drop(&mut self) {
        self.release();
    }
}
