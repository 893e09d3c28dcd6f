use std::time::{Duration, Instant};

use ab_glyph::FontArc;
use anyhow::Result;

use crate::config::TrackerConfig;
use crate::detection::{ChangeDetector, ChangeExtent};
use crate::rendering::{HudRenderer, Overlay};
use crate::tracking::{TrackSmoother, TrackState, TrackingSummary};
use crate::video::{FrameSampler, RgbaFrame};

/// Timings are logged every this many cycles.
const PROFILE_EVERY: u64 = 300;

/// Sampler → detector → smoother.
pub struct Analyzer {
    sampler: FrameSampler,
    detector: ChangeDetector,
    smoother: TrackSmoother,
    last_extent: ChangeExtent,
    prof_frames: u64,
    prof_sample: Duration,
    prof_detect: Duration,
}

impl Analyzer {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            sampler: FrameSampler::new(config.downscale),
            detector: ChangeDetector::new(config.noise_threshold, config.sample_stride),
            smoother: TrackSmoother::new(
                config.downscale,
                config.detect_threshold,
                config.blend,
                config.clamp_to_frame,
            ),
            last_extent: ChangeExtent::EMPTY,
            prof_frames: 0,
            prof_sample: Duration::ZERO,
            prof_detect: Duration::ZERO,
        }
    }

    /// Run one analysis step. `Ok(None)` when the frame is too small to
    /// sample; the tracker state is left untouched in that case.
    pub fn analyze(&mut self, frame: &RgbaFrame) -> Result<Option<TrackState>> {
        let sample_start = Instant::now();
        let sampled = self.sampler.sample(frame);
        self.prof_sample += sample_start.elapsed();
        let Some(small) = sampled? else {
            return Ok(None);
        };

        let detect_start = Instant::now();
        let extent = self.detector.detect(small);
        self.prof_detect += detect_start.elapsed();
        self.last_extent = extent;

        let state = self.smoother.update(&extent, frame.width, frame.height);

        self.prof_frames += 1;
        if self.prof_frames % PROFILE_EVERY == 0 {
            tracing::info!(
                frames = self.prof_frames,
                sample_ms_per_frame = format!(
                    "{:.3}",
                    self.prof_sample.as_secs_f64() * 1000.0 / self.prof_frames as f64
                ),
                detect_ms_per_frame = format!(
                    "{:.3}",
                    self.prof_detect.as_secs_f64() * 1000.0 / self.prof_frames as f64
                ),
                "pipeline analyze timings"
            );
        }

        Ok(Some(state))
    }

    pub fn last_extent(&self) -> ChangeExtent {
        self.last_extent
    }

    pub fn state(&self) -> TrackState {
        self.smoother.state()
    }

    pub fn sampler(&self) -> &FrameSampler {
        &self.sampler
    }

    /// Drop all cross-cycle state, as when a new camera session begins.
    pub fn reset(&mut self) {
        self.detector.reset();
        self.smoother.reset();
        self.last_extent = ChangeExtent::EMPTY;
    }
}

/// Owns the overlay surface and draws the HUD onto it.
pub struct Renderer {
    hud: HudRenderer,
    overlay: Overlay,
    prof_frames: u64,
    prof_render: Duration,
}

impl Renderer {
    pub fn new(hud: HudRenderer) -> Self {
        Self {
            hud,
            overlay: Overlay::new(),
            prof_frames: 0,
            prof_render: Duration::ZERO,
        }
    }

    pub fn render(&mut self, width: u32, height: u32, state: &TrackState) {
        if width == 0 || height == 0 {
            return;
        }
        let render_start = Instant::now();
        self.overlay.sync_size(width, height);
        self.hud.render(&mut self.overlay, state);
        self.prof_render += render_start.elapsed();
        self.prof_frames += 1;

        if self.prof_frames % PROFILE_EVERY == 0 {
            tracing::info!(
                frames = self.prof_frames,
                render_ms_per_frame = format!(
                    "{:.3}",
                    self.prof_render.as_secs_f64() * 1000.0 / self.prof_frames as f64
                ),
                "pipeline render timings"
            );
        }
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn hud(&self) -> &HudRenderer {
        &self.hud
    }
}

pub struct Pipeline {
    analyzer: Analyzer,
    renderer: Renderer,
}

impl Pipeline {
    pub fn new(config: &TrackerConfig, font: Option<FontArc>) -> Result<Self> {
        config.validate()?;
        let mut hud = HudRenderer::new(config.hud_margin, config.box_padding);
        if let Some(font) = font {
            hud = hud.with_font(font);
        }
        Ok(Self {
            analyzer: Analyzer::new(config),
            renderer: Renderer::new(hud),
        })
    }

    /// One full perception cycle over `frame`.
    pub fn process(&mut self, frame: &RgbaFrame) -> Result<Option<TrackingSummary>> {
        if frame.is_empty() {
            return Ok(None);
        }
        let Some(state) = self.analyzer.analyze(frame)? else {
            return Ok(None);
        };
        self.renderer.render(frame.width, frame.height, &state);
        Ok(Some(state.summary()))
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn reset(&mut self) {
        self.analyzer.reset();
    }
}
