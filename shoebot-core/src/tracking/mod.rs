//! tracking — smoothed target box + lock state machine
//!
//! Each cycle the latest change extent is scaled back to full-frame pixels
//! and the persistent box is pulled a fixed fraction of the way towards it,
//! so the HUD glides instead of snapping frame-to-frame.
//!
//! Lock is decided from the current cycle alone: `Locked` iff the changed
//! pixel count exceeds the detect threshold. While unlocked the box stays
//! frozen at its last smoothed position.

use tracing::{debug, info};

use crate::detection::ChangeExtent;

/// Smoothed box in full-resolution pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl TrackBox {
    pub fn center_x(&self) -> f32 {
        self.x + self.width / 2.0
    }
    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockState {
    #[default]
    Unlocked,
    Locked,
}

impl LockState {
    pub fn is_locked(self) -> bool {
        matches!(self, LockState::Locked)
    }
}

/// Box + lock flag after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackState {
    pub bbox: TrackBox,
    pub lock: LockState,
}

impl TrackState {
    pub fn summary(&self) -> TrackingSummary {
        TrackingSummary {
            locked: self.lock.is_locked(),
            centroid_x: self.bbox.center_x().round() as i32,
            centroid_y: self.bbox.center_y().round() as i32,
        }
    }
}

/// What the surrounding UI gets to see each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackingSummary {
    pub locked: bool,
    pub centroid_x: i32,
    pub centroid_y: i32,
}

/// `start + (end - start) * factor`
pub fn blend(start: f32, end: f32, factor: f32) -> f32 {
    start + (end - start) * factor
}

pub struct TrackSmoother {
    downscale: f32,
    detect_threshold: u32,
    alpha: f32,
    clamp_to_frame: bool,
    state: TrackState,
}

impl TrackSmoother {
    pub fn new(downscale: f32, detect_threshold: u32, alpha: f32, clamp_to_frame: bool) -> Self {
        Self {
            downscale,
            detect_threshold,
            alpha: alpha.clamp(f32::MIN_POSITIVE, 1.0),
            clamp_to_frame,
            state: TrackState::default(),
        }
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    /// Feed one cycle's extent. `frame_width`/`frame_height` are the
    /// full-resolution dimensions, used to keep the box on screen.
    pub fn update(
        &mut self,
        extent: &ChangeExtent,
        frame_width: u32,
        frame_height: u32,
    ) -> TrackState {
        let was = self.state.lock;

        if extent.changed > self.detect_threshold {
            let target = TrackBox {
                x: extent.min_x as f32 / self.downscale,
                y: extent.min_y as f32 / self.downscale,
                width: extent.width() as f32 / self.downscale,
                height: extent.height() as f32 / self.downscale,
            };

            let b = &mut self.state.bbox;
            b.x = blend(b.x, target.x, self.alpha);
            b.y = blend(b.y, target.y, self.alpha);
            b.width = blend(b.width, target.width, self.alpha);
            b.height = blend(b.height, target.height, self.alpha);

            if self.clamp_to_frame {
                clamp_box(b, frame_width as f32, frame_height as f32);
            }
            self.state.lock = LockState::Locked;

            debug!(
                x = b.x,
                y = b.y,
                w = b.width,
                h = b.height,
                changed = extent.changed,
                "tracker updated"
            );
        } else {
            self.state.lock = LockState::Unlocked;
        }

        if was != self.state.lock {
            info!(
                locked = self.state.lock.is_locked(),
                changed = extent.changed,
                "lock state changed"
            );
        }

        self.state
    }

    /// Back to the initial state: unlocked, box at the origin with zero size.
    pub fn reset(&mut self) {
        self.state = TrackState::default();
    }
}

fn clamp_box(b: &mut TrackBox, max_w: f32, max_h: f32) {
    b.x = b.x.clamp(0.0, max_w);
    b.y = b.y.clamp(0.0, max_h);
    b.width = b.width.clamp(0.0, max_w - b.x);
    b.height = b.height.clamp(0.0, max_h - b.y);
}
