//! detection — frame-difference motion detection
//!
//! Compares the current downsampled frame with the one retained from the
//! previous cycle and reports the bounding extent of every sampled pixel whose
//! RGB colour moved by more than the noise threshold. No classification
//! happens here: anything that changes counts as motion.

use tracing::debug;

use crate::video::{RgbaFrame, CHANNELS};

/// Bounding extent of changed pixels, in downsampled coordinates.
///
/// When `changed == 0` every coordinate is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeExtent {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    pub changed: u32,
}

impl ChangeExtent {
    pub const EMPTY: ChangeExtent = ChangeExtent {
        min_x: 0,
        min_y: 0,
        max_x: 0,
        max_y: 0,
        changed: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.changed == 0
    }

    pub fn width(&self) -> u32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y
    }
}

/// Scan two equally sized RGBA buffers on a `stride` grid.
///
/// A pixel is "changed" when `|ΔR| + |ΔG| + |ΔB| > threshold * 3`; alpha is
/// ignored. Buffers of different lengths produce an empty extent.
pub fn frame_difference(
    previous: &[u8],
    current: &[u8],
    width: u32,
    height: u32,
    threshold: u32,
    stride: u32,
) -> ChangeExtent {
    let expected = width as usize * height as usize * CHANNELS;
    if previous.len() != expected || current.len() != expected || stride == 0 {
        return ChangeExtent::EMPTY;
    }

    let limit = threshold.saturating_mul(3);
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (width, height, 0, 0);
    let mut changed = 0u32;

    for y in (0..height).step_by(stride as usize) {
        let row = y as usize * width as usize;
        for x in (0..width).step_by(stride as usize) {
            let i = (row + x as usize) * CHANNELS;
            let diff = current[i].abs_diff(previous[i]) as u32
                + current[i + 1].abs_diff(previous[i + 1]) as u32
                + current[i + 2].abs_diff(previous[i + 2]) as u32;

            if diff > limit {
                changed += 1;
                min_x = min_x.min(x);
                max_x = max_x.max(x);
                min_y = min_y.min(y);
                max_y = max_y.max(y);
            }
        }
    }

    if changed == 0 {
        return ChangeExtent::EMPTY;
    }

    ChangeExtent {
        min_x,
        min_y,
        max_x,
        max_y,
        changed,
    }
}

/// Holds the previous downsampled frame between cycles.
pub struct ChangeDetector {
    threshold: u32,
    stride: u32,
    previous: Option<RgbaFrame>,
}

impl ChangeDetector {
    pub fn new(threshold: u32, stride: u32) -> Self {
        Self {
            threshold,
            stride: stride.max(1),
            previous: None,
        }
    }

    /// Diff `current` against the retained frame, then retain a copy of
    /// `current` for the next cycle. The first call of a session (or the first
    /// after a resolution change) reports no motion.
    pub fn detect(&mut self, current: &RgbaFrame) -> ChangeExtent {
        let extent = match &self.previous {
            Some(prev) if prev.width == current.width && prev.height == current.height => {
                frame_difference(
                    &prev.data,
                    &current.data,
                    current.width,
                    current.height,
                    self.threshold,
                    self.stride,
                )
            }
            Some(_) => {
                debug!(
                    width = current.width,
                    height = current.height,
                    "working resolution changed; restarting difference baseline"
                );
                ChangeExtent::EMPTY
            }
            None => ChangeExtent::EMPTY,
        };

        // The sampler reuses its buffer next cycle, so keep our own copy,
        // reusing the retained allocation.
        match &mut self.previous {
            Some(prev) => {
                prev.data.clone_from(&current.data);
                prev.width = current.width;
                prev.height = current.height;
            }
            None => self.previous = Some(current.clone()),
        }
        extent
    }

    pub fn has_baseline(&self) -> bool {
        self.previous.is_some()
    }

    /// Forget the retained frame (new camera session).
    pub fn reset(&mut self) {
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn black(w: u32, h: u32) -> RgbaFrame {
        RgbaFrame::filled(w, h, [0, 0, 0])
    }

    #[test]
    fn identical_frames_report_nothing() {
        let mut a = RgbaFrame::filled(64, 48, [12, 99, 200]);
        a.fill_rect(10, 10, 30, 20, [255, 0, 0]);
        let ext = frame_difference(&a.data, &a.data, 64, 48, 30, 2);
        assert_eq!(ext, ChangeExtent::EMPTY);
    }

    #[test]
    fn block_is_contained_in_extent() {
        let prev = black(128, 96);
        let mut cur = black(128, 96);
        cur.fill_rect(40, 40, 60, 60, [255, 255, 255]);

        let ext = frame_difference(&prev.data, &cur.data, 128, 96, 30, 2);
        assert_eq!(ext.changed, 100);
        assert_eq!((ext.min_x, ext.min_y), (40, 40));
        assert_eq!((ext.max_x, ext.max_y), (58, 58));
    }

    #[test]
    fn odd_aligned_block_is_found_within_stride() {
        let prev = black(50, 50);
        let mut cur = black(50, 50);
        cur.fill_rect(11, 7, 20, 16, [255, 255, 255]);

        let ext = frame_difference(&prev.data, &cur.data, 50, 50, 30, 2);
        assert!(ext.changed > 0);
        assert!(ext.min_x >= 11 && ext.min_x <= 12);
        assert!(ext.min_y >= 7 && ext.min_y <= 8);
        assert!(ext.max_x <= 19 && ext.max_x + 2 > 19);
        assert!(ext.max_y <= 15 && ext.max_y + 2 > 15);
    }

    #[test]
    fn change_at_threshold_is_not_motion() {
        let prev = black(8, 8);
        // 30 per channel sums to exactly 90: not strictly greater.
        let at = RgbaFrame::filled(8, 8, [30, 30, 30]);
        assert!(frame_difference(&prev.data, &at.data, 8, 8, 30, 2).is_empty());

        let above = RgbaFrame::filled(8, 8, [31, 30, 30]);
        assert_eq!(
            frame_difference(&prev.data, &above.data, 8, 8, 30, 2).changed,
            16
        );
    }

    #[test]
    fn alpha_changes_are_ignored() {
        let prev = black(8, 8);
        let mut cur = black(8, 8);
        for px in cur.data.chunks_exact_mut(CHANNELS) {
            px[3] = 0;
        }
        assert!(frame_difference(&prev.data, &cur.data, 8, 8, 30, 2).is_empty());
    }

    #[test]
    fn extent_stays_inside_working_frame() {
        let prev = black(31, 17);
        let cur = RgbaFrame::filled(31, 17, [255, 255, 255]);
        let ext = frame_difference(&prev.data, &cur.data, 31, 17, 30, 2);
        assert!(ext.min_x <= ext.max_x && ext.max_x <= 31);
        assert!(ext.min_y <= ext.max_y && ext.max_y <= 17);
        assert_eq!((ext.max_x, ext.max_y), (30, 16));
    }

    #[test]
    fn detector_cold_start_then_diffs() {
        let mut detector = ChangeDetector::new(30, 2);
        let first = black(128, 96);
        assert!(!detector.has_baseline());
        assert!(detector.detect(&first).is_empty());
        assert!(detector.has_baseline());

        let mut second = black(128, 96);
        second.fill_rect(40, 40, 60, 60, [255, 255, 255]);
        assert_eq!(detector.detect(&second).changed, 100);

        // The block stays put, so nothing moves relative to the retained copy.
        assert!(detector.detect(&second).is_empty());
    }

    #[test]
    fn detector_keeps_a_copy_not_an_alias() {
        let mut detector = ChangeDetector::new(30, 2);
        let mut buf = black(16, 16);
        detector.detect(&buf);

        // Reuse the same buffer for the "next frame", as the sampler does.
        buf.fill_rect(0, 0, 16, 16, [255, 255, 255]);
        assert_eq!(detector.detect(&buf).changed, 64);
    }

    #[test]
    fn resolution_change_restarts_baseline() {
        let mut detector = ChangeDetector::new(30, 2);
        detector.detect(&black(16, 16));
        let bigger = RgbaFrame::filled(32, 32, [255, 255, 255]);
        assert!(detector.detect(&bigger).is_empty());

        detector.reset();
        assert!(!detector.has_baseline());
    }

    #[test]
    fn huge_threshold_saturates_instead_of_overflowing() {
        let prev = black(16, 16);
        let mut cur = black(16, 16);
        cur.fill_rect(0, 0, 16, 16, [255, 255, 255]);
        let ext = frame_difference(&prev.data, &cur.data, 16, 16, u32::MAX, 1);
        assert!(ext.is_empty());
    }

    #[test]
    fn retained_frame_reuses_its_buffer() {
        let mut detector = ChangeDetector::new(30, 2);
        detector.detect(&black(32, 24));
        let before = detector.previous.as_ref().unwrap().data.as_ptr();

        let mut moved = black(32, 24);
        moved.fill_rect(4, 4, 12, 12, [255, 255, 255]);
        detector.detect(&moved);

        let kept = detector.previous.as_ref().unwrap();
        assert_eq!(kept.data.as_ptr(), before);
        assert_eq!(kept, &moved);
    }
}
