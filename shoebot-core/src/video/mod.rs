//! video — frames, frame sources and the downsampling stage
//!
//! The tracking loop never pushes frames around; it polls a [`FrameSource`]
//! once per tick and shrinks whatever it gets to a small working resolution
//! before any per-pixel work happens.

use anyhow::{ensure, Context, Result};
use fast_image_resize as fr;
use tracing::debug;

#[cfg(feature = "ffmpeg")]
mod file;
#[cfg(feature = "ffmpeg")]
pub use file::FileSource;

/// Bytes per packed RGBA8 pixel.
pub const CHANNELS: usize = 4;

/// A single video frame in packed RGBA8, row-major, no stride padding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RgbaFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RgbaFrame {
    /// An opaque frame filled with a single colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
        Self {
            data,
            width,
            height,
        }
    }

    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        ensure!(
            data.len() == width as usize * height as usize * CHANNELS,
            "RGBA buffer holds {} bytes, expected {} for {width}x{height}",
            data.len(),
            width as usize * height as usize * CHANNELS
        );
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Paint an axis-aligned block `[x0, x1) × [y0, y1)`, clipped to the frame.
    pub fn fill_rect(&mut self, x0: u32, y0: u32, x1: u32, y1: u32, rgb: [u8; 3]) {
        let x1 = x1.min(self.width);
        let y1 = y1.min(self.height);
        for y in y0..y1 {
            for x in x0..x1 {
                let i = (y as usize * self.width as usize + x as usize) * CHANNELS;
                self.data[i..i + 3].copy_from_slice(&rgb);
                self.data[i + 3] = 255;
            }
        }
    }
}

// ── Frame sources ────────────────────────────────────────────────────────────

/// Anything the loop can poll for "the frame the camera is showing right now".
pub trait FrameSource {
    /// `Ok(None)` means the source is alive but has nothing decodable yet.
    /// `Err` is a per-cycle fault; the caller logs it and tries again next tick.
    fn poll_frame(&mut self) -> Result<Option<&RgbaFrame>>;

    /// True once the source will never produce another frame.
    fn is_finished(&self) -> bool {
        false
    }

    /// Release the underlying device/stream. Must be idempotent.
    fn stop(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn poll_frame(&mut self) -> Result<Option<&RgbaFrame>> {
        (**self).poll_frame()
    }

    fn is_finished(&self) -> bool {
        (**self).is_finished()
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}

/// Deterministic stand-in camera: a grey backdrop with a bright block that
/// sweeps left to right, pausing every `period` frames so the tracker can be
/// watched losing and regaining lock.
pub struct SyntheticSource {
    frame: RgbaFrame,
    block: u32,
    step: u32,
    period: u32,
    warmup: u32,
    index: u64,
    limit: Option<u64>,
    stopped: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            frame: RgbaFrame::filled(width, height, [40, 40, 40]),
            block: (width.min(height) / 3).max(1),
            step: (width / 20).max(1),
            period: 90,
            warmup: 0,
            index: 0,
            limit: None,
            stopped: false,
        }
    }

    /// Report "not ready" for the first `frames` polls, like a camera that is
    /// still negotiating its stream.
    pub fn with_warmup(mut self, frames: u32) -> Self {
        self.warmup = frames;
        self
    }

    /// Finish after `frames` delivered frames.
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    fn paint(&mut self) {
        let (w, h) = (self.frame.width, self.frame.height);
        self.frame = RgbaFrame::filled(w, h, [40, 40, 40]);

        let phase = (self.index % self.period as u64) as u32;
        // Moving for the first two thirds of each period, still afterwards.
        let travel = phase.min(self.period * 2 / 3);
        let span = w.saturating_sub(self.block).max(1);
        let x = (travel * self.step) % span;
        let y = h / 2 - self.block.min(h) / 2;
        self.frame
            .fill_rect(x, y, x + self.block, y + self.block, [240, 240, 240]);
    }
}

impl FrameSource for SyntheticSource {
    fn poll_frame(&mut self) -> Result<Option<&RgbaFrame>> {
        if self.stopped || self.is_finished() {
            return Ok(None);
        }
        if self.warmup > 0 {
            self.warmup -= 1;
            return Ok(None);
        }
        self.paint();
        self.index += 1;
        Ok(Some(&self.frame))
    }

    fn is_finished(&self) -> bool {
        self.stopped || self.limit.is_some_and(|limit| self.index >= limit)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

// ── Frame sampler ────────────────────────────────────────────────────────────

/// Downsamples full-resolution frames into one persistent working buffer.
pub struct FrameSampler {
    downscale: f32,
    resizer: fr::Resizer,
    buf: RgbaFrame,
    resizes: u64,
}

impl FrameSampler {
    pub fn new(downscale: f32) -> Self {
        Self {
            downscale,
            resizer: fr::Resizer::new(),
            buf: RgbaFrame::default(),
            resizes: 0,
        }
    }

    /// `floor(W·s) × floor(H·s)`.
    pub fn target_size(&self, width: u32, height: u32) -> (u32, u32) {
        (
            (width as f64 * self.downscale as f64).floor() as u32,
            (height as f64 * self.downscale as f64).floor() as u32,
        )
    }

    /// How many times the working buffer has been reallocated.
    pub fn resizes(&self) -> u64 {
        self.resizes
    }

    /// Shrink `frame` into the working buffer. Returns `None` when the scaled
    /// size would be empty, which the loop treats as "skip this cycle".
    pub fn sample(&mut self, frame: &RgbaFrame) -> Result<Option<&RgbaFrame>> {
        let (out_w, out_h) = self.target_size(frame.width, frame.height);
        if out_w == 0 || out_h == 0 {
            return Ok(None);
        }

        if self.buf.width != out_w || self.buf.height != out_h {
            debug!(out_w, out_h, "resizing downsample buffer");
            self.buf.width = out_w;
            self.buf.height = out_h;
            self.resizes += 1;
        }
        let out_len = out_w as usize * out_h as usize * CHANNELS;
        if self.buf.data.len() != out_len {
            self.buf.data.resize(out_len, 0);
        }

        let src =
            fr::images::ImageRef::new(frame.width, frame.height, &frame.data, fr::PixelType::U8x4)
                .context("failed to create downsample source")?;

        let mut dst = fr::images::Image::from_vec_u8(
            out_w,
            out_h,
            std::mem::take(&mut self.buf.data),
            fr::PixelType::U8x4,
        )
        .context("failed to create downsample destination")?;

        // The fourth byte may be padding (RGBx cameras), so never premultiply.
        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear))
            .use_alpha(false);
        let resized = self
            .resizer
            .resize(&src, &mut dst, Some(&options))
            .context("fast_image_resize downsample failed");

        self.buf.data = dst.into_vec();
        resized?;
        Ok(Some(&self.buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_size_floors() {
        let sampler = FrameSampler::new(0.2);
        assert_eq!(sampler.target_size(640, 480), (128, 96));
        assert_eq!(sampler.target_size(643, 482), (128, 96));
        assert_eq!(sampler.target_size(4, 4), (0, 0));
    }

    #[test]
    fn sampler_reuses_buffer_until_size_changes() {
        let mut sampler = FrameSampler::new(0.5);
        let frame = RgbaFrame::filled(40, 20, [10, 20, 30]);

        let out = sampler.sample(&frame).unwrap().unwrap();
        assert_eq!((out.width, out.height), (20, 10));
        assert_eq!(out.data.len(), 20 * 10 * CHANNELS);
        sampler.sample(&frame).unwrap().unwrap();
        assert_eq!(sampler.resizes(), 1);

        let bigger = RgbaFrame::filled(80, 40, [10, 20, 30]);
        let out = sampler.sample(&bigger).unwrap().unwrap();
        assert_eq!((out.width, out.height), (40, 20));
        assert_eq!(sampler.resizes(), 2);
    }

    #[test]
    fn uniform_frame_stays_uniform() {
        let mut sampler = FrameSampler::new(0.25);
        let frame = RgbaFrame::filled(64, 48, [200, 100, 50]);
        let out = sampler.sample(&frame).unwrap().unwrap();
        for px in out.data.chunks_exact(CHANNELS) {
            for (got, want) in px.iter().zip([200u8, 100, 50, 255]) {
                assert!(got.abs_diff(want) <= 1, "{px:?}");
            }
        }
    }

    #[test]
    fn tiny_frame_is_skipped() {
        let mut sampler = FrameSampler::new(0.2);
        let frame = RgbaFrame::filled(3, 3, [0, 0, 0]);
        assert!(sampler.sample(&frame).unwrap().is_none());
    }

    #[test]
    fn malformed_frame_is_an_error_and_sampler_recovers() {
        let mut sampler = FrameSampler::new(0.5);
        let broken = RgbaFrame {
            data: vec![0; 10],
            width: 40,
            height: 20,
        };
        assert!(sampler.sample(&broken).is_err());

        let frame = RgbaFrame::filled(40, 20, [1, 2, 3]);
        assert!(sampler.sample(&frame).unwrap().is_some());
    }

    #[test]
    fn synthetic_source_warms_up_then_moves() {
        let mut source = SyntheticSource::new(160, 120).with_warmup(2).with_limit(3);
        assert!(source.poll_frame().unwrap().is_none());
        assert!(source.poll_frame().unwrap().is_none());

        let first = source.poll_frame().unwrap().unwrap().clone();
        let second = source.poll_frame().unwrap().unwrap().clone();
        assert_ne!(first, second);

        source.poll_frame().unwrap().unwrap();
        assert!(source.is_finished());
        assert!(source.poll_frame().unwrap().is_none());
    }

    #[test]
    fn from_raw_checks_length() {
        assert!(RgbaFrame::from_raw(2, 2, vec![0; 16]).is_ok());
        assert!(RgbaFrame::from_raw(2, 2, vec![0; 15]).is_err());
    }
}
