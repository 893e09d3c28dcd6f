//! rendering — heads-up display over the camera feed
//!
//! The HUD is described first as a list of [`HudElement`]s (a pure function of
//! the track state and frame size) and then rasterised with `imageproc` onto a
//! transparent RGBA overlay the same size as the video frame. The overlay is
//! cleared and redrawn from scratch every cycle.

use ab_glyph::{FontArc, PxScale};
use anyhow::{ensure, Context, Result};
use image::{ImageBuffer, Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, Blend,
};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::debug;

use crate::{tracking::TrackState, video::RgbaFrame};

/// HUD cyan at 30% opacity (frame border).
pub const BORDER_COLOR: Rgba<u8> = Rgba([6, 182, 212, 77]);
/// HUD cyan at 50% opacity (reticle, "searching" text).
pub const RETICLE_COLOR: Rgba<u8> = Rgba([6, 182, 212, 128]);
/// Lock-on green.
pub const LOCK_COLOR: Rgba<u8> = Rgba([34, 197, 94, 255]);
/// Lock-on green at 10% opacity.
pub const LOCK_FILL_COLOR: Rgba<u8> = Rgba([34, 197, 94, 26]);

/// Half-length of each reticle arm.
const RETICLE_ARM: f32 = 10.0;
/// Label text height in pixels.
const TEXT_PX: f32 = 12.0;
/// Gap between the label baseline and the top of the tracking box.
const LABEL_OFFSET: f32 = 8.0;
const SEARCHING_POS: (f32, f32) = (30.0, 40.0);

pub const SEARCHING_TEXT: &str = "SEARCHING...";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HudRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl HudRect {
    fn to_rect(self) -> Option<Rect> {
        let w = self.width.round();
        let h = self.height.round();
        if w < 1.0 || h < 1.0 {
            return None;
        }
        Some(Rect::at(self.x.round() as i32, self.y.round() as i32).of_size(w as u32, h as u32))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HudElement {
    /// 2px outline.
    Stroke { rect: HudRect, color: Rgba<u8> },
    Line {
        from: (f32, f32),
        to: (f32, f32),
        color: Rgba<u8>,
    },
    Fill { rect: HudRect, color: Rgba<u8> },
    /// `(x, y)` is the text baseline origin.
    Text {
        text: String,
        x: f32,
        y: f32,
        color: Rgba<u8>,
    },
}

/// Describe the HUD for one cycle.
pub fn hud_elements(
    state: &TrackState,
    width: u32,
    height: u32,
    margin: u32,
    padding: u32,
) -> Vec<HudElement> {
    let (w, h) = (width as f32, height as f32);
    let m = margin as f32;
    let (cx, cy) = (w / 2.0, h / 2.0);

    let mut elements = vec![
        HudElement::Stroke {
            rect: HudRect {
                x: m,
                y: m,
                width: (w - 2.0 * m).max(0.0),
                height: (h - 2.0 * m).max(0.0),
            },
            color: BORDER_COLOR,
        },
        HudElement::Line {
            from: (cx - RETICLE_ARM, cy),
            to: (cx + RETICLE_ARM, cy),
            color: RETICLE_COLOR,
        },
        HudElement::Line {
            from: (cx, cy - RETICLE_ARM),
            to: (cx, cy + RETICLE_ARM),
            color: RETICLE_COLOR,
        },
    ];

    if state.lock.is_locked() {
        let p = padding as f32;
        let b = state.bbox;
        let rect = HudRect {
            x: b.x - p,
            y: b.y - p,
            width: b.width + p * 2.0,
            height: b.height + p * 2.0,
        };
        elements.push(HudElement::Stroke {
            rect,
            color: LOCK_COLOR,
        });
        elements.push(HudElement::Text {
            text: locked_label(&rect),
            x: rect.x,
            y: rect.y - LABEL_OFFSET,
            color: LOCK_COLOR,
        });
        elements.push(HudElement::Fill {
            rect,
            color: LOCK_FILL_COLOR,
        });
    } else {
        elements.push(HudElement::Text {
            text: SEARCHING_TEXT.to_string(),
            x: SEARCHING_POS.0,
            y: SEARCHING_POS.1,
            color: RETICLE_COLOR,
        });
    }

    elements
}

fn locked_label(rect: &HudRect) -> String {
    format!(
        "TARGET LOCKED [{}x{}]",
        rect.width.round() as i64,
        rect.height.round() as i64
    )
}

// ── Overlay surface ──────────────────────────────────────────────────────────

/// Transparent drawing surface aligned 1:1 with the video frame.
pub struct Overlay {
    image: RgbaImage,
    resizes: u64,
}

impl Overlay {
    pub fn new() -> Self {
        Self {
            image: RgbaImage::new(0, 0),
            resizes: 0,
        }
    }

    /// Match the frame's pixel dimensions. Returns true if a resize happened.
    pub fn sync_size(&mut self, width: u32, height: u32) -> bool {
        if self.image.width() == width && self.image.height() == height {
            return false;
        }
        debug!(width, height, "resizing overlay");
        self.image = RgbaImage::new(width, height);
        self.resizes += 1;
        true
    }

    pub fn clear(&mut self) {
        for px in self.image.pixels_mut() {
            *px = Rgba([0, 0, 0, 0]);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn resizes(&self) -> u64 {
        self.resizes
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

impl Default for Overlay {
    fn default() -> Self {
        Self::new()
    }
}

// ── HUD renderer ─────────────────────────────────────────────────────────────

pub struct HudRenderer {
    margin: u32,
    padding: u32,
    font: Option<FontArc>,
    last: Vec<HudElement>,
}

impl HudRenderer {
    pub fn new(margin: u32, padding: u32) -> Self {
        Self {
            margin,
            padding,
            font: None,
            last: Vec::new(),
        }
    }

    /// Rasterise text labels with this font. Without one, text elements are
    /// still produced but not drawn.
    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    pub fn load_font<P: AsRef<Path>>(path: P) -> Result<FontArc> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font: {}", path.display()))?;
        FontArc::try_from_vec(bytes)
            .map_err(|e| anyhow::anyhow!("invalid font {}: {e}", path.display()))
    }

    /// Elements drawn on the most recent cycle.
    pub fn last_elements(&self) -> &[HudElement] {
        &self.last
    }

    /// Clear `overlay` and draw the HUD for `state`. A zero-sized overlay is
    /// left untouched.
    pub fn render(&mut self, overlay: &mut Overlay, state: &TrackState) {
        if overlay.is_empty() {
            return;
        }
        overlay.clear();

        self.last = hud_elements(
            state,
            overlay.width(),
            overlay.height(),
            self.margin,
            self.padding,
        );

        let mut canvas = Blend(std::mem::take(&mut overlay.image));
        for element in &self.last {
            draw_element(&mut canvas, element, self.font.as_ref());
        }
        overlay.image = canvas.0;
    }
}

fn draw_element(canvas: &mut Blend<RgbaImage>, element: &HudElement, font: Option<&FontArc>) {
    match element {
        HudElement::Stroke { rect, color } => {
            if let Some(r) = rect.to_rect() {
                draw_hollow_rect_mut(canvas, r, *color);
            }
            let inner = HudRect {
                x: rect.x + 1.0,
                y: rect.y + 1.0,
                width: rect.width - 2.0,
                height: rect.height - 2.0,
            };
            if let Some(r) = inner.to_rect() {
                draw_hollow_rect_mut(canvas, r, *color);
            }
        }
        HudElement::Line { from, to, color } => {
            draw_line_segment_mut(canvas, *from, *to, *color);
        }
        HudElement::Fill { rect, color } => {
            if let Some(r) = rect.to_rect() {
                draw_filled_rect_mut(canvas, r, *color);
            }
        }
        HudElement::Text { text, x, y, color } => {
            if let Some(font) = font {
                draw_text_mut(
                    canvas,
                    *color,
                    x.round() as i32,
                    (y - TEXT_PX).round() as i32,
                    PxScale::from(TEXT_PX),
                    font,
                    text,
                );
            }
        }
    }
}

/// Alpha-blend `overlay` onto `frame` in place (for snapshots and recordings).
pub fn composite(frame: &mut RgbaFrame, overlay: &Overlay) -> Result<()> {
    ensure!(
        frame.width == overlay.width() && frame.height == overlay.height(),
        "overlay is {}x{} but frame is {}x{}",
        overlay.width(),
        overlay.height(),
        frame.width,
        frame.height
    );

    let mut img: RgbaImage =
        ImageBuffer::from_raw(frame.width, frame.height, std::mem::take(&mut frame.data))
            .context("frame buffer does not match its dimensions")?;
    image::imageops::overlay(&mut img, overlay.image(), 0, 0);
    frame.data = img.into_raw();
    Ok(())
}
