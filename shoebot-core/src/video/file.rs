//! FFmpeg-backed frame source: decodes a video file (or anything else FFmpeg
//! can open) into RGBA frames, one per poll.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, frame, media, software::scaling};
use std::path::Path;
use tracing::{debug, info};

use super::{FrameSource, RgbaFrame, CHANNELS};

/// Scaling flags — bilinear is fast and good enough for the decode→RGBA path.
const SCALE_FLAGS: scaling::Flags = scaling::Flags::BILINEAR;

pub struct FileSource {
    input: format::context::Input,
    decoder: ffmpeg::decoder::Video,
    to_rgba: scaling::Context,
    stream_index: usize,
    decoded: frame::Video,
    rgba: frame::Video,
    frame: RgbaFrame,
    eof_sent: bool,
    finished: bool,
    frame_count: u64,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        ffmpeg::init().context("failed to initialise FFmpeg")?;

        let input = format::input(&path).context("could not open input")?;
        let stream = input
            .streams()
            .best(media::Type::Video)
            .context("no video stream found in input")?;
        let stream_index = stream.index();

        let decoder_ctx = codec::context::Context::from_parameters(stream.parameters())
            .context("failed to build decoder context")?;
        let decoder = decoder_ctx
            .decoder()
            .video()
            .context("failed to open video decoder")?;

        let width = decoder.width();
        let height = decoder.height();
        let src_pixel_fmt = decoder.format();
        info!(width, height, ?src_pixel_fmt, "opened input video stream");

        let to_rgba = scaling::Context::get(
            src_pixel_fmt,
            width,
            height,
            format::Pixel::RGBA,
            width,
            height,
            SCALE_FLAGS,
        )
        .context("failed to create to-RGBA scaler")?;

        Ok(Self {
            input,
            decoder,
            to_rgba,
            stream_index,
            decoded: frame::Video::empty(),
            rgba: frame::Video::empty(),
            frame: RgbaFrame {
                data: Vec::with_capacity(width as usize * height as usize * CHANNELS),
                width,
                height,
            },
            eof_sent: false,
            finished: false,
            frame_count: 0,
        })
    }

    fn convert_decoded(&mut self) -> Result<()> {
        self.to_rgba
            .run(&self.decoded, &mut self.rgba)
            .context("to-RGBA scaling failed")?;

        // Compact to a plain Vec<u8> (remove stride padding if any)
        let width = self.rgba.width() as usize;
        let height = self.rgba.height() as usize;
        let stride = self.rgba.stride(0);
        let raw = self.rgba.data(0);
        self.frame.data.clear();
        for row in 0..height {
            let start = row * stride;
            self.frame
                .data
                .extend_from_slice(&raw[start..start + width * CHANNELS]);
        }
        self.frame.width = width as u32;
        self.frame.height = height as u32;
        Ok(())
    }
}

impl FrameSource for FileSource {
    fn poll_frame(&mut self) -> Result<Option<&RgbaFrame>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            if self.decoder.receive_frame(&mut self.decoded).is_ok() {
                self.convert_decoded()?;
                self.frame_count += 1;
                if self.frame_count % 100 == 0 {
                    debug!(frame_count = self.frame_count, "decoded frames");
                }
                return Ok(Some(&self.frame));
            }

            if self.eof_sent {
                info!(frame_count = self.frame_count, "input exhausted");
                self.finished = true;
                return Ok(None);
            }

            match self.input.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() == self.stream_index {
                        self.decoder
                            .send_packet(&packet)
                            .context("decoder send_packet")?;
                    }
                }
                None => {
                    self.decoder.send_eof().ok();
                    self.eof_sent = true;
                }
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn stop(&mut self) {
        self.finished = true;
    }
}
