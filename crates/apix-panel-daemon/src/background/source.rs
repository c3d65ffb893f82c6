//! Video decoding behind a small source trait.
//!
//! The playback worker only needs frames at panel size plus a few stream
//! properties, so decoding sits behind [`VideoSource`]; tests substitute
//! synthetic sources and playback logic stays independent of ffmpeg.

use anyhow::{anyhow, Context as _, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;

use super::{BG_HEIGHT, BG_WIDTH};

/// A decodable video, scaled to panel size.
pub trait VideoSource: Send {
    /// Native frame rate; 0.0 when the container does not say.
    fn fps(&self) -> f64;

    /// Total duration in seconds; 0.0 when unknown.
    fn duration_secs(&self) -> f64;

    /// Decodes the next frame, already resized to 320x240 RGB.
    /// None at end of stream.
    fn next_frame(&mut self) -> Option<RgbImage>;

    /// Seeks back to the first frame.
    fn rewind(&mut self);
}

fn ffmpeg_init() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        if let Err(e) = ffmpeg::init() {
            tracing::warn!("ffmpeg init failed: {e}");
        }
    });
}

/// ffmpeg-backed video source.
pub struct FfmpegSource {
    ictx: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    fps: f64,
    duration: f64,
    eof_sent: bool,
}

// SAFETY: the format context, decoder, scaler and the format context's
// shared destructor handle are all owned by this struct alone and only
// touched from one thread at a time.
unsafe impl Send for FfmpegSource {}

impl FfmpegSource {
    /// Opens a video file and prepares decode + scale to panel size.
    pub fn open(path: &str) -> Result<Self> {
        ffmpeg_init();

        let ictx = ffmpeg::format::input(&path).with_context(|| format!("open video {path}"))?;
        let (stream_index, fps, duration, parameters) = {
            let stream = ictx
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| anyhow!("no video stream in {path}"))?;
            let fps = f64::from(stream.avg_frame_rate());
            let duration = if stream.frames() > 0 && fps > 0.0 {
                stream.frames() as f64 / fps
            } else if stream.duration() > 0 {
                stream.duration() as f64 * f64::from(stream.time_base())
            } else {
                0.0
            };
            (stream.index(), fps, duration, stream.parameters())
        };

        let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)?
            .decoder()
            .video()?;
        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::RGB24,
            BG_WIDTH,
            BG_HEIGHT,
            ffmpeg::software::scaling::Flags::LANCZOS,
        )?;

        Ok(Self {
            ictx,
            decoder,
            scaler,
            stream_index,
            fps,
            duration,
            eof_sent: false,
        })
    }

    fn read_packet(&mut self) -> Option<ffmpeg::Packet> {
        let mut packet = ffmpeg::Packet::empty();
        loop {
            match packet.read(&mut self.ictx) {
                Ok(()) => {
                    if packet.stream() == self.stream_index {
                        return Some(packet);
                    }
                }
                Err(ffmpeg::Error::Eof) => return None,
                Err(e) => {
                    tracing::debug!("packet read error: {e}");
                    return None;
                }
            }
        }
    }

    fn scale_to_rgb(&mut self, frame: &ffmpeg::frame::Video) -> Option<RgbImage> {
        let mut scaled = ffmpeg::frame::Video::empty();
        if self.scaler.run(frame, &mut scaled).is_err() {
            return None;
        }

        // scaler output rows may carry stride padding
        let stride = scaled.stride(0);
        let data = scaled.data(0);
        let row_len = BG_WIDTH as usize * 3;
        let mut buf = Vec::with_capacity(row_len * BG_HEIGHT as usize);
        for y in 0..BG_HEIGHT as usize {
            let offset = y * stride;
            buf.extend_from_slice(&data[offset..offset + row_len]);
        }
        RgbImage::from_raw(BG_WIDTH, BG_HEIGHT, buf)
    }
}

impl VideoSource for FfmpegSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn duration_secs(&self) -> f64 {
        self.duration
    }

    fn next_frame(&mut self) -> Option<RgbImage> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.scale_to_rgb(&decoded);
            }
            if self.eof_sent {
                return None;
            }
            match self.read_packet() {
                Some(packet) => {
                    let _ = self.decoder.send_packet(&packet);
                }
                None => {
                    let _ = self.decoder.send_eof();
                    self.eof_sent = true;
                }
            }
        }
    }

    fn rewind(&mut self) {
        if let Err(e) = self.ictx.seek(0, ..) {
            tracing::debug!("seek to start failed: {e}");
            return;
        }
        self.decoder.flush();
        self.eof_sent = false;
    }
}
