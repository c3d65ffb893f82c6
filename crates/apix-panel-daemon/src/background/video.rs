//! Video background playback.
//!
//! Short clips are fully decoded up front and a worker just steps a frame
//! cursor; long clips keep the decoder open and the worker streams frames
//! into a shared slot. Either way the worker owns a loop flag observed at
//! each tick and is joined on stop.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use image::RgbImage;
use tracing::debug;

use super::source::{FfmpegSource, VideoSource};

/// Sources at or under this duration are fully decoded up front.
const PRELOAD_MAX_SECS: f64 = 10.0;

/// Playback mode for preloaded clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayMode {
    /// Wrap to the first frame after the last.
    #[default]
    Loop,
    /// Reverse direction at each end.
    Bounce,
}

impl FromStr for PlayMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "loop" => Ok(PlayMode::Loop),
            "bounce" => Ok(PlayMode::Bounce),
            _ => Err(anyhow!("unknown playback mode: {s}")),
        }
    }
}

impl std::fmt::Display for PlayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayMode::Loop => write!(f, "loop"),
            PlayMode::Bounce => write!(f, "bounce"),
        }
    }
}

/// Cursor over a preloaded frame list.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    index: usize,
    forward: bool,
}

/// Advances a preloaded-playback cursor by one tick.
fn advance(index: usize, forward: bool, len: usize, mode: PlayMode) -> (usize, bool) {
    if len <= 1 {
        return (0, forward);
    }
    match mode {
        PlayMode::Loop => ((index + 1) % len, forward),
        PlayMode::Bounce => {
            if forward {
                let next = index + 1;
                if next >= len - 1 {
                    (len - 1, false)
                } else {
                    (next, true)
                }
            } else {
                let next = index.saturating_sub(1);
                (next, next == 0)
            }
        }
    }
}

enum Playback {
    Preloaded {
        frames: Arc<Vec<RgbImage>>,
        cursor: Arc<Mutex<Cursor>>,
    },
    Streaming {
        current: Arc<Mutex<Option<RgbImage>>>,
        /// Handed to the worker when playback starts.
        source: Option<Box<dyn VideoSource>>,
    },
}

/// One video background with its playback worker.
pub struct VideoBackground {
    path: PathBuf,
    mode: PlayMode,
    fps: u32,
    playing: Arc<AtomicBool>,
    playback: Playback,
    worker: Option<JoinHandle<()>>,
}

impl VideoBackground {
    /// Opens a video file, choosing preload or streaming by duration.
    pub fn open(path: &str, mode: PlayMode, fps: u32) -> Result<Self> {
        let source = FfmpegSource::open(path)?;
        Ok(Self::from_source(
            Box::new(source),
            Path::new(path),
            mode,
            fps,
        ))
    }

    fn from_source(mut source: Box<dyn VideoSource>, path: &Path, mode: PlayMode, fps: u32) -> Self {
        let playback = if source.duration_secs() <= PRELOAD_MAX_SECS {
            let mut frames = Vec::new();
            while let Some(frame) = source.next_frame() {
                frames.push(frame);
            }
            debug!("preloaded {} frames from {}", frames.len(), path.display());
            Playback::Preloaded {
                frames: Arc::new(frames),
                cursor: Arc::new(Mutex::new(Cursor {
                    index: 0,
                    forward: true,
                })),
            }
        } else {
            debug!("streaming {}", path.display());
            Playback::Streaming {
                current: Arc::new(Mutex::new(None)),
                source: Some(source),
            }
        };

        Self {
            path: path.to_path_buf(),
            mode,
            fps,
            playing: Arc::new(AtomicBool::new(false)),
            playback,
            worker: None,
        }
    }

    /// Starts the playback worker. No-op while already playing.
    pub fn start_playback(&mut self) {
        if self.playing.load(Ordering::SeqCst) {
            return;
        }

        match &mut self.playback {
            Playback::Preloaded { frames, cursor } => {
                if frames.is_empty() {
                    return;
                }
                self.playing.store(true, Ordering::SeqCst);
                let playing = self.playing.clone();
                let frames = frames.clone();
                let cursor = cursor.clone();
                let mode = self.mode;
                let tick = Duration::from_millis(1000 / u64::from(self.fps.max(1)));
                self.worker = Some(std::thread::spawn(move || {
                    while playing.load(Ordering::SeqCst) {
                        std::thread::sleep(tick);
                        let mut cur = cursor.lock().unwrap();
                        let (index, forward) = advance(cur.index, cur.forward, frames.len(), mode);
                        cur.index = index;
                        cur.forward = forward;
                    }
                }));
            }
            Playback::Streaming { current, source } => {
                // the decoder is consumed by the first start; a stopped
                // stream cannot resume
                let Some(mut source) = source.take() else {
                    debug!("stream source already consumed");
                    return;
                };
                self.playing.store(true, Ordering::SeqCst);
                let playing = self.playing.clone();
                let current = current.clone();
                let fps = if source.fps() > 0.0 {
                    source.fps()
                } else {
                    f64::from(self.fps.max(1))
                };
                let delay = Duration::from_millis((1000.0 / fps).max(1.0) as u64);
                self.worker = Some(std::thread::spawn(move || {
                    while playing.load(Ordering::SeqCst) {
                        match source.next_frame() {
                            Some(frame) => {
                                *current.lock().unwrap() = Some(frame);
                                std::thread::sleep(delay);
                            }
                            None => source.rewind(),
                        }
                    }
                }));
            }
        }
    }

    /// Stops the worker and waits for it to exit.
    pub fn stop(&mut self) {
        self.playing.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    /// A copy of the frame to show right now, if one has been produced.
    pub fn current_frame(&self) -> Option<RgbImage> {
        match &self.playback {
            Playback::Preloaded { frames, cursor } => {
                if frames.is_empty() {
                    return None;
                }
                let index = cursor.lock().unwrap().index;
                frames.get(index).cloned()
            }
            Playback::Streaming { current, .. } => current.lock().unwrap().clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of preloaded frames; 0 while streaming.
    pub fn frame_count(&self) -> usize {
        match &self.playback {
            Playback::Preloaded { frames, .. } => frames.len(),
            Playback::Streaming { .. } => 0,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.playback, Playback::Streaming { .. })
    }
}

impl Drop for VideoBackground {
    fn drop(&mut self) {
        self.stop();
    }
}
