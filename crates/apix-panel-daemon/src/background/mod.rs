//! Background composition: static image, video underlay, alpha blending.
//!
//! The manager resolves its sources on every call, so path or file changes
//! take effect on the next frame. It never fails: decode problems fall back
//! to the other source or to a synthetic gradient.

mod source;
mod video;

pub use video::{PlayMode, VideoBackground};

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use image::imageops::FilterType;
use image::{Rgb, RgbImage, RgbaImage};
use tracing::debug;

/// Panel-sized background dimensions.
pub const BG_WIDTH: u32 = 320;
pub const BG_HEIGHT: u32 = 240;

/// Bytes in one RGB background frame.
pub const BG_BYTES: usize = (BG_WIDTH * BG_HEIGHT * 3) as usize;

/// Video container extensions the manager will open.
const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mov", "mkv"];

/// Decoded static background, keeping the source's channel count so the
/// compose step knows whether alpha blending applies.
#[derive(Clone)]
enum StaticImage {
    Opaque(RgbImage),
    Alpha(RgbaImage),
}

struct CachedStatic {
    path: PathBuf,
    mtime: SystemTime,
    image: StaticImage,
}

impl CachedStatic {
    fn is_stale(&self, path: &Path, mtime: SystemTime) -> bool {
        self.path != path || self.mtime != mtime
    }
}

/// Produces the next 320x240 RGB background frame.
pub struct BackgroundManager {
    static_bg: Option<CachedStatic>,
    video_bg: Option<VideoBackground>,
    default_bg: Option<RgbImage>,
    mode: PlayMode,
    fps: u32,
}

impl BackgroundManager {
    pub fn new(mode: PlayMode, fps: u32) -> Self {
        Self {
            static_bg: None,
            video_bg: None,
            default_bg: None,
            mode,
            fps,
        }
    }

    /// Returns the composed background as raw RGB bytes.
    ///
    /// An image with alpha blends over the video; an opaque image wins
    /// outright; otherwise whichever source exists is used, and with
    /// neither the gradient fallback.
    pub fn get_background_bytes(&mut self, video_path: &str, image_path: &str) -> Vec<u8> {
        let img = self.static_background(image_path);
        let vid = self.video_frame(video_path);

        let composed = match (img, vid) {
            (Some(StaticImage::Alpha(fg)), Some(bg)) => compose_over(&fg, &bg),
            (Some(StaticImage::Alpha(fg)), None) => drop_alpha(&fg),
            (Some(StaticImage::Opaque(img)), _) => img,
            (None, Some(vid)) => vid,
            (None, None) => self
                .default_bg
                .get_or_insert_with(default_background)
                .clone(),
        };
        composed.into_raw()
    }

    /// Stops and joins any active video worker.
    pub fn stop(&mut self) {
        if let Some(mut video) = self.video_bg.take() {
            video.stop();
        }
    }

    fn static_background(&mut self, path: &str) -> Option<StaticImage> {
        if path.is_empty() {
            return None;
        }
        let path = Path::new(path);
        let mtime = std::fs::metadata(path).ok()?.modified().ok()?;

        let stale = self
            .static_bg
            .as_ref()
            .map_or(true, |cached| cached.is_stale(path, mtime));
        if stale {
            self.static_bg = Some(load_static(path, mtime)?);
        }
        self.static_bg.as_ref().map(|cached| cached.image.clone())
    }

    fn video_frame(&mut self, path: &str) -> Option<RgbImage> {
        if path.is_empty() || !is_video_path(path) {
            return None;
        }

        let replace = self
            .video_bg
            .as_ref()
            .map_or(true, |video| video.path() != Path::new(path));
        if replace {
            if let Some(mut old) = self.video_bg.take() {
                old.stop();
            }
            match VideoBackground::open(path, self.mode, self.fps) {
                Ok(mut video) => {
                    video.start_playback();
                    self.video_bg = Some(video);
                }
                Err(e) => {
                    debug!("failed to open video {path}: {e}");
                    return None;
                }
            }
        }
        self.video_bg.as_ref()?.current_frame()
    }
}

impl Drop for BackgroundManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Whether the path carries a playable video extension.
fn is_video_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .map_or(false, |ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

fn load_static(path: &Path, mtime: SystemTime) -> Option<CachedStatic> {
    let decoded = match image::open(path) {
        Ok(img) => img,
        Err(e) => {
            debug!("failed to decode {}: {e}", path.display());
            return None;
        }
    };
    let has_alpha = decoded.color().has_alpha();
    let resized = decoded.resize_exact(BG_WIDTH, BG_HEIGHT, FilterType::Lanczos3);
    let image = if has_alpha {
        StaticImage::Alpha(resized.to_rgba8())
    } else {
        StaticImage::Opaque(resized.to_rgb8())
    };
    Some(CachedStatic {
        path: path.to_path_buf(),
        mtime,
        image,
    })
}

/// Alpha-blends the foreground over the video frame.
fn compose_over(fg: &RgbaImage, bg: &RgbImage) -> RgbImage {
    let mut out = RgbImage::new(BG_WIDTH, BG_HEIGHT);
    for (x, y, px) in out.enumerate_pixels_mut() {
        let f = fg.get_pixel(x, y);
        let v = bg.get_pixel(x, y);
        let alpha = f32::from(f[3]) / 255.0;
        for c in 0..3 {
            let blended = f32::from(f[c]) / 255.0 * alpha + f32::from(v[c]) / 255.0 * (1.0 - alpha);
            px[c] = (blended * 255.0).round() as u8;
        }
    }
    out
}

fn drop_alpha(img: &RgbaImage) -> RgbImage {
    let mut out = RgbImage::new(BG_WIDTH, BG_HEIGHT);
    for (x, y, px) in out.enumerate_pixels_mut() {
        let p = img.get_pixel(x, y);
        *px = Rgb([p[0], p[1], p[2]]);
    }
    out
}

/// Dim vertical gradient shown when no background is configured.
fn default_background() -> RgbImage {
    let mut img = RgbImage::new(BG_WIDTH, BG_HEIGHT);
    for y in 0..BG_HEIGHT {
        let ratio = f64::from(y) / f64::from(BG_HEIGHT);
        // slight per-row noise breaks up banding on the panel
        let noise = (y % 3) as i32 - 1;
        let val = ((20.0 + ratio * 40.0) as i32 + noise).clamp(0, 255) as u8;
        for x in 0..BG_WIDTH {
            img.put_pixel(x, y, Rgb([val, val / 2, val]));
        }
    }
    img
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_gradient_fallback_is_deterministic() {
        let mut manager = BackgroundManager::new(PlayMode::Loop, 24);
        let first = manager.get_background_bytes("", "");
        assert_eq!(first.len(), BG_BYTES);
        assert!(first.iter().any(|&b| b != 0));
        let second = manager.get_background_bytes("", "");
        assert_eq!(first, second);
    }

    #[test]
    fn test_is_video_path() {
        assert!(is_video_path("/tmp/clip.mp4"));
        assert!(is_video_path("/tmp/CLIP.MKV"));
        assert!(is_video_path("clip.mov"));
        assert!(is_video_path("clip.avi"));
        assert!(!is_video_path("clip.gif"));
        assert!(!is_video_path("clip"));
        assert!(!is_video_path("/tmp/clip.webm"));
    }

    #[test]
    fn test_alpha_compose_halves() {
        // left half transparent, right half opaque black over a grey video
        let mut fg = RgbaImage::new(BG_WIDTH, BG_HEIGHT);
        for (x, _, px) in fg.enumerate_pixels_mut() {
            px[3] = if x < BG_WIDTH / 2 { 0 } else { 255 };
        }
        let mut bg = RgbImage::new(BG_WIDTH, BG_HEIGHT);
        for (_, _, px) in bg.enumerate_pixels_mut() {
            *px = Rgb([100, 100, 100]);
        }

        let out = compose_over(&fg, &bg);
        assert_eq!(*out.get_pixel(0, 120), Rgb([100, 100, 100]));
        assert_eq!(*out.get_pixel(BG_WIDTH - 1, 120), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_cache_staleness() {
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let cached = CachedStatic {
            path: PathBuf::from("/tmp/bg.png"),
            mtime,
            image: StaticImage::Opaque(RgbImage::new(BG_WIDTH, BG_HEIGHT)),
        };
        assert!(!cached.is_stale(Path::new("/tmp/bg.png"), mtime));
        assert!(cached.is_stale(Path::new("/tmp/other.png"), mtime));
        assert!(cached.is_stale(
            Path::new("/tmp/bg.png"),
            mtime + Duration::from_secs(1)
        ));
    }

    #[test]
    fn test_static_image_reloaded_on_mtime_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bg.png");

        let mut red = RgbImage::new(8, 8);
        for px in red.pixels_mut() {
            *px = Rgb([255, 0, 0]);
        }
        red.save(&path).unwrap();
        let old = SystemTime::now() - Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(old)
            .unwrap();

        let mut manager = BackgroundManager::new(PlayMode::Loop, 24);
        let path_str = path.to_str().unwrap();
        let first = manager.get_background_bytes("", path_str);
        assert!(first[0] > 200 && first[1] < 50);

        // rewrite with a new mtime; the cache must reload
        let mut blue = RgbImage::new(8, 8);
        for px in blue.pixels_mut() {
            *px = Rgb([0, 0, 255]);
        }
        blue.save(&path).unwrap();
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now())
            .unwrap();

        let second = manager.get_background_bytes("", path_str);
        assert!(second[2] > 200 && second[0] < 50);
    }

    #[test]
    fn test_missing_image_falls_back_to_gradient() {
        let mut manager = BackgroundManager::new(PlayMode::Loop, 24);
        let with_missing = manager.get_background_bytes("", "/nonexistent/bg.png");
        let gradient = manager.get_background_bytes("", "");
        assert_eq!(with_missing, gradient);
    }

    #[test]
    fn test_opaque_image_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bg.png");
        let mut green = RgbImage::new(8, 8);
        for px in green.pixels_mut() {
            *px = Rgb([0, 255, 0]);
        }
        green.save(&path).unwrap();

        let mut manager = BackgroundManager::new(PlayMode::Loop, 24);
        // no video configured, so the opaque image stands alone
        let out = manager.get_background_bytes("", path.to_str().unwrap());
        assert_eq!(out.len(), BG_BYTES);
        assert!(out[1] > 200 && out[0] < 50 && out[2] < 50);
    }
}
