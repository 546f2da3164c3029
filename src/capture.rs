//! Screen capture with ordered strategy fallback.
//!
//! Uses `xcap` for in-process capture (window first, then monitor) and an
//! external screenshot utility as a last resort. Availability is probed
//! once at construction; the bound strategy is fixed for the grabber's
//! lifetime. A failed capture is retried once and then degrades to "no
//! frame" — callers get a zero-filled raster from the grayscale accessors
//! so shape contracts always hold.

use crate::config::WindowRegion;
use anyhow::{Context, Result, bail};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, RgbImage};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// How long an external screenshot process may run before it is killed.
const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(5);

/// Frame acquisition capability consumed by the environment and recorder.
pub trait FrameSource {
    /// The configured capture rectangle.
    fn region(&self) -> WindowRegion;

    /// Capture a fresh frame, or `None` if capture is currently failing
    /// (transient focus loss etc.). Never cached.
    fn capture(&mut self) -> Option<RgbImage>;

    /// Grayscale frame, or a zero raster of the full window shape when
    /// capture failed.
    fn grab_grayscale(&mut self) -> GrayImage {
        let region = self.region();
        match self.capture() {
            Some(frame) => imageops::grayscale(&frame),
            None => GrayImage::new(region.width, region.height),
        }
    }

    /// Grayscale frame resized to the requested dimensions.
    fn grab_resized(&mut self, width: u32, height: u32) -> GrayImage {
        let gray = self.grab_grayscale();
        imageops::resize(&gray, width, height, FilterType::Triangle)
    }
}

/// One concrete way to get pixels, in fallback preference order.
enum Strategy {
    /// Compositor capture of the game window itself.
    Window(xcap::Window),
    /// Capture of the monitor containing the region, then crop.
    Monitor(xcap::Monitor),
    /// External screenshot process writing a temp PNG.
    Screenshot { program: &'static str },
}

/// Screen grabber bound to the first usable capture strategy.
pub struct ScreenGrabber {
    region: WindowRegion,
    strategy: Strategy,
}

impl ScreenGrabber {
    /// Probe strategies in preference order and bind to the first usable one.
    ///
    /// Finding no usable strategy is a configuration error: fatal, never
    /// retried at capture time.
    pub fn new(region: WindowRegion, window_title: &str) -> Result<Self> {
        if let Some(window) = find_window(window_title) {
            log::info!("Capture strategy: window \"{}\"", window.title());
            return Ok(Self {
                region,
                strategy: Strategy::Window(window),
            });
        }

        if let Some(monitor) = find_monitor(region.left, region.top) {
            log::info!("Capture strategy: monitor at ({}, {})", monitor.x(), monitor.y());
            return Ok(Self {
                region,
                strategy: Strategy::Monitor(monitor),
            });
        }

        if let Some(program) = find_screenshot_program() {
            log::info!("Capture strategy: external process `{}`", program);
            return Ok(Self {
                region,
                strategy: Strategy::Screenshot { program },
            });
        }

        bail!("No usable capture strategy (no window, monitor, or screenshot utility found)")
    }

    /// Name of the bound strategy, for diagnostics.
    pub fn strategy_name(&self) -> &'static str {
        match self.strategy {
            Strategy::Window(_) => "window",
            Strategy::Monitor(_) => "monitor",
            Strategy::Screenshot { .. } => "screenshot-process",
        }
    }

    fn try_capture(&self) -> Result<RgbImage> {
        match &self.strategy {
            Strategy::Window(window) => {
                let image = window
                    .capture_image()
                    .context("Window capture failed")?;
                let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
                crop_to_region(&rgb, self.region.left - window.x(), self.region.top - window.y(), self.region)
            }
            Strategy::Monitor(monitor) => {
                let image = monitor
                    .capture_image()
                    .context("Monitor capture failed")?;
                let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
                crop_to_region(&rgb, self.region.left - monitor.x(), self.region.top - monitor.y(), self.region)
            }
            Strategy::Screenshot { program } => capture_via_process(program, self.region),
        }
    }
}

impl FrameSource for ScreenGrabber {
    fn region(&self) -> WindowRegion {
        self.region
    }

    fn capture(&mut self) -> Option<RgbImage> {
        // One immediate retry, then degrade to "no frame".
        for attempt in 1..=2 {
            match self.try_capture() {
                Ok(frame) => return Some(frame),
                Err(e) => log::warn!("Capture attempt {attempt} failed: {e}"),
            }
        }
        None
    }
}

fn find_window(title_substring: &str) -> Option<xcap::Window> {
    let needle = title_substring.to_lowercase();
    let windows = xcap::Window::all().ok()?;
    windows
        .into_iter()
        .find(|w| w.title().to_lowercase().contains(&needle))
}

fn find_monitor(x: i32, y: i32) -> Option<xcap::Monitor> {
    let monitors = xcap::Monitor::all().ok()?;
    monitors.into_iter().find(|m| {
        x >= m.x()
            && x < m.x() + m.width() as i32
            && y >= m.y()
            && y < m.y() + m.height() as i32
    })
}

/// External screenshot utilities in probe order, full-screen output to a path.
const SCREENSHOT_PROGRAMS: &[&str] = &["grim", "scrot", "gnome-screenshot", "screencapture"];

fn screenshot_args(program: &str, output: &Path) -> Vec<String> {
    let path = output.display().to_string();
    match program {
        "scrot" => vec!["-o".to_string(), path],
        "gnome-screenshot" => vec!["-f".to_string(), path],
        "screencapture" => vec!["-x".to_string(), path],
        // grim and anything else: just the output path
        _ => vec![path],
    }
}

fn find_screenshot_program() -> Option<&'static str> {
    SCREENSHOT_PROGRAMS.iter().copied().find(|program| {
        Command::new(program)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|mut child| {
                let _ = child.wait();
                true
            })
            .unwrap_or(false)
    })
}

/// Run an external screenshot utility and crop its output to the region.
///
/// The temp artifact lives in its own unique directory, so concurrent
/// grabbers never collide, and the directory is removed on every exit path.
fn capture_via_process(program: &str, region: WindowRegion) -> Result<RgbImage> {
    let dir = tempfile::Builder::new()
        .prefix("cm-bridge-shot-")
        .tempdir()
        .context("Failed to create temp dir for screenshot")?;
    let output = dir.path().join("screen.png");

    let mut child = Command::new(program)
        .args(screenshot_args(program, &output))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to spawn `{program}`"))?;

    let deadline = Instant::now() + SCREENSHOT_TIMEOUT;
    let status = loop {
        if let Some(status) = child.try_wait().context("Failed to poll screenshot process")? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            bail!("`{program}` did not finish within {}s", SCREENSHOT_TIMEOUT.as_secs());
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    if !status.success() {
        bail!("`{program}` exited with {status}");
    }
    let len = std::fs::metadata(&output).map(|m| m.len()).unwrap_or(0);
    if len == 0 {
        bail!("`{program}` produced no output artifact");
    }

    let image = image::open(&output)
        .with_context(|| format!("Failed to read screenshot {}", output.display()))?
        .to_rgb8();
    crop_to_region(&image, region.left, region.top, region)
    // `dir` dropped here: temp artifact deleted on success and failure alike
}

/// Crop `image` to the window region at the given image-local origin,
/// clamped to the image's actual bounds. Never crops past an edge.
fn crop_to_region(image: &RgbImage, left: i32, top: i32, region: WindowRegion) -> Result<RgbImage> {
    let x = left.clamp(0, image.width() as i32) as u32;
    let y = top.clamp(0, image.height() as i32) as u32;
    let width = region.width.min(image.width() - x);
    let height = region.height.min(image.height() - y);
    if width == 0 || height == 0 {
        bail!(
            "Capture region {}x{} at ({left}, {top}) lies outside the {}x{} artifact",
            region.width,
            region.height,
            image.width(),
            image.height()
        );
    }
    Ok(imageops::crop_imm(image, x, y, width, height).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoFrames {
        region: WindowRegion,
    }

    impl FrameSource for NoFrames {
        fn region(&self) -> WindowRegion {
            self.region
        }

        fn capture(&mut self) -> Option<RgbImage> {
            None
        }
    }

    #[test]
    fn test_failed_capture_degrades_to_zero_frame() {
        let mut source = NoFrames {
            region: WindowRegion {
                left: 0,
                top: 0,
                width: 64,
                height: 48,
            },
        };
        let gray = source.grab_grayscale();
        assert_eq!((gray.width(), gray.height()), (64, 48));
        assert!(gray.pixels().all(|p| p.0[0] == 0));

        let small = source.grab_resized(16, 9);
        assert_eq!((small.width(), small.height()), (16, 9));
        assert!(small.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_crop_clamps_to_artifact_bounds() {
        let image = RgbImage::new(100, 80);
        let region = WindowRegion {
            left: 0,
            top: 0,
            width: 200,
            height: 200,
        };
        // Region larger than the artifact: clamped, not an error
        let cropped = crop_to_region(&image, 40, 30, region).unwrap();
        assert_eq!((cropped.width(), cropped.height()), (60, 50));

        // Negative origin clamps to zero
        let cropped = crop_to_region(&image, -10, -10, region).unwrap();
        assert_eq!((cropped.width(), cropped.height()), (100, 80));
    }

    #[test]
    fn test_crop_outside_artifact_is_error() {
        let image = RgbImage::new(100, 80);
        let region = WindowRegion {
            left: 0,
            top: 0,
            width: 50,
            height: 50,
        };
        assert!(crop_to_region(&image, 100, 0, region).is_err());
        assert!(crop_to_region(&image, 0, 80, region).is_err());
    }

    #[test]
    fn test_grab_resized_leaves_capture_untouched() {
        struct Gradient {
            region: WindowRegion,
        }
        impl FrameSource for Gradient {
            fn region(&self) -> WindowRegion {
                self.region
            }
            fn capture(&mut self) -> Option<RgbImage> {
                Some(RgbImage::from_fn(32, 32, |x, _| image::Rgb([x as u8 * 8; 3])))
            }
        }
        let mut source = Gradient {
            region: WindowRegion {
                left: 0,
                top: 0,
                width: 32,
                height: 32,
            },
        };
        let small = source.grab_resized(8, 8);
        assert_eq!((small.width(), small.height()), (8, 8));
        // The full-resolution frame is produced fresh afterwards, unscaled
        let full = source.grab_grayscale();
        assert_eq!((full.width(), full.height()), (32, 32));
    }

    #[test]
    fn test_screenshot_args_per_program() {
        let path = Path::new("/tmp/x.png");
        assert_eq!(screenshot_args("grim", path), vec!["/tmp/x.png"]);
        assert_eq!(screenshot_args("scrot", path), vec!["-o", "/tmp/x.png"]);
        assert_eq!(
            screenshot_args("screencapture", path),
            vec!["-x", "/tmp/x.png"]
        );
    }
}
