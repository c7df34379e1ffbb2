//! Drawing results onto their image and putting the picture in front of the user.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use tracing::{debug, warn};

use crate::{DetectionResult, Error, Result};

/// Limb connections of the 17 COCO keypoints.
pub const SKELETON: [(usize, usize); 16] = [
    (0, 1),
    (0, 2),
    (1, 3),
    (2, 4),
    (5, 6),
    (5, 11),
    (6, 12),
    (11, 12),
    (5, 7),
    (6, 8),
    (7, 9),
    (8, 10),
    (11, 13),
    (12, 14),
    (13, 15),
    (14, 16),
];

/// Shows a [`DetectionResult`] somewhere.
pub trait Renderer {
    fn display(&self, result: &DetectionResult) -> Result<()>;
}

/// Plots boxes, oriented boxes, keypoints and masks over the original image.
pub struct Annotator {
    colors: Vec<Rgb<u8>>,
    line_width: u32,
    mask_alpha: f32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}

impl Annotator {
    pub fn new() -> Self {
        // one hue per COCO class
        let colors = (0..80)
            .map(|i| Self::hsv_to_rgb(i as f32 / 80.0 * 360.0, 0.8, 0.9))
            .collect();

        Self {
            colors,
            line_width: 2,
            mask_alpha: 0.5,
        }
    }

    fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
        let c = v * s;
        let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
        let m = v - c;

        let (r, g, b) = match h {
            h if h < 60.0 => (c, x, 0.0),
            h if h < 120.0 => (x, c, 0.0),
            h if h < 180.0 => (0.0, c, x),
            h if h < 240.0 => (0.0, x, c),
            h if h < 300.0 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };

        Rgb([
            ((r + m) * 255.0) as u8,
            ((g + m) * 255.0) as u8,
            ((b + m) * 255.0) as u8,
        ])
    }

    pub fn color(&self, class_id: usize) -> Rgb<u8> {
        self.colors[class_id % self.colors.len()]
    }

    pub fn plot(&self, result: &DetectionResult) -> RgbImage {
        let mut image = result.orig_img.to_rgb8();

        if let (Some(masks), Some(boxes)) = (&result.masks, &result.boxes) {
            for (mask, bbox) in masks.iter().zip(boxes) {
                let color = self.color(bbox.class_id);
                let alpha = self.mask_alpha;
                for (x, y, pixel) in image.enumerate_pixels_mut() {
                    if x < mask.width && y < mask.height && mask.get(x, y) {
                        for (c, m) in pixel.0.iter_mut().zip(color.0) {
                            *c = (*c as f32 * (1. - alpha) + m as f32 * alpha) as u8;
                        }
                    }
                }
            }
        }

        for bbox in result.boxes.iter().flatten() {
            let [x1, y1, _, _] = bbox.xyxy();
            let (w, h) = (bbox.width() as u32, bbox.height() as u32);
            let color = self.color(bbox.class_id);
            for t in 0..self.line_width {
                if w > 2 * t && h > 2 * t {
                    let rect = Rect::at(x1 as i32 + t as i32, y1 as i32 + t as i32)
                        .of_size(w - 2 * t, h - 2 * t);
                    draw_hollow_rect_mut(&mut image, rect, color);
                }
            }
        }

        for obb in result.obb.iter().flatten() {
            let color = self.color(obb.class_id);
            let corners = obb.corners();
            for i in 0..corners.len() {
                let (a, b) = (corners[i], corners[(i + 1) % corners.len()]);
                draw_line_segment_mut(&mut image, (a.x, a.y), (b.x, b.y), color);
            }
        }

        for kpts in result.keypoints.iter().flatten() {
            if kpts.len() == 17 {
                for &(a, b) in SKELETON.iter() {
                    let (a, b) = (kpts[a], kpts[b]);
                    if a.is_visible() && b.is_visible() {
                        let limb = Rgb([51, 153, 255]);
                        draw_line_segment_mut(&mut image, (a.x, a.y), (b.x, b.y), limb);
                    }
                }
            }
            for (i, p) in kpts.iter().enumerate().filter(|(_, p)| p.is_visible()) {
                let radius = self.line_width as i32 + 1;
                draw_filled_circle_mut(&mut image, (p.x as i32, p.y as i32), radius, self.color(i));
            }
        }

        image
    }
}

/// Saves the plotted result to a file instead of showing it.
pub struct FileRenderer {
    path: PathBuf,
    annotator: Annotator,
}

impl FileRenderer {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            annotator: Annotator::new(),
        }
    }
}

impl Renderer for FileRenderer {
    fn display(&self, result: &DetectionResult) -> Result<()> {
        self.annotator.plot(result).save(&self.path)?;
        debug!(path = %self.path.display(), "saved plotted result");
        Ok(())
    }
}

/// The program used to open an image file.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ViewerCommand {
    fn default() -> Self {
        let (program, args): (&str, &[&str]) = if cfg!(target_os = "macos") {
            ("open", &["-W"])
        } else if cfg!(target_os = "windows") {
            ("cmd", &["/C", "start", "/WAIT", ""])
        } else {
            ("xdg-open", &[])
        };
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Whether a graphical session can be reached, given an environment lookup.
pub fn display_available(var: impl Fn(&str) -> Option<String>) -> bool {
    if cfg!(any(target_os = "macos", target_os = "windows")) {
        return true;
    }
    ["DISPLAY", "WAYLAND_DISPLAY"]
        .iter()
        .any(|key| var(key).is_some_and(|v| !v.is_empty()))
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Opens plotted results in the platform image viewer.
pub struct ViewerRenderer {
    annotator: Annotator,
    command: ViewerCommand,
    linger: Duration,
    env: fn(&str) -> Option<String>,
    scratch_dir: PathBuf,
}

impl Default for ViewerRenderer {
    fn default() -> Self {
        Self {
            annotator: Annotator::new(),
            command: ViewerCommand::default(),
            linger: Duration::from_secs(2),
            env: process_env,
            scratch_dir: std::env::temp_dir(),
        }
    }
}

impl ViewerRenderer {
    pub fn with_command(mut self, command: ViewerCommand) -> Self {
        self.command = command;
        self
    }

    /// How long the image file outlives the viewer command, for launchers that return
    /// before the viewer has read it.
    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    /// Environment lookup used to find a graphical session.
    pub fn with_env(mut self, env: fn(&str) -> Option<String>) -> Self {
        self.env = env;
        self
    }

    /// Directory the temporary image files are written to.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }
}

impl Renderer for ViewerRenderer {
    fn display(&self, result: &DetectionResult) -> Result<()> {
        let surface = ViewerSurface::acquire(self)?;
        surface.present(&self.annotator.plot(result))
    }
}

/// A temporary image file handed to the viewer. Released on drop.
struct ViewerSurface<'a> {
    command: &'a ViewerCommand,
    path: PathBuf,
    linger: Duration,
}

static SURFACE_COUNTER: AtomicUsize = AtomicUsize::new(0);

impl<'a> ViewerSurface<'a> {
    fn acquire(renderer: &'a ViewerRenderer) -> Result<Self> {
        if !display_available(renderer.env) {
            return Err(Error::Display(
                "neither DISPLAY nor WAYLAND_DISPLAY is set".to_string(),
            ));
        }

        let n = SURFACE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = renderer
            .scratch_dir
            .join(format!("detect-ort-{}-{n}.png", std::process::id()));

        Ok(Self {
            command: &renderer.command,
            path,
            linger: renderer.linger,
        })
    }

    fn present(&self, image: &RgbImage) -> Result<()> {
        image.save(&self.path)?;

        let status = Command::new(&self.command.program)
            .args(&self.command.args)
            .arg(&self.path)
            .status()
            .map_err(|err| {
                Error::Display(format!("failed to launch {}: {err}", self.command.program))
            })?;

        if !status.success() {
            return Err(Error::Display(format!(
                "{} exited with {status}",
                self.command.program
            )));
        }

        debug!(viewer = %self.command.program, path = %self.path.display(), "result shown");
        Ok(())
    }
}

impl Drop for ViewerSurface<'_> {
    fn drop(&mut self) {
        if !self.path.exists() {
            return;
        }
        std::thread::sleep(self.linger);
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), %err, "failed to remove viewer image");
        }
    }
}
