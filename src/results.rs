use std::fmt;
use std::path::{Path, PathBuf};

use geo_types::{coord, Coord, Rect};
use image::DynamicImage;
use itertools::Itertools;

/// An axis-aligned detection box in original image pixels.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bbox {
    pub rect: Rect<f32>,
    pub class_id: usize,
    pub confidence: f32,
}

impl Bbox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, class_id: usize, confidence: f32) -> Self {
        Self {
            rect: Rect::new(coord! { x: x1, y: y1 }, coord! { x: x2, y: y2 }),
            class_id,
            confidence,
        }
    }

    /// Build from the centre/size layout the YOLO heads emit.
    pub fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32, class_id: usize, confidence: f32) -> Self {
        Self::new(cx - w / 2., cy - h / 2., cx + w / 2., cy + h / 2., class_id, confidence)
    }

    pub fn xyxy(&self) -> [f32; 4] {
        [
            self.rect.min().x,
            self.rect.min().y,
            self.rect.max().x,
            self.rect.max().y,
        ]
    }

    pub fn width(&self) -> f32 {
        self.rect.width()
    }

    pub fn height(&self) -> f32 {
        self.rect.height()
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection_area(&self, other: &Bbox) -> f32 {
        let [ax1, ay1, ax2, ay2] = self.xyxy();
        let [bx1, by1, bx2, by2] = other.xyxy();
        let w = (ax2.min(bx2) - ax1.max(bx1)).max(0.);
        let h = (ay2.min(by2) - ay1.max(by1)).max(0.);
        w * h
    }

    pub fn iou(&self, other: &Bbox) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0. {
            0.
        } else {
            inter / union
        }
    }

    /// Clamp both corners into a `width` x `height` image.
    pub fn clamp(&mut self, width: f32, height: f32) {
        self.transform(|c| coord! { x: c.x.clamp(0., width), y: c.y.clamp(0., height) });
    }

    pub fn transform(&mut self, transform: impl Fn(Coord<f32>) -> Coord<f32>) {
        let (min, max) = (transform(self.rect.min()), transform(self.rect.max()));
        self.rect = Rect::new(min, max);
    }
}

/// A rotated box, angle in radians.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OrientedBox {
    pub cx: f32,
    pub cy: f32,
    pub width: f32,
    pub height: f32,
    pub angle: f32,
    pub class_id: usize,
    pub confidence: f32,
}

impl OrientedBox {
    /// Corner points, clockwise in image coordinates.
    pub fn corners(&self) -> [Coord<f32>; 4] {
        let (sin, cos) = self.angle.sin_cos();
        let (dx, dy) = (self.width / 2., self.height / 2.);
        [(-dx, -dy), (dx, -dy), (dx, dy), (-dx, dy)].map(|(x, y)| coord! {
            x: self.cx + x * cos - y * sin,
            y: self.cy + x * sin + y * cos,
        })
    }

    /// Second-order moments `(a, b, c)` of the box seen as a uniform 2D distribution.
    pub(crate) fn covariance(&self) -> (f32, f32, f32) {
        let a = self.width.powi(2) / 12.;
        let b = self.height.powi(2) / 12.;
        let (sin, cos) = self.angle.sin_cos();
        (
            a * cos.powi(2) + b * sin.powi(2),
            a * sin.powi(2) + b * cos.powi(2),
            (a - b) * cos * sin,
        )
    }
}

#[derive(Debug, PartialEq, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    pub fn is_visible(&self) -> bool {
        self.confidence > 0.
    }
}

/// Binary instance mask at original image resolution, row major, 0 or 255.
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Mask {
    /// Whether `(x, y)` is foreground. Pixels outside the mask are background.
    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let idx = y as usize * self.width as usize + x as usize;
        self.data.get(idx).is_some_and(|&p| p > 0)
    }

    /// Number of foreground pixels.
    pub fn area(&self) -> usize {
        self.data.iter().filter(|&&p| p > 0).count()
    }
}

impl fmt::Debug for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mask")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("area", &self.area())
            .finish()
    }
}

/// Classification probabilities, one per class.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Probs {
    pub data: Vec<f32>,
}

impl Probs {
    pub fn new(data: Vec<f32>) -> Self {
        Self { data }
    }

    pub fn topk(&self, k: usize) -> Vec<(usize, f32)> {
        self.data
            .iter()
            .copied()
            .enumerate()
            .sorted_by(|a, b| b.1.total_cmp(&a.1))
            .take(k)
            .collect()
    }

    pub fn top1(&self) -> Option<(usize, f32)> {
        self.topk(1).first().copied()
    }

    pub fn top5(&self) -> Vec<(usize, f32)> {
        self.topk(5)
    }
}

/// Per-stage wall time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Speed {
    pub preprocess: f64,
    pub inference: f64,
    pub postprocess: f64,
}

/// Everything the model produced for one image.
///
/// Only the fields belonging to the model's task are `Some`: a detection model fills
/// `boxes`, a segmentation model `boxes` and `masks`, a pose model `boxes` and
/// `keypoints`, a classifier `probs` and an oriented box model `obb`.
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectionResult {
    pub path: PathBuf,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub orig_img: DynamicImage,
    pub names: Vec<String>,
    pub boxes: Option<Vec<Bbox>>,
    pub masks: Option<Vec<Mask>>,
    pub keypoints: Option<Vec<Vec<Point2>>>,
    pub probs: Option<Probs>,
    pub obb: Option<Vec<OrientedBox>>,
    pub speed: Speed,
}

impl DetectionResult {
    pub fn new(path: impl AsRef<Path>, orig_img: DynamicImage, names: Vec<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            orig_img,
            names,
            boxes: None,
            masks: None,
            keypoints: None,
            probs: None,
            obb: None,
            speed: Speed::default(),
        }
    }

    /// `(height, width)` of the source image.
    pub fn orig_shape(&self) -> (u32, u32) {
        (self.orig_img.height(), self.orig_img.width())
    }

    pub fn label(&self, class_id: usize) -> &str {
        self.names
            .get(class_id)
            .map(String::as_str)
            .unwrap_or("unknown")
    }

    /// Number of detected instances, or 0 for a classification result.
    pub fn len(&self) -> usize {
        self.boxes
            .as_ref()
            .map(Vec::len)
            .or_else(|| self.obb.as_ref().map(Vec::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short `"2 dogs, 1 cat"` style summary.
    pub fn verbose(&self) -> String {
        if let Some((id, conf)) = self.probs.as_ref().and_then(Probs::top1) {
            return format!("{} {:.2}", self.label(id), conf);
        }

        let class_ids: Vec<usize> = match (&self.boxes, &self.obb) {
            (Some(boxes), _) => boxes.iter().map(|b| b.class_id).collect(),
            (None, Some(obb)) => obb.iter().map(|b| b.class_id).collect(),
            (None, None) => vec![],
        };

        if class_ids.is_empty() {
            return "(no detections)".to_string();
        }

        class_ids
            .into_iter()
            .counts()
            .into_iter()
            .sorted()
            .map(|(id, n)| {
                let suffix = if n > 1 { "s" } else { "" };
                format!("{n} {}{suffix}", self.label(id))
            })
            .join(", ")
    }

    pub fn show(&self) -> crate::Result<()> {
        use crate::render::Renderer;
        crate::render::ViewerRenderer::default().display(self)
    }
}

impl fmt::Debug for DetectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectionResult")
            .field("path", &self.path)
            .field("orig_shape", &self.orig_shape())
            .field("boxes", &self.boxes)
            .field("masks", &self.masks)
            .field("keypoints", &self.keypoints)
            .field("probs(top5)", &self.probs.as_ref().map(Probs::top5))
            .field("obb", &self.obb)
            .field("speed", &self.speed)
            .finish()
    }
}

impl fmt::Display for DetectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h, w) = self.orig_shape();
        writeln!(f, "DetectionResult {}", self.path.display())?;
        writeln!(f, "  orig_shape: ({h}, {w})")?;

        match &self.boxes {
            Some(boxes) => {
                writeln!(f, "  boxes: {}", boxes.len())?;
                for (i, b) in boxes.iter().enumerate() {
                    let [x1, y1, x2, y2] = b.xyxy();
                    writeln!(
                        f,
                        "    [{i}] {} {:.2} xyxy=({x1:.1}, {y1:.1}, {x2:.1}, {y2:.1})",
                        self.label(b.class_id),
                        b.confidence
                    )?;
                }
            }
            None => writeln!(f, "  boxes: None")?,
        }

        match &self.masks {
            Some(masks) => {
                writeln!(f, "  masks: {}", masks.len())?;
                for (i, m) in masks.iter().enumerate() {
                    writeln!(f, "    [{i}] {}x{} area={}", m.width, m.height, m.area())?;
                }
            }
            None => writeln!(f, "  masks: None")?,
        }

        match &self.keypoints {
            Some(instances) => {
                writeln!(f, "  keypoints: {}", instances.len())?;
                for (i, kpts) in instances.iter().enumerate() {
                    let visible = kpts.iter().filter(|p| p.is_visible()).count();
                    let points = kpts
                        .iter()
                        .map(|p| format!("({:.1}, {:.1}, {:.2})", p.x, p.y, p.confidence))
                        .join(" ");
                    writeln!(f, "    [{i}] {visible}/{} visible {points}", kpts.len())?;
                }
            }
            None => writeln!(f, "  keypoints: None")?,
        }

        match &self.probs {
            Some(probs) => {
                let top5 = probs
                    .top5()
                    .into_iter()
                    .map(|(id, p)| format!("{} {p:.2}", self.label(id)))
                    .join(", ");
                writeln!(f, "  probs: top5 [{top5}]")?;
            }
            None => writeln!(f, "  probs: None")?,
        }

        match &self.obb {
            Some(obb) => {
                writeln!(f, "  obb: {}", obb.len())?;
                for (i, b) in obb.iter().enumerate() {
                    writeln!(
                        f,
                        "    [{i}] {} {:.2} xywhr=({:.1}, {:.1}, {:.1}, {:.1}, {:.3})",
                        self.label(b.class_id),
                        b.confidence,
                        b.cx,
                        b.cy,
                        b.width,
                        b.height,
                        b.angle
                    )?;
                }
            }
            None => writeln!(f, "  obb: None")?,
        }

        write!(
            f,
            "  speed: {:.1}ms preprocess, {:.1}ms inference, {:.1}ms postprocess",
            self.speed.preprocess, self.speed.inference, self.speed.postprocess
        )
    }
}
