use std::path::Path;
use std::time::Instant;

use image::{imageops, DynamicImage};
use ndarray::{Array, Array4, ArrayD, IxDyn};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::TensorRef;
use tracing::{debug, info, instrument};

use super::postprocess::{letterbox_ratio, Postprocessor};
use super::{Detector, Task};
use crate::labels::{coco_names, parse_names, parse_pair};
use crate::results::{DetectionResult, Speed};
use crate::weights::{self, YOLOv8PretrainedModels};
use crate::{input, DetectorConfig, Error, Result};

/// A [`YOLOv8`](https://github.com/ultralytics/ultralytics) model exported to ONNX.
///
/// The task head, class names, keypoint layout and input size are read from the metadata
/// Ultralytics embeds in its ONNX exports.
pub struct YOLOv8Model {
    model_name: String,
    model: Session,
    input_name: String,
    output_names: Vec<String>,
    task: Task,
    names: Vec<String>,
    imgsz: (u32, u32),
    kpt_shape: (usize, usize),
    config: DetectorConfig,
}

fn load_error(path: &Path, err: impl std::fmt::Display) -> Error {
    Error::ModelLoad {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// What an Ultralytics export says about itself, checked before any inference.
#[derive(Debug, PartialEq)]
struct ModelMetadata {
    task: Task,
    names: Vec<String>,
    imgsz: (u32, u32),
    kpt_shape: (usize, usize),
}

impl ModelMetadata {
    const DEFAULT_KPT_SHAPE: (usize, usize) = (17, 3);

    /// Read the custom metadata entries through `custom`. Entries that are present but
    /// unusable are errors, missing ones take their defaults.
    fn read(
        custom: impl Fn(&str) -> Option<String>,
        config: &DetectorConfig,
    ) -> Result<Self, String> {
        let task = match custom("task") {
            Some(task) => task.parse::<Task>()?,
            None => Task::default(),
        };

        let names = match custom("names") {
            Some(raw) => {
                parse_names(&raw).ok_or_else(|| format!("unreadable class names {raw}"))?
            }
            None => coco_names(),
        };

        let imgsz = match (config.imgsz, custom("imgsz")) {
            (Some(imgsz), _) => imgsz,
            (None, Some(raw)) => parse_pair(&raw)
                .and_then(|(h, w)| Some((u32::try_from(h).ok()?, u32::try_from(w).ok()?)))
                .ok_or_else(|| format!("unreadable input size {raw}"))?,
            (None, None) => DetectorConfig::DEFAULT_IMGSZ,
        };
        if imgsz.0 == 0 || imgsz.1 == 0 {
            return Err(format!("input size {}x{} is empty", imgsz.0, imgsz.1));
        }

        let kpt_shape = match custom("kpt_shape") {
            Some(raw) => {
                parse_pair(&raw).ok_or_else(|| format!("unreadable keypoint shape {raw}"))?
            }
            None => Self::DEFAULT_KPT_SHAPE,
        };
        // x and y at least, optionally a visibility score
        if kpt_shape.1 < 2 {
            return Err(format!(
                "keypoint shape ({}, {}) has fewer than 2 values per keypoint",
                kpt_shape.0, kpt_shape.1
            ));
        }

        Ok(Self {
            task,
            names,
            imgsz,
            kpt_shape,
        })
    }
}

impl YOLOv8Model {
    /// Letterbox padding, as Ultralytics pads.
    pub const PAD_VALUE: f32 = 114.0 / 255.0;

    /// Load one of the standard checkpoints with the default configuration.
    pub fn pretrained(p_model: YOLOv8PretrainedModels) -> Result<Self> {
        Self::load(p_model.name(), DetectorConfig::default())
    }

    /// Load `weights` with a caller-configured session builder.
    pub fn configure(
        weights: &str,
        config: DetectorConfig,
        session_builder: SessionBuilder,
    ) -> Result<Self> {
        let path = weights::resolve(weights, &config)?;
        Self::new_from_file(&path, config, session_builder)
    }

    /// Construct a [`YOLOv8Model`] from a model file.
    #[instrument(level = "info", skip_all, fields(path = %file_path.display()))]
    pub fn new_from_file(
        file_path: &Path,
        config: DetectorConfig,
        session_builder: SessionBuilder,
    ) -> Result<Self> {
        let model = session_builder
            .commit_from_file(file_path)
            .map_err(|err| load_error(file_path, err))?;

        let ModelMetadata {
            task,
            names,
            imgsz,
            kpt_shape,
        } = {
            let metadata = model
                .metadata()
                .map_err(|err| load_error(file_path, err))?;
            ModelMetadata::read(|key| metadata.custom(key).ok().flatten(), &config)
                .map_err(|err| load_error(file_path, err))?
        };

        let input_name = model
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "images".to_string());
        let output_names: Vec<String> = model.outputs.iter().map(|o| o.name.clone()).collect();

        let model_name = file_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "yolov8".to_string());

        info!(
            model = %model_name,
            %task,
            classes = names.len(),
            height = imgsz.0,
            width = imgsz.1,
            "model loaded"
        );

        Ok(Self {
            model_name,
            model,
            input_name,
            output_names,
            task,
            names,
            imgsz,
            kpt_shape,
            config,
        })
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Model input `(height, width)`.
    pub fn imgsz(&self) -> (u32, u32) {
        self.imgsz
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Run the model on an already decoded image.
    #[instrument(level = "debug", skip_all, fields(model = %self.model_name))]
    pub fn predict(&mut self, img: &DynamicImage, path: &Path) -> Result<DetectionResult> {
        let start = Instant::now();
        let input = preprocess(img, self.imgsz, self.task);
        let preprocess = elapsed_ms(start);

        let start = Instant::now();
        let outputs = self.run(input)?;
        let inference = elapsed_ms(start);

        let start = Instant::now();
        let mut result = DetectionResult::new(path, img.clone(), self.names.clone());
        Postprocessor {
            task: self.task,
            input: self.imgsz,
            kpt_shape: self.kpt_shape,
            config: &self.config,
        }
        .run(&outputs, &mut result)?;
        let postprocess = elapsed_ms(start);

        result.speed = Speed {
            preprocess,
            inference,
            postprocess,
        };

        info!(
            "{}: {}x{} {}, {:.1}ms",
            path.display(),
            self.imgsz.0,
            self.imgsz.1,
            result.verbose(),
            inference
        );
        debug!(speed = ?result.speed, "timings");

        Ok(result)
    }

    /// Run the model on an encoded image held in memory. `name` is used as the result path.
    pub fn predict_bytes(&mut self, bytes: &[u8], name: &str) -> Result<DetectionResult> {
        let img = input::load_image_from_memory(name, bytes)?;
        self.predict(&img, Path::new(name))
    }

    fn run(&mut self, input: Array4<f32>) -> Result<Vec<ArrayD<f32>>> {
        let input_tensor = TensorRef::from_array_view(&input)
            .map_err(|err| Error::Inference(format!("failed to create input tensor: {err}")))?;

        let inputs = ort::inputs![&self.input_name => input_tensor];
        let outputs = self
            .model
            .run(inputs)
            .map_err(|err| Error::Inference(err.to_string()))?;

        let mut arrays = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let output = outputs
                .get(name.as_str())
                .ok_or_else(|| Error::Inference(format!("output '{name}' not found")))?;
            let (shape, data) = output.try_extract_tensor::<f32>()?;
            let shape: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            let array = ArrayD::from_shape_vec(IxDyn(&shape), data.to_vec())
                .map_err(|err| Error::Inference(format!("output '{name}': {err}")))?;
            arrays.push(array);
        }

        Ok(arrays)
    }
}

/// Turn `img` into an NCHW tensor of `imgsz` scaled to `[0, 1]`.
///
/// Detection-style models get the image letterboxed into the top left corner, keeping its
/// aspect ratio. Classifiers get the shorter side resized to fit and the centre cropped.
fn preprocess(img: &DynamicImage, imgsz: (u32, u32), task: Task) -> Array4<f32> {
    let (h, w) = imgsz;
    let mut input = Array::from_elem((1, 3, h as usize, w as usize), YOLOv8Model::PAD_VALUE);

    let resized = match task {
        Task::Classify => center_crop(img, imgsz),
        _ => {
            let r = letterbox_ratio(imgsz, (img.height(), img.width()));
            let new_w = ((img.width() as f32 * r).round() as u32).clamp(1, w);
            let new_h = ((img.height() as f32 * r).round() as u32).clamp(1, h);
            img.resize_exact(new_w, new_h, imageops::FilterType::Triangle)
        }
    };

    for (x, y, pixel) in resized.into_rgb8().enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = r as f32 / 255.;
        input[[0, 1, y, x]] = g as f32 / 255.;
        input[[0, 2, y, x]] = b as f32 / 255.;
    }

    input
}

/// Scale `img` until it covers `imgsz`, then cut out the centre.
fn center_crop(img: &DynamicImage, imgsz: (u32, u32)) -> DynamicImage {
    let (h, w) = imgsz;
    let r = (w as f32 / img.width() as f32).max(h as f32 / img.height() as f32);
    let new_w = ((img.width() as f32 * r).round() as u32).max(w);
    let new_h = ((img.height() as f32 * r).round() as u32).max(h);

    img.resize_exact(new_w, new_h, imageops::FilterType::Triangle)
        .crop_imm((new_w - w) / 2, (new_h - h) / 2, w, h)
}

impl Detector for YOLOv8Model {
    /// Resolve `weights` and build an optimized session for it.
    fn load(weights: &str, config: DetectorConfig) -> Result<Self> {
        let path = weights::resolve(weights, &config)?;

        let session_builder = Session::builder()
            .map_err(|err| load_error(&path, err))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|err| load_error(&path, err))?
            .with_intra_threads(config.intra_threads)
            .map_err(|err| load_error(&path, err))?;

        Self::new_from_file(&path, config, session_builder)
    }

    fn infer(&mut self, image_path: &Path) -> Result<Vec<DetectionResult>> {
        let img = input::load_image(image_path)?;
        Ok(vec![self.predict(&img, image_path)?])
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn read(entries: &[(&str, &str)], config: &DetectorConfig) -> Result<ModelMetadata, String> {
        let entries: HashMap<String, String> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ModelMetadata::read(|key| entries.get(key).cloned(), config)
    }

    #[test]
    fn missing_metadata_takes_defaults() {
        let meta = read(&[], &DetectorConfig::default()).unwrap();
        assert_eq!(meta.task, Task::Detect);
        assert_eq!(meta.names.len(), 80);
        assert_eq!(meta.imgsz, (640, 640));
        assert_eq!(meta.kpt_shape, (17, 3));
    }

    #[test]
    fn reads_ultralytics_entries() {
        let meta = read(
            &[
                ("task", "pose"),
                ("names", "{0: 'person'}"),
                ("imgsz", "[480, 640]"),
                ("kpt_shape", "[17, 2]"),
            ],
            &DetectorConfig::default(),
        )
        .unwrap();
        assert_eq!(meta.task, Task::Pose);
        assert_eq!(meta.names, vec!["person"]);
        assert_eq!(meta.imgsz, (480, 640));
        assert_eq!(meta.kpt_shape, (17, 2));
    }

    #[test]
    fn configured_imgsz_wins() {
        let config = DetectorConfig::default().with_imgsz(320, 320);
        let meta = read(&[("imgsz", "[640, 640]")], &config).unwrap();
        assert_eq!(meta.imgsz, (320, 320));
    }

    #[test]
    fn rejects_huge_class_ids() {
        let err = read(&[("names", "{18446744073709551615: 'x'}")], &DetectorConfig::default());
        assert!(err.is_err());
        let err = read(&[("names", "{4000000000: 'x'}")], &DetectorConfig::default());
        assert!(err.is_err());
    }

    #[test]
    fn rejects_empty_input_size() {
        assert!(read(&[("imgsz", "[0, 640]")], &DetectorConfig::default()).is_err());
        let config = DetectorConfig::default().with_imgsz(0, 0);
        assert!(read(&[], &config).is_err());
    }

    #[test]
    fn rejects_keypoints_without_coordinates() {
        assert!(read(&[("kpt_shape", "[1, 1]")], &DetectorConfig::default()).is_err());
        assert!(read(&[("kpt_shape", "17")], &DetectorConfig::default()).is_err());
    }

    #[test]
    fn classify_crops_the_centre() {
        // left third red, middle third green, right third blue
        let img = image::RgbImage::from_fn(900, 100, |x, _| match x {
            0..=299 => image::Rgb([255, 0, 0]),
            300..=599 => image::Rgb([0, 255, 0]),
            _ => image::Rgb([0, 0, 255]),
        });
        let input = preprocess(&DynamicImage::ImageRgb8(img), (10, 10), Task::Classify);

        assert_eq!(input.shape(), &[1, 3, 10, 10]);
        for y in 0..10 {
            for x in 0..10 {
                assert_eq!(input[[0, 0, y, x]], 0.);
                assert_eq!(input[[0, 1, y, x]], 1.);
                assert_eq!(input[[0, 2, y, x]], 0.);
            }
        }
    }

    #[test]
    fn detect_letterboxes_into_the_corner() {
        let img = image::RgbImage::from_pixel(200, 100, image::Rgb([255, 255, 255]));
        let input = preprocess(&DynamicImage::ImageRgb8(img), (20, 20), Task::Detect);

        assert_eq!(input[[0, 0, 0, 0]], 1.);
        assert_eq!(input[[0, 2, 9, 19]], 1.);
        assert_eq!(input[[0, 0, 10, 0]], YOLOv8Model::PAD_VALUE);
        assert_eq!(input[[0, 1, 19, 19]], YOLOv8Model::PAD_VALUE);
    }

    #[test]
    fn rejects_unknown_task() {
        assert!(read(&[("task", "track")], &DetectorConfig::default()).is_err());
    }
}
