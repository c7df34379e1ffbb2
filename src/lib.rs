//! # Overview
//!
//! Runs pretrained [YOLOv8](https://github.com/ultralytics/ultralytics) models on single images
//! and shows what they found. Models are ONNX exports run through onnxruntime (bindings via
//! [ort](https://github.com/pykeio/ort)). Detection, segmentation, pose, classification and
//! oriented box heads are supported, the head is read from the export's metadata.
//!
//! ```no_run
//! use detect_ort::{Detector, DetectorConfig, YOLOv8Model};
//!
//! let mut model = YOLOv8Model::load("yolov8n.pt", DetectorConfig::default())?;
//! let results = model.infer("data/kitten.png".as_ref())?;
//! println!("{}", results[0]);
//! results[0].show()?;
//! # Ok::<(), detect_ort::Error>(())
//! ```

mod config;
mod error;
mod utils;

pub mod input;
pub mod labels;
pub mod models;
pub mod pipeline;
pub mod render;
pub mod report;
pub mod results;
pub mod weights;

pub use config::DetectorConfig;
pub use error::{Error, Result};
pub use models::{Detector, Task, YOLOv8Model, YOLOv8PretrainedModels};
pub use results::{Bbox, DetectionResult, Mask, OrientedBox, Point2, Probs, Speed};

// re-exports
pub use geo_types;
pub use image;
pub use ort;
