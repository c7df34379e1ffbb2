//! Implemented detection models.

mod postprocess;
mod yolov8;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub use yolov8::YOLOv8Model;

pub use crate::weights::YOLOv8PretrainedModels;
use crate::{DetectionResult, DetectorConfig, Result};

/// Which head a YOLO model was exported with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Task {
    #[default]
    Detect,
    Segment,
    Pose,
    Classify,
    Obb,
}

impl FromStr for Task {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_matches('\'').to_ascii_lowercase().as_str() {
            "detect" => Ok(Self::Detect),
            "segment" => Ok(Self::Segment),
            "pose" => Ok(Self::Pose),
            "classify" => Ok(Self::Classify),
            "obb" => Ok(Self::Obb),
            other => Err(format!("unknown task '{other}'")),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Detect => "detect",
            Self::Segment => "segment",
            Self::Pose => "pose",
            Self::Classify => "classify",
            Self::Obb => "obb",
        };
        f.write_str(name)
    }
}

/// A model that can be loaded from weights and run on one image at a time.
pub trait Detector {
    /// Load the model named by `weights`.
    ///
    /// Fails with [`Error::ResourceNotFound`](crate::Error::ResourceNotFound) before
    /// touching the runtime when the weights cannot be located.
    fn load(weights: &str, config: DetectorConfig) -> Result<Self>
    where
        Self: Sized;

    /// Run inference on the image at `image_path`, one result per image.
    fn infer(&mut self, image_path: &Path) -> Result<Vec<DetectionResult>>;
}
