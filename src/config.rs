use std::path::PathBuf;

/// Inference settings for a [`YOLOv8Model`](crate::models::YOLOv8Model).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectorConfig {
    /// Minimum class score for a detection to be kept.
    pub conf_threshold: f32,
    /// IoU above which the lower scoring of two boxes is suppressed.
    pub iou_threshold: f32,
    /// Keypoints below this confidence are reported as `(0, 0, 0)`.
    pub kpt_conf_threshold: f32,
    /// Suppress overlapping boxes regardless of their class.
    pub agnostic_nms: bool,
    /// Upper bound on detections per image after NMS.
    pub max_det: usize,
    /// Input `(height, width)`. `None` takes it from the model, or 640x640 for dynamic inputs.
    pub imgsz: Option<(u32, u32)>,
    pub intra_threads: usize,
    /// Directory searched for weights that are not found as given.
    pub model_dir: PathBuf,
    /// Hugging Face repository holding `<name>.onnx` exports, used as a last resort.
    pub hf_repo: Option<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            conf_threshold: Self::DEFAULT_CONF_THRESHOLD,
            iou_threshold: Self::DEFAULT_IOU_THRESHOLD,
            kpt_conf_threshold: 0.5,
            agnostic_nms: true,
            max_det: 300,
            imgsz: None,
            intra_threads: 4,
            model_dir: PathBuf::from("model"),
            hf_repo: None,
        }
    }
}

impl DetectorConfig {
    pub const DEFAULT_CONF_THRESHOLD: f32 = 0.5;
    pub const DEFAULT_IOU_THRESHOLD: f32 = 0.7;
    pub const DEFAULT_IMGSZ: (u32, u32) = (640, 640);

    pub fn with_conf_threshold(mut self, conf: f32) -> Self {
        self.conf_threshold = conf;
        self
    }

    pub fn with_iou_threshold(mut self, iou: f32) -> Self {
        self.iou_threshold = iou;
        self
    }

    pub fn with_agnostic_nms(mut self, agnostic: bool) -> Self {
        self.agnostic_nms = agnostic;
        self
    }

    pub fn with_imgsz(mut self, height: u32, width: u32) -> Self {
        self.imgsz = Some((height, width));
        self
    }

    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = dir.into();
        self
    }

    pub fn with_hf_repo(mut self, repo: impl Into<String>) -> Self {
        self.hf_repo = Some(repo.into());
        self
    }

    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads;
        self
    }
}
