//! Turning a weights identifier such as `yolov8n.pt` into an ONNX file on disk.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{DetectorConfig, Error, Result};

/// Standard YOLOv8 detection checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YOLOv8PretrainedModels {
    Nano,
    Small,
    Medium,
    Large,
    XLarge,
}

impl YOLOv8PretrainedModels {
    /// Weights identifier, as Ultralytics names the checkpoint.
    pub fn name(&self) -> &str {
        match self {
            Self::Nano => "yolov8n.pt",
            Self::Small => "yolov8s.pt",
            Self::Medium => "yolov8m.pt",
            Self::Large => "yolov8l.pt",
            Self::XLarge => "yolov8x.pt",
        }
    }

    /// File name of the ONNX export of this checkpoint.
    pub fn onnx_filename(&self) -> String {
        onnx_name(Path::new(self.name()))
    }
}

fn onnx_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{stem}.onnx")
}

/// Local paths tried for `weights`, in order.
pub fn candidates(weights: &str, config: &DetectorConfig) -> Vec<PathBuf> {
    let given = PathBuf::from(weights);
    let mut names = vec![given.clone()];
    if given.extension().map_or(true, |ext| ext != "onnx") {
        names.push(given.with_file_name(onnx_name(&given)));
    }

    let mut paths = names.clone();
    if given.is_relative() {
        paths.extend(names.iter().map(|n| config.model_dir.join(n)));
    }
    paths.dedup();
    paths
}

/// Resolve a weights identifier to a loadable model file.
///
/// PyTorch checkpoints cannot be run, so `name.pt` resolves to the `name.onnx`
/// export next to it or in [`DetectorConfig::model_dir`]. When nothing is found
/// locally and [`DetectorConfig::hf_repo`] is set, `name.onnx` is fetched from
/// that repository (cached by hf-hub).
pub fn resolve(weights: &str, config: &DetectorConfig) -> Result<PathBuf> {
    if weights.trim().is_empty() {
        return Err(Error::ResourceNotFound("empty weights identifier".to_string()));
    }

    let tried = candidates(weights, config);
    for path in &tried {
        if path.is_file() {
            debug!(weights, path = %path.display(), "resolved weights locally");
            return Ok(path.clone());
        }
    }

    if let Some(repo) = &config.hf_repo {
        let filename = onnx_name(Path::new(weights));
        debug!(weights, %repo, %filename, "fetching weights from Hugging Face");
        let api = hf_hub::api::sync::Api::new()?;
        return api
            .model(repo.clone())
            .get(&filename)
            .map_err(|err| Error::ResourceNotFound(format!("{repo}/{filename}: {err}")));
    }

    let tried = tried
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Err(Error::ResourceNotFound(format!("{weights} (tried {tried})")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("detect-ort-weights-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn pt_falls_back_to_onnx_in_model_dir() {
        let config = DetectorConfig::default().with_model_dir("model");
        assert_eq!(
            candidates("yolov8n.pt", &config),
            vec![
                PathBuf::from("yolov8n.pt"),
                PathBuf::from("yolov8n.onnx"),
                PathBuf::from("model/yolov8n.pt"),
                PathBuf::from("model/yolov8n.onnx"),
            ]
        );
    }

    #[test]
    fn onnx_is_not_renamed() {
        let config = DetectorConfig::default();
        assert_eq!(
            candidates("weights/custom.onnx", &config),
            vec![PathBuf::from("weights/custom.onnx"), PathBuf::from("model/weights/custom.onnx")]
        );
    }

    #[test]
    fn resolves_onnx_export_in_model_dir() {
        let dir = scratch_dir("resolve");
        std::fs::write(dir.join("yolov8s.onnx"), b"stub").unwrap();

        let config = DetectorConfig::default().with_model_dir(&dir);
        let path = resolve(YOLOv8PretrainedModels::Small.name(), &config).unwrap();
        assert_eq!(path, dir.join("yolov8s.onnx"));

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_weights_are_not_found() {
        let config = DetectorConfig::default().with_model_dir(scratch_dir("missing"));
        let err = resolve("does-not-exist.pt", &config).unwrap_err();
        assert!(matches!(err, Error::ResourceNotFound(_)), "{err}");

        let err = resolve("  ", &config).unwrap_err();
        assert!(matches!(err, Error::ResourceNotFound(_)), "{err}");
    }

    #[test]
    fn pretrained_onnx_names() {
        assert_eq!(YOLOv8PretrainedModels::Nano.onnx_filename(), "yolov8n.onnx");
        assert_eq!(YOLOv8PretrainedModels::XLarge.name(), "yolov8x.pt");
    }
}
