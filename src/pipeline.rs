//! Load, infer, optionally report, then display.

use std::io::Write;
use std::path::Path;

use tracing::{info, instrument};

use crate::models::Detector;
use crate::render::Renderer;
use crate::report::print_results;
use crate::{DetectionResult, DetectorConfig, Error, Result};

/// Run `detector` on one image, write the results to `report` if given, and display the
/// first result with `renderer`.
///
/// Nothing is displayed when inference fails. A detector that returns no results is an
/// inference error.
#[instrument(level = "debug", skip_all, fields(image = %image_path.as_ref().display()))]
pub fn run<D, R>(
    detector: &mut D,
    image_path: impl AsRef<Path>,
    renderer: &R,
    report: Option<&mut dyn Write>,
) -> Result<Vec<DetectionResult>>
where
    D: Detector,
    R: Renderer + ?Sized,
{
    let results = detector.infer(image_path.as_ref())?;
    let first = results
        .first()
        .ok_or_else(|| Error::Inference("detector returned no results".to_string()))?;

    if let Some(out) = report {
        let written = print_results(&results, out)?;
        info!(results = written, "results reported");
    }

    renderer.display(first)?;
    Ok(results)
}

/// [`run`] with a freshly loaded detector.
pub fn load_and_run<D, R>(
    weights: &str,
    config: DetectorConfig,
    image_path: impl AsRef<Path>,
    renderer: &R,
    report: Option<&mut dyn Write>,
) -> Result<Vec<DetectionResult>>
where
    D: Detector,
    R: Renderer + ?Sized,
{
    let mut detector = D::load(weights, config)?;
    run(&mut detector, image_path, renderer, report)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::path::PathBuf;

    use image::DynamicImage;

    use super::*;

    struct Fixed(usize);

    impl Detector for Fixed {
        fn load(weights: &str, _config: DetectorConfig) -> Result<Self> {
            match weights {
                "missing.pt" => Err(Error::ResourceNotFound(weights.to_string())),
                _ => Ok(Self(1)),
            }
        }

        fn infer(&mut self, image_path: &Path) -> Result<Vec<DetectionResult>> {
            if !image_path.exists() && image_path != Path::new("fake.png") {
                return Err(Error::Input {
                    path: PathBuf::from(image_path),
                    reason: "no such file".to_string(),
                });
            }
            Ok((0..self.0)
                .map(|_| DetectionResult::new(image_path, DynamicImage::new_rgb8(4, 4), vec![]))
                .collect())
        }
    }

    #[derive(Default)]
    struct Counting(Cell<usize>);

    impl Renderer for Counting {
        fn display(&self, _result: &DetectionResult) -> Result<()> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn displays_once_and_reports_everything() {
        let renderer = Counting::default();
        let mut out = Vec::new();

        let results = run(&mut Fixed(2), "fake.png", &renderer, Some(&mut out)).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(renderer.0.get(), 1);
        assert_eq!(String::from_utf8(out).unwrap().matches("DetectionResult").count(), 2);
    }

    #[test]
    fn nothing_shown_when_inference_fails() {
        let renderer = Counting::default();
        let err = run(&mut Fixed(1), "nowhere.png", &renderer, None).unwrap_err();

        assert!(matches!(err, Error::Input { .. }));
        assert_eq!(renderer.0.get(), 0);
    }

    #[test]
    fn empty_results_are_an_error() {
        let renderer = Counting::default();
        let err = run(&mut Fixed(0), "fake.png", &renderer, None).unwrap_err();

        assert!(matches!(err, Error::Inference(_)));
        assert_eq!(renderer.0.get(), 0);
    }

    #[test]
    fn load_failure_stops_the_pipeline() {
        let renderer = Counting::default();
        let err = load_and_run::<Fixed, _>(
            "missing.pt",
            DetectorConfig::default(),
            "fake.png",
            &renderer,
            None,
        )
        .unwrap_err();

        assert!(matches!(err, Error::ResourceNotFound(_)));
        assert_eq!(renderer.0.get(), 0);
    }
}
