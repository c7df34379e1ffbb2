use detect_ort::{report, Detector, DetectorConfig, Result, YOLOv8Model};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut model = YOLOv8Model::load("yolov8n.pt", DetectorConfig::default())?;

    let results = model.infer("data/golden-retriever-tongue-out.jpg".as_ref())?;

    report::print_results(&results, &mut std::io::stdout().lock())?;

    results[0].show()?;

    Ok(())
}
