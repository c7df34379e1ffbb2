use std::path::{Path, PathBuf};

use image::DynamicImage;
use tracing::{debug, instrument};

use crate::{Error, Result};

/// Read and decode the image at `path`.
///
/// Missing, unreadable or undecodable files are reported as [`Error::Input`].
#[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
pub fn load_image(path: impl AsRef<Path>) -> Result<DynamicImage> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(Error::Input {
            path: path.to_path_buf(),
            reason: "no such file".to_string(),
        });
    }

    let img = image::open(path).map_err(|err| Error::Input {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;

    debug!(width = img.width(), height = img.height(), "image decoded");
    Ok(img)
}

/// Decode an image held in memory, such as an upload. `name` stands in for its path in
/// results and errors.
#[instrument(level = "debug", skip(bytes), fields(len = bytes.len()))]
pub fn load_image_from_memory(name: &str, bytes: &[u8]) -> Result<DynamicImage> {
    let img = image::load_from_memory(bytes).map_err(|err| Error::Input {
        path: PathBuf::from(name),
        reason: err.to_string(),
    })?;

    debug!(width = img.width(), height = img.height(), "image decoded");
    Ok(img)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_an_input_error() {
        let err = load_image("data/definitely-missing.png").unwrap_err();
        assert!(matches!(err, Error::Input { .. }), "{err}");
    }

    #[test]
    fn corrupt_file_is_an_input_error() {
        let path =
            std::env::temp_dir().join(format!("detect-ort-corrupt-{}.png", std::process::id()));
        std::fs::write(&path, b"this is not a png").unwrap();

        let err = load_image(&path).unwrap_err();
        assert!(matches!(err, Error::Input { .. }), "{err}");

        std::fs::remove_file(path).unwrap();
    }

    #[cfg(feature = "png")]
    #[test]
    fn decodes_png() {
        let path = std::env::temp_dir().join(format!("detect-ort-ok-{}.png", std::process::id()));
        image::RgbImage::new(7, 5).save(&path).unwrap();

        let img = load_image(&path).unwrap();
        assert_eq!((img.width(), img.height()), (7, 5));

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn undecodable_bytes_are_an_input_error() {
        let err = load_image_from_memory("upload", b"garbage").unwrap_err();
        match err {
            Error::Input { path, .. } => assert_eq!(path, PathBuf::from("upload")),
            other => panic!("unexpected error {other}"),
        }
    }

    #[cfg(feature = "png")]
    #[test]
    fn decodes_png_bytes() {
        let mut bytes = std::io::Cursor::new(Vec::new());
        image::RgbImage::new(3, 2)
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();

        let img = load_image_from_memory("upload.png", bytes.get_ref()).unwrap();
        assert_eq!((img.width(), img.height()), (3, 2));
    }
}
