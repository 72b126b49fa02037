use std::path::{Path, PathBuf};

use tracing::warn;

/// Whether the file content is WebP, regardless of its extension.
pub fn is_webp(path: &Path) -> bool {
    matches!(
        infer::get_from_path(path),
        Ok(Some(kind)) if kind.mime_type() == "image/webp"
    )
}

#[cfg(feature = "convert")]
fn webp_to_png(source: &Path) -> Result<PathBuf, String> {
    let target = source.with_extension("png");
    let image = image::open(source).map_err(|e| format!("decode {}: {}", source.display(), e))?;
    image
        .save_with_format(&target, image::ImageFormat::Png)
        .map_err(|e| format!("encode {}: {}", target.display(), e))?;
    std::fs::remove_file(source).map_err(|e| format!("remove {}: {}", source.display(), e))?;
    Ok(target)
}

/// Replace a WebP file with a PNG copy. Returns the path that now holds the
/// content; on any failure the original is left in place.
#[cfg(feature = "convert")]
pub async fn normalize_image(path: PathBuf) -> PathBuf {
    if !is_webp(&path) {
        return path;
    }
    let source = path.clone();
    match tokio::task::spawn_blocking(move || webp_to_png(&source)).await {
        Ok(Ok(converted)) => {
            tracing::info!("Converted {} to {}", path.display(), converted.display());
            converted
        }
        Ok(Err(e)) => {
            warn!("WebP conversion failed: {}", e);
            path
        }
        Err(e) => {
            warn!("WebP conversion task failed: {}", e);
            path
        }
    }
}

#[cfg(not(feature = "convert"))]
pub async fn normalize_image(path: PathBuf) -> PathBuf {
    if is_webp(&path) {
        warn!("{} is WebP but image conversion is not compiled in", path.display());
    }
    path
}

#[cfg(all(test, feature = "convert"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_webp_converted_to_png() {
        let dir = tempfile::tempdir().unwrap();
        let webp = dir.path().join("42-001.webp");
        let pixels = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 10, 10]));
        pixels.save_with_format(&webp, image::ImageFormat::WebP).unwrap();
        assert!(is_webp(&webp));

        let result = normalize_image(webp.clone()).await;
        assert_eq!(result, dir.path().join("42-001.png"));
        assert!(!webp.exists());
        assert!(!is_webp(&result));
        assert_eq!(image::open(&result).unwrap().width(), 4);
    }

    #[tokio::test]
    async fn test_other_files_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("notes.txt");
        std::fs::write(&text, b"plain").unwrap();
        assert_eq!(normalize_image(text.clone()).await, text);
        assert!(text.exists());
    }
}
