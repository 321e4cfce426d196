//! Per-image metadata sidecar lookup.

use std::io;
use std::path::{Path, PathBuf};

use geolabel_pipeline::{GeoMetadata, Notice, PipelineError, parse_sidecar};

use crate::batch::ImageError;

/// `<meta_dir>/<image name with its extension replaced by .json>`.
#[must_use]
pub fn sidecar_path(meta_dir: &Path, image_name: &str) -> PathBuf {
    meta_dir.join(Path::new(image_name).with_extension("json"))
}

/// Read and reconcile the sidecar of `image_name`.
///
/// # Errors
///
/// Returns [`PipelineError::MissingMetadata`] (wrapped) if the file does
/// not exist, [`ImageError::Read`] for other I/O failures, and the
/// pipeline's CRS / transform errors for unusable content.
pub fn load_metadata(
    meta_dir: &Path,
    image_name: &str,
) -> Result<(GeoMetadata, Vec<Notice>), ImageError> {
    let path = sidecar_path(meta_dir, image_name);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(PipelineError::MissingMetadata { path }.into());
        }
        Err(source) => return Err(ImageError::Read { path, source }),
    };
    Ok(parse_sidecar(image_name, &bytes)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use geolabel_pipeline::Crs;

    use super::*;

    #[test]
    fn path_replaces_extension() {
        let dir = Path::new("/meta");
        assert_eq!(sidecar_path(dir, "a.png"), PathBuf::from("/meta/a.json"));
        assert_eq!(
            sidecar_path(dir, "tiles/b.tile.png"),
            PathBuf::from("/meta/tiles/b.tile.json")
        );
        assert_eq!(sidecar_path(dir, "c"), PathBuf::from("/meta/c.json"));
    }

    #[test]
    fn missing_sidecar_is_missing_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_metadata(dir.path(), "nothing.png").unwrap_err();
        assert_eq!(err.kind(), "MissingMetadata");
        assert!(err.to_string().contains("nothing.json"));
    }

    #[test]
    fn loads_existing_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"{"crs": {"init": "epsg:3857"}, "transform": [1, 0, 0, 0, -1, 0]}"#,
        )
        .unwrap();
        let (meta, notices) = load_metadata(dir.path(), "a.png").unwrap();
        assert_eq!(meta.crs, Crs::Epsg(3857));
        assert!(notices.is_empty());
    }
}
