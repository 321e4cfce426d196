//! Shared types for the geolabel annotation pipeline.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::rle::Bitmap;

/// Re-export `GrayImage` so downstream crates can handle composited
/// canvases without depending on `image` directly.
pub use image::GrayImage;

/// Class index stored in a canvas cell. `0` doubles as background/nodata
/// when the legend is 1-based.
pub type ClassIndex = u8;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total number of pixels (`width * height`).
    #[must_use]
    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// The shape element an [`AnnotationRecord`] was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    /// `<polygon>` element.
    Polygon,
    /// `<box>` element, stored as a rectangular polygon.
    Box,
    /// `<mask>` element, stored as a dense bitmap.
    Mask,
}

impl GeometryKind {
    /// The XML element name for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Polygon => "polygon",
            Self::Box => "box",
            Self::Mask => "mask",
        }
    }
}

/// Drawable content of an annotation: exactly one of a polygon or a mask.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// Closed polygon in pixel coordinates.
    Polygon(geo::Polygon<f64>),
    /// Dense bitmap covering the full image canvas.
    Mask(Bitmap),
}

/// One shape belonging to one image, with its label already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRecord {
    /// Name of the image this shape belongs to (as declared in the document).
    pub image_name: String,
    /// Declared size of that image.
    pub dimensions: Dimensions,
    /// Label name as written in the document.
    pub label: String,
    /// Class index resolved through the legend.
    pub class_index: ClassIndex,
    /// Which element the record came from.
    pub kind: GeometryKind,
    /// Area in pixels (shoelace area for polygons and boxes, set-pixel
    /// count for masks).
    pub area: f64,
    /// The geometry to paint.
    pub geometry: Geometry,
}

/// An image whose annotations could not be turned into records.
#[derive(Debug)]
pub struct ImageFailure {
    /// Image name as declared in the document.
    pub image_name: String,
    /// Why the image failed.
    pub error: PipelineError,
}

/// Whether legend indices start at zero or one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBase {
    /// First label gets index 0 (collides with the background value).
    Zero,
    /// First label gets index 1; 0 stays reserved for background.
    #[default]
    One,
}

impl IndexBase {
    /// Index assigned to the first label.
    #[must_use]
    pub const fn first_index(self) -> usize {
        match self {
            Self::Zero => 0,
            Self::One => 1,
        }
    }
}

/// Configuration for the annotation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Where legend enumeration starts.
    pub index_base: IndexBase,

    /// Whether to embed the legend's colors as a palette in output rasters.
    /// A legend whose colors cannot be parsed falls back to no palette.
    pub embed_colormap: bool,
}

impl PipelineConfig {
    /// Default legend index base.
    pub const DEFAULT_INDEX_BASE: IndexBase = IndexBase::One;

    /// Default for palette embedding.
    pub const DEFAULT_EMBED_COLORMAP: bool = true;
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            index_base: Self::DEFAULT_INDEX_BASE,
            embed_colormap: Self::DEFAULT_EMBED_COLORMAP,
        }
    }
}

/// Errors that can occur while turning annotations into a label raster.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    /// The annotation document itself is unusable. Aborts the whole batch.
    #[error("malformed annotation document: {0}")]
    MalformedDocument(String),

    /// A label definition is missing its name or has an unparsable color.
    #[error("malformed legend: {0}")]
    MalformedLegend(String),

    /// An annotation references a label the legend does not declare.
    #[error("unknown label `{0}`")]
    UnknownLabel(String),

    /// Unparsable coordinates, dimensions or RLE text.
    #[error("malformed annotation: {0}")]
    MalformedAnnotation(String),

    /// A record reached the compositor with nothing to draw.
    #[error("annotation labelled `{label}` has no drawable geometry")]
    MissingGeometry {
        /// Label of the offending record.
        label: String,
    },

    /// A mask would be written outside its canvas.
    #[error("mask out of bounds: {0}")]
    OutOfBounds(String),

    /// The per-image metadata sidecar does not exist.
    #[error("missing metadata sidecar {}", path.display())]
    MissingMetadata {
        /// Where the sidecar was expected.
        path: PathBuf,
    },

    /// The sidecar's CRS is absent or not understood.
    #[error("unresolvable CRS: {0}")]
    UnresolvableCrs(String),

    /// The sidecar is not valid JSON or lacks a usable transform.
    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),
}

impl PipelineError {
    /// Stable name of the error kind, for reports.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MalformedDocument(_) => "MalformedDocument",
            Self::MalformedLegend(_) => "MalformedLegend",
            Self::UnknownLabel(_) => "UnknownLabel",
            Self::MalformedAnnotation(_) => "MalformedAnnotation",
            Self::MissingGeometry { .. } => "MissingGeometry",
            Self::OutOfBounds(_) => "OutOfBounds",
            Self::MissingMetadata { .. } => "MissingMetadata",
            Self::UnresolvableCrs(_) => "UnresolvableCrs",
            Self::MalformedMetadata(_) => "MalformedMetadata",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_pixel_count() {
        assert_eq!(Dimensions::new(4, 3).pixel_count(), 12);
        assert_eq!(Dimensions::new(0, 3).pixel_count(), 0);
    }

    #[test]
    fn index_base_first_index() {
        assert_eq!(IndexBase::One.first_index(), 1);
        assert_eq!(IndexBase::Zero.first_index(), 0);
        assert_eq!(IndexBase::default(), IndexBase::One);
    }

    #[test]
    fn pipeline_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.index_base, IndexBase::One);
        assert!(config.embed_colormap);
    }

    #[test]
    fn pipeline_config_partial_json_uses_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{"index_base":"zero"}"#).unwrap();
        assert_eq!(config.index_base, IndexBase::Zero);
        assert!(config.embed_colormap);
    }

    #[test]
    fn error_display_and_kind() {
        let err = PipelineError::UnknownLabel("road".to_string());
        assert_eq!(err.to_string(), "unknown label `road`");
        assert_eq!(err.kind(), "UnknownLabel");

        let err = PipelineError::MissingMetadata {
            path: PathBuf::from("meta/a.json"),
        };
        assert_eq!(err.to_string(), "missing metadata sidecar meta/a.json");
        assert_eq!(err.kind(), "MissingMetadata");
    }

    #[test]
    fn geometry_kind_names() {
        assert_eq!(GeometryKind::Polygon.as_str(), "polygon");
        assert_eq!(GeometryKind::Box.as_str(), "box");
        assert_eq!(GeometryKind::Mask.as_str(), "mask");
    }
}
