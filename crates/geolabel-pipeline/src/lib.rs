//! geolabel-pipeline: Pure annotation-to-label-raster pipeline (sans-IO).
//!
//! Turns a CVAT annotation export into one class-indexed canvas per image:
//! legend -> annotation records -> group by image -> composite, plus the
//! sidecar metadata reconciliation that georeferences each canvas.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! text and byte slices and returns structured data. All filesystem
//! interaction lives in `geolabel-io`.

pub mod annotation;
pub mod clip;
pub mod diagnostics;
pub mod document;
pub mod legend;
pub mod metadata;
pub mod rasterize;
pub mod rle;
pub mod types;

pub use annotation::{AnnotationSet, ImageGroup, ImageInfo, parse_annotations};
pub use diagnostics::{Clock, ImageDiagnostics, Notice, NoticeKind, StageDiagnostics, StageMetrics};
pub use document::AnnotationDocument;
pub use legend::{ColorMap, Legend, LegendEntry, load_colormap, load_legend};
pub use metadata::{Crs, GeoMetadata, GeoTransform, parse_sidecar};
pub use rasterize::{composite, composite_with_diagnostics};
pub use rle::Bitmap;
pub use types::{
    AnnotationRecord, ClassIndex, Dimensions, Geometry, GeometryKind, GrayImage, ImageFailure,
    IndexBase, PipelineConfig, PipelineError,
};

/// Everything derived once from the annotation document.
#[derive(Debug)]
pub struct PreparedDocument {
    /// Label to class index mapping.
    pub legend: Legend,
    /// Per-class colors, when requested and parsable.
    pub colormap: Option<ColorMap>,
    /// Parsed records and per-image failures.
    pub annotations: AnnotationSet,
    /// Document-wide notices followed by annotation notices.
    pub notices: Vec<Notice>,
}

/// Parse the document, load the legend and colors, and parse all
/// annotations.
///
/// # Pipeline steps
///
/// 1. Parse the XML
/// 2. Load the legend (mandatory)
/// 3. Load the color map (optional; falls back to none with a notice)
/// 4. Parse every image's shapes into records
///
/// # Errors
///
/// Returns [`PipelineError::MalformedDocument`] if the text is not XML or
/// an image has no name, and [`PipelineError::MalformedLegend`] if the
/// legend itself is unusable. Per-image problems are reported through
/// [`AnnotationSet::failures`] instead.
pub fn prepare(xml: &str, config: &PipelineConfig) -> Result<PreparedDocument, PipelineError> {
    // 1. Parse.
    let doc = AnnotationDocument::parse(xml)?;

    // 2. Legend.
    let (legend, mut notices) = load_legend(&doc, config.index_base)?;

    // 3. Colors.
    let colormap = if config.embed_colormap {
        match load_colormap(&doc, config.index_base) {
            Ok(colors) => Some(colors),
            Err(e) => {
                notices.push(Notice::document(NoticeKind::ColormapUnavailable {
                    reason: e.to_string(),
                }));
                None
            }
        }
    } else {
        None
    };

    // 4. Annotations.
    let mut annotations = parse_annotations(&doc, &legend)?;
    notices.append(&mut annotations.notices);

    Ok(PreparedDocument {
        legend,
        colormap,
        annotations,
        notices,
    })
}
