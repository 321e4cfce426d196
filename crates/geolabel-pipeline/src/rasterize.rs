//! Compositing: one class-index canvas per image.
//!
//! Records are painted largest area first, so smaller annotations nested
//! inside larger ones stay visible. The sort is stable: equal-area records
//! keep their parse order and the later one wins where they overlap.
//!
//! Polygons are filled solid with no antialiasing. Rings are first clipped
//! to the canvas, then vertices are truncated toward zero to integer
//! pixels and boundary pixels are included.

use image::Luma;
use imageproc::drawing::{draw_line_segment_mut, draw_polygon_mut};
use imageproc::point::Point;

use crate::annotation::ImageGroup;
use crate::clip::{clip_ring, paint_window};
use crate::diagnostics::{Clock, StageDiagnostics, StageMetrics, count_labelled_pixels};
use crate::rle::Bitmap;
use crate::types::{
    AnnotationRecord, ClassIndex, Dimensions, Geometry, GeometryKind, GrayImage, PipelineError,
};

/// Records in paint order: area descending, parse order among ties.
#[must_use]
pub fn draw_order<'a>(records: &[&'a AnnotationRecord]) -> Vec<&'a AnnotationRecord> {
    let mut ordered = records.to_vec();
    ordered.sort_by(|a, b| b.area.total_cmp(&a.area));
    ordered
}

/// Composite every record of an image onto a zeroed canvas.
///
/// # Errors
///
/// Returns [`PipelineError::MissingGeometry`] for a polygon without
/// vertices and [`PipelineError::OutOfBounds`] for a mask whose size does
/// not match the canvas.
pub fn composite(group: &ImageGroup<'_>) -> Result<GrayImage, PipelineError> {
    let Dimensions { width, height } = group.dimensions;
    let mut canvas = GrayImage::new(width, height);
    for record in draw_order(&group.records) {
        paint(&mut canvas, record)?;
    }
    Ok(canvas)
}

/// [`composite`], timed and summarised.
///
/// # Errors
///
/// Same as [`composite`].
pub fn composite_with_diagnostics<C: Clock>(
    group: &ImageGroup<'_>,
    clock: &C,
) -> Result<(GrayImage, StageDiagnostics), PipelineError> {
    let start = clock.now();
    let canvas = composite(group)?;
    let duration = clock.elapsed(&start);

    let count = |kind: GeometryKind| group.records.iter().filter(|r| r.kind == kind).count();
    let metrics = StageMetrics::Composite {
        width: canvas.width(),
        height: canvas.height(),
        polygons: count(GeometryKind::Polygon),
        boxes: count(GeometryKind::Box),
        masks: count(GeometryKind::Mask),
        labelled_pixels: count_labelled_pixels(&canvas),
    };

    Ok((canvas, StageDiagnostics { duration, metrics }))
}

fn paint(canvas: &mut GrayImage, record: &AnnotationRecord) -> Result<(), PipelineError> {
    match &record.geometry {
        Geometry::Polygon(polygon) => fill_polygon(canvas, polygon, record),
        Geometry::Mask(bitmap) => fill_mask(canvas, bitmap, record.class_index),
    }
}

fn fill_polygon(
    canvas: &mut GrayImage,
    polygon: &geo::Polygon<f64>,
    record: &AnnotationRecord,
) -> Result<(), PipelineError> {
    let ring = polygon.exterior();
    if ring.0.is_empty() {
        return Err(PipelineError::MissingGeometry {
            label: record.label.clone(),
        });
    }
    if canvas.width() == 0 || canvas.height() == 0 {
        return Ok(());
    }

    let clipped = clip_ring(ring, paint_window(canvas.width(), canvas.height()));
    #[allow(clippy::cast_possible_truncation)]
    let points: Vec<Point<i32>> = clipped
        .iter()
        .map(|c| Point::new(c.x as i32, c.y as i32))
        .collect();

    let value = Luma([record.class_index]);
    match points.as_slice() {
        [] => {}
        [p] => {
            if let (Ok(x), Ok(y)) = (u32::try_from(p.x), u32::try_from(p.y))
                && x < canvas.width()
                && y < canvas.height()
            {
                canvas.put_pixel(x, y, value);
            }
        }
        #[allow(clippy::cast_precision_loss)]
        [a, b] => draw_line_segment_mut(
            canvas,
            (a.x as f32, a.y as f32),
            (b.x as f32, b.y as f32),
            value,
        ),
        _ => draw_polygon_mut(canvas, &points, value),
    }
    Ok(())
}

fn fill_mask(
    canvas: &mut GrayImage,
    bitmap: &Bitmap,
    value: ClassIndex,
) -> Result<(), PipelineError> {
    let dims = bitmap.dimensions();
    if dims.width != canvas.width() || dims.height != canvas.height() {
        return Err(PipelineError::OutOfBounds(format!(
            "{}x{} mask on {}x{} canvas",
            dims.width,
            dims.height,
            canvas.width(),
            canvas.height(),
        )));
    }
    for (x, y) in bitmap.iter_ones() {
        canvas.put_pixel(x, y, Luma([value]));
    }
    Ok(())
}
