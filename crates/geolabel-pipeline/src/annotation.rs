//! Annotation parsing: `<image>` elements to [`AnnotationRecord`]s.
//!
//! Polygons keep their pixel coordinates. Boxes are written with Y growing
//! downward from the top edge and are reflected about the image height
//! before being stored as rectangles. Masks are decoded to full-canvas
//! bitmaps.
//!
//! A problem inside one image (unknown label, unparsable numbers, a mask
//! outside the canvas) fails that image only; the rest of the document is
//! still parsed.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path};

use geo::{Area, Coord, LineString, Polygon, Rect};
use roxmltree::Node;

use crate::diagnostics::{Notice, NoticeKind};
use crate::document::{AnnotationDocument, attr, parse_attr};
use crate::legend::Legend;
use crate::rle::{self, SubRect};
use crate::types::{
    AnnotationRecord, Dimensions, Geometry, GeometryKind, ImageFailure, PipelineError,
};

/// An image declared in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Image name as declared.
    pub name: String,
    /// Declared canvas size.
    pub dimensions: Dimensions,
}

/// Everything parsed from a document's `<image>` elements.
#[derive(Debug, Default)]
pub struct AnnotationSet {
    /// Successfully parsed images, in first-appearance order.
    pub images: Vec<ImageInfo>,
    /// Records of those images, in document order.
    pub records: Vec<AnnotationRecord>,
    /// Images that could not be parsed.
    pub failures: Vec<ImageFailure>,
    /// Non-fatal notices (skipped shape kinds).
    pub notices: Vec<Notice>,
}

/// All records belonging to one image, in parse order.
#[derive(Debug, Clone)]
pub struct ImageGroup<'a> {
    /// Image name.
    pub name: &'a str,
    /// Canvas size for the image.
    pub dimensions: Dimensions,
    /// The image's records.
    pub records: Vec<&'a AnnotationRecord>,
}

impl AnnotationSet {
    /// Group records by image name.
    ///
    /// Groups follow first-appearance order and keep the parse order of
    /// records within each group. Images without shapes yield empty groups.
    #[must_use]
    pub fn group_by_image(&self) -> Vec<ImageGroup<'_>> {
        let mut positions = HashMap::with_capacity(self.images.len());
        let mut groups: Vec<ImageGroup<'_>> = Vec::with_capacity(self.images.len());
        for info in &self.images {
            positions.insert(info.name.as_str(), groups.len());
            groups.push(ImageGroup {
                name: &info.name,
                dimensions: info.dimensions,
                records: Vec::new(),
            });
        }
        for record in &self.records {
            if let Some(&i) = positions.get(record.image_name.as_str()) {
                groups[i].records.push(record);
            }
        }
        groups
    }
}

/// Parse every `<image>` element of the document.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedDocument`] if an `<image>` has no
/// `name`, since its shapes cannot be attributed to any output. All other
/// problems are collected per image in [`AnnotationSet::failures`].
pub fn parse_annotations(
    doc: &AnnotationDocument<'_>,
    legend: &Legend,
) -> Result<AnnotationSet, PipelineError> {
    let mut set = AnnotationSet::default();
    let mut failed: HashSet<String> = HashSet::new();

    for node in doc.image_elements() {
        let name = node.attribute("name").ok_or_else(|| {
            PipelineError::MalformedDocument("<image> element without a `name`".to_string())
        })?;

        match parse_image(node, name, legend, &mut set.notices) {
            Ok((dimensions, records)) => {
                if !set.images.iter().any(|info| info.name == name) {
                    set.images.push(ImageInfo {
                        name: name.to_string(),
                        dimensions,
                    });
                }
                set.records.extend(records);
            }
            Err(error) => {
                failed.insert(name.to_string());
                set.failures.push(ImageFailure {
                    image_name: name.to_string(),
                    error,
                });
            }
        }
    }

    if !failed.is_empty() {
        set.images.retain(|info| !failed.contains(&info.name));
        set.records.retain(|r| !failed.contains(&r.image_name));
    }

    Ok(set)
}

fn parse_image(
    node: Node<'_, '_>,
    name: &str,
    legend: &Legend,
    notices: &mut Vec<Notice>,
) -> Result<(Dimensions, Vec<AnnotationRecord>), PipelineError> {
    check_image_name(name)?;
    let dimensions = Dimensions::new(parse_attr(node, "width")?, parse_attr(node, "height")?);

    let mut records = Vec::new();
    for shape in node.children().filter(Node::is_element) {
        let kind = match shape.tag_name().name() {
            "polygon" => GeometryKind::Polygon,
            "box" => GeometryKind::Box,
            "mask" => GeometryKind::Mask,
            other => {
                notices.push(Notice::image(
                    name,
                    NoticeKind::SkippedShape {
                        element: other.to_string(),
                    },
                ));
                continue;
            }
        };

        let label = attr(shape, "label")?;
        let class_index = legend.index_of(label)?;
        let (geometry, area) = match kind {
            GeometryKind::Polygon => parse_polygon(shape)?,
            GeometryKind::Box => parse_box(shape, dimensions)?,
            GeometryKind::Mask => parse_mask(shape, dimensions)?,
        };

        records.push(AnnotationRecord {
            image_name: name.to_string(),
            dimensions,
            label: label.to_string(),
            class_index,
            kind,
            area,
            geometry,
        });
    }

    Ok((dimensions, records))
}

/// Image names become paths below the output and metadata directories,
/// so they must be relative and must not climb out of them.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedAnnotation`] for empty or absolute
/// names and names with `..` components.
pub fn check_image_name(name: &str) -> Result<(), PipelineError> {
    let mut components = Path::new(name).components();
    let has_file = components
        .clone()
        .any(|c| matches!(c, Component::Normal(_)));
    let stays_inside = components.all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if has_file && stays_inside {
        Ok(())
    } else {
        Err(PipelineError::MalformedAnnotation(format!(
            "image name `{name}` must be a relative path without `..`"
        )))
    }
}

fn parse_polygon(shape: Node<'_, '_>) -> Result<(Geometry, f64), PipelineError> {
    let coords = parse_points(attr(shape, "points")?)?;
    let polygon = Polygon::new(LineString::from(coords), Vec::new());
    let area = polygon.unsigned_area();
    Ok((Geometry::Polygon(polygon), area))
}

fn parse_box(shape: Node<'_, '_>, dimensions: Dimensions) -> Result<(Geometry, f64), PipelineError> {
    let xtl: f64 = parse_coordinate(shape, "xtl")?;
    let ytl: f64 = parse_coordinate(shape, "ytl")?;
    let xbr: f64 = parse_coordinate(shape, "xbr")?;
    let ybr: f64 = parse_coordinate(shape, "ybr")?;

    let rect = Rect::new(
        Coord {
            x: xtl,
            y: reflect_y(ybr, dimensions.height),
        },
        Coord {
            x: xbr,
            y: reflect_y(ytl, dimensions.height),
        },
    );
    let area = (xbr - xtl).abs() * (ybr - ytl).abs();
    Ok((Geometry::Polygon(rect.to_polygon()), area))
}

fn parse_mask(shape: Node<'_, '_>, dimensions: Dimensions) -> Result<(Geometry, f64), PipelineError> {
    let region = SubRect {
        left: parse_attr(shape, "left")?,
        top: parse_attr(shape, "top")?,
        width: parse_attr(shape, "width")?,
        height: parse_attr(shape, "height")?,
    };
    let bitmap = rle::decode(attr(shape, "rle")?, region, dimensions)?;
    #[allow(clippy::cast_precision_loss)]
    let area = bitmap.count_ones() as f64;
    Ok((Geometry::Mask(bitmap), area))
}

fn parse_coordinate(shape: Node<'_, '_>, name: &str) -> Result<f64, PipelineError> {
    let value: f64 = parse_attr(shape, name)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PipelineError::MalformedAnnotation(format!(
            "<{}> attribute `{name}` is not finite",
            shape.tag_name().name()
        )))
    }
}

/// Parse `x,y;x,y;...` into vertices.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedAnnotation`] for empty input, a pair
/// without a comma, or a non-finite / unparsable number.
pub fn parse_points(text: &str) -> Result<Vec<Coord<f64>>, PipelineError> {
    text.split(';')
        .map(|pair| {
            let (x, y) = pair.split_once(',').ok_or_else(|| {
                PipelineError::MalformedAnnotation(format!("invalid point `{pair}`"))
            })?;
            Ok(Coord {
                x: parse_number(x)?,
                y: parse_number(y)?,
            })
        })
        .collect()
}

fn parse_number(text: &str) -> Result<f64, PipelineError> {
    let text = text.trim();
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(PipelineError::MalformedAnnotation(format!(
            "invalid coordinate `{text}`"
        ))),
    }
}

/// Move an ordinate between top-left and bottom-left origin conventions.
#[must_use]
pub fn reflect_y(y: f64, height: u32) -> f64 {
    f64::from(height) - y
}
