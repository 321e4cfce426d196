//! Conversion diagnostics: stage timings, counts and non-fatal notices.
//!
//! Every converted image yields an [`ImageDiagnostics`] describing how
//! long each stage took and what it produced. Fallbacks that do not stop
//! a conversion (a legend without usable colors, a CRS read from its
//! string form, skipped shape kinds) are reported as [`Notice`] values
//! instead of being printed.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of timestamps for stage durations.
///
/// The pipeline crate never reads the system clock itself; callers pass
/// an implementation (see `geolabel_io::StdClock`).
pub trait Clock {
    /// Opaque timestamp type.
    type Instant;

    /// Current timestamp.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// A non-fatal condition encountered during conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Image the notice refers to; `None` for document-wide notices.
    pub image: Option<String>,
    /// What happened.
    pub kind: NoticeKind,
}

impl Notice {
    /// Notice that applies to the whole document.
    #[must_use]
    pub const fn document(kind: NoticeKind) -> Self {
        Self { image: None, kind }
    }

    /// Notice that applies to one image.
    #[must_use]
    pub fn image(image: &str, kind: NoticeKind) -> Self {
        Self {
            image: Some(image.to_string()),
            kind,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.image {
            Some(image) => write!(f, "{image}: {}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Kinds of non-fatal notices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Legend colors could not be parsed; rasters are written without a palette.
    ColormapUnavailable {
        /// Why the colors were rejected.
        reason: String,
    },
    /// A label name was declared more than once; the later index wins.
    DuplicateLabel {
        /// The repeated label name.
        label: String,
    },
    /// A shape element other than polygon, box or mask was ignored.
    SkippedShape {
        /// Element name of the skipped shape.
        element: String,
    },
    /// The sidecar CRS was not a recognised dictionary and was read from
    /// its string form instead.
    CrsStringFallback {
        /// The CRS text that was used.
        crs: String,
    },
    /// The sidecar transform had nine elements; only the first six were used.
    TransformTruncated,
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColormapUnavailable { reason } => {
                write!(f, "colormap unavailable, rasters will have no palette ({reason})")
            }
            Self::DuplicateLabel { label } => {
                write!(f, "label `{label}` declared more than once, later index wins")
            }
            Self::SkippedShape { element } => write!(f, "skipped unsupported <{element}> shape"),
            Self::CrsStringFallback { crs } => write!(f, "CRS resolved from string form `{crs}`"),
            Self::TransformTruncated => {
                write!(f, "9-element transform truncated to its 6 affine parameters")
            }
        }
    }
}

/// Diagnostics collected while converting a single image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageDiagnostics {
    /// Image name as declared in the document.
    pub image: String,
    /// Painting annotations onto the canvas.
    pub composite: StageDiagnostics,
    /// Loading and reconciling the sidecar metadata.
    pub metadata: Option<StageDiagnostics>,
    /// Persisting the raster.
    pub write: Option<StageDiagnostics>,
    /// Total wall-clock duration of the conversion (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Non-fatal notices for this image.
    pub notices: Vec<Notice>,
}

/// Diagnostics for a single conversion stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Compositing metrics.
    Composite {
        /// Canvas width in pixels.
        width: u32,
        /// Canvas height in pixels.
        height: u32,
        /// Number of polygon records painted.
        polygons: usize,
        /// Number of box records painted.
        boxes: usize,
        /// Number of mask records painted.
        masks: usize,
        /// Cells holding a non-zero class index after compositing.
        labelled_pixels: u64,
    },
    /// Metadata resolution metrics.
    Metadata {
        /// Resolved CRS, as text.
        crs: String,
        /// Whether the transform is axis-aligned (no rotation or shear).
        north_up: bool,
    },
    /// Raster writing metrics.
    Write {
        /// Destination path.
        path: String,
        /// Whether a palette was embedded.
        palette: bool,
    },
}

impl ImageDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Image {}", self.image));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));

        let mut stages = vec![("Composite", &self.composite)];
        if let Some(ref m) = self.metadata {
            stages.push(("Metadata", m));
        }
        if let Some(ref w) = self.write {
            stages.push(("Write", w));
        }

        for (name, diag) in stages {
            let ms = duration_ms(diag.duration);
            let details = format_metrics(&diag.metrics);
            lines.push(format!("  {name:<12} {ms:>8.3}ms  {details}"));
        }

        for notice in &self.notices {
            lines.push(format!("  note: {}", notice.kind));
        }

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Composite {
            width,
            height,
            polygons,
            boxes,
            masks,
            labelled_pixels,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let coverage = if *width > 0 && *height > 0 {
                *labelled_pixels as f64 / (f64::from(*width) * f64::from(*height)) * 100.0
            } else {
                0.0
            };
            format!(
                "{width}x{height} polygons={polygons} boxes={boxes} masks={masks} labelled={labelled_pixels} ({coverage:.1}%)",
            )
        }
        StageMetrics::Metadata { crs, north_up } => {
            let layout = if *north_up { "north-up" } else { "affine" };
            format!("crs={crs} {layout}")
        }
        StageMetrics::Write { path, palette } => {
            if *palette {
                format!("{path} (palette)")
            } else {
                path.clone()
            }
        }
    }
}

/// Count cells holding a non-zero class index.
pub(crate) fn count_labelled_pixels(canvas: &image::GrayImage) -> u64 {
    canvas.pixels().map(|p| u64::from(p.0[0] != 0)).sum()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> ImageDiagnostics {
        ImageDiagnostics {
            image: "tile_0001.png".to_string(),
            composite: StageDiagnostics {
                duration: Duration::from_millis(4),
                metrics: StageMetrics::Composite {
                    width: 10,
                    height: 10,
                    polygons: 2,
                    boxes: 1,
                    masks: 0,
                    labelled_pixels: 25,
                },
            },
            metadata: Some(StageDiagnostics {
                duration: Duration::from_millis(1),
                metrics: StageMetrics::Metadata {
                    crs: "EPSG:32633".to_string(),
                    north_up: true,
                },
            }),
            write: None,
            total_duration: Duration::from_millis(6),
            notices: vec![Notice::image(
                "tile_0001.png",
                NoticeKind::CrsStringFallback {
                    crs: "EPSG:32633".to_string(),
                },
            )],
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let d = Duration::from_millis(1234);
        assert!((duration_ms(d) - 1234.0).abs() < 0.01);
    }

    #[test]
    fn count_labelled_pixels_works() {
        let mut img = image::GrayImage::new(4, 4);
        img.put_pixel(0, 0, image::Luma([3]));
        img.put_pixel(3, 3, image::Luma([1]));
        assert_eq!(count_labelled_pixels(&img), 2);
    }

    #[test]
    fn report_mentions_stages_and_notices() {
        let report = sample().report();
        assert!(report.contains("tile_0001.png"));
        assert!(report.contains("Composite"));
        assert!(report.contains("(25.0%)"));
        assert!(report.contains("Metadata"));
        assert!(!report.contains("Write"));
        assert!(report.contains("CRS resolved from string form"));
    }

    #[test]
    fn diagnostics_serialize_durations_as_seconds() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!((json["total_duration"].as_f64().unwrap() - 0.006).abs() < 1e-9);
        let back: ImageDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back.total_duration, Duration::from_millis(6));
    }

    #[test]
    fn notice_display_includes_image() {
        let notice = Notice::image(
            "a.png",
            NoticeKind::SkippedShape {
                element: "ellipse".to_string(),
            },
        );
        assert_eq!(notice.to_string(), "a.png: skipped unsupported <ellipse> shape");
        let notice = Notice::document(NoticeKind::TransformTruncated);
        assert!(notice.to_string().starts_with("9-element transform"));
    }
}
