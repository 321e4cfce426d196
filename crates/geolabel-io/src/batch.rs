//! Batch conversion: one annotation document to one raster per image.
//!
//! The document is parsed once on the calling thread. Images are then
//! converted on a rayon pool; each task owns its canvas and file handles
//! and a failing image never stops its siblings.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use geolabel_pipeline::{
    Clock, ImageDiagnostics, ImageGroup, Notice, NoticeKind, PipelineConfig, PipelineError,
    PreparedDocument, StageDiagnostics, StageMetrics, composite_with_diagnostics, prepare,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::geotiff::{LabelRaster, RasterWriteError, RasterWriter};
use crate::preview::write_preview;
use crate::sidecar::load_metadata;

/// Where inputs come from and outputs go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Legend and palette options.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Directory holding `<image>.json` sidecars.
    pub meta_dir: PathBuf,
    /// Directory receiving `<image>.tif` rasters.
    pub output_dir: PathBuf,
    /// Directory receiving `<image>.png` previews, if wanted.
    #[serde(default)]
    pub preview_dir: Option<PathBuf>,
    /// Worker threads; `None` uses one per core.
    #[serde(default)]
    pub jobs: Option<usize>,
}

impl BatchConfig {
    /// Config with default pipeline options, no previews and default jobs.
    #[must_use]
    pub fn new(meta_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            meta_dir: meta_dir.into(),
            output_dir: output_dir.into(),
            preview_dir: None,
            jobs: None,
        }
    }
}

/// [`Clock`] backed by [`std::time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Why one image could not be converted.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// Annotation, metadata or compositing problem.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A sidecar exists but could not be read.
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: io::Error,
    },

    /// The raster or preview could not be written.
    #[error("writing {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: RasterWriteError,
    },
}

impl ImageError {
    /// Stable name of the error kind, for reports.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Pipeline(e) => e.kind(),
            Self::Read { .. } => "ReadError",
            Self::Write { .. } => "WriteError",
        }
    }
}

/// Failures that stop the whole batch before any image is converted.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// The annotation document could not be read.
    #[error("reading annotation document {}: {source}", path.display())]
    ReadDocument {
        path: PathBuf,
        source: io::Error,
    },

    /// The document or its legend is unusable.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// An output directory could not be created.
    #[error("creating directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: io::Error,
    },

    /// The worker pool could not be started.
    #[error("starting worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result of one image.
#[derive(Debug, Serialize)]
pub struct ImageOutcome {
    /// Image name as declared in the document.
    pub image: String,
    #[serde(flatten)]
    pub status: ImageStatus,
}

/// Converted or failed, with details.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImageStatus {
    Converted {
        /// Raster path.
        output: PathBuf,
        /// Preview path, when previews were requested.
        preview: Option<PathBuf>,
        diagnostics: ImageDiagnostics,
    },
    Failed {
        /// [`ImageError::kind`] of the failure.
        kind: &'static str,
        message: String,
    },
}

impl ImageOutcome {
    fn failed(image: &str, error: &ImageError) -> Self {
        Self {
            image: image.to_string(),
            status: ImageStatus::Failed {
                kind: error.kind(),
                message: error.to_string(),
            },
        }
    }

    /// Returns `true` if the image was converted.
    #[must_use]
    pub const fn is_converted(&self) -> bool {
        matches!(self.status, ImageStatus::Converted { .. })
    }
}

/// Outcome of a whole batch.
#[derive(Debug, Serialize)]
pub struct BatchReport {
    /// One entry per image, sorted by image name.
    pub outcomes: Vec<ImageOutcome>,
    /// Document-wide notices.
    pub notices: Vec<Notice>,
}

impl BatchReport {
    /// Number of converted images.
    #[must_use]
    pub fn converted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_converted()).count()
    }

    /// Number of failed images.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.converted()
    }

    /// Returns `true` if no image failed.
    #[must_use]
    pub fn all_converted(&self) -> bool {
        self.failed() == 0
    }

    /// One line per failed image and a closing count.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut lines: Vec<String> = self
            .outcomes
            .iter()
            .filter_map(|o| match &o.status {
                ImageStatus::Failed { kind, message } => {
                    Some(format!("{}: {kind}: {message}", o.image))
                }
                ImageStatus::Converted { .. } => None,
            })
            .collect();
        lines.push(format!(
            "{} converted, {} failed",
            self.converted(),
            self.failed()
        ));
        lines.join("\n")
    }
}

/// Read an annotation document and convert every image in it.
///
/// # Errors
///
/// Returns [`BatchError`] only for problems that prevent any conversion.
/// Per-image failures are reported in the [`BatchReport`].
pub fn convert_document<W: RasterWriter + Sync>(
    xml_path: &Path,
    config: &BatchConfig,
    writer: &W,
) -> Result<BatchReport, BatchError> {
    let xml = fs::read_to_string(xml_path).map_err(|source| BatchError::ReadDocument {
        path: xml_path.to_path_buf(),
        source,
    })?;
    info!(path = %xml_path.display(), "read annotation document");
    convert_str(&xml, config, writer)
}

/// [`convert_document`] for document text already in memory.
///
/// # Errors
///
/// See [`convert_document`].
pub fn convert_str<W: RasterWriter + Sync>(
    xml: &str,
    config: &BatchConfig,
    writer: &W,
) -> Result<BatchReport, BatchError> {
    let prepared = prepare(xml, &config.pipeline)?;
    info!(
        labels = prepared.legend.len(),
        images = prepared.annotations.images.len() + prepared.annotations.failures.len(),
        records = prepared.annotations.records.len(),
        "parsed annotation document"
    );
    for notice in prepared.notices.iter().filter(|n| n.image.is_none()) {
        warn!("{notice}");
    }

    create_dir(&config.output_dir)?;
    if let Some(dir) = &config.preview_dir {
        create_dir(dir)?;
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.jobs.unwrap_or(0))
        .build()?;
    debug!(threads = pool.current_num_threads(), "worker pool ready");

    let groups = prepared.annotations.group_by_image();
    let mut outcomes: Vec<ImageOutcome> = pool.install(|| {
        groups
            .par_iter()
            .map(|group| convert_image(group, &prepared, config, writer, &StdClock))
            .collect()
    });

    for failure in &prepared.annotations.failures {
        let error = ImageError::Pipeline(failure.error.clone());
        warn!(image = %failure.image_name, kind = error.kind(), "{error}");
        outcomes.push(ImageOutcome::failed(&failure.image_name, &error));
    }
    outcomes.sort_by(|a, b| a.image.cmp(&b.image));

    let notices = prepared
        .notices
        .into_iter()
        .filter(|n| n.image.is_none())
        .collect();
    let report = BatchReport { outcomes, notices };
    info!(
        converted = report.converted(),
        failed = report.failed(),
        "batch finished"
    );
    Ok(report)
}

fn convert_image<W: RasterWriter, C: Clock>(
    group: &ImageGroup<'_>,
    prepared: &PreparedDocument,
    config: &BatchConfig,
    writer: &W,
    clock: &C,
) -> ImageOutcome {
    let span = tracing::debug_span!("image", name = group.name);
    let _enter = span.enter();

    match run_image(group, prepared, config, writer, clock) {
        Ok((output, preview, diagnostics)) => {
            debug!("{}", diagnostics.report());
            info!(output = %output.display(), "converted");
            ImageOutcome {
                image: group.name.to_string(),
                status: ImageStatus::Converted {
                    output,
                    preview,
                    diagnostics,
                },
            }
        }
        Err(error) => {
            warn!(kind = error.kind(), "{error}");
            ImageOutcome::failed(group.name, &error)
        }
    }
}

fn run_image<W: RasterWriter, C: Clock>(
    group: &ImageGroup<'_>,
    prepared: &PreparedDocument,
    config: &BatchConfig,
    writer: &W,
    clock: &C,
) -> Result<(PathBuf, Option<PathBuf>, ImageDiagnostics), ImageError> {
    let start = clock.now();

    let (canvas, composite) = composite_with_diagnostics(group, clock)?;

    let stage = clock.now();
    let (metadata, metadata_notices) = load_metadata(&config.meta_dir, group.name)?;
    let metadata_stage = StageDiagnostics {
        duration: clock.elapsed(&stage),
        metrics: metadata.stage_metrics(),
    };

    let colormap = prepared.colormap.as_ref();
    let output = output_path(&config.output_dir, group.name, "tif");
    let stage = clock.now();
    ensure_parent(&output)?;
    let raster = LabelRaster {
        canvas: &canvas,
        metadata: &metadata,
        colormap,
    };
    writer
        .write(&output, &raster)
        .map_err(|source| ImageError::Write {
            path: output.clone(),
            source,
        })?;
    let write_stage = StageDiagnostics {
        duration: clock.elapsed(&stage),
        metrics: StageMetrics::Write {
            path: output.display().to_string(),
            palette: colormap.is_some(),
        },
    };

    let preview = match &config.preview_dir {
        Some(dir) => {
            let path = output_path(dir, group.name, "png");
            ensure_parent(&path)?;
            write_preview(&path, &canvas, colormap).map_err(|source| ImageError::Write {
                path: path.clone(),
                source,
            })?;
            Some(path)
        }
        None => None,
    };

    let mut notices: Vec<Notice> = prepared
        .notices
        .iter()
        .filter(|n| n.image.as_deref() == Some(group.name))
        .cloned()
        .collect();
    notices.extend(metadata_notices);
    for notice in &notices {
        match notice.kind {
            NoticeKind::CrsStringFallback { .. } | NoticeKind::TransformTruncated => {
                debug!("{notice}");
            }
            _ => warn!("{notice}"),
        }
    }

    let diagnostics = ImageDiagnostics {
        image: group.name.to_string(),
        composite,
        metadata: Some(metadata_stage),
        write: Some(write_stage),
        total_duration: clock.elapsed(&start),
        notices,
    };
    Ok((output, preview, diagnostics))
}

/// `<dir>/<image name with its extension replaced by extension>`.
#[must_use]
pub fn output_path(dir: &Path, image_name: &str, extension: &str) -> PathBuf {
    dir.join(Path::new(image_name).with_extension(extension))
}

fn ensure_parent(path: &Path) -> Result<(), ImageError> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent).map_err(|source| ImageError::Write {
            path: path.to_path_buf(),
            source: RasterWriteError::Io(source),
        }),
        None => Ok(()),
    }
}

fn create_dir(path: &Path) -> Result<(), BatchError> {
    fs::create_dir_all(path).map_err(|source| BatchError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn output_path_swaps_extension() {
        assert_eq!(
            output_path(Path::new("out"), "sub/a.png", "tif"),
            PathBuf::from("out/sub/a.tif")
        );
    }

    #[test]
    fn batch_config_json_defaults() {
        let config: BatchConfig =
            serde_json::from_str(r#"{"meta_dir": "meta", "output_dir": "out"}"#).unwrap();
        assert_eq!(config, BatchConfig::new("meta", "out"));
    }

    #[test]
    fn report_summary_counts() {
        let report = BatchReport {
            outcomes: vec![
                ImageOutcome::failed(
                    "b.png",
                    &ImageError::Pipeline(PipelineError::UnknownLabel("tree".to_string())),
                ),
                ImageOutcome {
                    image: "a.png".to_string(),
                    status: ImageStatus::Failed {
                        kind: "WriteError",
                        message: "disk full".to_string(),
                    },
                },
            ],
            notices: Vec::new(),
        };
        assert_eq!(report.failed(), 2);
        assert!(!report.all_converted());
        let summary = report.summary();
        assert!(summary.contains("b.png: UnknownLabel: unknown label `tree`"));
        assert!(summary.ends_with("0 converted, 2 failed"));
    }
}
