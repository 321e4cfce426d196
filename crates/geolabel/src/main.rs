//! geolabel: convert CVAT XML annotations into GeoTIFF label rasters.
//!
//! Reads one annotation document, composites every image's polygons,
//! boxes and masks into a class-index canvas, georeferences it from the
//! image's JSON sidecar and writes `<output-dir>/<image>.tif`.
//!
//! # Usage
//!
//! ```text
//! geolabel [OPTIONS] <ANNOTATIONS_XML> <META_DIR>
//! ```
//!
//! Exit status is 0 when every image converted, 1 when some images
//! failed and 2 when the document could not be processed at all.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use geolabel_io::{BatchConfig, BatchReport, GeoTiffWriter, ImageStatus, convert_document};
use geolabel_pipeline::{IndexBase, PipelineConfig};
use tracing::error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Exit code for a batch in which at least one image failed.
const EXIT_PARTIAL: u8 = 1;

/// Exit code for a failure that stopped the whole batch.
const EXIT_GLOBAL: u8 = 2;

/// Convert CVAT annotations into class-indexed, georeferenced label rasters.
///
/// Each image's canvas is painted largest annotation first, so nested
/// annotations stay visible, and written as a single-band GeoTIFF with the
/// CRS and transform from `<META_DIR>/<image>.json`.
#[derive(Parser)]
#[command(name = "geolabel", version)]
struct Cli {
    /// CVAT 1.1 annotation export (.xml).
    #[arg(value_parser = parse_xml_path)]
    annotations: PathBuf,

    /// Directory of per-image metadata sidecars (`<image>.json`).
    meta_dir: PathBuf,

    /// Output directory [default: `<annotations dir>/labels`].
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Worker threads [default: one per core].
    #[arg(short, long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    jobs: Option<usize>,

    /// Number labels from 0 instead of 1.
    #[arg(long)]
    zero_indexed: bool,

    /// Do not embed the legend colors as a palette.
    #[arg(long)]
    no_colormap: bool,

    /// Also write colored PNG previews into this directory.
    #[arg(long)]
    preview_dir: Option<PathBuf>,

    /// Print the batch report as JSON instead of a summary.
    #[arg(long)]
    json: bool,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, `--zero-indexed` and `--no-colormap` are ignored.
    /// The JSON must be a valid `PipelineConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,

    /// Log per-image details.
    #[arg(short, long)]
    verbose: bool,
}

fn parse_xml_path(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
    {
        Ok(path)
    } else {
        Err(format!("`{value}` is not an .xml file"))
    }
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and the
/// individual flags are ignored.
fn pipeline_config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(PipelineConfig {
        index_base: if cli.zero_indexed {
            IndexBase::Zero
        } else {
            IndexBase::One
        },
        embed_colormap: !cli.no_colormap,
    })
}

fn batch_config_from_cli(cli: &Cli) -> Result<BatchConfig, String> {
    Ok(BatchConfig {
        pipeline: pipeline_config_from_cli(cli)?,
        meta_dir: cli.meta_dir.clone(),
        output_dir: cli
            .output_dir
            .clone()
            .unwrap_or_else(|| default_output_dir(&cli.annotations)),
        preview_dir: cli.preview_dir.clone(),
        jobs: cli.jobs,
    })
}

/// `labels/` next to the annotation document.
fn default_output_dir(annotations: &Path) -> PathBuf {
    annotations
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join("labels")
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();
}

fn print_report(report: &BatchReport, json: bool) -> Result<(), String> {
    if json {
        let text = serde_json::to_string_pretty(report)
            .map_err(|e| format!("Error serializing report: {e}"))?;
        println!("{text}");
        return Ok(());
    }

    for outcome in &report.outcomes {
        match &outcome.status {
            ImageStatus::Converted { output, .. } => {
                println!("{} -> {}", outcome.image, output.display());
            }
            ImageStatus::Failed { kind, message } => {
                println!("{}: FAILED {kind}: {message}", outcome.image);
            }
        }
    }
    println!(
        "{} converted, {} failed",
        report.converted(),
        report.failed()
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match batch_config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::from(EXIT_GLOBAL);
        }
    };

    let report = match convert_document(&cli.annotations, &config, &GeoTiffWriter) {
        Ok(report) => report,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(EXIT_GLOBAL);
        }
    };

    if let Err(msg) = print_report(&report, cli.json) {
        eprintln!("{msg}");
        return ExitCode::from(EXIT_GLOBAL);
    }

    if report.all_converted() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_PARTIAL)
    }
}
