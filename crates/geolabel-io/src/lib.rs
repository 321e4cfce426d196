//! geolabel-io: Filesystem side of the geolabel pipeline.
//!
//! Reads metadata sidecars, writes GeoTIFF label rasters and PNG
//! previews, and runs whole-document batch conversions on a worker pool.

pub mod batch;
pub mod geotiff;
pub mod preview;
pub mod sidecar;

pub use batch::{
    BatchConfig, BatchError, BatchReport, ImageError, ImageOutcome, ImageStatus, StdClock,
    convert_document, convert_str,
};
pub use geotiff::{GeoTiffWriter, LabelRaster, RasterWriteError, RasterWriter};
pub use sidecar::load_metadata;
