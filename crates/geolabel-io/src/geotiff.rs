//! Label raster output: single-band 8-bit GeoTIFF.
//!
//! The canvas is written LZW-compressed with nodata 0. Georeferencing uses
//! ModelPixelScale + ModelTiepoint for north-up transforms and
//! ModelTransformation otherwise. EPSG codes go into the GeoKey directory
//! directly; PROJ and WKT definitions are carried as a user-defined model
//! with a citation.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use geolabel_pipeline::{ColorMap, Crs, GeoMetadata, GeoTransform, GrayImage};
use tiff::encoder::colortype::Gray8;
use tiff::encoder::compression::Lzw;
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind};
use tiff::tags::{PhotometricInterpretation, Tag};

/// TIFF tag codes not covered by baseline TIFF.
pub mod tags {
    pub const COLOR_MAP: u16 = 320;
    pub const MODEL_PIXEL_SCALE: u16 = 33550;
    pub const MODEL_TIEPOINT: u16 = 33922;
    pub const MODEL_TRANSFORMATION: u16 = 34264;
    pub const GEO_KEY_DIRECTORY: u16 = 34735;
    pub const GEO_ASCII_PARAMS: u16 = 34737;
    pub const GDAL_NODATA: u16 = 42113;
}

/// GeoKey identifiers and values.
pub mod geokeys {
    pub const MODEL_TYPE: u16 = 1024;
    pub const RASTER_TYPE: u16 = 1025;
    pub const CITATION: u16 = 1026;
    pub const GEOGRAPHIC_TYPE: u16 = 2048;
    pub const PROJECTED_CS_TYPE: u16 = 3072;

    pub const MODEL_PROJECTED: u16 = 1;
    pub const MODEL_GEOGRAPHIC: u16 = 2;
    pub const USER_DEFINED: u16 = 32767;
    pub const RASTER_PIXEL_IS_AREA: u16 = 1;
}

/// Errors that can occur while persisting a raster.
#[derive(Debug, thiserror::Error)]
pub enum RasterWriteError {
    /// Creating or writing the file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF encoding failed.
    #[error("TIFF encoding failed: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// PNG preview encoding failed.
    #[error("PNG encoding failed: {0}")]
    PngEncode(#[from] image::ImageError),
}

/// A composited canvas ready to be persisted.
#[derive(Debug, Clone, Copy)]
pub struct LabelRaster<'a> {
    /// Class-index canvas.
    pub canvas: &'a GrayImage,
    /// CRS and transform.
    pub metadata: &'a GeoMetadata,
    /// Palette to embed, if any.
    pub colormap: Option<&'a ColorMap>,
}

/// Something that can persist a [`LabelRaster`].
///
/// The batch runner only talks to this trait, so conversions can be
/// exercised against an in-memory implementation.
pub trait RasterWriter {
    /// Persist `raster` at `path`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns [`RasterWriteError`] if encoding or I/O fails.
    fn write(&self, path: &Path, raster: &LabelRaster<'_>) -> Result<(), RasterWriteError>;
}

/// Writes GeoTIFF files.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoTiffWriter;

impl RasterWriter for GeoTiffWriter {
    fn write(&self, path: &Path, raster: &LabelRaster<'_>) -> Result<(), RasterWriteError> {
        let file = BufWriter::new(File::create(path)?);
        encode(file, raster)
    }
}

/// Encode `raster` as a GeoTIFF into any seekable writer.
///
/// # Errors
///
/// Returns [`RasterWriteError::Tiff`] if the encoder rejects the image or
/// one of its tags (for instance non-ASCII CRS text).
pub fn encode<W: Write + Seek>(writer: W, raster: &LabelRaster<'_>) -> Result<(), RasterWriteError> {
    let canvas = raster.canvas;
    let mut encoder = TiffEncoder::new(writer)?;
    let mut image = encoder.new_image_with_compression::<Gray8, _>(
        canvas.width(),
        canvas.height(),
        Lzw::default(),
    )?;

    let dir = image.encoder();
    write_georeferencing(dir, raster.metadata)?;
    dir.write_tag(Tag::from_u16_exhaustive(tags::GDAL_NODATA), "0")?;

    if let Some(colormap) = raster.colormap {
        dir.write_tag(
            Tag::PhotometricInterpretation,
            PhotometricInterpretation::RGBPalette.to_u16(),
        )?;
        dir.write_tag(
            Tag::from_u16_exhaustive(tags::COLOR_MAP),
            &palette_entries(colormap)[..],
        )?;
    }

    image.write_data(canvas.as_raw())?;
    Ok(())
}

fn write_georeferencing<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<'_, W, K>,
    metadata: &GeoMetadata,
) -> Result<(), RasterWriteError> {
    let t = metadata.transform;
    if t.is_north_up() {
        dir.write_tag(
            Tag::from_u16_exhaustive(tags::MODEL_PIXEL_SCALE),
            &pixel_scale(t)[..],
        )?;
        dir.write_tag(
            Tag::from_u16_exhaustive(tags::MODEL_TIEPOINT),
            &tiepoint(t)[..],
        )?;
    } else {
        dir.write_tag(
            Tag::from_u16_exhaustive(tags::MODEL_TRANSFORMATION),
            &model_transformation(t)[..],
        )?;
    }

    let (keys, citation) = geo_keys(&metadata.crs);
    dir.write_tag(Tag::from_u16_exhaustive(tags::GEO_KEY_DIRECTORY), &keys[..])?;
    if let Some(citation) = citation {
        dir.write_tag(
            Tag::from_u16_exhaustive(tags::GEO_ASCII_PARAMS),
            citation.as_str(),
        )?;
    }
    Ok(())
}

/// `[a, -e, 0]`.
#[must_use]
pub fn pixel_scale(t: GeoTransform) -> [f64; 3] {
    [t.a, -t.e, 0.0]
}

/// Pixel (0, 0) tied to world (c, f).
#[must_use]
pub const fn tiepoint(t: GeoTransform) -> [f64; 6] {
    [0.0, 0.0, 0.0, t.c, t.f, 0.0]
}

/// Row-major 4x4 matrix embedding the affine transform.
#[must_use]
pub const fn model_transformation(t: GeoTransform) -> [f64; 16] {
    [
        t.a, t.b, 0.0, t.c, //
        t.d, t.e, 0.0, t.f, //
        0.0, 0.0, 0.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]
}

/// GeoKey directory entries plus the GeoAsciiParams text they reference.
///
/// EPSG codes in 4000..5000 are geographic, others projected. Codes
/// beyond `u16` and PROJ/WKT text are cited instead.
#[must_use]
pub fn geo_keys(crs: &Crs) -> (Vec<u16>, Option<String>) {
    use geokeys::{
        CITATION, GEOGRAPHIC_TYPE, MODEL_GEOGRAPHIC, MODEL_PROJECTED, MODEL_TYPE,
        PROJECTED_CS_TYPE, RASTER_PIXEL_IS_AREA, RASTER_TYPE, USER_DEFINED,
    };

    let mut entries: Vec<[u16; 4]> = vec![[RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA]];
    let mut citation = None;

    match crs {
        Crs::Epsg(code) if (4000..5000).contains(code) => {
            entries.push([MODEL_TYPE, 0, 1, MODEL_GEOGRAPHIC]);
            entries.push([GEOGRAPHIC_TYPE, 0, 1, epsg_u16(*code)]);
        }
        Crs::Epsg(code) if u16::try_from(*code).is_ok() => {
            entries.push([MODEL_TYPE, 0, 1, MODEL_PROJECTED]);
            entries.push([PROJECTED_CS_TYPE, 0, 1, epsg_u16(*code)]);
        }
        other => {
            let text = format!("{other}|");
            let len = u16::try_from(text.len()).unwrap_or(u16::MAX);
            entries.push([MODEL_TYPE, 0, 1, USER_DEFINED]);
            entries.push([CITATION, tags::GEO_ASCII_PARAMS, len, 0]);
            citation = Some(text);
        }
    }

    entries.sort_by_key(|e| e[0]);
    let count = u16::try_from(entries.len()).unwrap_or(u16::MAX);
    let mut keys = vec![1, 1, 0, count];
    keys.extend(entries.into_iter().flatten());
    (keys, citation)
}

fn epsg_u16(code: u32) -> u16 {
    u16::try_from(code).unwrap_or(geokeys::USER_DEFINED)
}

/// TIFF ColorMap: 256 reds, then greens, then blues, 16 bits each.
#[must_use]
pub fn palette_entries(colormap: &ColorMap) -> Vec<u16> {
    let mut entries = vec![0u16; 3 * 256];
    for (index, color) in colormap.iter() {
        let i = usize::from(index);
        for channel in 0..3 {
            entries[channel * 256 + i] = u16::from(color.0[channel]) * 257;
        }
    }
    entries
}
