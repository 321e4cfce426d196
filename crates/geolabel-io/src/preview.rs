//! Colored PNG previews of label canvases.
//!
//! Background (0) is transparent. Classes take their legend color; without
//! a legend color the class index is shown as an opaque gray level.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use geolabel_pipeline::{ColorMap, GrayImage};
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, Rgba, RgbaImage};

use crate::geotiff::RasterWriteError;

/// Map class indices to display colors.
#[must_use]
pub fn colorize(canvas: &GrayImage, colormap: Option<&ColorMap>) -> RgbaImage {
    RgbaImage::from_fn(canvas.width(), canvas.height(), |x, y| {
        let index = canvas.get_pixel(x, y).0[0];
        if index == 0 {
            return Rgba([0, 0, 0, 0]);
        }
        colormap
            .and_then(|c| c.get(index))
            .unwrap_or(Rgba([index, index, index, 255]))
    })
}

/// Colorize `canvas` and write it as a PNG.
///
/// # Errors
///
/// Returns [`RasterWriteError::Io`] if the file cannot be created and
/// [`RasterWriteError::PngEncode`] if encoding fails.
pub fn write_preview(
    path: &Path,
    canvas: &GrayImage,
    colormap: Option<&ColorMap>,
) -> Result<(), RasterWriteError> {
    let rgba = colorize(canvas, colormap);
    let file = BufWriter::new(File::create(path)?);
    PngEncoder::new(file).write_image(
        rgba.as_raw(),
        rgba.width(),
        rgba.height(),
        image::ExtendedColorType::Rgba8,
    )?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Luma;

    use super::*;

    #[test]
    fn background_is_transparent_and_classes_use_legend() {
        let mut canvas = GrayImage::new(3, 1);
        canvas.put_pixel(1, 0, Luma([1]));
        canvas.put_pixel(2, 0, Luma([9]));
        let colormap: ColorMap = [(1, Rgba([0, 0, 255, 255]))].into_iter().collect();

        let rgba = colorize(&canvas, Some(&colormap));
        assert_eq!(rgba.get_pixel(0, 0).0[3], 0);
        assert_eq!(*rgba.get_pixel(1, 0), Rgba([0, 0, 255, 255]));
        assert_eq!(*rgba.get_pixel(2, 0), Rgba([9, 9, 9, 255]));
    }

    #[test]
    fn writes_decodable_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.png");
        let mut canvas = GrayImage::new(4, 2);
        canvas.put_pixel(0, 0, Luma([2]));
        write_preview(&path, &canvas, None).unwrap();

        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (4, 2));
        assert_eq!(*decoded.get_pixel(0, 0), Rgba([2, 2, 2, 255]));
        assert_eq!(decoded.get_pixel(3, 1).0[3], 0);
    }
}
