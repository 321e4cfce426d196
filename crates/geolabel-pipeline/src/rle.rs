//! Run-length mask decoding.
//!
//! Masks are stored as a comma-separated list of run lengths over the
//! row-major flattening of a sub-rectangle of the image, alternating
//! between "off" and "on" runs and starting with "off". Decoding places
//! the sub-rectangle at its offset inside a full-size canvas bitmap.
//!
//! Every write is bounds-checked: a sub-rectangle that does not fit the
//! canvas, or an "on" run that extends past the end of the
//! sub-rectangle, is rejected with [`PipelineError::OutOfBounds`].

use crate::types::{Dimensions, PipelineError};

/// Dense row-major boolean bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    dimensions: Dimensions,
    bits: Vec<bool>,
}

impl Bitmap {
    /// Create an all-false bitmap.
    #[must_use]
    pub fn new(dimensions: Dimensions) -> Self {
        Self {
            dimensions,
            bits: vec![false; dimensions.pixel_count()],
        }
    }

    /// Wrap row-major bits. Returns `None` if `bits.len()` does not match
    /// the dimensions.
    #[must_use]
    pub fn from_bits(dimensions: Dimensions, bits: Vec<bool>) -> Option<Self> {
        (bits.len() == dimensions.pixel_count()).then_some(Self { dimensions, bits })
    }

    /// Size of the bitmap.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Value at `(x, y)`; `false` outside the bitmap.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.dimensions.width || y >= self.dimensions.height {
            return false;
        }
        self.bits[self.offset(x, y)]
    }

    /// Row-major bits.
    #[must_use]
    pub fn as_slice(&self) -> &[bool] {
        &self.bits
    }

    /// Number of set pixels.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    /// Coordinates of every set pixel, row by row.
    pub fn iter_ones(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let width = self.dimensions.width as usize;
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, set)| **set)
            .map(move |(i, _)| {
                #[allow(clippy::cast_possible_truncation)]
                let point = ((i % width) as u32, (i / width) as u32);
                point
            })
    }

    const fn offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.dimensions.width as usize + x as usize
    }
}

/// Placement of an encoded mask inside its image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubRect {
    /// Column of the sub-rectangle's left edge.
    pub left: u32,
    /// Row of the sub-rectangle's top edge.
    pub top: u32,
    /// Width of the sub-rectangle.
    pub width: u32,
    /// Height of the sub-rectangle.
    pub height: u32,
}

impl SubRect {
    /// Sub-rectangle covering a whole canvas.
    #[must_use]
    pub const fn full(dimensions: Dimensions) -> Self {
        Self {
            left: 0,
            top: 0,
            width: dimensions.width,
            height: dimensions.height,
        }
    }

    const fn len(self) -> usize {
        self.width as usize * self.height as usize
    }

    fn fits(self, canvas: Dimensions) -> bool {
        u64::from(self.left) + u64::from(self.width) <= u64::from(canvas.width)
            && u64::from(self.top) + u64::from(self.height) <= u64::from(canvas.height)
    }
}

/// Parse the comma-separated run lengths. Blank input yields no runs.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedAnnotation`] if any item is not a
/// non-negative integer.
pub fn parse_counts(text: &str) -> Result<Vec<usize>, PipelineError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    text.split(',')
        .map(|item| {
            let item = item.trim();
            item.parse::<usize>().map_err(|e| {
                PipelineError::MalformedAnnotation(format!("invalid RLE count `{item}`: {e}"))
            })
        })
        .collect()
}

/// Decode an RLE string into a full-canvas bitmap.
///
/// Runs are consumed in (off, on) pairs; a trailing unpaired count is
/// ignored. The empty string decodes to an all-false bitmap.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedAnnotation`] for unparsable counts and
/// [`PipelineError::OutOfBounds`] if the region does not fit the canvas or
/// a run extends past the end of the region.
pub fn decode(text: &str, region: SubRect, canvas: Dimensions) -> Result<Bitmap, PipelineError> {
    let counts = parse_counts(text)?;
    let mut bitmap = Bitmap::new(canvas);
    if counts.is_empty() {
        return Ok(bitmap);
    }

    if !region.fits(canvas) {
        return Err(PipelineError::OutOfBounds(format!(
            "region {}x{} at ({}, {}) exceeds canvas {}x{}",
            region.width, region.height, region.left, region.top, canvas.width, canvas.height,
        )));
    }

    let region_len = region.len();
    let region_width = region.width as usize;
    let mut cursor = 0usize;
    for pair in counts.chunks_exact(2) {
        let (skip, run) = (pair[0], pair[1]);
        let start = cursor.saturating_add(skip);
        let end = start.saturating_add(run);
        if run > 0 && end > region_len {
            return Err(PipelineError::OutOfBounds(format!(
                "run of {run} at offset {start} exceeds {region_len}-pixel region",
            )));
        }
        for i in start..end {
            let x = region.left as usize + i % region_width;
            let y = region.top as usize + i / region_width;
            bitmap.bits[y * canvas.width as usize + x] = true;
        }
        cursor = end;
    }

    Ok(bitmap)
}

/// Encode a bitmap as alternating off/on run lengths over its full extent.
///
/// The output starts with an "off" run (possibly `0`) and uses the same
/// `", "` separator as annotation documents.
#[must_use]
pub fn encode(bitmap: &Bitmap) -> String {
    let mut counts = Vec::new();
    let mut current = false;
    let mut run = 0usize;
    for &bit in bitmap.as_slice() {
        if bit != current {
            counts.push(run);
            run = 0;
            current = bit;
        }
        run += 1;
    }
    if run > 0 {
        counts.push(run);
    }
    counts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn dims(width: u32, height: u32) -> Dimensions {
        Dimensions::new(width, height)
    }

    fn rows(bitmap: &Bitmap) -> Vec<Vec<u8>> {
        let d = bitmap.dimensions();
        (0..d.height)
            .map(|y| (0..d.width).map(|x| u8::from(bitmap.get(x, y))).collect())
            .collect()
    }

    #[test]
    fn empty_string_is_all_false() {
        let bitmap = decode("", SubRect::full(dims(7, 3)), dims(7, 3)).unwrap();
        assert_eq!(bitmap.count_ones(), 0);
        assert_eq!(bitmap.dimensions(), dims(7, 3));
    }

    #[test]
    fn empty_string_ignores_region() {
        let region = SubRect {
            left: 10,
            top: 10,
            width: 5,
            height: 5,
        };
        let bitmap = decode("", region, dims(2, 2)).unwrap();
        assert_eq!(bitmap.count_ones(), 0);
    }

    #[test]
    fn decodes_pairs_in_first_rows() {
        let region = SubRect {
            left: 0,
            top: 0,
            width: 4,
            height: 2,
        };
        let bitmap = decode("2, 3, 1, 2", region, dims(4, 4)).unwrap();
        assert_eq!(
            rows(&bitmap),
            vec![
                vec![0, 0, 1, 1],
                vec![1, 0, 1, 1],
                vec![0, 0, 0, 0],
                vec![0, 0, 0, 0],
            ]
        );
    }

    #[test]
    fn places_region_at_offset() {
        let region = SubRect {
            left: 1,
            top: 2,
            width: 2,
            height: 2,
        };
        let bitmap = decode("1, 2", region, dims(4, 4)).unwrap();
        // Region-local positions 1 and 2 -> (1, 0) and (0, 1).
        assert!(bitmap.get(2, 2));
        assert!(bitmap.get(1, 3));
        assert_eq!(bitmap.count_ones(), 2);
    }

    #[test]
    fn trailing_unpaired_count_is_ignored() {
        let region = SubRect::full(dims(3, 1));
        let a = decode("0, 1, 2", region, dims(3, 1)).unwrap();
        let b = decode("0, 1", region, dims(3, 1)).unwrap();
        assert_eq!(a, b);
        assert_eq!(rows(&a), vec![vec![1, 0, 0]]);
    }

    #[test]
    fn tolerates_missing_space_after_comma() {
        let region = SubRect::full(dims(3, 1));
        let bitmap = decode("1,2", region, dims(3, 1)).unwrap();
        assert_eq!(rows(&bitmap), vec![vec![0, 1, 1]]);
    }

    #[test]
    fn run_past_region_is_out_of_bounds() {
        let region = SubRect::full(dims(2, 2));
        let result = decode("3, 2", region, dims(2, 2));
        assert!(matches!(result, Err(PipelineError::OutOfBounds(_))));
    }

    #[test]
    fn region_past_canvas_is_out_of_bounds() {
        let region = SubRect {
            left: 3,
            top: 0,
            width: 2,
            height: 1,
        };
        let result = decode("0, 1", region, dims(4, 4));
        assert!(matches!(result, Err(PipelineError::OutOfBounds(_))));
    }

    #[test]
    fn zero_length_run_past_end_is_harmless() {
        let region = SubRect::full(dims(2, 1));
        let bitmap = decode("0, 2, 5, 0", region, dims(2, 1)).unwrap();
        assert_eq!(bitmap.count_ones(), 2);
    }

    #[test]
    fn malformed_counts_are_rejected() {
        let region = SubRect::full(dims(2, 2));
        for text in ["1, x", "1, -2", "1,, 2"] {
            let result = decode(text, region, dims(2, 2));
            assert!(
                matches!(result, Err(PipelineError::MalformedAnnotation(_))),
                "expected MalformedAnnotation for {text:?}, got {result:?}",
            );
        }
    }

    #[test]
    fn encode_starts_with_off_run() {
        let bitmap = Bitmap::from_bits(dims(3, 1), vec![true, true, false]).unwrap();
        assert_eq!(encode(&bitmap), "0, 2, 1");
    }

    fn pattern(mask: u8) -> Vec<bool> {
        (0..6).map(|i| (mask >> i) & 1 == 1).collect()
    }

    #[test]
    fn decode_inverts_encode_for_every_3x2_bitmap() {
        for mask in 0..64u8 {
            let bitmap = Bitmap::from_bits(dims(3, 2), pattern(mask)).unwrap();
            let decoded = decode(&encode(&bitmap), SubRect::full(dims(3, 2)), dims(3, 2)).unwrap();
            assert_eq!(decoded, bitmap, "mask {mask:06b}");
        }
    }

    #[test]
    fn decode_places_encoded_region_at_its_offset() {
        let region = SubRect {
            left: 2,
            top: 1,
            width: 3,
            height: 2,
        };
        for mask in 0..64u8 {
            let bits = pattern(mask);
            let bitmap = Bitmap::from_bits(dims(3, 2), bits.clone()).unwrap();
            let decoded = decode(&encode(&bitmap), region, dims(6, 4)).unwrap();
            for y in 0..4 {
                for x in 0..6 {
                    let expected = (2..5).contains(&x)
                        && (1..3).contains(&y)
                        && bits[((y - 1) * 3 + (x - 2)) as usize];
                    assert_eq!(decoded.get(x, y), expected, "mask {mask:06b} at ({x}, {y})");
                }
            }
        }
    }

    #[test]
    fn iter_ones_reports_coordinates() {
        let bitmap = Bitmap::from_bits(dims(2, 2), vec![false, true, true, false]).unwrap();
        let ones: Vec<_> = bitmap.iter_ones().collect();
        assert_eq!(ones, vec![(1, 0), (0, 1)]);
    }

    #[test]
    fn from_bits_rejects_wrong_length() {
        assert!(Bitmap::from_bits(dims(2, 2), vec![true; 3]).is_none());
    }
}
