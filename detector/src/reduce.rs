use image::RgbImage;

/// A decoded image that can be sampled pixel by pixel.
pub trait PixelSurface {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// RGB at `(x, y)`, or `None` outside `[0, width) x [0, height)`.
    fn rgb(&self, x: u32, y: u32) -> Option<[u8; 3]>;
}

impl PixelSurface for RgbImage {
    fn width(&self) -> u32 {
        self.dimensions().0
    }

    fn height(&self) -> u32 {
        self.dimensions().1
    }

    fn rgb(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        self.get_pixel_checked(x, y).map(|p| p.0)
    }
}

/// Pixels outside the surface read as black.
const OUT_OF_RANGE: [u8; 3] = [0, 0, 0];

/// Row-major grid of average luminance, one byte per cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReducedBitmap {
    width: usize,
    height: usize,
    cells: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum BitmapError {
    #[error("reduced grid {width}x{height} is too large")]
    TooLarge { width: usize, height: usize },
    #[error("failed to allocate reduced grid: {0}")]
    Alloc(#[from] std::collections::TryReserveError),
}

impl ReducedBitmap {
    /// Zeroed grid. Allocation failure is reported, not aborted on.
    pub fn new(width: usize, height: usize) -> Result<Self, BitmapError> {
        let len = width
            .checked_mul(height)
            .ok_or(BitmapError::TooLarge { width, height })?;
        let mut cells = Vec::new();
        cells.try_reserve_exact(len)?;
        cells.resize(len, 0);
        Ok(Self {
            width,
            height,
            cells,
        })
    }

    /// Grid sized for a `frame_width x frame_height` capture at `scale`:
    /// `frame / scale + 1` cells in each direction.
    pub fn for_frame(frame_width: u32, frame_height: u32, scale: u32) -> Result<Self, BitmapError> {
        let (width, height) = reduced_dimensions(frame_width, frame_height, scale);
        Self::new(width, height)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.cells[row * self.width + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: u8) {
        self.cells[row * self.width + col] = value;
    }

    /// Overwrite this grid with `other`. Both must have the same shape.
    pub fn copy_from(&mut self, other: &ReducedBitmap) {
        debug_assert_eq!((self.width, self.height), (other.width, other.height));
        self.cells.copy_from_slice(&other.cells);
    }

    pub fn byte_len(&self) -> usize {
        self.cells.len()
    }
}

pub fn reduced_dimensions(frame_width: u32, frame_height: u32, scale: u32) -> (usize, usize) {
    (
        (frame_width / scale) as usize + 1,
        (frame_height / scale) as usize + 1,
    )
}

/// Average the grayscale of each `scale x scale` block into `out`.
///
/// Grayscale is the truncated mean of R, G and B; the block value is the
/// truncated mean of those over `scale²` pixels. Blocks overhanging the
/// surface edge still divide by `scale²`, with the missing pixels read as
/// black. Cells beyond the last block origin are left untouched.
pub fn reduce_into<S: PixelSurface>(surface: &S, scale: u32, out: &mut ReducedBitmap) {
    let block_area = u64::from(scale) * u64::from(scale);

    for (row, y) in (0..surface.height()).step_by(scale as usize).enumerate() {
        for (col, x) in (0..surface.width()).step_by(scale as usize).enumerate() {
            let mut sum: u64 = 0;
            for ys in 0..scale {
                for xs in 0..scale {
                    let [r, g, b] = x
                        .checked_add(xs)
                        .zip(y.checked_add(ys))
                        .and_then(|(px, py)| surface.rgb(px, py))
                        .unwrap_or(OUT_OF_RANGE);
                    sum += (u32::from(r) + u32::from(g) + u32::from(b)) as u64 / 3;
                }
            }
            out.set(row, col, (sum / block_area) as u8);
        }
    }
}

/// Allocate a grid for `surface` and reduce into it.
pub fn reduce<S: PixelSurface>(surface: &S, scale: u32) -> Result<ReducedBitmap, BitmapError> {
    let mut bitmap = ReducedBitmap::for_frame(surface.width(), surface.height(), scale)?;
    reduce_into(surface, scale, &mut bitmap);
    Ok(bitmap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn constant_color_reduces_to_channel_mean() {
        for (color, scale) in [([10, 20, 31], 1), ([200, 100, 50], 5), ([255, 255, 254], 10)] {
            let surface = RgbImage::from_pixel(40, 30, Rgb(color));
            let grid = reduce(&surface, scale).unwrap();
            let expected = ((color[0] as u32 + color[1] as u32 + color[2] as u32) / 3) as u8;
            for row in 0..(30 / scale as usize) {
                for col in 0..(40 / scale as usize) {
                    assert_eq!(grid.get(row, col), expected, "scale {scale} cell {row},{col}");
                }
            }
        }
    }

    #[test]
    fn grid_has_one_spare_row_and_column() {
        let surface = RgbImage::from_pixel(20, 20, Rgb([90, 90, 90]));
        let grid = reduce(&surface, 10).unwrap();
        assert_eq!((grid.width(), grid.height()), (3, 3));
        assert_eq!(grid.get(1, 1), 90);
        // Exact multiples leave the trailing row and column unwritten
        assert_eq!(grid.get(2, 0), 0);
        assert_eq!(grid.get(0, 2), 0);
    }

    #[test]
    fn truncates_per_pixel_then_per_block() {
        // Per-pixel gray: 2, then (1+1+2)/3 = 1 for the other three
        let mut surface = RgbImage::from_pixel(2, 2, Rgb([1, 1, 2]));
        surface.put_pixel(0, 0, Rgb([2, 2, 2]));
        let grid = reduce(&surface, 2).unwrap();
        // (2 + 1 + 1 + 1) / 4 = 1
        assert_eq!(grid.get(0, 0), 1);
    }

    #[test]
    fn overhanging_blocks_read_black() {
        let surface = RgbImage::from_pixel(15, 10, Rgb([100, 100, 100]));
        let grid = reduce(&surface, 10).unwrap();
        assert_eq!((grid.width(), grid.height()), (2, 2));
        assert_eq!(grid.get(0, 0), 100);
        // 5 of 10 columns inside the surface
        assert_eq!(grid.get(0, 1), 50);
    }

    #[test]
    fn block_positions_follow_row_major_indexing() {
        let mut surface = RgbImage::from_pixel(30, 20, Rgb([0, 0, 0]));
        for y in 10..20 {
            for x in 20..30 {
                surface.put_pixel(x, y, Rgb([60, 60, 60]));
            }
        }
        let grid = reduce(&surface, 10).unwrap();
        assert_eq!(grid.get(1, 2), 60);
        assert_eq!(grid.get(0, 2), 0);
        assert_eq!(grid.get(1, 1), 0);
    }

    #[test]
    fn copy_from_replaces_contents() {
        let mut a = ReducedBitmap::new(3, 2).unwrap();
        let mut b = ReducedBitmap::new(3, 2).unwrap();
        b.set(1, 2, 9);
        a.copy_from(&b);
        assert_eq!(a, b);
        assert_eq!(a.byte_len(), 6);
    }

    #[test]
    fn oversized_grid_is_an_error() {
        assert!(matches!(
            ReducedBitmap::new(usize::MAX, 2),
            Err(BitmapError::TooLarge { .. })
        ));
    }
}
