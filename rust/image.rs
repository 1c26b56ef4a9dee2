use crate::error::{StainError, StainResult};
use serde::{Deserialize, Serialize};

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Overlap of two rectangles, `None` if they do not intersect.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.x.saturating_add(self.width).min(other.x.saturating_add(other.width));
        let y1 = self.y.saturating_add(self.height).min(other.y.saturating_add(other.height));
        (x1 > x0 && y1 > y0).then(|| Rect::new(x0, y0, x1 - x0, y1 - y0))
    }
}

/// Address of one tile: resolution level (0 = full resolution), column, row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub level: u32,
    pub col: u32,
    pub row: u32,
}

impl TileCoord {
    pub fn new(level: u32, col: u32, row: u32) -> Self {
        Self { level, col, row }
    }
}

/// Interleaved 8-bit RGB pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RgbImage {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> StainResult<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(StainError::InvalidInput(format!(
                "RGB buffer of {} bytes does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let n = width as usize * height as usize;
        let mut data = Vec::with_capacity(n * 3);
        for _ in 0..n {
            data.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn num_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Pixel at linear index `i` (row-major).
    #[inline]
    pub fn pixel_at(&self, i: usize) -> [u8; 3] {
        [self.data[i * 3], self.data[i * 3 + 1], self.data[i * 3 + 2]]
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.pixel_at(y as usize * self.width as usize + x as usize)
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        self.data[i..i + 3].copy_from_slice(&rgb);
    }

    /// Copy of a sub-rectangle, clipped to the image.
    pub fn crop(&self, rect: &Rect) -> RgbImage {
        let Some(r) = rect.intersect(&Rect::new(0, 0, self.width, self.height)) else {
            return RgbImage::filled(0, 0, [0, 0, 0]);
        };
        let mut data = Vec::with_capacity(r.area() as usize * 3);
        for y in r.y..r.y + r.height {
            let start = (y as usize * self.width as usize + r.x as usize) * 3;
            data.extend_from_slice(&self.data[start..start + r.width as usize * 3]);
        }
        RgbImage {
            width: r.width,
            height: r.height,
            data,
        }
    }
}

/// Pixel provider for a (possibly multi-resolution) RGB image.
///
/// Implementations must be shareable across the worker threads that
/// compute tiles; all access is read-only.
pub trait ImageSource: Send + Sync {
    /// Number of resolution levels; level 0 is full resolution.
    fn num_levels(&self) -> u32 {
        1
    }

    /// Image size at `level`.
    fn dimensions(&self, level: u32) -> (u32, u32);

    /// Nominal tile size; edge tiles may be smaller.
    fn tile_size(&self) -> (u32, u32);

    /// Pixels of `rect` (in `level` coordinates), clipped to the image.
    fn read_region(&self, level: u32, rect: Rect) -> StainResult<RgbImage>;

    /// Columns and rows of tiles at `level`.
    fn tile_grid(&self, level: u32) -> (u32, u32) {
        let (w, h) = self.dimensions(level);
        let (tw, th) = self.tile_size();
        if tw == 0 || th == 0 {
            return (0, 0);
        }
        (w.div_ceil(tw), h.div_ceil(th))
    }

    /// Pixel rectangle covered by a tile.
    fn tile_rect(&self, coord: TileCoord) -> Option<Rect> {
        let (cols, rows) = self.tile_grid(coord.level);
        if coord.level >= self.num_levels() || coord.col >= cols || coord.row >= rows {
            return None;
        }
        let (w, h) = self.dimensions(coord.level);
        let (tw, th) = self.tile_size();
        let x = coord.col * tw;
        let y = coord.row * th;
        Some(Rect::new(x, y, tw.min(w - x), th.min(h - y)))
    }

    fn read_tile(&self, coord: TileCoord) -> StainResult<RgbImage> {
        let rect = self
            .tile_rect(coord)
            .ok_or_else(|| StainError::Source(format!("tile {coord:?} is out of range")))?;
        self.read_region(coord.level, rect)
    }
}

/// One stain's region of interest, as drawn by the user.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegionOfInterest {
    /// Rectangles (full-resolution coordinates) whose pixels belong to the stain
    pub rects: Vec<Rect>,
    /// False when the region is a placeholder the user never edited
    pub user_defined: bool,
}

impl RegionOfInterest {
    pub fn new(rects: Vec<Rect>) -> Self {
        Self {
            rects,
            user_defined: true,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.user_defined && self.rects.iter().any(|r| !r.is_empty())
    }
}

/// An in-memory image with power-of-two resolution levels.
#[derive(Debug, Clone)]
pub struct InMemoryImage {
    levels: Vec<RgbImage>,
    tile_size: (u32, u32),
}

impl InMemoryImage {
    pub fn new(image: RgbImage, tile_size: (u32, u32)) -> Self {
        Self::with_levels(image, tile_size, 1)
    }

    /// Build `num_levels` levels by 2× nearest-neighbour decimation.
    pub fn with_levels(image: RgbImage, tile_size: (u32, u32), num_levels: u32) -> Self {
        let mut levels = vec![image];
        for _ in 1..num_levels.max(1) {
            let prev = &levels[levels.len() - 1];
            let (w, h) = ((prev.width() / 2).max(1), (prev.height() / 2).max(1));
            let mut next = RgbImage::filled(w, h, [0, 0, 0]);
            for y in 0..h {
                for x in 0..w {
                    let sx = (x * 2).min(prev.width() - 1);
                    let sy = (y * 2).min(prev.height() - 1);
                    next.put_pixel(x, y, prev.pixel(sx, sy));
                }
            }
            levels.push(next);
        }
        Self { levels, tile_size }
    }
}

impl ImageSource for InMemoryImage {
    fn num_levels(&self) -> u32 {
        self.levels.len() as u32
    }

    fn dimensions(&self, level: u32) -> (u32, u32) {
        self.levels
            .get(level as usize)
            .map(|im| (im.width(), im.height()))
            .unwrap_or((0, 0))
    }

    fn tile_size(&self) -> (u32, u32) {
        self.tile_size
    }

    fn read_region(&self, level: u32, rect: Rect) -> StainResult<RgbImage> {
        let im = self
            .levels
            .get(level as usize)
            .ok_or_else(|| StainError::Source(format!("level {level} does not exist")))?;
        Ok(im.crop(&rect))
    }
}
