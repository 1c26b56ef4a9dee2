use crate::abort::AbortSignal;
use crate::color_conversion::OdLookup;
use crate::error::{StainError, StainResult};
use crate::image::{ImageSource, Rect, TileCoord};
use log::debug;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Parameters of one random sampling pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRequest {
    /// Number of pixels to draw before background rejection
    pub num_pixels: usize,
    /// Pixels whose summed RGB optical density is not above this are dropped
    pub od_threshold: f64,
    /// Resolution level to sample from
    pub level: u32,
    /// Optional bounding rectangle in `level` coordinates
    pub bounds: Option<Rect>,
}

/// Draws distinct random pixels from an image and returns their optical densities.
///
/// Samples are spread uniformly over the sampled area: each draw picks a
/// pixel position, draws are grouped per tile, and every tile is read once.
/// Within a tile no pixel is taken twice. The RNG is seeded, so the same
/// seed, source and request always give the same sample set.
pub struct RandomPixelSampler<'a, S: ImageSource + ?Sized> {
    source: &'a S,
    rng: StdRng,
    lookup: OdLookup<f64>,
}

impl<'a, S: ImageSource + ?Sized> RandomPixelSampler<'a, S> {
    pub fn new(source: &'a S, seed: u64) -> Self {
        Self {
            source,
            rng: StdRng::seed_from_u64(seed),
            lookup: OdLookup::default(),
        }
    }

    /// N×3 matrix of OD rows for the pixels that passed the threshold.
    ///
    /// The result may hold fewer rows than requested (background rejection,
    /// small images); callers decide whether that is enough.
    pub fn choose_random_pixels(
        &mut self,
        request: &SampleRequest,
        abort: Option<&AbortSignal>,
    ) -> StainResult<Array2<f64>> {
        if request.num_pixels == 0 {
            return Err(StainError::InvalidInput("sample size must be positive".into()));
        }
        if request.level >= self.source.num_levels() {
            return Err(StainError::Source(format!(
                "resolution level {} does not exist",
                request.level
            )));
        }
        let (w, h) = self.source.dimensions(request.level);
        let extent = Rect::new(0, 0, w, h);
        let region = match request.bounds {
            Some(b) => b.intersect(&extent),
            None => (!extent.is_empty()).then_some(extent),
        }
        .ok_or_else(|| StainError::InvalidInput("sampling region is empty".into()))?;

        // Tile pieces covering the region, with cumulative pixel counts
        let (cols, rows) = self.source.tile_grid(request.level);
        let mut pieces = Vec::new();
        let mut cumulative = Vec::new();
        let mut total: u64 = 0;
        for row in 0..rows {
            for col in 0..cols {
                let Some(tile) = self.source.tile_rect(TileCoord::new(request.level, col, row)) else {
                    continue;
                };
                if let Some(piece) = tile.intersect(&region) {
                    total += piece.area();
                    pieces.push(piece);
                    cumulative.push(total);
                }
            }
        }
        if pieces.is_empty() {
            return Err(StainError::InvalidInput("sampling region is empty".into()));
        }

        let mut counts = vec![0usize; pieces.len()];
        for _ in 0..request.num_pixels {
            let p = self.rng.random_range(0..total);
            let t = cumulative.partition_point(|&c| c <= p);
            counts[t] += 1;
        }

        // Pixel choices are drawn sequentially so the RNG stream is reproducible
        let mut plan = Vec::new();
        for (piece, &count) in pieces.iter().zip(counts.iter()) {
            if count == 0 {
                continue;
            }
            let area = piece.area() as usize;
            let chosen = index::sample(&mut self.rng, area, count.min(area)).into_vec();
            plan.push((*piece, chosen));
        }
        if let Some(a) = abort {
            a.check()?;
        }

        let lookup = &self.lookup;
        let source = self.source;
        let level = request.level;
        let threshold = request.od_threshold;
        let per_tile: Vec<StainResult<Vec<[f64; 3]>>> = plan
            .par_iter()
            .map(|(piece, chosen)| -> StainResult<Vec<[f64; 3]>> {
                if let Some(a) = abort {
                    a.check()?;
                }
                let pixels = source.read_region(level, *piece)?;
                Ok(chosen
                    .iter()
                    .filter(|&&i| i < pixels.num_pixels())
                    .map(|&i| lookup.od_pixel(pixels.pixel_at(i)))
                    .filter(|od| od[0] + od[1] + od[2] > threshold)
                    .collect())
            })
            .collect();

        let mut data = Vec::with_capacity(request.num_pixels * 3);
        for tile in per_tile {
            for od in tile? {
                data.extend_from_slice(&od);
            }
        }
        let n = data.len() / 3;
        debug!(
            "sampled {} of {} requested pixels above OD {} from {} tiles",
            n,
            request.num_pixels,
            threshold,
            plan.len()
        );
        Ok(Array2::from_shape_vec((n, 3), data)?)
    }
}
