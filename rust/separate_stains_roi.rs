use crate::color_conversion::OdLookup;
use crate::error::{StainError, StainResult};
use crate::image::{ImageSource, RegionOfInterest};
use crate::stain_estimator::{EstimatorInput, SeparationAlgorithm, StainVectorEstimator};
use crate::stain_matrix::StainVectors;
use log::info;
use rayon::prelude::*;

/// Mean optical density over every pixel of `region` at full resolution.
///
/// Overlapping rectangles count their shared pixels twice. Returns `None`
/// when the region covers no pixel of the image.
pub fn mean_optical_density<S: ImageSource + ?Sized>(
    source: &S,
    region: &RegionOfInterest,
    lookup: &OdLookup<f64>,
) -> StainResult<Option<[f64; 3]>> {
    let mut sum = [0.0; 3];
    let mut count = 0usize;
    for rect in region.rects.iter().filter(|r| !r.is_empty()) {
        let pixels = source.read_region(0, *rect)?;
        let (s, n) = pixels
            .data()
            .par_chunks_exact(3)
            .map(|p| (lookup.od_pixel([p[0], p[1], p[2]]), 1usize))
            .reduce(
                || ([0.0; 3], 0),
                |(a, na), (b, nb)| ([a[0] + b[0], a[1] + b[1], a[2] + b[2]], na + nb),
            );
        for c in 0..3 {
            sum[c] += s[c];
        }
        count += n;
    }
    if count == 0 {
        return Ok(None);
    }
    Ok(Some(sum.map(|v| v / count as f64)))
}

/// One stain vector per user-drawn region: the region's mean optical density.
///
/// Region `i` defines stain `i`; the rows are neither normalized nor sorted,
/// so the order the user drew them in is kept.
pub struct RoiEstimator<'a, S: ImageSource + ?Sized> {
    input: EstimatorInput<'a, S>,
    lookup: OdLookup<f64>,
}

impl<'a, S: ImageSource + ?Sized> RoiEstimator<'a, S> {
    pub fn new(input: EstimatorInput<'a, S>) -> Self {
        Self {
            input,
            lookup: OdLookup::default(),
        }
    }
}

impl<S: ImageSource + ?Sized> StainVectorEstimator for RoiEstimator<'_, S> {
    fn algorithm(&self) -> SeparationAlgorithm {
        SeparationAlgorithm::RegionOfInterest
    }

    fn compute_stain_vectors(&self, out: &mut StainVectors) -> StainResult<()> {
        let num_stains = self.input.num_stains;
        SeparationAlgorithm::RegionOfInterest.check_stain_count(num_stains)?;

        let mut stains = [0.0; 9];
        for i in 0..num_stains {
            self.input.check_abort()?;
            let region = self
                .input
                .regions
                .get(i)
                .filter(|r| r.is_usable())
                .ok_or(StainError::MissingRegion(i + 1))?;
            let mean = mean_optical_density(self.input.source, region, &self.lookup)?
                .ok_or(StainError::MissingRegion(i + 1))?;
            stains[i * 3..i * 3 + 3].copy_from_slice(&mean);
        }
        self.input.check_abort()?;

        info!("Region of interest: {} stains {:?}", num_stains, &stains[..num_stains * 3]);
        *out = stains;
        Ok(())
    }
}
