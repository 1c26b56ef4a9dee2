use crate::float_trait::StainFloat;
use crate::linalg::{principal_components, Eigensystem};
use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Number of basis directions kept for the projection plane.
const BASIS_DIMENSIONS: usize = 2;

/// Projection of 3D optical density points onto their plane of maximal spread.
///
/// The basis is computed once from a sample set and then reused for all
/// projections of that set. Points are rows. Projecting and back-projecting
/// is lossless only for points that lie in the basis plane; for real tissue
/// samples the round trip drops the third (smallest-variance) component.
#[derive(Debug, Clone)]
pub struct BasisTransform<F: StainFloat> {
    /// Basis directions as rows (2×3)
    basis: Array2<F>,
    mean: Array1<F>,
    eigenvalues: Array1<F>,
    eigenvectors: Array2<F>,
}

impl<F: StainFloat> BasisTransform<F> {
    /// Compute the basis from N×3 source points.
    ///
    /// With `optimize_directions` the directions come from the non-centered
    /// second moment and each is sign-flipped so the mean sample projects
    /// into the positive quadrant; otherwise from the centered covariance.
    /// Returns `None` for empty, non-3-column, or under-determined input.
    pub fn new(source_points: &ArrayView2<F>, optimize_directions: bool) -> Option<Self> {
        let eig = principal_components(source_points, !optimize_directions)?;
        let Eigensystem {
            values,
            vectors,
            mean,
        } = eig;

        let mut basis = Array2::zeros((BASIS_DIMENSIONS, 3));
        for (k, mut row) in basis.axis_iter_mut(Axis(0)).enumerate() {
            let v = vectors[k];
            let sign = if optimize_directions && dot3(&v, &mean) < 0.0 {
                -1.0
            } else {
                1.0
            };
            for c in 0..3 {
                row[c] = F::of(sign * v[c]);
            }
        }
        if basis.iter().all(|&v| v == F::zero()) {
            return None;
        }

        let eigenvectors = Array2::from_shape_fn((3, 3), |(i, j)| F::of(vectors[i][j]));
        Some(Self {
            basis,
            mean: Array1::from_iter(mean.iter().map(|&v| F::of(v))),
            eigenvalues: Array1::from_iter(values.iter().map(|&v| F::of(v))),
            eigenvectors,
        })
    }

    /// Project N×3 points into the 2D basis, subtracting the mean first iff `subtract_mean`.
    ///
    /// Input without exactly three columns gives an empty `0×2` result.
    pub fn project_points(&self, points: &ArrayView2<F>, subtract_mean: bool) -> Array2<F> {
        if points.ncols() != 3 {
            return Array2::zeros((0, BASIS_DIMENSIONS));
        }
        if subtract_mean {
            let centered = points - &self.mean.view().insert_axis(Axis(0));
            centered.dot(&self.basis.t())
        } else {
            points.dot(&self.basis.t())
        }
    }

    /// Map N×2 projected points back into 3D, adding the mean back iff `add_mean`.
    pub fn back_project_points(&self, points: &ArrayView2<F>, add_mean: bool) -> Array2<F> {
        if points.ncols() != BASIS_DIMENSIONS {
            return Array2::zeros((0, 3));
        }
        let back = points.dot(&self.basis);
        if add_mean {
            back + &self.mean.view().insert_axis(Axis(0))
        } else {
            back
        }
    }

    /// Basis directions as rows (2×3)
    pub fn basis_vectors(&self) -> &Array2<F> {
        &self.basis
    }

    pub fn point_mean(&self) -> &Array1<F> {
        &self.mean
    }

    /// All scatter-matrix eigenvalues, descending
    pub fn eigenvalues(&self) -> &Array1<F> {
        &self.eigenvalues
    }

    /// All eigenvectors as rows, in eigenvalue order
    pub fn eigenvectors(&self) -> &Array2<F> {
        &self.eigenvectors
    }
}

fn dot3(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}
