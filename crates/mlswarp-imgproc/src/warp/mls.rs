use std::sync::atomic::{AtomicUsize, Ordering};

use mlswarp_image::{Image, ImageError, ImageSize};

use crate::interpolation::{nearest_index, nearest_neighbor_pixel};
use crate::parallel::{self, ExecutionStrategy, ParallelError};

/// Relative determinant threshold below which the local basis is treated as singular.
///
/// For the symmetric positive semi-definite moment matrix `M` the ratio
/// `det(M) / (m00 * m11)` is `1 - cos^2` of the spread of the centered target
/// points, so it is independent of the weight scale.
const SINGULAR_TOLERANCE: f64 = 1e-9;

/// An integer pixel coordinate.
///
/// Coordinates may lie outside the image; the engine clamps when it samples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Point {
    /// Column.
    pub x: i64,
    /// Row.
    pub y: i64,
}

impl Point {
    /// Create a new point.
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    fn to_f64(self) -> [f64; 2] {
        [self.x as f64, self.y as f64]
    }
}

impl From<[i64; 2]> for Point {
    fn from(p: [i64; 2]) -> Self {
        Self::new(p[0], p[1])
    }
}

/// A control point correspondence.
///
/// The content found at `source` in the input image is dragged to `target` in the output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PointPair {
    /// Position in the input image.
    pub source: Point,
    /// Position in the output image.
    pub target: Point,
}

impl PointPair {
    /// Create a new pair from `[x, y]` coordinates.
    pub fn new(source: [i64; 2], target: [i64; 2]) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// What to do at a pixel where the weighted target configuration has no 2D spread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SingularPolicy {
    /// Abort the whole deformation with [`DeformError::SingularLocalBasis`].
    Fail,
    /// Drop the linear part and apply the weighted translation `p - Ct + Cs`.
    ///
    /// A single pair becomes an exact translation and two pairs a smooth
    /// blend of both displacements.
    #[default]
    Translate,
}

/// Parameters of the moving least squares deformation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeformParams {
    /// Falloff exponent. Weights decay as `1 / |p - t|^(2 * alpha)`, larger values localize more.
    pub alpha: f64,
    /// Guard added to the weight denominator so a pixel on a target point stays finite.
    pub eps: f64,
    /// Fallback applied at pixels with a singular local basis.
    pub singular_policy: SingularPolicy,
}

impl Default for DeformParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            eps: 1e-8,
            singular_policy: SingularPolicy::Translate,
        }
    }
}

impl DeformParams {
    fn validate(&self) -> Result<(), DeformError> {
        if !self.alpha.is_finite() || self.alpha <= 0.0 {
            return Err(DeformError::InvalidParameter("alpha", self.alpha));
        }
        if !self.eps.is_finite() || self.eps <= 0.0 {
            return Err(DeformError::InvalidParameter("eps", self.eps));
        }
        Ok(())
    }
}

/// Errors returned by the deformation engine.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DeformError {
    /// No control point pairs were given.
    #[error("at least one control point pair is required to deform an image")]
    EmptyPairSet,

    /// The weighted target points are coincident or collinear as seen from a pixel.
    #[error(
        "singular local basis at pixel ({x}, {y}): determinant={determinant:.6e}, \
         place at least three non-collinear target points"
    )]
    SingularLocalBasis {
        /// Column of the failing output pixel.
        x: i64,
        /// Row of the failing output pixel.
        y: i64,
        /// Determinant of the weighted moment matrix, scaled so its largest diagonal entry is 1.
        determinant: f64,
    },

    /// A deformation parameter is out of its valid range.
    #[error("invalid deformation parameter {0}={1}: must be finite and > 0")]
    InvalidParameter(&'static str, f64),

    /// Error creating the output image.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Error scheduling the per-row work.
    #[error(transparent)]
    Parallel(#[from] ParallelError),
}

/// Outcome of the closed-form solve at one pixel.
#[derive(Clone, Copy, Debug, PartialEq)]
enum LocalSolve {
    Affine([f64; 2]),
    Singular { translated: [f64; 2], determinant: f64 },
}

/// A locally weighted affine deformation field defined by control point pairs.
///
/// For every query point `p` the field solves the weighted least squares fit
/// between the target configuration (centered on the weighted target centroid
/// `Ct`) and the source configuration (centered on `Cs`), and returns
/// `(p - Ct) * M^-1 * L + Cs`, the position to sample in the source image.
#[derive(Clone, Debug)]
pub struct MlsAffineField {
    sources: Vec<[f64; 2]>,
    targets: Vec<[f64; 2]>,
    params: DeformParams,
}

impl MlsAffineField {
    /// Build the field from an ordered list of pairs.
    ///
    /// # Errors
    ///
    /// [`DeformError::EmptyPairSet`] if `pairs` is empty and
    /// [`DeformError::InvalidParameter`] if `alpha` or `eps` is not a positive finite number.
    pub fn new(pairs: &[PointPair], params: DeformParams) -> Result<Self, DeformError> {
        params.validate()?;
        if pairs.is_empty() {
            return Err(DeformError::EmptyPairSet);
        }

        let (sources, targets) = pairs
            .iter()
            .map(|pair| (pair.source.to_f64(), pair.target.to_f64()))
            .unzip();

        Ok(Self {
            sources,
            targets,
            params,
        })
    }

    /// Number of control point pairs.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Always false, the constructor rejects empty pair sets.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// The parameters the field was built with.
    pub fn params(&self) -> &DeformParams {
        &self.params
    }

    /// Compute the unrounded source coordinate for the output pixel `p`.
    ///
    /// # Errors
    ///
    /// [`DeformError::SingularLocalBasis`] if the local basis is singular and the
    /// policy is [`SingularPolicy::Fail`].
    pub fn locate(&self, p: Point) -> Result<[f64; 2], DeformError> {
        let mut weights = Vec::with_capacity(self.len());
        self.resolve(p, self.solve(p, &mut weights))
    }

    /// Compute the rounded and clamped source pixel for the output pixel `p`.
    ///
    /// The returned `(x, y)` is always a valid index into an image of `size`.
    pub fn sample_index(&self, p: Point, size: ImageSize) -> Result<(usize, usize), DeformError> {
        let [u, v] = self.locate(p)?;
        Ok(nearest_index(u, v, size))
    }

    fn resolve(&self, p: Point, solve: LocalSolve) -> Result<[f64; 2], DeformError> {
        match (solve, self.params.singular_policy) {
            (LocalSolve::Affine(q), _) => Ok(q),
            (LocalSolve::Singular { translated, .. }, SingularPolicy::Translate) => Ok(translated),
            (LocalSolve::Singular { determinant, .. }, SingularPolicy::Fail) => {
                Err(DeformError::SingularLocalBasis {
                    x: p.x,
                    y: p.y,
                    determinant,
                })
            }
        }
    }

    /// `weights` is scratch space reused across calls to avoid an allocation per pixel.
    fn solve(&self, p: Point, weights: &mut Vec<f64>) -> LocalSolve {
        let [px, py] = p.to_f64();
        let DeformParams { alpha, eps, .. } = self.params;

        // w_i = 1 / (d_i^(2 alpha) + eps), evaluated in log space and divided by the
        // largest weight so a large alpha cannot underflow every weight to zero
        let ln_eps = eps.ln();
        weights.clear();
        weights.extend(self.targets.iter().map(|t| {
            let (dx, dy) = (px - t[0], py - t[1]);
            ln_add_exp(alpha * (dx * dx + dy * dy).ln(), ln_eps)
        }));
        let ln_min = weights.iter().copied().fold(f64::INFINITY, f64::min);
        weights.iter_mut().for_each(|w| *w = (ln_min - *w).exp());

        // weighted centroids of the target and source configurations
        let mut w_sum = 0.0f64;
        let (mut ct, mut cs) = ([0.0f64; 2], [0.0f64; 2]);
        for ((&w, t), s) in weights.iter().zip(&self.targets).zip(&self.sources) {
            w_sum += w;
            ct[0] += w * t[0];
            ct[1] += w * t[1];
            cs[0] += w * s[0];
            cs[1] += w * s[1];
        }
        ct = [ct[0] / w_sum, ct[1] / w_sum];
        cs = [cs[0] / w_sum, cs[1] / w_sum];

        // M = sum w a a^T, L = sum w a b^T with a, b the centered target and source points
        let (mut m00, mut m01, mut m11) = (0.0f64, 0.0f64, 0.0f64);
        let (mut l00, mut l01, mut l10, mut l11) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
        for ((&w, t), s) in weights.iter().zip(&self.targets).zip(&self.sources) {
            let (ax, ay) = (t[0] - ct[0], t[1] - ct[1]);
            let (bx, by) = (s[0] - cs[0], s[1] - cs[1]);
            m00 += w * ax * ax;
            m01 += w * ax * ay;
            m11 += w * ay * ay;
            l00 += w * ax * bx;
            l01 += w * ax * by;
            l10 += w * ay * bx;
            l11 += w * ay * by;
        }

        // M^-1 L is invariant to a common scale, normalize so m00 * m11 cannot underflow
        let scale = m00.max(m11);
        if scale > 0.0 {
            for m in [&mut m00, &mut m01, &mut m11, &mut l00, &mut l01, &mut l10, &mut l11] {
                *m /= scale;
            }
        }

        let (vx, vy) = (px - ct[0], py - ct[1]);
        let determinant = m00 * m11 - m01 * m01;

        if !determinant.is_finite() || determinant <= SINGULAR_TOLERANCE * m00 * m11 {
            return LocalSolve::Singular {
                translated: [vx + cs[0], vy + cs[1]],
                determinant,
            };
        }

        // u = v * M^-1
        let ux = (vx * m11 - vy * m01) / determinant;
        let uy = (vy * m00 - vx * m01) / determinant;

        LocalSolve::Affine([ux * l00 + uy * l10 + cs[0], ux * l01 + uy * l11 + cs[1]])
    }
}

/// `ln(e^a + e^b)` without overflow, accepts `a = -inf`.
fn ln_add_exp(a: f64, b: f64) -> f64 {
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// Deform an image so that the content at each source point moves to its target point.
///
/// Backward mapping: every output pixel solves a locally weighted affine fit and
/// copies the nearest input pixel at the resulting position, clamped to the image.
/// The output has the same size as the input, which is never modified.
///
/// # Arguments
///
/// * `src` - The input image with shape (height, width, channels).
/// * `pairs` - The ordered control point pairs.
/// * `params` - The falloff, singularity guard and singular fallback.
///
/// # Errors
///
/// * [`DeformError::EmptyPairSet`] when `pairs` is empty.
/// * [`DeformError::SingularLocalBasis`] when a pixel has a singular local basis
///   and the policy is [`SingularPolicy::Fail`]. No partial output is returned.
///
/// # Example
///
/// ```
/// use mlswarp_image::Image;
/// use mlswarp_imgproc::warp::{deform, DeformParams, PointPair};
///
/// let src = Image::<u8, 1>::from_fn([10, 10].into(), |x, y| [(y * 10 + x) as u8]).unwrap();
/// let pairs = [PointPair::new([2, 2], [7, 7])];
///
/// let dst = deform(&src, &pairs, &DeformParams::default()).unwrap();
///
/// assert_eq!(dst.size(), src.size());
/// assert_eq!(dst.pixel(7, 7).unwrap(), src.pixel(2, 2).unwrap());
/// ```
pub fn deform<T, const C: usize>(
    src: &Image<T, C>,
    pairs: &[PointPair],
    params: &DeformParams,
) -> Result<Image<T, C>, DeformError>
where
    T: Copy + Send + Sync,
{
    deform_with_strategy(src, pairs, params, ExecutionStrategy::default())
}

/// Same as [`deform`] with an explicit execution strategy.
pub fn deform_with_strategy<T, const C: usize>(
    src: &Image<T, C>,
    pairs: &[PointPair],
    params: &DeformParams,
    strategy: ExecutionStrategy,
) -> Result<Image<T, C>, DeformError>
where
    T: Copy + Send + Sync,
{
    let field = MlsAffineField::new(pairs, *params)?;
    let size = src.size();

    let start = std::time::Instant::now();
    let num_singular = AtomicUsize::new(0);

    // every element is overwritten below, starting from a copy avoids a Default bound
    let mut dst_data = src.as_slice().to_vec();

    parallel::par_try_for_each_row(
        &mut dst_data,
        C * size.width,
        strategy,
        |row, dst_row| {
            let mut weights = Vec::with_capacity(field.len());
            let mut row_singular = 0;
            for (col, dst_pixel) in dst_row.chunks_exact_mut(C).enumerate() {
                let p = Point::new(col as i64, row as i64);
                let solve = field.solve(p, &mut weights);
                if matches!(solve, LocalSolve::Singular { .. }) {
                    row_singular += 1;
                }
                let [u, v] = field.resolve(p, solve)?;
                dst_pixel.copy_from_slice(nearest_neighbor_pixel(src, u, v));
            }
            num_singular.fetch_add(row_singular, Ordering::Relaxed);
            Ok::<(), DeformError>(())
        },
    )?;

    log::debug!(
        "deformed {} with {} pairs in {:?} ({} pixels used the {:?} fallback)",
        size,
        field.len(),
        start.elapsed(),
        num_singular.load(Ordering::Relaxed),
        params.singular_policy,
    );

    Ok(Image::new(size, dst_data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn index_image(size: ImageSize) -> Result<Image<u32, 1>, ImageError> {
        Image::from_fn(size, |x, y| [(y * size.width + x) as u32])
    }

    fn triangle_pairs() -> Vec<PointPair> {
        vec![
            PointPair::new([4, 4], [5, 3]),
            PointPair::new([15, 5], [16, 6]),
            PointPair::new([9, 15], [8, 14]),
        ]
    }

    #[test]
    fn empty_pair_set() -> Result<(), ImageError> {
        let src = Image::<u8, 3>::from_size_val([4, 4].into(), 7)?;
        let res = deform(&src, &[], &DeformParams::default());
        assert_eq!(res, Err(DeformError::EmptyPairSet));
        Ok(())
    }

    #[test]
    fn invalid_parameters() {
        let pairs = triangle_pairs();
        for (alpha, eps, name) in [
            (0.0, 1e-8, "alpha"),
            (f64::NAN, 1e-8, "alpha"),
            (1.0, 0.0, "eps"),
            (1.0, f64::INFINITY, "eps"),
        ] {
            let params = DeformParams {
                alpha,
                eps,
                ..Default::default()
            };
            let err = MlsAffineField::new(&pairs, params).unwrap_err();
            assert!(matches!(err, DeformError::InvalidParameter(n, _) if n == name));
        }
    }

    #[test]
    fn locate_affine_is_exact_for_affine_pairs() -> Result<(), DeformError> {
        // targets are sources shifted by (3, -2) and scaled by 2 around the origin
        let sources = [[1, 1], [6, 2], [3, 7], [8, 8]];
        let pairs: Vec<_> = sources
            .iter()
            .map(|&[x, y]| PointPair::new([x, y], [2 * x + 3, 2 * y - 2]))
            .collect();
        let field = MlsAffineField::new(&pairs, DeformParams::default())?;

        for (x, y) in [(0, 0), (5, 9), (12, 3), (-4, 20)] {
            let [u, v] = field.locate(Point::new(x, y))?;
            assert_relative_eq!(u, (x as f64 - 3.0) / 2.0, epsilon = 1e-6);
            assert_relative_eq!(v, (y as f64 + 2.0) / 2.0, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn locate_anchors_targets() -> Result<(), DeformError> {
        let pairs = triangle_pairs();
        let field = MlsAffineField::new(&pairs, DeformParams::default())?;
        for pair in &pairs {
            let [u, v] = field.locate(pair.target)?;
            assert_relative_eq!(u, pair.source.x as f64, epsilon = 1e-4);
            assert_relative_eq!(v, pair.source.y as f64, epsilon = 1e-4);
        }
        Ok(())
    }

    #[test]
    fn single_pair_translates() -> Result<(), DeformError> {
        let pairs = [PointPair::new([2, 2], [7, 7])];
        let field = MlsAffineField::new(&pairs, DeformParams::default())?;
        let [u, v] = field.locate(Point::new(0, 0))?;
        assert_relative_eq!(u, -5.0, epsilon = 1e-9);
        assert_relative_eq!(v, -5.0, epsilon = 1e-9);
        assert_eq!(field.sample_index(Point::new(0, 0), [10, 10].into())?, (0, 0));
        assert_eq!(field.sample_index(Point::new(9, 8), [10, 10].into())?, (4, 3));
        Ok(())
    }

    #[test]
    fn single_pair_fails_with_fail_policy() -> Result<(), ImageError> {
        let src = Image::<u8, 1>::from_size_val([10, 10].into(), 128)?;
        let params = DeformParams {
            singular_policy: SingularPolicy::Fail,
            ..Default::default()
        };
        let res = deform(&src, &[PointPair::new([2, 2], [7, 7])], &params);
        assert!(matches!(
            res,
            Err(DeformError::SingularLocalBasis { .. })
        ));
        Ok(())
    }

    #[test]
    fn collinear_targets_fail_with_fail_policy() -> Result<(), DeformError> {
        let pairs = [
            PointPair::new([1, 1], [1, 2]),
            PointPair::new([4, 4], [4, 5]),
            PointPair::new([8, 8], [8, 9]),
        ];
        let params = DeformParams {
            singular_policy: SingularPolicy::Fail,
            ..Default::default()
        };
        let field = MlsAffineField::new(&pairs, params)?;
        let err = field.locate(Point::new(6, 1)).unwrap_err();
        assert!(matches!(
            err,
            DeformError::SingularLocalBasis { x: 6, y: 1, .. }
        ));
        Ok(())
    }

    #[test]
    fn deform_identity_pairs() -> Result<(), DeformError> {
        let src = index_image([20, 16].into())?;
        let pairs: Vec<_> = [[0, 0], [19, 2], [10, 15], [5, 9]]
            .iter()
            .map(|&p| PointPair::new(p, p))
            .collect();
        let dst = deform(&src, &pairs, &DeformParams::default())?;
        assert_eq!(dst, src);
        Ok(())
    }

    #[test]
    fn ln_add_exp_matches_direct_sum() {
        assert_relative_eq!(ln_add_exp(1.0, 2.0), (1f64.exp() + 2f64.exp()).ln(), epsilon = 1e-12);
        assert_relative_eq!(ln_add_exp(f64::NEG_INFINITY, -3.0), -3.0);
        assert_relative_eq!(ln_add_exp(2000.0, 0.0), 2000.0);
    }

    #[test]
    fn large_alpha_keeps_identity() -> Result<(), DeformError> {
        // d^(2 alpha) exceeds f64::MAX far from the points
        let src = index_image([400, 400].into())?;
        let pairs: Vec<_> = [[5, 5], [20, 5], [5, 20]]
            .iter()
            .map(|&p| PointPair::new(p, p))
            .collect();
        let params = DeformParams {
            alpha: 80.0,
            ..Default::default()
        };

        let field = MlsAffineField::new(&pairs, params)?;
        let [u, v] = field.locate(Point::new(399, 399))?;
        assert_relative_eq!(u, 399.0, epsilon = 1e-6);
        assert_relative_eq!(v, 399.0, epsilon = 1e-6);

        assert_eq!(deform(&src, &pairs, &params)?, src);

        // the basis is well posed everywhere, so failing on singularity changes nothing
        let params = DeformParams {
            singular_policy: SingularPolicy::Fail,
            ..params
        };
        assert_eq!(deform(&src, &pairs, &params)?, src);
        Ok(())
    }

    #[test]
    fn deform_strategies_agree() -> Result<(), DeformError> {
        let src = index_image([24, 20].into())?;
        let pairs = triangle_pairs();
        let params = DeformParams::default();
        let serial = deform_with_strategy(&src, &pairs, &params, ExecutionStrategy::Serial)?;
        let rows = deform_with_strategy(&src, &pairs, &params, ExecutionStrategy::ParallelRows)?;
        let fixed = deform_with_strategy(&src, &pairs, &params, ExecutionStrategy::Fixed(3))?;
        assert_eq!(serial, rows);
        assert_eq!(serial, fixed);
        Ok(())
    }

    #[test]
    fn deform_invalid_thread_count() -> Result<(), ImageError> {
        let src = index_image([4, 4].into())?;
        let res = deform_with_strategy(
            &src,
            &triangle_pairs(),
            &DeformParams::default(),
            ExecutionStrategy::Fixed(0),
        );
        assert_eq!(
            res,
            Err(DeformError::Parallel(ParallelError::InvalidThreadCount(0)))
        );
        Ok(())
    }

    #[test]
    fn deform_float_image() -> Result<(), DeformError> {
        let src = Image::<f32, 3>::from_fn([8, 6].into(), |x, y| [x as f32, y as f32, 0.5])?;
        let dst = deform(&src, &[PointPair::new([1, 1], [2, 1])], &DeformParams::default())?;
        assert_eq!(dst.pixel(2, 1)?, &[1.0, 1.0, 0.5]);
        assert_eq!(dst.pixel(0, 3)?, &[0.0, 3.0, 0.5]);
        Ok(())
    }
}
