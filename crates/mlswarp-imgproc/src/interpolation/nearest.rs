use mlswarp_image::{Image, ImageSize};

/// Round a sampling coordinate to the nearest pixel and clamp it to the image.
///
/// Rounding is half away from zero (`f64::round`). Infinite coordinates
/// saturate to the border on their side and NaN maps to index 0.
///
/// # Arguments
///
/// * `u` - The x coordinate of the sample.
/// * `v` - The y coordinate of the sample.
/// * `size` - The size of the sampled image.
///
/// # Returns
///
/// The `(x, y)` pixel index, always within `[0, width-1] x [0, height-1]`.
///
/// # Example
///
/// ```
/// use mlswarp_imgproc::interpolation::nearest_index;
///
/// assert_eq!(nearest_index(2.5, -3.0, [4, 4].into()), (3, 0));
/// assert_eq!(nearest_index(100.0, 1.49, [4, 4].into()), (3, 1));
/// ```
pub fn nearest_index(u: f64, v: f64, size: ImageSize) -> (usize, usize) {
    (clamp_axis(u, size.width), clamp_axis(v, size.height))
}

fn clamp_axis(coord: f64, len: usize) -> usize {
    let max = len.saturating_sub(1);
    if coord.is_nan() {
        return 0;
    }
    // the float to int cast saturates, the clamp handles the upper side
    (coord.round().max(0.0) as usize).min(max)
}

/// Kernel for nearest neighbor interpolation
///
/// # Arguments
///
/// * `image` - The input image container.
/// * `u` - The x coordinate of the pixel to interpolate.
/// * `v` - The y coordinate of the pixel to interpolate.
///
/// # Returns
///
/// The channels of the nearest pixel.
pub fn nearest_neighbor_pixel<T, const C: usize>(image: &Image<T, C>, u: f64, v: f64) -> &[T] {
    let (iu, iv) = nearest_index(u, v, image.size());
    let base = (iv * image.cols() + iu) * C;
    &image.as_slice()[base..base + C]
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlswarp_image::ImageError;

    #[test]
    fn nearest_index_clamps() {
        let size = ImageSize {
            width: 5,
            height: 3,
        };
        assert_eq!(nearest_index(-0.4, 0.4, size), (0, 0));
        assert_eq!(nearest_index(-0.6, 0.6, size), (0, 1));
        assert_eq!(nearest_index(4.6, 2.6, size), (4, 2));
        assert_eq!(nearest_index(1e300, -1e300, size), (4, 0));
        assert_eq!(nearest_index(f64::INFINITY, f64::NAN, size), (4, 0));
        assert_eq!(nearest_index(f64::NAN, f64::NEG_INFINITY, size), (0, 0));
    }

    #[test]
    fn nearest_rounds_half_away_from_zero() {
        let size = ImageSize {
            width: 10,
            height: 10,
        };
        assert_eq!(nearest_index(1.5, 2.5, size), (2, 3));
    }

    #[test]
    fn nearest_pixel() -> Result<(), ImageError> {
        let image = Image::<u8, 2>::from_fn([3, 2].into(), |x, y| [x as u8, y as u8])?;
        assert_eq!(nearest_neighbor_pixel(&image, 1.2, 0.7), &[1, 1]);
        assert_eq!(nearest_neighbor_pixel(&image, 9.0, -9.0), &[2, 0]);
        Ok(())
    }
}
