use mlswarp_image::Image;

use crate::warp::Point;

/// Set a pixel's color, skipping coordinates outside the image.
#[inline]
fn set_pixel<const C: usize>(img: &mut Image<u8, C>, x: i64, y: i64, color: [u8; C]) {
    if x >= 0 && x < img.cols() as i64 && y >= 0 && y < img.rows() as i64 {
        let start = (y as usize * img.cols() + x as usize) * C;
        img.as_slice_mut()[start..start + C].copy_from_slice(&color);
    }
}

/// Draws a line on an image inplace using Bresenham's line algorithm.
///
/// # Arguments
///
/// * `img` - The image to draw on.
/// * `p0` - The start point of the line as a tuple of (x, y).
/// * `p1` - The end point of the line as a tuple of (x, y).
/// * `color` - The color of the line as an array of `C` elements.
/// * `thickness` - The thickness of the line. Thickness > 1 draws a square brush.
pub fn draw_line<const C: usize>(
    img: &mut Image<u8, C>,
    p0: (i64, i64),
    p1: (i64, i64),
    color: [u8; C],
    thickness: usize,
) {
    let half_thickness = (thickness.max(1) as i64 - 1) / 2;
    let lo = -half_thickness;
    let hi = (
        img.cols() as i64 - 1 + half_thickness,
        img.rows() as i64 - 1 + half_thickness,
    );

    // walk only the visible part, endpoints far outside the image never overflow
    let inside = |(x, y): (i64, i64)| x >= lo && x <= hi.0 && y >= lo && y <= hi.1;
    let ((mut x0, mut y0), (x1, y1)) = if inside(p0) && inside(p1) {
        (p0, p1)
    } else {
        match clip_segment(p0, p1, (lo as f64, lo as f64), (hi.0 as f64, hi.1 as f64)) {
            Some(clipped) => clipped,
            None => return,
        }
    };

    let dx = (x1 - x0).abs();
    let dy = (y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };

    let mut err = dx - dy;

    loop {
        for i in -half_thickness..=half_thickness {
            for j in -half_thickness..=half_thickness {
                set_pixel(img, x0 + i, y0 + j, color);
            }
        }

        if x0 == x1 && y0 == y1 {
            break;
        }

        let e2 = 2 * err;
        if e2 > -dy {
            err -= dy;
            x0 += sx;
        }
        if e2 < dx {
            err += dx;
            y0 += sy;
        }
    }
}

/// Liang-Barsky clipping of the segment `p0 -> p1` to the box `[min, max]`.
///
/// A clipped endpoint lies exactly on the boundary it was clipped against.
/// Returns `None` when the segment misses the box.
fn clip_segment(
    p0: (i64, i64),
    p1: (i64, i64),
    min: (f64, f64),
    max: (f64, f64),
) -> Option<((i64, i64), (i64, i64))> {
    let (x0, y0) = (p0.0 as f64, p0.1 as f64);
    let (x1, y1) = (p1.0 as f64, p1.1 as f64);
    let (dx, dy) = (x1 - x0, y1 - y0);

    let on_x = |b: f64| (b, y0 + (b - x0) * dy / dx);
    let on_y = |b: f64| (x0 + (b - y0) * dx / dy, b);

    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    let (mut start, mut end) = ((x0, y0), (x1, y1));
    for (p, q, point) in [
        (-dx, x0 - min.0, on_x(min.0)),
        (dx, max.0 - x0, on_x(max.0)),
        (-dy, y0 - min.1, on_y(min.1)),
        (dy, max.1 - y0, on_y(max.1)),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            if r > t0 {
                t0 = r;
                start = point;
            }
        } else {
            if r < t0 {
                return None;
            }
            if r < t1 {
                t1 = r;
                end = point;
            }
        }
    }

    let round = |(x, y): (f64, f64)| (x.round() as i64, y.round() as i64);
    Some((round(start), round(end)))
}

/// Draws a filled circle on an image inplace.
///
/// # Arguments
///
/// * `img` - The image to draw on.
/// * `center` - The center of the circle as (x, y).
/// * `radius` - The radius in pixels. A radius of 0 draws a single pixel.
/// * `color` - The fill color.
pub fn draw_filled_circle<const C: usize>(
    img: &mut Image<u8, C>,
    center: (i64, i64),
    radius: usize,
    color: [u8; C],
) {
    let r = radius as i64;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                set_pixel(img, center.0 + dx, center.1 + dy, color);
            }
        }
    }
}

/// Draws a line with an arrow head at `p1`.
///
/// The two head strokes are at +-45 degrees from the shaft and their length is
/// `tip_length` times the shaft length.
///
/// # Arguments
///
/// * `img` - The image to draw on.
/// * `p0` - The tail of the arrow.
/// * `p1` - The tip of the arrow.
/// * `color` - The color of the arrow.
/// * `thickness` - The thickness of the strokes.
/// * `tip_length` - Head length relative to the shaft length.
pub fn draw_arrowed_line<const C: usize>(
    img: &mut Image<u8, C>,
    p0: (i64, i64),
    p1: (i64, i64),
    color: [u8; C],
    thickness: usize,
    tip_length: f64,
) {
    draw_line(img, p0, p1, color, thickness);

    let (dx, dy) = ((p0.0 - p1.0) as f64, (p0.1 - p1.1) as f64);
    let tip_size = dx.hypot(dy) * tip_length;
    let angle = dy.atan2(dx);

    for side in [1.0, -1.0] {
        let theta = angle + side * std::f64::consts::FRAC_PI_4;
        let head = (
            (p1.0 as f64 + tip_size * theta.cos()).round() as i64,
            (p1.1 as f64 + tip_size * theta.sin()).round() as i64,
        );
        draw_line(img, head, p1, color, thickness);
    }
}

/// Colors and sizes used to render control points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlayStyle<const C: usize> {
    /// Color of the source markers.
    pub source_color: [u8; C],
    /// Color of the target markers.
    pub target_color: [u8; C],
    /// Color of the arrows from source to target.
    pub arrow_color: [u8; C],
    /// Radius of the markers.
    pub marker_radius: usize,
    /// Thickness of the arrows.
    pub thickness: usize,
    /// Arrow head length relative to the arrow length.
    pub tip_length: f64,
}

impl Default for OverlayStyle<3> {
    fn default() -> Self {
        Self {
            source_color: [255, 0, 0],
            target_color: [0, 0, 255],
            arrow_color: [0, 255, 0],
            marker_radius: 1,
            thickness: 1,
            tip_length: 0.1,
        }
    }
}

/// Draws source markers, target markers and one arrow per completed pair.
///
/// Pairs are formed in order, `sources[i]` with `targets[i]`; extra sources
/// are drawn as markers only.
///
/// # Example
///
/// ```
/// use mlswarp_image::Image;
/// use mlswarp_imgproc::draw::{draw_control_points, OverlayStyle};
/// use mlswarp_imgproc::warp::Point;
///
/// let mut img = Image::<u8, 3>::from_size_val([32, 32].into(), 0).unwrap();
/// let sources = [Point::new(4, 4)];
/// let targets = [Point::new(20, 4)];
///
/// draw_control_points(&mut img, &sources, &targets, &OverlayStyle::default());
///
/// assert_eq!(img.pixel(12, 4).unwrap(), &[0, 255, 0]);
/// ```
pub fn draw_control_points<const C: usize>(
    img: &mut Image<u8, C>,
    sources: &[Point],
    targets: &[Point],
    style: &OverlayStyle<C>,
) {
    for (source, target) in sources.iter().zip(targets) {
        draw_arrowed_line(
            img,
            (source.x, source.y),
            (target.x, target.y),
            style.arrow_color,
            style.thickness,
            style.tip_length,
        );
    }
    for p in sources {
        draw_filled_circle(img, (p.x, p.y), style.marker_radius, style.source_color);
    }
    for p in targets {
        draw_filled_circle(img, (p.x, p.y), style.marker_radius, style.target_color);
    }
}

impl<const C: usize> crate::warp::ControlPointSession<u8, C> {
    /// Render the picks of the session on a copy of its image.
    pub fn overlay(&self, style: &OverlayStyle<C>) -> Image<u8, C> {
        let mut canvas = self.image().clone();
        draw_control_points(&mut canvas, self.sources(), self.targets(), style);
        canvas
    }
}
