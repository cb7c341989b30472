use mlswarp_image::Image;

use super::mls::{deform, DeformError, DeformParams, Point, PointPair};

/// Which sequence a pick was appended to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PickRole {
    /// The pick starts a new pair.
    Source,
    /// The pick completes the pending pair.
    Target,
}

/// Interactive control point bookkeeping for a single image.
///
/// Picks alternate between the source and target sequences, so there is at
/// most one source waiting for its target at any time. Loading a new image
/// discards all the picks.
///
/// # Example
///
/// ```
/// use mlswarp_image::Image;
/// use mlswarp_imgproc::warp::{ControlPointSession, PickRole};
///
/// let image = Image::<u8, 3>::from_size_val([16, 16].into(), 0).unwrap();
/// let mut session = ControlPointSession::new(image);
///
/// assert_eq!(session.pick(2, 3), PickRole::Source);
/// assert_eq!(session.pick(5, 6), PickRole::Target);
/// assert_eq!(session.pick(9, 9), PickRole::Source);
///
/// assert_eq!(session.completed_pairs().len(), 1);
/// assert_eq!(session.pending_source().map(|p| (p.x, p.y)), Some((9, 9)));
/// ```
#[derive(Clone, Debug)]
pub struct ControlPointSession<T, const C: usize> {
    image: Image<T, C>,
    sources: Vec<Point>,
    targets: Vec<Point>,
}

impl<T, const C: usize> ControlPointSession<T, C> {
    /// Start a session on `image` with no picks.
    pub fn new(image: Image<T, C>) -> Self {
        Self {
            image,
            sources: Vec::new(),
            targets: Vec::new(),
        }
    }

    /// Replace the current image and discard all the picks.
    ///
    /// # Returns
    ///
    /// The previously loaded image.
    pub fn load(&mut self, image: Image<T, C>) -> Image<T, C> {
        self.clear();
        std::mem::replace(&mut self.image, image)
    }

    /// Record a pick at `(x, y)`.
    ///
    /// The pick is a source when both sequences have the same length and a
    /// target otherwise. Coordinates are clamped to the image bounds.
    pub fn pick(&mut self, x: i64, y: i64) -> PickRole {
        let max_x = self.image.width() as i64 - 1;
        let max_y = self.image.height() as i64 - 1;
        let point = Point::new(x.clamp(0, max_x), y.clamp(0, max_y));
        if point.x != x || point.y != y {
            log::warn!(
                "pick ({x}, {y}) outside of {}, clamped to ({}, {})",
                self.image.size(),
                point.x,
                point.y
            );
        }

        if self.sources.len() == self.targets.len() {
            self.sources.push(point);
            PickRole::Source
        } else {
            self.targets.push(point);
            PickRole::Target
        }
    }

    /// Remove the most recent pick, if any.
    pub fn undo(&mut self) -> Option<(PickRole, Point)> {
        if self.sources.len() > self.targets.len() {
            self.sources.pop().map(|p| (PickRole::Source, p))
        } else {
            self.targets.pop().map(|p| (PickRole::Target, p))
        }
    }

    /// Discard all the picks and keep the image.
    pub fn clear(&mut self) {
        self.sources.clear();
        self.targets.clear();
    }

    /// The pairs usable by the deformation engine, in pick order.
    pub fn completed_pairs(&self) -> Vec<PointPair> {
        self.sources
            .iter()
            .zip(&self.targets)
            .map(|(&source, &target)| PointPair { source, target })
            .collect()
    }

    /// All the source picks, in pick order.
    pub fn sources(&self) -> &[Point] {
        &self.sources
    }

    /// All the target picks, in pick order.
    pub fn targets(&self) -> &[Point] {
        &self.targets
    }

    /// The trailing source still waiting for its target.
    pub fn pending_source(&self) -> Option<Point> {
        if self.sources.len() > self.targets.len() {
            self.sources.last().copied()
        } else {
            None
        }
    }

    /// The current image.
    pub fn image(&self) -> &Image<T, C> {
        &self.image
    }

    /// Deform the current image with a snapshot of the completed pairs.
    ///
    /// A pending source without target is ignored.
    pub fn deform(&self, params: &DeformParams) -> Result<Image<T, C>, DeformError>
    where
        T: Copy + Send + Sync,
    {
        deform(&self.image, &self.completed_pairs(), params)
    }
}
