//! Pixel sampling used when resampling images during geometric transformations.
//!
//! Only nearest neighbour sampling is provided: coordinates are rounded to the
//! closest integer and clamped to the image bounds, so sampling never reads
//! outside the source buffer.

mod nearest;

pub use nearest::{nearest_index, nearest_neighbor_pixel};
