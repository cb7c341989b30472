#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Error types for I/O operations.
///
/// Defines [`IoError`] variants for file access, encoding/decoding failures
/// and malformed click lists.
pub mod error;

/// High-level image and click list reading and writing functions.
///
/// See [`functional::read_image_any_rgb8`] for automatic format detection.
pub mod functional;

pub use crate::error::IoError;
