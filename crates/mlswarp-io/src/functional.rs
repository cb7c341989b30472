use std::path::Path;

use mlswarp_image::{Image, ImageSize};
use serde::{Deserialize, Serialize};

use crate::error::IoError;

/// Reads an image from the given file path and converts it to RGB8.
///
/// The method tries to read from any image format supported by the image crate.
///
/// # Arguments
///
/// * `file_path` - The path to a valid image file.
///
/// # Returns
///
/// An RGB image with three channels (rgb8).
pub fn read_image_any_rgb8(file_path: impl AsRef<Path>) -> Result<Image<u8, 3>, IoError> {
    let file_path = file_path.as_ref();

    // verify the file exists
    if !file_path.exists() {
        return Err(IoError::FileDoesNotExist(file_path.to_path_buf()));
    }

    let img = image::ImageReader::open(file_path)?
        .with_guessed_format()?
        .decode()?;

    let size = ImageSize {
        width: img.width() as usize,
        height: img.height() as usize,
    };

    Ok(Image::new(size, img.into_rgb8().into_raw())?)
}

/// Writes an RGB8 image to the given file path as PNG.
///
/// # Arguments
///
/// * `file_path` - The path to the PNG file.
/// * `image` - The image to encode.
pub fn write_image_png_rgb8(
    file_path: impl AsRef<Path>,
    image: &Image<u8, 3>,
) -> Result<(), IoError> {
    image::save_buffer_with_format(
        file_path,
        image.as_slice(),
        image.width() as u32,
        image.height() as u32,
        image::ExtendedColorType::Rgb8,
        image::ImageFormat::Png,
    )?;
    Ok(())
}

/// On-disk layout of a click list: `{"clicks": [[x, y], ...]}`.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct ClickLog {
    clicks: Vec<[i64; 2]>,
}

/// Reads an ordered list of `[x, y]` clicks from a JSON file.
///
/// Clicks alternate between source and target points when replayed into a
/// control point session.
pub fn read_clicks_json(file_path: impl AsRef<Path>) -> Result<Vec<[i64; 2]>, IoError> {
    let file_path = file_path.as_ref();
    if !file_path.exists() {
        return Err(IoError::FileDoesNotExist(file_path.to_path_buf()));
    }

    let reader = std::io::BufReader::new(std::fs::File::open(file_path)?);
    let log: ClickLog = serde_json::from_reader(reader)?;
    Ok(log.clicks)
}

/// Writes an ordered list of `[x, y]` clicks to a JSON file.
pub fn write_clicks_json(file_path: impl AsRef<Path>, clicks: &[[i64; 2]]) -> Result<(), IoError> {
    let log = ClickLog {
        clicks: clicks.to_vec(),
    };
    let writer = std::io::BufWriter::new(std::fs::File::create(file_path)?);
    serde_json::to_writer_pretty(writer, &log)?;
    Ok(())
}
