use crate::error::ImageError;

/// Image size in pixels
///
/// A struct to represent the size of an image in pixels.
///
/// # Examples
///
/// ```
/// use mlswarp_image::ImageSize;
///
/// let image_size = ImageSize {
///   width: 10,
///   height: 20,
/// };
///
/// assert_eq!(image_size.width, 10);
/// assert_eq!(image_size.height, 20);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageSize {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "ImageSize {{ width: {}, height: {} }}",
            self.width, self.height
        )
    }
}

impl From<[usize; 2]> for ImageSize {
    fn from(size: [usize; 2]) -> Self {
        ImageSize {
            width: size[0],
            height: size[1],
        }
    }
}

impl From<ImageSize> for [u32; 2] {
    fn from(size: ImageSize) -> Self {
        [size.width as u32, size.height as u32]
    }
}

/// Represents an image with pixel data.
///
/// The pixels are stored row-major with interleaved channels, i.e. with shape
/// (H, W, C). Both dimensions are guaranteed to be non-zero.
#[derive(Clone, Debug, PartialEq)]
pub struct Image<T, const CHANNELS: usize> {
    size: ImageSize,
    data: Vec<T>,
}

impl<T, const CHANNELS: usize> Image<T, CHANNELS> {
    /// Create a new image from pixel data.
    ///
    /// # Arguments
    ///
    /// * `size` - The size of the image in pixels.
    /// * `data` - The pixel data of the image.
    ///
    /// # Returns
    ///
    /// A new image with the given pixel data.
    ///
    /// # Errors
    ///
    /// If the length of the pixel data does not match the image size, or one of the
    /// dimensions is zero, an error is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use mlswarp_image::{Image, ImageSize};
    ///
    /// let image = Image::<u8, 3>::new(
    ///    ImageSize {
    ///       width: 10,
    ///       height: 20,
    ///    },
    ///    vec![0u8; 10 * 20 * 3],
    /// ).unwrap();
    ///
    /// assert_eq!(image.size().width, 10);
    /// assert_eq!(image.size().height, 20);
    /// assert_eq!(image.num_channels(), 3);
    /// ```
    pub fn new(size: ImageSize, data: Vec<T>) -> Result<Self, ImageError> {
        if size.width == 0 || size.height == 0 {
            return Err(ImageError::InvalidImageSize(size.width, size.height));
        }

        // check if the data length matches the image size
        if data.len() != size.width * size.height * CHANNELS {
            return Err(ImageError::InvalidChannelShape(
                data.len(),
                size.width * size.height * CHANNELS,
            ));
        }

        Ok(Self { size, data })
    }

    /// Create a new image with the given size and default pixel data.
    ///
    /// # Arguments
    ///
    /// * `size` - The size of the image in pixels.
    /// * `val` - The default value of the pixel data.
    ///
    /// # Examples
    ///
    /// ```
    /// use mlswarp_image::{Image, ImageSize};
    ///
    /// let image = Image::<u8, 3>::from_size_val(
    ///   ImageSize {
    ///     width: 10,
    ///     height: 20,
    ///   }, 0u8).unwrap();
    ///
    /// assert_eq!(image.size().width, 10);
    /// assert_eq!(image.size().height, 20);
    /// assert_eq!(image.num_channels(), 3);
    /// ```
    pub fn from_size_val(size: ImageSize, val: T) -> Result<Self, ImageError>
    where
        T: Clone,
    {
        let data = vec![val; size.width * size.height * CHANNELS];
        Image::new(size, data)
    }

    /// Create a new image by evaluating `f(x, y)` at every pixel.
    ///
    /// Useful to build synthetic test patterns.
    ///
    /// ```
    /// use mlswarp_image::{Image, ImageSize};
    ///
    /// let image = Image::<u16, 1>::from_fn([3, 2].into(), |x, y| [(y * 3 + x) as u16]).unwrap();
    /// assert_eq!(image.as_slice(), &[0, 1, 2, 3, 4, 5]);
    /// ```
    pub fn from_fn(
        size: ImageSize,
        f: impl Fn(usize, usize) -> [T; CHANNELS],
    ) -> Result<Self, ImageError> {
        let mut data = Vec::with_capacity(size.width * size.height * CHANNELS);
        for y in 0..size.height {
            for x in 0..size.width {
                data.extend(f(x, y));
            }
        }
        Image::new(size, data)
    }

    /// Cast the pixel data of the image to a different type.
    ///
    /// # Returns
    ///
    /// A new image with the pixel data cast to the given type.
    ///
    /// # Errors
    ///
    /// If a pixel value cannot be represented in the target type, an error is returned.
    pub fn cast<U>(&self) -> Result<Image<U, CHANNELS>, ImageError>
    where
        U: num_traits::NumCast,
        T: num_traits::NumCast + Copy,
    {
        let casted_data = self
            .data
            .iter()
            .map(|&x| {
                U::from(x).ok_or_else(|| ImageError::CastError(std::any::type_name::<U>().into()))
            })
            .collect::<Result<Vec<U>, ImageError>>()?;

        Image::new(self.size, casted_data)
    }

    /// Get the size of the image in pixels.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Get the number of columns of the image.
    pub fn cols(&self) -> usize {
        self.width()
    }

    /// Get the number of rows of the image.
    pub fn rows(&self) -> usize {
        self.height()
    }

    /// Get the width of the image in pixels.
    pub fn width(&self) -> usize {
        self.size.width
    }

    /// Get the height of the image in pixels.
    pub fn height(&self) -> usize {
        self.size.height
    }

    /// Get the number of channels in the image.
    pub fn num_channels(&self) -> usize {
        CHANNELS
    }

    /// Get the raw pixel data as a slice.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Get the raw pixel data as a mutable slice.
    pub fn as_slice_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Consume the image and return the raw pixel data.
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Get all the channels of a pixel.
    ///
    /// # Errors
    ///
    /// If the coordinates are out of bounds, an error is returned.
    pub fn pixel(&self, x: usize, y: usize) -> Result<&[T], ImageError> {
        let base = self.pixel_offset(x, y)?;
        Ok(&self.data[base..base + CHANNELS])
    }

    /// Get a single channel value of a pixel.
    ///
    /// # Arguments
    ///
    /// * `x` - The x-coordinate of the pixel.
    /// * `y` - The y-coordinate of the pixel.
    /// * `ch` - The channel index of the pixel.
    ///
    /// # Returns
    ///
    /// The pixel value at the given coordinates.
    pub fn get_pixel(&self, x: usize, y: usize, ch: usize) -> Result<&T, ImageError> {
        if ch >= CHANNELS {
            return Err(ImageError::ChannelIndexOutOfBounds(ch, CHANNELS));
        }
        let base = self.pixel_offset(x, y)?;
        Ok(&self.data[base + ch])
    }

    /// Set a single channel value of a pixel.
    ///
    /// # Arguments
    ///
    /// * `x` - The x-coordinate of the pixel.
    /// * `y` - The y-coordinate of the pixel.
    /// * `ch` - The channel index of the pixel.
    /// * `val` - The value to write.
    pub fn set_pixel(&mut self, x: usize, y: usize, ch: usize, val: T) -> Result<(), ImageError> {
        if ch >= CHANNELS {
            return Err(ImageError::ChannelIndexOutOfBounds(ch, CHANNELS));
        }
        let base = self.pixel_offset(x, y)?;
        self.data[base + ch] = val;
        Ok(())
    }

    fn pixel_offset(&self, x: usize, y: usize) -> Result<usize, ImageError> {
        if x >= self.width() || y >= self.height() {
            return Err(ImageError::PixelIndexOutOfBounds(
                x,
                y,
                self.width(),
                self.height(),
            ));
        }
        Ok((y * self.width() + x) * CHANNELS)
    }
}

#[cfg(test)]
mod tests {
    use crate::image::{Image, ImageError, ImageSize};

    #[test]
    fn image_size() {
        let image_size = ImageSize {
            width: 10,
            height: 20,
        };
        assert_eq!(image_size.width, 10);
        assert_eq!(image_size.height, 20);
        assert_eq!(
            image_size.to_string(),
            "ImageSize { width: 10, height: 20 }"
        );
    }

    #[test]
    fn image_smoke() -> Result<(), ImageError> {
        let image = Image::<u8, 3>::new(
            ImageSize {
                width: 10,
                height: 20,
            },
            vec![0u8; 10 * 20 * 3],
        )?;
        assert_eq!(image.size().width, 10);
        assert_eq!(image.size().height, 20);
        assert_eq!(image.num_channels(), 3);

        Ok(())
    }

    #[test]
    fn image_invalid_shape() {
        let res = Image::<u8, 3>::new([2, 2].into(), vec![0u8; 5]);
        assert_eq!(res, Err(ImageError::InvalidChannelShape(5, 12)));
    }

    #[test]
    fn image_zero_size() {
        let res = Image::<u8, 1>::new([0, 4].into(), vec![]);
        assert_eq!(res, Err(ImageError::InvalidImageSize(0, 4)));
    }

    #[test]
    fn image_cast() -> Result<(), ImageError> {
        let data = vec![0, 1, 2, 3, 4, 5];
        let image_u8 = Image::<u8, 3>::new(
            ImageSize {
                height: 2,
                width: 1,
            },
            data,
        )?;
        assert_eq!(image_u8.get_pixel(0, 1, 2)?, &5u8);

        let image_f32: Image<f32, 3> = image_u8.cast()?;
        assert_eq!(image_f32.get_pixel(0, 1, 2)?, &5.0f32);

        let negative = Image::<i32, 1>::new([1, 1].into(), vec![-1])?;
        assert!(matches!(
            negative.cast::<u8>(),
            Err(ImageError::CastError(_))
        ));

        Ok(())
    }

    #[test]
    fn image_pixel_access() -> Result<(), ImageError> {
        let mut image = Image::<u8, 2>::from_fn([3, 2].into(), |x, y| [x as u8, y as u8])?;
        assert_eq!(image.pixel(2, 1)?, &[2, 1]);

        image.set_pixel(2, 1, 0, 9)?;
        assert_eq!(image.pixel(2, 1)?, &[9, 1]);

        assert_eq!(
            image.pixel(3, 0),
            Err(ImageError::PixelIndexOutOfBounds(3, 0, 3, 2))
        );
        assert_eq!(
            image.get_pixel(0, 0, 2),
            Err(ImageError::ChannelIndexOutOfBounds(2, 2))
        );

        Ok(())
    }
}
