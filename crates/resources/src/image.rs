//! Raw image pixels handed over by an image importer.

use crate::error::{ResourceError, ResourceResult};

/// Channel data of an image, row-major, channels interleaved.
#[derive(Clone, Debug, PartialEq)]
pub enum PixelData {
    /// 8-bit normalized channels (LDR images).
    U8(Vec<u8>),
    /// 32-bit float channels (HDR images).
    F32(Vec<f32>),
}

impl PixelData {
    fn len(&self) -> usize {
        match self {
            PixelData::U8(data) => data.len(),
            PixelData::F32(data) => data.len(),
        }
    }
}

/// Immutable image with 1 to 4 channels.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub pixels: PixelData,
}

impl ImageData {
    /// Creates and validates an image.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::InvalidImage`] if the dimensions are zero,
    /// the channel count is not 1..=4, or the pixel count does not match.
    pub fn new(width: u32, height: u32, channels: u32, pixels: PixelData) -> ResourceResult<Self> {
        let image = Self {
            width,
            height,
            channels,
            pixels,
        };
        image.validate()?;
        Ok(image)
    }

    pub fn validate(&self) -> ResourceResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ResourceError::InvalidImage(format!(
                "zero-sized image {}x{}",
                self.width, self.height
            )));
        }
        if !(1..=4).contains(&self.channels) {
            return Err(ResourceError::InvalidImage(format!(
                "unsupported channel count {}",
                self.channels
            )));
        }
        let expected = self.texel_count() * self.channels as usize;
        if self.pixels.len() != expected {
            return Err(ResourceError::InvalidImage(format!(
                "{} channel values for {}x{}x{} (expected {})",
                self.pixels.len(),
                self.width,
                self.height,
                self.channels,
                expected
            )));
        }
        Ok(())
    }

    /// Whether the pixels are floating point.
    pub fn is_hdr(&self) -> bool {
        matches!(self.pixels, PixelData::F32(_))
    }

    #[inline]
    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Pixels expanded to four channels, as raw bytes ready for upload.
    ///
    /// Gray images are replicated into RGB; a missing alpha channel is
    /// opaque. LDR images yield RGBA8, HDR images RGBA32F.
    pub fn to_rgba_bytes(&self) -> ResourceResult<Vec<u8>> {
        self.validate()?;
        let channels = self.channels as usize;
        match &self.pixels {
            PixelData::U8(data) => Ok(expand(data, channels, u8::MAX)),
            PixelData::F32(data) => Ok(bytemuck::cast_slice(&expand(data, channels, 1.0)).to_vec()),
        }
    }
}

fn expand<T: Copy>(data: &[T], channels: usize, opaque: T) -> Vec<T> {
    let mut rgba = Vec::with_capacity(data.len() / channels * 4);
    for texel in data.chunks_exact(channels) {
        let (rgb, alpha) = match *texel {
            [g] => ([g, g, g], opaque),
            [g, a] => ([g, g, g], a),
            [r, g, b] => ([r, g, b], opaque),
            [r, g, b, a, ..] => ([r, g, b], a),
            [] => continue,
        };
        rgba.extend_from_slice(&rgb);
        rgba.push(alpha);
    }
    rgba
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_count_must_match() {
        let err = ImageData::new(2, 2, 3, PixelData::U8(vec![0; 11])).unwrap_err();
        assert!(matches!(err, ResourceError::InvalidImage(_)));
        assert!(ImageData::new(2, 2, 3, PixelData::U8(vec![0; 12])).is_ok());
    }

    #[test]
    fn test_invalid_channel_count() {
        assert!(ImageData::new(1, 1, 5, PixelData::U8(vec![0; 5])).is_err());
        assert!(ImageData::new(0, 1, 1, PixelData::U8(vec![])).is_err());
    }

    #[test]
    fn test_rgb_expands_with_opaque_alpha() {
        let image = ImageData::new(2, 1, 3, PixelData::U8(vec![1, 2, 3, 4, 5, 6])).unwrap();
        assert_eq!(
            image.to_rgba_bytes().unwrap(),
            vec![1, 2, 3, 255, 4, 5, 6, 255]
        );
    }

    #[test]
    fn test_gray_hdr_expands_to_rgba32f() {
        let image = ImageData::new(1, 1, 1, PixelData::F32(vec![0.5])).unwrap();
        assert!(image.is_hdr());
        let bytes = image.to_rgba_bytes().unwrap();
        let floats: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(floats, vec![0.5, 0.5, 0.5, 1.0]);
    }
}
