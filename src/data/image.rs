use super::batcher::VqaItem;
use super::prefetch::Decoder;
use super::record::ExampleRecord;
use crate::error::{Result, VqaError};
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use num_traits::AsPrimitive;
use std::path::{Path, PathBuf};

/// Reads example images from a directory and resizes them to a square.
#[derive(Debug, Clone)]
pub struct ImageLoader {
    image_dir: PathBuf,
    side: u32,
    /// `(vocab_size, n_answers)` every decoded record must fit in.
    bounds: Option<(usize, usize)>,
}

impl ImageLoader {
    pub fn new(image_dir: impl Into<PathBuf>, side: usize) -> Self {
        Self {
            image_dir: image_dir.into(),
            side: side as u32,
            bounds: None,
        }
    }

    /// Rejects records whose word or answer ids fall outside the model.
    pub fn with_bounds(mut self, vocab_size: usize, n_answers: usize) -> Self {
        self.bounds = Some((vocab_size, n_answers));
        self
    }

    /// HWC pixels in `[0, 255]` of `image_dir/image_file`.
    pub fn load(&self, image_file: &str) -> Result<Vec<f32>> {
        let path = self.image_dir.join(image_file);
        let bytes = std::fs::read(&path).map_err(|e| VqaError::io(&path, e))?;
        self.decode_bytes(&bytes, &path)
    }

    pub fn decode_bytes(&self, bytes: &[u8], origin: &Path) -> Result<Vec<f32>> {
        let image = image::load_from_memory(bytes).map_err(|e| VqaError::ImageDecode {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(self.pixels(&image))
    }

    fn pixels(&self, image: &DynamicImage) -> Vec<f32> {
        let resized = image.resize_exact(self.side, self.side, FilterType::Triangle);
        resized
            .to_rgb8()
            .as_raw()
            .iter()
            .map(|&value| -> f32 { value.as_() })
            .collect()
    }
}

impl Decoder for ImageLoader {
    type Item = VqaItem;

    fn decode(&self, record: &ExampleRecord) -> Result<VqaItem> {
        if let Some((vocab_size, n_answers)) = self.bounds {
            record.check_ids(vocab_size, n_answers)?;
        }
        Ok(VqaItem {
            words: record.words.clone(),
            answer: record.answer,
            image: self.load(&record.image_file)?,
        })
    }
}

/// Highlights attended regions of an image.
///
/// The image is turned to a light grayscale and the attention map, scaled so its
/// maximum is 255 and upsampled to the image size, is subtracted from the green
/// and blue channels, so attended cells show up in red.
///
/// `pixels` are HWC values of a `side × side` image; `attention` holds `grid × grid` weights.
pub fn attention_overlay(pixels: &[f32], side: usize, attention: &[f32], grid: usize) -> RgbImage {
    debug_assert_eq!(pixels.len(), side * side * 3);
    debug_assert_eq!(attention.len(), grid * grid);

    let max = attention.iter().copied().fold(0f32, f32::max);
    let scale = if max > 0.0 { 255.0 / max } else { 0.0 };

    RgbImage::from_fn(side as u32, side as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let offset = (y * side + x) * 3;
        let [r, g, b] = [pixels[offset], pixels[offset + 1], pixels[offset + 2]];
        let gray = 0.2989 * r + 0.587 * g + 0.114 * b;
        let base = (gray / 2.0).floor() + 127.0;

        let cell = (y * grid / side) * grid + x * grid / side;
        let mask = attention[cell] * scale;
        let shaded = (base - mask).clamp(0.0, 255.0) as u8;
        Rgb([base.clamp(0.0, 255.0) as u8, shaded, shaded])
    })
}

/// The attention weights alone, as a `grid × grid` grayscale image whose maximum is white.
pub fn attention_mask(attention: &[f32], grid: usize) -> RgbImage {
    debug_assert_eq!(attention.len(), grid * grid);
    let max = attention.iter().copied().fold(0f32, f32::max);
    let scale = if max > 0.0 { 255.0 / max } else { 0.0 };
    RgbImage::from_fn(grid as u32, grid as u32, |x, y| {
        let value = attention[y as usize * grid + x as usize] * scale;
        let value = value.round().clamp(0.0, 255.0) as u8;
        Rgb([value, value, value])
    })
}
