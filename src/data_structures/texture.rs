//! Decoded textures and their sampling settings.
//!
//! This module provides [`Texture`], a CPU-side image with the sampler
//! state it would be bound with, and the size-capping operation used by the
//! texture budget stage.

use anyhow::*;
use image::{ImageFormat, RgbaImage, imageops::FilterType, load_from_memory_with_format};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Sampler state of a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sampling {
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub generate_mipmaps: bool,
    pub anisotropy: u16,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            generate_mipmaps: true,
            anisotropy: 1,
        }
    }
}

/// A texture with optional decoded pixels.
///
/// `width`/`height` are the declared dimensions. They match the image when
/// one is present; a texture whose pixels were never decoded (or live only
/// on the GPU) still knows its size.
#[derive(Clone, Debug)]
pub struct Texture {
    pub name: String,
    pub image: Option<RgbaImage>,
    pub width: u32,
    pub height: u32,
    pub sampling: Sampling,
    /// The ceiling this texture was last capped to.
    pub max_size_applied: Option<u32>,
}

/// What [`Texture::cap`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapOutcome {
    Unchanged,
    Downsampled { width: u32, height: u32 },
    /// No pixels to resample; sampling quality was lowered instead.
    Relaxed,
}

impl Texture {
    pub fn from_image(name: &str, image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            name: name.to_string(),
            image: Some(image),
            width,
            height,
            sampling: Sampling::default(),
            max_size_applied: None,
        }
    }

    /// A texture known only by its dimensions.
    pub fn placeholder(name: &str, width: u32, height: u32) -> Self {
        Self {
            name: name.to_string(),
            image: None,
            width,
            height,
            sampling: Sampling::default(),
            max_size_applied: None,
        }
    }

    /// Load a texture from raw byte data (image file contents).
    ///
    /// # Arguments
    ///
    /// * `bytes` represent raw image file data (PNG, JPEG, etc.)
    /// * `label` names the texture
    /// * `format` is an optional file format hint (e.g., "png"). If None, auto-detect.
    pub fn from_bytes(bytes: &[u8], label: &str, format: Option<&str>) -> Result<Self> {
        let img = match format {
            None => image::load_from_memory(bytes)?,
            Some(fmt) => {
                let format = ImageFormat::from_extension(fmt)
                    .ok_or_else(|| anyhow!("unknown image format {fmt}"))?;
                load_from_memory_with_format(bytes, format)?
            }
        };
        Ok(Self::from_image(label, img.to_rgba8()))
    }

    /// Enforce `max_size` on both axes.
    ///
    /// With pixels available the image is resampled so its longest side
    /// equals `max_size`, keeping the aspect ratio. Without pixels the
    /// sampler is relaxed: mipmaps off, linear filtering, anisotropy 1.
    pub fn cap(&mut self, max_size: u32) -> CapOutcome {
        let max_size = max_size.max(1);
        if self.width <= max_size && self.height <= max_size {
            return CapOutcome::Unchanged;
        }
        self.max_size_applied = Some(max_size);
        let (width, height) = fit_within(self.width, self.height, max_size);
        match &self.image {
            Some(image) => {
                let resized = image::imageops::resize(image, width, height, FilterType::Triangle);
                self.image = Some(resized);
                self.width = width;
                self.height = height;
                CapOutcome::Downsampled { width, height }
            }
            None => {
                self.sampling = Sampling {
                    min_filter: FilterMode::Linear,
                    mag_filter: FilterMode::Linear,
                    generate_mipmaps: false,
                    anisotropy: 1,
                };
                CapOutcome::Relaxed
            }
        }
    }
}

fn fit_within(width: u32, height: u32, max_size: u32) -> (u32, u32) {
    let longest = width.max(height) as f64;
    let scale = max_size as f64 / longest;
    let scaled = |side: u32| ((side as f64 * scale).round() as u32).clamp(1, max_size);
    (scaled(width), scaled(height))
}
