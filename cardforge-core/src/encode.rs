//! Output encoding.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Pixel, Rgb, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Png,
    Jpeg,
}

impl Encoding {
    pub fn mime_type(self) -> &'static str {
        match self {
            Encoding::Png => "image/png",
            Encoding::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Encoding::Png => "png",
            Encoding::Jpeg => "jpg",
        }
    }
}

/// Quality preset; only lossy encodings use it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Preview,
    Low,
    Medium,
    #[default]
    High,
    Download,
}

impl Quality {
    pub fn jpeg_quality(self) -> u8 {
        match self {
            Quality::Preview => 50,
            Quality::Low => 70,
            Quality::Medium => 80,
            Quality::High | Quality::Download => 95,
        }
    }
}

pub fn encode(image: &RgbaImage, encoding: Encoding, quality: Quality) -> EngineResult<Vec<u8>> {
    let mut bytes = Vec::new();
    let (width, height) = image.dimensions();
    let result = match encoding {
        Encoding::Png => PngEncoder::new(&mut bytes).write_image(
            image.as_raw(),
            width,
            height,
            ExtendedColorType::Rgba8,
        ),
        Encoding::Jpeg => {
            let flat = flatten(image);
            JpegEncoder::new_with_quality(&mut bytes, quality.jpeg_quality()).write_image(
                flat.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )
        }
    };
    result.map_err(|e| EngineError::Composition(format!("{:?} encoding failed: {}", encoding, e)))?;
    Ok(bytes)
}

/// JPEG has no alpha channel; composite over white first.
fn flatten(image: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let mut base = image::Rgba([255, 255, 255, 255]);
        base.blend(image.get_pixel(x, y));
        Rgb([base[0], base[1], base[2]])
    })
}
