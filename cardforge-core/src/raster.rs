//! Raster surface and the primitives layers are painted with.

use image::imageops::{self, FilterType};
use image::{Pixel, Rgba, RgbaImage};

use crate::error::{EngineError, EngineResult};
use crate::geometry::PixelRect;
use crate::layers::ObjectFit;

/// Largest surface the engine will allocate (8192 x 8192).
pub const MAX_SURFACE_PIXELS: u64 = 8192 * 8192;

/// Parse any CSS colour (`#fff`, `#RRGGBBAA`, `rgba(...)`, named colours).
pub fn parse_color(value: &str) -> Result<Rgba<u8>, String> {
    csscolorparser::parse(value)
        .map(|c| Rgba(c.to_rgba8()))
        .map_err(|e| format!("invalid colour '{}': {}", value, e))
}

pub fn with_opacity(color: Rgba<u8>, opacity: f32) -> Rgba<u8> {
    let Rgba([r, g, b, a]) = color;
    let alpha = (a as f32 * opacity.clamp(0.0, 1.0)).round() as u8;
    Rgba([r, g, b, alpha])
}

pub struct Canvas {
    image: RgbaImage,
}

impl Canvas {
    pub fn new(width: u32, height: u32, background: Rgba<u8>) -> EngineResult<Self> {
        let pixels = width as u64 * height as u64;
        if pixels == 0 || pixels > MAX_SURFACE_PIXELS {
            return Err(EngineError::Composition(format!(
                "cannot allocate a {}x{} surface",
                width, height
            )));
        }
        Ok(Self {
            image: RgbaImage::from_pixel(width, height, background),
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn bounds(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width(), self.height())
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.image.get_pixel(x, y)
    }

    /// Source-over blend of one pixel, ignored outside `clip` or the surface.
    pub fn blend(&mut self, x: i64, y: i64, color: Rgba<u8>, clip: &PixelRect) {
        if color[3] == 0 || !clip.contains(x, y) || !self.bounds().contains(x, y) {
            return;
        }
        self.image.get_pixel_mut(x as u32, y as u32).blend(&color);
    }

    pub fn fill_rect(&mut self, rect: &PixelRect, color: Rgba<u8>) {
        let Some(area) = rect.intersect(&self.bounds()) else {
            return;
        };
        for y in area.y..area.bottom() {
            for x in area.x..area.right() {
                self.image.get_pixel_mut(x as u32, y as u32).blend(&color);
            }
        }
    }

    pub fn stroke_rect(&mut self, rect: &PixelRect, width: u32, color: Rgba<u8>) {
        let inner = rect.inset(width);
        let Some(area) = rect.intersect(&self.bounds()) else {
            return;
        };
        for y in area.y..area.bottom() {
            for x in area.x..area.right() {
                if inner.map_or(true, |inner| !inner.contains(x, y)) {
                    self.image.get_pixel_mut(x as u32, y as u32).blend(&color);
                }
            }
        }
    }

    /// Fill the ellipse inscribed in `rect`; with `ring` set, only the band
    /// of that many pixels along its edge.
    pub fn fill_ellipse(&mut self, rect: &PixelRect, color: Rgba<u8>, ring: Option<u32>) {
        let Some(area) = rect.intersect(&self.bounds()) else {
            return;
        };
        let rx = rect.width as f64 / 2.0;
        let ry = rect.height as f64 / 2.0;
        let cx = rect.x as f64 + rx;
        let cy = rect.y as f64 + ry;
        let inner = ring.map(|w| (rx - w as f64, ry - w as f64));
        let inside = |px: f64, py: f64, rx: f64, ry: f64| {
            let dx = (px - cx) / rx;
            let dy = (py - cy) / ry;
            dx * dx + dy * dy <= 1.0
        };
        for y in area.y..area.bottom() {
            for x in area.x..area.right() {
                let (px, py) = (x as f64 + 0.5, y as f64 + 0.5);
                if !inside(px, py, rx, ry) {
                    continue;
                }
                let in_hole = match inner {
                    Some((irx, iry)) if irx > 0.0 && iry > 0.0 => inside(px, py, irx, iry),
                    _ => false,
                };
                if !in_hole {
                    self.image.get_pixel_mut(x as u32, y as u32).blend(&color);
                }
            }
        }
    }

    /// Fit `source` into `rect` and composite it, clipped to the rect.
    pub fn draw_image(&mut self, source: &RgbaImage, rect: &PixelRect, fit: ObjectFit, opacity: f32) {
        if rect.is_empty() || source.width() == 0 || source.height() == 0 {
            return;
        }
        let (placed, fitted) = match fit {
            ObjectFit::Cover => (*rect, cover(source, rect.width, rect.height)),
            ObjectFit::Contain => {
                let fitted = contain(source, rect.width, rect.height);
                let x = rect.x + (rect.width - fitted.width()) as i64 / 2;
                let y = rect.y + (rect.height - fitted.height()) as i64 / 2;
                (PixelRect::new(x, y, fitted.width(), fitted.height()), fitted)
            }
        };
        for (dx, dy, pixel) in fitted.enumerate_pixels() {
            let color = with_opacity(*pixel, opacity);
            self.blend(placed.x + dx as i64, placed.y + dy as i64, color, rect);
        }
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

/// Scale to fill `width x height`, cropping the centred overflow.
fn cover(source: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let (sw, sh) = source.dimensions();
    let scale = (width as f64 / sw as f64).max(height as f64 / sh as f64);
    let crop_w = ((width as f64 / scale).round() as u32).clamp(1, sw);
    let crop_h = ((height as f64 / scale).round() as u32).clamp(1, sh);
    let cropped = imageops::crop_imm(source, (sw - crop_w) / 2, (sh - crop_h) / 2, crop_w, crop_h);
    imageops::resize(&cropped.to_image(), width, height, FilterType::Triangle)
}

/// Scale to fit inside `width x height`, preserving the aspect ratio.
fn contain(source: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let (sw, sh) = source.dimensions();
    let scale = (width as f64 / sw as f64).min(height as f64 / sh as f64);
    let w = ((sw as f64 * scale).round() as u32).clamp(1, width);
    let h = ((sh as f64 * scale).round() as u32).clamp(1, height);
    imageops::resize(source, w, h, FilterType::Triangle)
}
