//! Text layout and rasterization.
//!
//! Uses cosmic-text for shaping, bidi and line breaking. The font system is
//! expensive to build, so one `TextRasterizer` is owned by the compositor
//! and shared by every render it performs.

use cosmic_text::{
    fontdb, Attrs, Buffer, Color, Family, FontSystem, Metrics, Shaping, SwashCache, Weight, Wrap,
};
use image::{imageops, Pixel, Rgba, RgbaImage};
use log::debug;
use parking_lot::Mutex;
use std::path::Path;

use crate::geometry::PixelRect;
use crate::layers::{FontWeight, TextAlign, VerticalAlign};
use crate::raster::Canvas;

/// Everything needed to place one block of text on the surface.
#[derive(Debug, Clone)]
pub struct TextBlock<'a> {
    pub text: &'a str,
    pub rect: PixelRect,
    pub font_family: &'a str,
    pub font_size: f32,
    pub line_height: f32,
    pub weight: FontWeight,
    pub align: TextAlign,
    pub vertical_align: VerticalAlign,
    pub color: Rgba<u8>,
    pub shadow: Option<TextShadow>,
}

/// Drawn under the text, offset and optionally blurred. Lengths are pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextShadow {
    pub color: Rgba<u8>,
    pub offset_x: f32,
    pub offset_y: f32,
    pub blur: f32,
}

/// Script fallback is chosen from this locale, never the process one.
pub const FONT_LOCALE: &str = "en-US";

pub struct TextRasterizer {
    font_system: Mutex<FontSystem>,
    swash_cache: Mutex<SwashCache>,
}

impl TextRasterizer {
    pub fn new() -> Self {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        Self {
            font_system: Mutex::new(FontSystem::new_with_locale_and_db(FONT_LOCALE.to_string(), db)),
            swash_cache: Mutex::new(SwashCache::new()),
        }
    }

    pub fn face_count(&self) -> usize {
        self.font_system.lock().db().len()
    }

    pub fn locale(&self) -> String {
        self.font_system.lock().locale().to_string()
    }

    /// Make every font file in `dir` available by family name.
    pub fn load_fonts_dir(&self, dir: &Path) {
        let mut font_system = self.font_system.lock();
        font_system.db_mut().load_fonts_dir(dir);
        debug!("font database holds {} faces", font_system.db().len());
    }

    /// Lay the text out inside `block.rect`, wrapping to its width, and paint
    /// it. Lines past the rect are clipped, never shrunk. Returns the number
    /// of laid out lines.
    pub fn draw(&self, canvas: &mut Canvas, block: &TextBlock<'_>) -> usize {
        if block.text.is_empty() || block.rect.is_empty() || block.font_size <= 0.0 {
            return 0;
        }
        let mut font_system = self.font_system.lock();
        let mut swash_cache = self.swash_cache.lock();

        let line_height = block.line_height.max(1.0);
        let mut buffer = Buffer::new(&mut font_system, Metrics::new(block.font_size, line_height));
        buffer.set_wrap(&mut font_system, Wrap::WordOrGlyph);
        buffer.set_size(&mut font_system, Some(block.rect.width as f32), None);
        let attrs = Attrs::new()
            .family(family(block.font_family))
            .weight(Weight(block.weight.value()));
        buffer.set_text(&mut font_system, block.text, &attrs, Shaping::Advanced);
        buffer.shape_until_scroll(&mut font_system, false);

        let lines = buffer.layout_runs().count();
        let total_height = lines as f32 * line_height;
        let top = match block.vertical_align {
            VerticalAlign::Top => 0.0,
            VerticalAlign::Middle => (block.rect.height as f32 - total_height) / 2.0,
            VerticalAlign::Bottom => block.rect.height as f32 - total_height,
        };

        let place = |run_w: f32, line_y: f32, dx: f32, dy: f32| {
            let free = block.rect.width as f32 - run_w;
            let indent = match block.align {
                TextAlign::Left => 0.0,
                TextAlign::Center => free / 2.0,
                TextAlign::Right => free,
            };
            (
                block.rect.x + (indent + dx).round() as i64,
                block.rect.y + (top + line_y + dy).round() as i64,
            )
        };
        let mut paint = |color: Rgba<u8>, dx: f32, dy: f32, sink: &mut dyn FnMut(i64, i64, Rgba<u8>)| {
            let base = Color::rgba(color[0], color[1], color[2], color[3]);
            for run in buffer.layout_runs() {
                let (origin_x, origin_y) = place(run.line_w, run.line_y, dx, dy);
                for glyph in run.glyphs.iter() {
                    let physical = glyph.physical((0.0, 0.0), 1.0);
                    swash_cache.with_pixels(&mut font_system, physical.cache_key, base, |x, y, c| {
                        let px = origin_x + (physical.x + x) as i64;
                        let py = origin_y + (physical.y + y) as i64;
                        sink(px, py, Rgba([c.r(), c.g(), c.b(), c.a()]));
                    });
                }
            }
        };

        match block.shadow {
            Some(shadow) if shadow.blur > 0.0 => {
                // Render into a rect-sized layer, blur it, then blend it down.
                let rect = block.rect;
                let [r, g, b, _] = shadow.color.0;
                let mut layer = RgbaImage::from_pixel(rect.width, rect.height, Rgba([r, g, b, 0]));
                paint(shadow.color, shadow.offset_x, shadow.offset_y, &mut |px, py, c| {
                    let (lx, ly) = (px - rect.x, py - rect.y);
                    if lx >= 0 && ly >= 0 && (lx as u32) < rect.width && (ly as u32) < rect.height {
                        layer.get_pixel_mut(lx as u32, ly as u32).blend(&c);
                    }
                });
                let blurred = imageops::blur(&layer, shadow.blur / 2.0);
                for (lx, ly, c) in blurred.enumerate_pixels() {
                    if c[3] > 0 {
                        canvas.blend(rect.x + lx as i64, rect.y + ly as i64, *c, &rect);
                    }
                }
            }
            Some(shadow) => {
                paint(shadow.color, shadow.offset_x, shadow.offset_y, &mut |px, py, c| {
                    canvas.blend(px, py, c, &block.rect)
                });
            }
            None => {}
        }
        paint(block.color, 0.0, 0.0, &mut |px, py, c| canvas.blend(px, py, c, &block.rect));
        lines
    }
}

impl Default for TextRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

fn family(name: &str) -> Family<'_> {
    match name.to_lowercase().as_str() {
        "serif" => Family::Serif,
        "sans-serif" | "sans" => Family::SansSerif,
        "monospace" | "mono" => Family::Monospace,
        "cursive" => Family::Cursive,
        "fantasy" => Family::Fantasy,
        _ => Family::Name(name),
    }
}
