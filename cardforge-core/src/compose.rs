//! Composition Engine
//!
//! A pure function of its inputs: resolved layers, the design space and the
//! target preset. No clock, randomness or locale is consulted while painting,
//! so identical inputs always produce identical pixels. The only time checks
//! are the cooperative cancellation points between layers.

use image::{Rgba, RgbaImage};
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::binding::{LayerContent, ResolvedLayer, ResolvedLayers};
use crate::error::{EngineError, EngineResult, LayerWarning, WarningKind};
use crate::formats::FormatPreset;
use crate::geometry::{FitPolicy, PixelRect, Viewport};
use crate::layers::{FontWeight, LayerStyle, LayerType, ShapeKind, TextAlign, VerticalAlign};
use crate::raster::{parse_color, with_opacity, Canvas};
use crate::text::{TextBlock, TextRasterizer, TextShadow};

/// Cooperative cancellation flag shared with the caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn budget_ms(&self) -> u64 {
        self.budget.as_millis() as u64
    }
}

/// Everything a single composition needs, passed explicitly.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub design_width: u32,
    pub design_height: u32,
    pub format: FormatPreset,
    pub policy: FitPolicy,
    pub background: String,
    pub watermark: Option<String>,
    pub cancel: CancelToken,
    pub deadline: Option<Deadline>,
}

impl RenderContext {
    pub fn new(design_width: u32, design_height: u32, format: FormatPreset) -> Self {
        Self {
            design_width,
            design_height,
            format,
            policy: FitPolicy::default(),
            background: "#FFFFFF".to_string(),
            watermark: None,
            cancel: CancelToken::default(),
            deadline: None,
        }
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::fit(
            self.design_width,
            self.design_height,
            self.format.width,
            self.format.height,
            self.policy,
        )
    }

    /// Fails once the request was cancelled or ran out of time.
    pub fn checkpoint(&self) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::RenderCancelled);
        }
        match self.deadline {
            Some(deadline) if deadline.expired() => Err(EngineError::RenderTimeout(deadline.budget_ms())),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Composition {
    pub image: RgbaImage,
    pub warnings: Vec<LayerWarning>,
}

/// A bad colour only skips its layer; anything else aborts the render.
enum PaintError {
    Style(String),
    Fatal(EngineError),
}

pub struct Compositor {
    text: TextRasterizer,
}

impl Compositor {
    pub fn new() -> Self {
        Self::with_rasterizer(TextRasterizer::new())
    }

    pub fn with_rasterizer(text: TextRasterizer) -> Self {
        Self { text }
    }

    pub fn rasterizer(&self) -> &TextRasterizer {
        &self.text
    }

    pub fn compose(&self, resolved: &ResolvedLayers, ctx: &RenderContext) -> EngineResult<Composition> {
        if ctx.design_width == 0 || ctx.design_height == 0 {
            return Err(EngineError::Composition(format!(
                "design size {}x{} must be non-zero",
                ctx.design_width, ctx.design_height
            )));
        }
        let viewport = ctx.viewport();
        let background = parse_color(&ctx.background).map_err(EngineError::Composition)?;
        let mut canvas = Canvas::new(ctx.format.width, ctx.format.height, background)?;
        let mut warnings = resolved.warnings.clone();

        let mut ordered: Vec<&ResolvedLayer> = resolved.layers.iter().collect();
        ordered.sort_by_key(|l| l.z_index);

        for layer in ordered {
            ctx.checkpoint()?;
            if !layer.visible {
                continue;
            }
            if layer.content.is_empty() {
                if !warnings.iter().any(|w| w.layer_id == layer.id) {
                    warnings.push(warning(layer, WarningKind::EmptyContent, "no content to paint".to_string()));
                }
                continue;
            }
            let rect = viewport.map(&layer.position);
            if rect.is_empty() {
                continue;
            }
            match self.paint(&mut canvas, layer, rect, &viewport) {
                Ok(()) => {}
                Err(PaintError::Style(message)) => {
                    warnings.push(warning(layer, WarningKind::InvalidStyle, message));
                }
                Err(PaintError::Fatal(err)) => return Err(err),
            }
        }

        if let Some(text) = ctx.watermark.as_deref() {
            ctx.checkpoint()?;
            self.paint_watermark(&mut canvas, text);
        }
        ctx.checkpoint()?;

        debug!(
            "composed {}x{} ({}) with {} warnings",
            canvas.width(),
            canvas.height(),
            ctx.format.key,
            warnings.len()
        );
        Ok(Composition {
            image: canvas.into_image(),
            warnings,
        })
    }

    fn paint(
        &self,
        canvas: &mut Canvas,
        layer: &ResolvedLayer,
        rect: PixelRect,
        viewport: &Viewport,
    ) -> Result<(), PaintError> {
        let style = &layer.style;
        match (layer.layer_type, &layer.content) {
            (LayerType::Text, LayerContent::Text(text)) => {
                let color = with_opacity(parse_color(&style.color).map_err(PaintError::Style)?, style.opacity);
                let shadow = match &style.shadow {
                    Some(shadow) => Some(TextShadow {
                        color: with_opacity(parse_color(&shadow.color).map_err(PaintError::Style)?, style.opacity),
                        offset_x: viewport.length(shadow.offset_x),
                        offset_y: viewport.length(shadow.offset_y),
                        blur: viewport.length(shadow.blur),
                    }),
                    None => None,
                };
                // A glyph taller than its rect can never be shown whole.
                let font_size = viewport.length(style.font_size).min(rect.height as f32);
                self.text.draw(
                    canvas,
                    &TextBlock {
                        text,
                        rect,
                        font_family: &style.font_family,
                        font_size,
                        line_height: font_size * style.line_height,
                        weight: style.font_weight,
                        align: style.align,
                        vertical_align: style.vertical_align,
                        color,
                        shadow,
                    },
                );
            }
            (LayerType::Image, LayerContent::Image(image)) => {
                canvas.draw_image(image, &rect, style.object_fit, style.opacity);
            }
            (LayerType::Shape, LayerContent::Shape(kind)) => {
                paint_shape(canvas, *kind, style, rect, viewport).map_err(PaintError::Style)?;
            }
            (layer_type, content) => {
                return Err(PaintError::Fatal(EngineError::UnsupportedLayerType {
                    layer: layer.name.clone(),
                    detail: format!("a {:?} layer cannot paint {} content", layer_type, content_name(content)),
                }));
            }
        }
        Ok(())
    }

    fn paint_watermark(&self, canvas: &mut Canvas, text: &str) {
        let font_size = (canvas.width() as f32 / 60.0).max(14.0);
        let line_height = (font_size * 1.3).ceil();
        let margin = 20;
        let rect = PixelRect::new(
            margin,
            canvas.height() as i64 - margin - line_height as i64,
            canvas.width().saturating_sub(2 * margin as u32),
            line_height as u32,
        );
        self.text.draw(
            canvas,
            &TextBlock {
                text,
                rect,
                font_family: "sans-serif",
                font_size,
                line_height,
                weight: FontWeight::NORMAL,
                align: TextAlign::Right,
                vertical_align: VerticalAlign::Top,
                color: Rgba([0, 0, 0, 64]),
                shadow: None,
            },
        );
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

fn paint_shape(
    canvas: &mut Canvas,
    kind: ShapeKind,
    style: &LayerStyle,
    rect: PixelRect,
    viewport: &Viewport,
) -> Result<(), String> {
    let fill = match &style.fill {
        Some(fill) => Some(parse_color(fill)?),
        None if style.stroke.is_none() => Some(parse_color(&style.color)?),
        None => None,
    };
    let stroke = match &style.stroke {
        Some(stroke) if style.stroke_width > 0.0 => {
            let width = viewport.length(style.stroke_width).round().max(1.0) as u32;
            Some((parse_color(stroke)?, width))
        }
        _ => None,
    };

    if let Some(fill) = fill {
        let fill = with_opacity(fill, style.opacity);
        match kind {
            ShapeKind::Rect => canvas.fill_rect(&rect, fill),
            ShapeKind::Ellipse => canvas.fill_ellipse(&rect, fill, None),
        }
    }
    if let Some((color, width)) = stroke {
        let color = with_opacity(color, style.opacity);
        match kind {
            ShapeKind::Rect => canvas.stroke_rect(&rect, width, color),
            ShapeKind::Ellipse => canvas.fill_ellipse(&rect, color, Some(width)),
        }
    }
    Ok(())
}

fn content_name(content: &LayerContent) -> &'static str {
    match content {
        LayerContent::Text(_) => "text",
        LayerContent::Image(_) => "image",
        LayerContent::Shape(_) => "shape",
        LayerContent::Empty => "empty",
    }
}

fn warning(layer: &ResolvedLayer, kind: WarningKind, message: String) -> LayerWarning {
    LayerWarning {
        layer_id: layer.id,
        layer_name: layer.name.clone(),
        kind,
        message,
    }
}
