//! Design-space to surface mapping.
//!
//! One uniform scale is applied to the whole design so layers never warp;
//! the scaled design is centred on the target surface.

use serde::{Deserialize, Serialize};

use crate::layers::Position;

/// How a design is reconciled with a target of a different aspect ratio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitPolicy {
    /// Fill the target, cropping overflow symmetrically.
    #[default]
    Cover,
    /// Show the whole design, leaving background bars.
    Letterbox,
}

/// Integer pixel rectangle; may lie partly or fully outside the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> i64 {
        self.x + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y + self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn intersect(&self, other: &PixelRect) -> Option<PixelRect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x || bottom <= y {
            return None;
        }
        Some(PixelRect::new(x, y, (right - x) as u32, (bottom - y) as u32))
    }

    /// Shrink on every side; `None` once nothing is left.
    pub fn inset(&self, amount: u32) -> Option<PixelRect> {
        let twice = amount.saturating_mul(2);
        if self.width <= twice || self.height <= twice {
            return None;
        }
        Some(PixelRect::new(
            self.x + amount as i64,
            self.y + amount as i64,
            self.width - twice,
            self.height - twice,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub design_width: u32,
    pub design_height: u32,
    pub target_width: u32,
    pub target_height: u32,
}

impl Viewport {
    pub fn fit(
        design_width: u32,
        design_height: u32,
        target_width: u32,
        target_height: u32,
        policy: FitPolicy,
    ) -> Self {
        let scale_x = target_width as f64 / design_width as f64;
        let scale_y = target_height as f64 / design_height as f64;
        let scale = match policy {
            FitPolicy::Cover => scale_x.max(scale_y),
            FitPolicy::Letterbox => scale_x.min(scale_y),
        };
        Self {
            scale,
            offset_x: (target_width as f64 - design_width as f64 * scale) / 2.0,
            offset_y: (target_height as f64 - design_height as f64 * scale) / 2.0,
            design_width,
            design_height,
            target_width,
            target_height,
        }
    }

    /// Where the scaled design canvas lands on the surface.
    pub fn design_rect(&self) -> PixelRect {
        self.map(&Position::new(0.0, 0.0, 1.0, 1.0))
    }

    /// Map a normalized position to surface pixels. Edges are rounded
    /// independently so adjacent layers share their boundary exactly.
    pub fn map(&self, position: &Position) -> PixelRect {
        let span_x = self.design_width as f64 * self.scale;
        let span_y = self.design_height as f64 * self.scale;
        let left = (self.offset_x + position.x * span_x).round() as i64;
        let right = (self.offset_x + (position.x + position.width) * span_x).round() as i64;
        let top = (self.offset_y + position.y * span_y).round() as i64;
        let bottom = (self.offset_y + (position.y + position.height) * span_y).round() as i64;
        PixelRect::new(
            left,
            top,
            (right - left).max(0) as u32,
            (bottom - top).max(0) as u32,
        )
    }

    /// Scale a design-space length (font size, stroke width) to pixels.
    pub fn length(&self, design_px: f32) -> f32 {
        (design_px as f64 * self.scale) as f32
    }
}
