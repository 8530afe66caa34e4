//! Layer model - positioned, styled visual elements of a template.
//!
//! Positions are normalized to the template's design space (top-left origin,
//! `[0, 1]` on both axes). Paint order is ascending `z_index`.

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

pub type LayerId = Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    Text,
    Image,
    Shape,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    #[default]
    Rect,
    Ellipse,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let components = [
            ("x", self.x),
            ("y", self.y),
            ("width", self.width),
            ("height", self.height),
        ];
        for (name, value) in components {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(EngineError::InvalidGeometry(format!(
                    "{} = {} is outside [0, 1]",
                    name, value
                )));
            }
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(EngineError::InvalidGeometry(format!(
                "degenerate size {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// CSS font weight, `100..=900`. Serialized as `"normal"`, `"bold"` or a number.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "WeightValue", into = "WeightValue")]
pub struct FontWeight(u16);

impl FontWeight {
    pub const NORMAL: FontWeight = FontWeight(400);
    pub const BOLD: FontWeight = FontWeight(700);

    pub fn new(weight: u16) -> Result<Self, String> {
        if (100..=900).contains(&weight) {
            Ok(FontWeight(weight))
        } else {
            Err(format!("font weight {} is outside 100..=900", weight))
        }
    }

    pub fn value(self) -> u16 {
        self.0
    }
}

impl Default for FontWeight {
    fn default() -> Self {
        FontWeight::NORMAL
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WeightValue {
    Number(u16),
    Keyword(String),
}

impl TryFrom<WeightValue> for FontWeight {
    type Error = String;

    fn try_from(value: WeightValue) -> Result<Self, Self::Error> {
        match value {
            WeightValue::Number(n) => FontWeight::new(n),
            WeightValue::Keyword(k) => match k.as_str() {
                "normal" => Ok(FontWeight::NORMAL),
                "bold" => Ok(FontWeight::BOLD),
                other => other
                    .parse::<u16>()
                    .map_err(|_| format!("unknown font weight '{}'", other))
                    .and_then(FontWeight::new),
            },
        }
    }
}

impl From<FontWeight> for WeightValue {
    fn from(weight: FontWeight) -> Self {
        match weight {
            FontWeight::NORMAL => WeightValue::Keyword("normal".to_string()),
            FontWeight::BOLD => WeightValue::Keyword("bold".to_string()),
            FontWeight(n) => WeightValue::Number(n),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Left,
    #[default]
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerticalAlign {
    #[default]
    Top,
    Middle,
    Bottom,
}

/// How image content is fitted into its layer rectangle.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ObjectFit {
    #[default]
    Cover,
    Contain,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Shadow {
    pub color: String,
    #[serde(default)]
    pub offset_x: f32,
    #[serde(default)]
    pub offset_y: f32,
    /// Gaussian blur radius in design pixels; 0 draws a hard shadow.
    #[serde(default)]
    pub blur: f32,
}

/// Visual style. Sizes are design-space pixels and scale with the output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LayerStyle {
    pub font_family: String,
    pub font_size: f32,
    pub font_weight: FontWeight,
    pub color: String,
    pub align: TextAlign,
    pub vertical_align: VerticalAlign,
    pub line_height: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    pub stroke_width: f32,
    pub object_fit: ObjectFit,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow: Option<Shadow>,
    pub opacity: f32,
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self {
            font_family: "sans-serif".to_string(),
            font_size: 24.0,
            font_weight: FontWeight::NORMAL,
            color: "#000000".to_string(),
            align: TextAlign::Center,
            vertical_align: VerticalAlign::Top,
            line_height: 1.3,
            fill: None,
            stroke: None,
            stroke_width: 0.0,
            object_fit: ObjectFit::Cover,
            shadow: None,
            opacity: 1.0,
        }
    }
}

impl LayerStyle {
    /// Reject numbers the renderer cannot honour instead of clamping them.
    pub fn validate(&self) -> Result<(), EngineError> {
        let positive = [("fontSize", self.font_size), ("lineHeight", self.line_height)];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(EngineError::InvalidStyle(format!("{} = {} must be positive", name, value)));
            }
        }
        let mut non_negative = vec![("strokeWidth", self.stroke_width)];
        if let Some(shadow) = &self.shadow {
            if !shadow.offset_x.is_finite() || !shadow.offset_y.is_finite() {
                return Err(EngineError::InvalidStyle("shadow offset is not finite".to_string()));
            }
            non_negative.push(("shadow.blur", shadow.blur));
        }
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::InvalidStyle(format!("{} = {} is negative", name, value)));
            }
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(EngineError::InvalidStyle(format!("opacity = {} is outside [0, 1]", self.opacity)));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<ShapeKind>,
    pub position: Position,
    #[serde(default)]
    pub style: LayerStyle,
    pub z_index: u32,
    #[serde(default = "default_true")]
    pub visible: bool,
}

/// Everything needed to create a layer; the store assigns id and z-index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LayerSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    #[serde(default)]
    pub field_name: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub shape: Option<ShapeKind>,
    pub position: Position,
    #[serde(default)]
    pub style: LayerStyle,
    #[serde(default = "default_true")]
    pub visible: bool,
}

impl LayerSpec {
    pub fn new(name: &str, layer_type: LayerType, position: Position) -> Self {
        Self {
            name: name.to_string(),
            layer_type,
            field_name: None,
            text: None,
            image_url: None,
            shape: None,
            position,
            style: LayerStyle::default(),
            visible: true,
        }
    }

    pub fn bound_to(mut self, field: &str) -> Self {
        self.field_name = Some(field.to_string());
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn with_style(mut self, style: LayerStyle) -> Self {
        self.style = style;
        self
    }

    pub fn into_layer(self, id: LayerId, z_index: u32) -> Layer {
        Layer {
            id,
            name: self.name,
            layer_type: self.layer_type,
            field_name: self.field_name,
            text: self.text,
            image_url: self.image_url,
            shape: self.shape,
            position: self.position,
            style: self.style,
            z_index,
            visible: self.visible,
        }
    }
}

/// Partial update. `None` leaves a property untouched; the nested options
/// of `field_name`, `text` and `image_url` allow clearing them.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LayerPatch {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub layer_type: Option<LayerType>,
    #[serde(deserialize_with = "double_option")]
    pub field_name: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub text: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub image_url: Option<Option<String>>,
    pub shape: Option<ShapeKind>,
    pub position: Option<Position>,
    pub style: Option<LayerStyle>,
    pub visible: Option<bool>,
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl Layer {
    /// Apply a patch to a copy of this layer. Type changes are rejected.
    pub fn patched(&self, patch: LayerPatch) -> Result<Layer, EngineError> {
        if let Some(to) = patch.layer_type {
            if to != self.layer_type {
                return Err(EngineError::ImmutableLayerType {
                    from: self.layer_type,
                    to,
                });
            }
        }
        let mut layer = self.clone();
        if let Some(name) = patch.name {
            layer.name = name;
        }
        if let Some(field_name) = patch.field_name {
            layer.field_name = field_name;
        }
        if let Some(text) = patch.text {
            layer.text = text;
        }
        if let Some(image_url) = patch.image_url {
            layer.image_url = image_url;
        }
        if let Some(shape) = patch.shape {
            layer.shape = Some(shape);
        }
        if let Some(position) = patch.position {
            position.validate()?;
            layer.position = position;
        }
        if let Some(style) = patch.style {
            style.validate()?;
            layer.style = style;
        }
        if let Some(visible) = patch.visible {
            layer.visible = visible;
        }
        Ok(layer)
    }
}
