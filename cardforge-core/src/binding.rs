//! Field Binding Resolver
//!
//! Merges user field values into layer content and produces the immutable
//! `ResolvedLayer` sequence the compositor consumes. All I/O (asset loading,
//! image decoding) happens here so composition stays pure.

use image::RgbaImage;
use log::{debug, warn};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult, LayerWarning, WarningKind};
use crate::fields::{BoundValue, FieldValue, FieldValues, ImageSource};
use crate::layers::{Layer, LayerId, LayerStyle, LayerType, Position, ShapeKind};
use crate::templates::{FieldDecl, FieldType, Template};
use crate::validation::FieldValidator;

/// Loads the bytes behind an image URI.
pub trait AssetSource: Send + Sync {
    fn load(&self, uri: &str) -> Result<Vec<u8>, String>;
}

/// Serves assets from files below a root directory.
pub struct FsAssetSource {
    root: PathBuf,
}

impl FsAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetSource for FsAssetSource {
    fn load(&self, uri: &str) -> Result<Vec<u8>, String> {
        let relative = Path::new(uri.trim_start_matches("file://"));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(format!("'{}' escapes the asset root", uri));
        }
        fs::read(self.root.join(relative)).map_err(|e| format!("{}: {}", uri, e))
    }
}

/// Asset source that has nothing; every lookup fails.
pub struct NoAssets;

impl AssetSource for NoAssets {
    fn load(&self, uri: &str) -> Result<Vec<u8>, String> {
        Err(format!("no asset source configured for '{}'", uri))
    }
}

#[derive(Debug, Clone)]
pub enum LayerContent {
    Text(String),
    Image(Arc<RgbaImage>),
    Shape(ShapeKind),
    Empty,
}

impl LayerContent {
    pub fn is_empty(&self) -> bool {
        match self {
            LayerContent::Text(s) => s.is_empty(),
            LayerContent::Empty => true,
            _ => false,
        }
    }
}

/// A layer with concrete content, ready to paint.
#[derive(Debug, Clone)]
pub struct ResolvedLayer {
    pub id: LayerId,
    pub name: String,
    pub layer_type: LayerType,
    pub position: Position,
    pub style: LayerStyle,
    pub z_index: u32,
    pub visible: bool,
    pub content: LayerContent,
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedLayers {
    pub layers: Vec<ResolvedLayer>,
    pub warnings: Vec<LayerWarning>,
}

pub struct BindingResolver {
    validator: FieldValidator,
}

impl BindingResolver {
    pub fn new() -> Self {
        Self {
            validator: FieldValidator::new(),
        }
    }

    /// Resolve every layer. Missing or malformed field values fail the whole
    /// request at once; content that cannot be decoded only empties its layer.
    pub fn resolve(
        &self,
        template: &Template,
        layers: &[Layer],
        values: &FieldValues,
        assets: &dyn AssetSource,
    ) -> EngineResult<ResolvedLayers> {
        for layer in layers {
            if let Some(field) = &layer.field_name {
                if template.field(field).is_none() {
                    return Err(EngineError::UnknownFieldBinding {
                        template_id: template.id.clone(),
                        field: field.clone(),
                    });
                }
            }
        }

        let bound: Vec<&FieldDecl> = template
            .fields
            .iter()
            .filter(|decl| layers.iter().any(|l| l.field_name.as_deref() == Some(decl.name.as_str())))
            .collect();
        let report = self.validator.validate(bound, values);
        if report.has_errors() {
            return Err(EngineError::Validation {
                missing: report.missing(),
                invalid: report.invalid(),
            });
        }

        let mut ordered: Vec<&Layer> = layers.iter().collect();
        ordered.sort_by_key(|l| l.z_index);

        let mut resolved = ResolvedLayers::default();
        for layer in ordered {
            let content = match self.content(template, layer, values, assets) {
                Ok(content) => content,
                Err(reason) => {
                    let err = EngineError::ContentDecode {
                        layer: layer.name.clone(),
                        reason,
                    };
                    warn!("{}", err);
                    resolved.warnings.push(LayerWarning {
                        layer_id: layer.id,
                        layer_name: layer.name.clone(),
                        kind: WarningKind::ContentDecode,
                        message: err.to_string(),
                    });
                    LayerContent::Empty
                }
            };
            resolved.layers.push(ResolvedLayer {
                id: layer.id,
                name: layer.name.clone(),
                layer_type: layer.layer_type,
                position: layer.position,
                style: layer.style.clone(),
                z_index: layer.z_index,
                visible: layer.visible,
                content,
            });
        }
        debug!(
            "resolved {} layers of {} with {} warnings",
            resolved.layers.len(),
            template.id,
            resolved.warnings.len()
        );
        Ok(resolved)
    }

    fn content(
        &self,
        template: &Template,
        layer: &Layer,
        values: &FieldValues,
        assets: &dyn AssetSource,
    ) -> Result<LayerContent, String> {
        let Some(decl) = layer.field_name.as_deref().and_then(|f| template.field(f)) else {
            return static_content(layer, assets);
        };

        let provided = values.get(&decl.name).filter(|v| !v.is_blank());
        let value = match (provided, &decl.default) {
            (Some(value), _) => value.clone(),
            (None, Some(default)) => FieldValue::Text(default.clone()),
            (None, None) => return Ok(placeholder(decl)),
        };

        let bound = BoundValue::coerce(decl, &value)?;
        match (&bound, layer.layer_type) {
            (BoundValue::Image(source), _) => {
                let bytes = match source {
                    ImageSource::Bytes(bytes) => bytes.clone(),
                    ImageSource::Uri(uri) => assets.load(uri)?,
                };
                decode_image(&bytes).map(LayerContent::Image)
            }
            // A shape bound to a checkbox is shown only while it is ticked.
            (BoundValue::Checkbox(checked), LayerType::Shape) => Ok(if *checked {
                LayerContent::Shape(layer.shape.unwrap_or_default())
            } else {
                LayerContent::Empty
            }),
            _ => Ok(bound
                .display(decl)?
                .map_or(LayerContent::Empty, LayerContent::Text)),
        }
    }
}

impl Default for BindingResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn static_content(layer: &Layer, assets: &dyn AssetSource) -> Result<LayerContent, String> {
    match layer.layer_type {
        LayerType::Text => Ok(LayerContent::Text(layer.text.clone().unwrap_or_default())),
        LayerType::Shape => Ok(LayerContent::Shape(layer.shape.unwrap_or_default())),
        LayerType::Image => match &layer.image_url {
            Some(uri) => decode_image(&assets.load(uri)?).map(LayerContent::Image),
            None => Ok(LayerContent::Empty),
        },
    }
}

fn placeholder(decl: &FieldDecl) -> LayerContent {
    match decl.field_type {
        FieldType::Image => LayerContent::Empty,
        _ => LayerContent::Text(String::new()),
    }
}

fn decode_image(bytes: &[u8]) -> Result<Arc<RgbaImage>, String> {
    image::load_from_memory(bytes)
        .map(|img| Arc::new(img.to_rgba8()))
        .map_err(|e| format!("cannot decode image: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::LayerSpec;
    use uuid::Uuid;

    fn template() -> Template {
        let mut venue = FieldDecl::new("venue", FieldType::Text, false);
        venue.default = Some("Grand Hall".to_string());
        Template {
            id: "wedding".to_string(),
            title: "Wedding".to_string(),
            design_width: 1000,
            design_height: 1400,
            background: "#FFFFFF".to_string(),
            fields: vec![
                FieldDecl::new("recipient", FieldType::Text, true),
                FieldDecl::new("host", FieldType::Text, true),
                venue,
                FieldDecl::new("photo", FieldType::Image, false),
                FieldDecl::new("date", FieldType::Date, false),
            ],
        }
    }

    fn layer(name: &str, layer_type: LayerType, field: Option<&str>, z: u32) -> Layer {
        let mut spec = LayerSpec::new(name, layer_type, Position::new(0.1, 0.1, 0.5, 0.2));
        spec.field_name = field.map(str::to_string);
        spec.into_layer(Uuid::new_v4(), z)
    }

    fn png_bytes() -> Vec<u8> {
        let img = RgbaImage::from_pixel(4, 2, image::Rgba([200, 10, 10, 255]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_all_missing_fields_reported_together() {
        let layers = vec![
            layer("host", LayerType::Text, Some("host"), 0),
            layer("to", LayerType::Text, Some("recipient"), 1),
            layer("to again", LayerType::Text, Some("recipient"), 2),
        ];
        let err = BindingResolver::new()
            .resolve(&template(), &layers, &FieldValues::new(), &NoAssets)
            .unwrap_err();
        assert_eq!(err.missing_fields(), ["recipient", "host"]);
    }

    #[test]
    fn test_unbound_required_fields_are_not_checked() {
        let layers = vec![layer("title", LayerType::Text, None, 0)];
        let resolved = BindingResolver::new()
            .resolve(&template(), &layers, &FieldValues::new(), &NoAssets)
            .unwrap();
        assert_eq!(resolved.layers.len(), 1);
    }

    #[test]
    fn test_defaults_and_placeholders() {
        let layers = vec![
            layer("venue", LayerType::Text, Some("venue"), 0),
            layer("date", LayerType::Text, Some("date"), 1),
            layer("photo", LayerType::Image, Some("photo"), 2),
        ];
        let resolved = BindingResolver::new()
            .resolve(&template(), &layers, &FieldValues::new(), &NoAssets)
            .unwrap();
        assert!(matches!(&resolved.layers[0].content, LayerContent::Text(s) if s == "Grand Hall"));
        assert!(matches!(&resolved.layers[1].content, LayerContent::Text(s) if s.is_empty()));
        assert!(matches!(resolved.layers[2].content, LayerContent::Empty));
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn test_broken_image_degrades_to_warning() {
        let layers = vec![
            layer("photo", LayerType::Image, Some("photo"), 0),
            layer("date", LayerType::Text, Some("date"), 1),
        ];
        let mut values = FieldValues::new();
        values.insert("photo".to_string(), FieldValue::Bytes(b"not an image".to_vec()));
        values.insert("date".to_string(), FieldValue::text("2025-04-25"));

        let resolved = BindingResolver::new()
            .resolve(&template(), &layers, &values, &NoAssets)
            .unwrap();
        assert!(matches!(resolved.layers[0].content, LayerContent::Empty));
        assert_eq!(resolved.warnings.len(), 1);
        assert_eq!(resolved.warnings[0].kind, WarningKind::ContentDecode);
        assert_eq!(resolved.warnings[0].layer_id, layers[0].id);
        assert!(matches!(&resolved.layers[1].content, LayerContent::Text(s) if s == "25 Apr 2025"));
    }

    #[test]
    fn test_images_load_from_asset_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("logo.png"), png_bytes()).unwrap();
        let assets = FsAssetSource::new(dir.path());

        let mut static_logo = layer("logo", LayerType::Image, None, 0);
        static_logo.image_url = Some("logo.png".to_string());
        let mut values = FieldValues::new();
        values.insert("photo".to_string(), FieldValue::text("logo.png"));
        let layers = vec![static_logo, layer("photo", LayerType::Image, Some("photo"), 1)];

        let resolved = BindingResolver::new()
            .resolve(&template(), &layers, &values, &assets)
            .unwrap();
        for layer in &resolved.layers {
            match &layer.content {
                LayerContent::Image(img) => assert_eq!(img.dimensions(), (4, 2)),
                other => panic!("expected image, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_asset_root_cannot_be_escaped() {
        let dir = tempfile::tempdir().unwrap();
        let assets = FsAssetSource::new(dir.path());
        assert!(assets.load("../secret.png").is_err());
        assert!(assets.load("/etc/passwd").is_err());
    }

    #[test]
    fn test_output_follows_z_order() {
        let layers = vec![
            layer("top", LayerType::Shape, None, 5),
            layer("bottom", LayerType::Shape, None, 1),
        ];
        let resolved = BindingResolver::new()
            .resolve(&template(), &layers, &FieldValues::new(), &NoAssets)
            .unwrap();
        let names: Vec<_> = resolved.layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["bottom", "top"]);
    }
}
