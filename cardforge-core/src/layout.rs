//! Layout Serializer
//!
//! A versioned, persistable snapshot of one template's layers. Documents are
//! plain JSON so they can be stored by whatever persistence the host uses.

use log::{debug, info};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::layers::Layer;
use crate::store::{LayerSnapshot, LayerStore};

pub const LAYOUT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LayoutDocument {
    pub version: String,
    pub template_id: String,
    pub layers: Vec<Layer>,
}

impl LayoutDocument {
    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::InvalidLayout(e.to_string()))
    }
}

/// Layers are written in ascending z order.
pub fn serialize(template_id: &str, layers: &[Layer]) -> LayoutDocument {
    let mut layers = layers.to_vec();
    layers.sort_by_key(|l| l.z_index);
    LayoutDocument {
        version: LAYOUT_VERSION.to_string(),
        template_id: template_id.to_string(),
        layers,
    }
}

/// Check a document and return its layers sorted by z. Every structural
/// problem is reported before anything is handed to a store.
pub fn deserialize(doc: &LayoutDocument) -> EngineResult<Vec<Layer>> {
    check_version(&doc.version)?;

    let mut ids = HashSet::new();
    let mut z_indices = HashSet::new();
    for layer in &doc.layers {
        if !ids.insert(layer.id) {
            return Err(EngineError::InvalidLayout(format!("duplicate layer id {}", layer.id)));
        }
        if !z_indices.insert(layer.z_index) {
            return Err(EngineError::InvalidLayout(format!("duplicate zIndex {}", layer.z_index)));
        }
        layer
            .position
            .validate()
            .map_err(|e| EngineError::InvalidLayout(format!("layer {}: {}", layer.name, e)))?;
        layer
            .style
            .validate()
            .map_err(|e| EngineError::InvalidLayout(format!("layer {}: {}", layer.name, e)))?;
    }

    let mut layers = doc.layers.clone();
    layers.sort_by_key(|l| l.z_index);
    Ok(layers)
}

/// Replace the layers of `template_id` with the document's. A document saved
/// from another template is copied: every layer gets a fresh id.
pub fn restore(store: &LayerStore, template_id: &str, doc: &LayoutDocument) -> EngineResult<LayerSnapshot> {
    let mut layers = deserialize(doc)?;
    if doc.template_id != template_id {
        for layer in &mut layers {
            layer.id = Uuid::new_v4();
        }
        info!(
            "copying {} layers from {} onto {}",
            layers.len(),
            doc.template_id,
            template_id
        );
    }
    let snapshot = store.replace_all(template_id, layers)?;
    debug!("restored {} layers into {}", snapshot.len(), template_id);
    Ok(snapshot)
}

/// Accepts `1.0` and any `1.0.x`; older and newer schemas are refused.
fn check_version(version: &str) -> EngineResult<()> {
    let unsupported = || EngineError::SchemaVersionUnsupported(version.to_string());
    let normalized = match version.split('.').count() {
        2 => format!("{}.0", version),
        _ => version.to_string(),
    };
    let parsed = Version::parse(&normalized).map_err(|_| unsupported())?;
    if parsed.major == 1 && parsed.minor == 0 && parsed.pre.is_empty() {
        Ok(())
    } else {
        Err(unsupported())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{LayerSpec, LayerStyle, LayerType, Position, Shadow, ShapeKind};
    use crate::templates::{FieldDecl, FieldType, Template, TemplateRegistry};
    use std::sync::Arc;

    fn layers() -> Vec<Layer> {
        let mut style = LayerStyle::default();
        style.shadow = Some(Shadow {
            color: "#00000080".to_string(),
            offset_x: 2.0,
            offset_y: 3.0,
            blur: 4.0,
        });
        style.opacity = 0.75;
        let mut badge = LayerSpec::new("badge", LayerType::Shape, Position::new(0.7, 0.05, 0.2, 0.1));
        badge.shape = Some(ShapeKind::Ellipse);
        badge.visible = false;
        vec![
            LayerSpec::new("name", LayerType::Text, Position::new(0.1, 0.1, 0.8, 0.2))
                .bound_to("recipient")
                .with_style(style)
                .into_layer(Uuid::new_v4(), 4),
            badge.into_layer(Uuid::new_v4(), 1),
            LayerSpec::new("title", LayerType::Text, Position::new(0.0, 0.0, 1.0, 0.1))
                .with_text("You're invited")
                .into_layer(Uuid::new_v4(), 2),
        ]
    }

    fn store() -> LayerStore {
        let template = |id: &str| Template {
            id: id.to_string(),
            title: id.to_string(),
            design_width: 1000,
            design_height: 1400,
            background: "#FFFFFF".to_string(),
            fields: vec![FieldDecl::new("recipient", FieldType::Text, true)],
        };
        let mut registry = TemplateRegistry::new();
        registry.register(template("wedding")).unwrap();
        registry.register(template("birthday")).unwrap();
        LayerStore::new(Arc::new(registry))
    }

    #[test]
    fn test_round_trip_through_json() {
        let mut original = layers();
        original.sort_by_key(|l| l.z_index);

        let json = serialize("wedding", &original).to_json().unwrap();
        let doc = LayoutDocument::from_json(&json).unwrap();
        assert_eq!(doc.version, "1.0");
        assert_eq!(deserialize(&doc).unwrap(), original);
    }

    #[test]
    fn test_version_gate() {
        let mut doc = serialize("wedding", &layers());
        for accepted in ["1.0", "1.0.0", "1.0.3"] {
            doc.version = accepted.to_string();
            assert!(deserialize(&doc).is_ok(), "{} should be accepted", accepted);
        }
        for refused in ["2.0", "1.1", "0.9", "banana", "1.0.0-beta"] {
            doc.version = refused.to_string();
            assert!(
                matches!(deserialize(&doc), Err(EngineError::SchemaVersionUnsupported(_))),
                "{} should be refused",
                refused
            );
        }
    }

    #[test]
    fn test_structural_problems_rejected() {
        let mut doc = serialize("wedding", &layers());
        doc.layers[1].z_index = doc.layers[0].z_index;
        assert!(matches!(deserialize(&doc), Err(EngineError::InvalidLayout(_))));

        let mut doc = serialize("wedding", &layers());
        doc.layers[1].id = doc.layers[0].id;
        assert!(matches!(deserialize(&doc), Err(EngineError::InvalidLayout(_))));

        let mut doc = serialize("wedding", &layers());
        doc.layers[0].position.width = 0.0;
        assert!(matches!(deserialize(&doc), Err(EngineError::InvalidLayout(_))));

        for bad in [r#"{"opacity": 2.0}"#, r#"{"fontSize": -12}"#, r#"{"strokeWidth": -1}"#] {
            let mut doc = serialize("wedding", &layers());
            doc.layers[0].style = serde_json::from_str(bad).unwrap();
            assert!(matches!(deserialize(&doc), Err(EngineError::InvalidLayout(_))), "{}", bad);
        }

        assert!(matches!(
            LayoutDocument::from_json(r#"{"version": "1.0"}"#),
            Err(EngineError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_restore_same_template_keeps_ids() {
        let store = store();
        let doc = serialize("wedding", &layers());
        let restored = restore(&store, "wedding", &doc).unwrap();
        let ids: Vec<_> = restored.iter().map(|l| l.id).collect();
        let expected: Vec<_> = doc.layers.iter().map(|l| l.id).collect();
        assert_eq!(ids, expected);
        assert_eq!(store.get(ids[0]).unwrap().name, "badge");
    }

    #[test]
    fn test_restore_onto_other_template_copies() {
        let store = store();
        let doc = serialize("wedding", &layers());
        restore(&store, "wedding", &doc).unwrap();
        let copied = restore(&store, "birthday", &doc).unwrap();

        assert_eq!(copied.len(), 3);
        for layer in copied.iter() {
            assert!(doc.layers.iter().all(|l| l.id != layer.id));
        }
        assert_eq!(store.list("wedding").unwrap().len(), 3);
    }

    #[test]
    fn test_restore_checks_bindings() {
        let store = store();
        let mut doc = serialize("wedding", &layers());
        doc.layers[0].field_name = Some("nickname".to_string());
        assert!(matches!(
            restore(&store, "wedding", &doc),
            Err(EngineError::UnknownFieldBinding { .. })
        ));
        assert!(store.list("wedding").unwrap().is_empty());
    }
}
