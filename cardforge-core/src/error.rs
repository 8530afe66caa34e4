//! Error taxonomy shared by every stage of the engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layers::{LayerId, LayerType};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Invalid template {0}: {1}")]
    InvalidTemplate(String, String),

    #[error("Layer not found: {0}")]
    LayerNotFound(LayerId),

    #[error("Layer binds unknown field '{field}' of template {template_id}")]
    UnknownFieldBinding { template_id: String, field: String },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid style: {0}")]
    InvalidStyle(String),

    #[error("Layer type is immutable: {from:?} cannot become {to:?}")]
    ImmutableLayerType { from: LayerType, to: LayerType },

    #[error("Reorder ids do not match the layers of template {0}")]
    OrderMismatch(String),

    #[error("Validation failed: missing [{}], invalid [{}]", missing.join(", "), invalid.join(", "))]
    Validation {
        missing: Vec<String>,
        invalid: Vec<String>,
    },

    #[error("Cannot decode content for layer {layer}: {reason}")]
    ContentDecode { layer: String, reason: String },

    #[error("Format not found: {0}")]
    FormatNotFound(String),

    #[error("Unsupported layer type for layer {layer}: {detail}")]
    UnsupportedLayerType { layer: String, detail: String },

    #[error("Composition error: {0}")]
    Composition(String),

    #[error("Render exceeded its {0} ms budget")]
    RenderTimeout(u64),

    #[error("Render cancelled")]
    RenderCancelled,

    #[error("Layout schema version {0} is not supported")]
    SchemaVersionUnsupported(String),

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Missing field names of a validation failure, empty for every other error.
    pub fn missing_fields(&self) -> &[String] {
        match self {
            EngineError::Validation { missing, .. } => missing,
            _ => &[],
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation { .. })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    ContentDecode,
    EmptyContent,
    InvalidStyle,
}

/// Non-fatal problem attached to a single layer of a render.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LayerWarning {
    pub layer_id: LayerId,
    pub layer_name: String,
    pub kind: WarningKind,
    pub message: String,
}
