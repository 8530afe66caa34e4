//! CardForge Core - Layer-Based Template Composition Engine
//!
//! # Guarantees
//! 1. Templates Are Read-Only Contracts
//! 2. The Layer Store Owns Z-Order
//! 3. Every Render Validates Its Fields
//! 4. Identical Inputs Give Identical Pixels
//! 5. A Broken Layer Never Breaks The Render

pub mod error;
pub mod templates;
pub mod layers;
pub mod store;
pub mod formats;
pub mod fields;
pub mod validation;
pub mod binding;
pub mod geometry;
pub mod raster;
pub mod text;
pub mod compose;
pub mod encode;
pub mod layout;
pub mod hashing;
pub mod config;
pub mod pipeline;

pub use error::{EngineError, EngineResult, LayerWarning, WarningKind};
pub use templates::{FieldDecl, FieldType, Template, TemplateId, TemplateRegistry};
pub use layers::{Layer, LayerId, LayerPatch, LayerSpec, LayerStyle, LayerType, Position};
pub use store::{LayerSnapshot, LayerStore};
pub use formats::{FormatAuthority, FormatCatalog, FormatPreset, FormatSource};
pub use fields::{FieldValue, FieldValues};
pub use binding::{AssetSource, BindingResolver, FsAssetSource, LayerContent, ResolvedLayer, ResolvedLayers};
pub use geometry::{FitPolicy, Viewport};
pub use compose::{CancelToken, Compositor, RenderContext};
pub use encode::{Encoding, Quality};
pub use layout::{LayoutDocument, LAYOUT_VERSION};
pub use hashing::{canonical_json, compute_fingerprint, sha256_hex};
pub use config::EngineConfig;
pub use pipeline::{RenderPipeline, RenderRequest, RenderResult};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
