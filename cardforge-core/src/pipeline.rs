//! Render Pipeline - Single Entry Point
//!
//! CRITICAL: render MUST resolve (and therefore validate) field values
//! before anything is painted. No bypass.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, info};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::binding::{AssetSource, BindingResolver, FsAssetSource, NoAssets};
use crate::compose::{CancelToken, Compositor, Deadline, RenderContext};
use crate::config::EngineConfig;
use crate::encode::{encode, Encoding, Quality};
use crate::error::{EngineError, EngineResult, LayerWarning};
use crate::fields::FieldValues;
use crate::formats::{FormatCatalog, JsonFileSource};
use crate::geometry::FitPolicy;
use crate::hashing::{compute_fingerprint, sha256_hex};
use crate::store::LayerStore;
use crate::templates::{Template, TemplateRegistry};
use crate::text::TextRasterizer;
use crate::ENGINE_VERSION;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    pub template_id: String,
    #[serde(default)]
    pub field_values: FieldValues,
    pub format_key: String,
    /// Falls back to the configured default encoding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<Encoding>,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark: Option<String>,
    /// Overrides the configured fit policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fit: Option<FitPolicy>,
}

impl RenderRequest {
    pub fn new(template_id: &str, format_key: &str, field_values: FieldValues) -> Self {
        Self {
            template_id: template_id.to_string(),
            field_values,
            format_key: format_key.to_string(),
            encoding: None,
            quality: Quality::default(),
            watermark: None,
            fit: None,
        }
    }

    /// Cache key: identical requests against the same engine version share it.
    pub fn fingerprint(&self) -> EngineResult<String> {
        Ok(compute_fingerprint(&self.template_id, self, ENGINE_VERSION)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResult {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format_key: String,
    pub encoding: Encoding,
    pub mime_type: String,
    /// SHA-256 of `bytes`.
    pub digest: String,
    pub fingerprint: String,
    pub warnings: Vec<LayerWarning>,
}

impl RenderResult {
    pub fn data_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

/// The render pipeline - single entry point for producing images
pub struct RenderPipeline {
    store: Arc<LayerStore>,
    catalog: FormatCatalog,
    assets: Arc<dyn AssetSource>,
    resolver: BindingResolver,
    compositor: Compositor,
    config: EngineConfig,
    pool: ThreadPool,
}

impl RenderPipeline {
    pub fn new(
        store: Arc<LayerStore>,
        catalog: FormatCatalog,
        assets: Arc<dyn AssetSource>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let rasterizer = TextRasterizer::new();
        for dir in &config.font_dirs {
            rasterizer.load_fonts_dir(dir);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("cardforge-render-{}", i))
            .build()
            .map_err(|e| EngineError::Composition(format!("cannot start render workers: {}", e)))?;
        info!(
            "render pipeline ready: {} templates, {} formats ({}), {} workers",
            store.templates().list().len(),
            catalog.list_all().len(),
            if catalog.is_live() { "live" } else { "built-in" },
            pool.current_num_threads()
        );
        Ok(Self {
            store,
            catalog,
            assets,
            resolver: BindingResolver::new(),
            compositor: Compositor::with_rasterizer(rasterizer),
            config,
            pool,
        })
    }

    /// Wire a pipeline from configuration alone: empty layer store, catalog
    /// from `formats_path`, assets from `asset_root`.
    pub fn from_config(templates: TemplateRegistry, config: EngineConfig) -> EngineResult<Self> {
        let store = Arc::new(LayerStore::new(Arc::new(templates)));
        let catalog = match &config.formats_path {
            Some(path) => FormatCatalog::load(&JsonFileSource::new(path)),
            None => FormatCatalog::builtin(),
        };
        let assets: Arc<dyn AssetSource> = match &config.asset_root {
            Some(root) => Arc::new(FsAssetSource::new(root)),
            None => Arc::new(NoAssets),
        };
        Self::new(store, catalog, assets, config)
    }

    pub fn store(&self) -> &LayerStore {
        &self.store
    }

    pub fn catalog(&self) -> &FormatCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// List all available templates
    pub fn list_templates(&self) -> Vec<&Template> {
        self.store.templates().list()
    }

    pub fn render(&self, request: &RenderRequest) -> EngineResult<RenderResult> {
        self.render_with(request, CancelToken::default())
    }

    /// Render with a caller-held cancellation token. Cancellation and the
    /// configured time budget are checked between layers and once more after
    /// encoding, so a render that overran its budget is never returned.
    pub fn render_with(&self, request: &RenderRequest, cancel: CancelToken) -> EngineResult<RenderResult> {
        let deadline = self.config.render_budget().map(Deadline::after);
        let template = self
            .store
            .templates()
            .get(&request.template_id)
            .ok_or_else(|| EngineError::TemplateNotFound(request.template_id.clone()))?;
        let format = self.catalog.get(&request.format_key)?.clone();
        let layers = self.store.list(&template.id)?;

        // MANDATORY: binding validates every bound field. This is non-negotiable.
        let resolved = self
            .resolver
            .resolve(template, &layers, &request.field_values, self.assets.as_ref())?;

        let mut ctx = RenderContext::new(template.design_width, template.design_height, format);
        ctx.policy = request.fit.unwrap_or(self.config.fit_policy);
        ctx.background = template.background.clone();
        ctx.watermark = request.watermark.clone();
        ctx.cancel = cancel;
        ctx.deadline = deadline;
        ctx.checkpoint()?;

        let composition = self.compositor.compose(&resolved, &ctx)?;
        let encoding = request.encoding.unwrap_or(self.config.default_encoding);
        let bytes = encode(&composition.image, encoding, request.quality)?;
        ctx.checkpoint()?;
        let digest = sha256_hex(&bytes);
        debug!(
            "rendered {} as {} ({:?}, {} bytes, digest {})",
            template.id,
            ctx.format.key,
            encoding,
            bytes.len(),
            digest
        );

        Ok(RenderResult {
            width: composition.image.width(),
            height: composition.image.height(),
            bytes,
            format_key: ctx.format.key,
            encoding,
            mime_type: encoding.mime_type().to_string(),
            digest,
            fingerprint: request.fingerprint()?,
            warnings: composition.warnings,
        })
    }

    /// Render many requests on the worker pool. Results keep the input order
    /// and a failing request never affects the others.
    pub fn render_batch(&self, requests: &[RenderRequest]) -> Vec<EngineResult<RenderResult>> {
        let results: Vec<_> = self
            .pool
            .install(|| requests.par_iter().map(|request| self.render(request)).collect());
        let failed = results.iter().filter(|r| r.is_err()).count();
        info!("batch of {} rendered, {} failed", requests.len(), failed);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldValue;
    use crate::layers::{LayerSpec, LayerStyle, LayerType, Position};
    use crate::templates::{FieldDecl, FieldType};

    fn pipeline(config: EngineConfig) -> RenderPipeline {
        let mut registry = TemplateRegistry::new();
        registry
            .register(Template {
                id: "invite".to_string(),
                title: "Invite".to_string(),
                design_width: 1000,
                design_height: 1400,
                background: "#FFFFFF".to_string(),
                fields: vec![
                    FieldDecl::new("recipient", FieldType::Text, true),
                    FieldDecl::new("rsvp", FieldType::Checkbox, false),
                ],
            })
            .unwrap();
        let pipeline = RenderPipeline::from_config(registry, config).unwrap();
        let store = pipeline.store();
        let band = LayerStyle {
            fill: Some("#336699".to_string()),
            ..LayerStyle::default()
        };
        store
            .create(
                "invite",
                LayerSpec::new("band", LayerType::Shape, Position::new(0.0, 0.4, 1.0, 0.2)).with_style(band),
            )
            .unwrap();
        store
            .create(
                "invite",
                LayerSpec::new("name", LayerType::Text, Position::new(0.1, 0.1, 0.8, 0.2)).bound_to("recipient"),
            )
            .unwrap();
        pipeline
    }

    fn request(format: &str, recipient: Option<&str>) -> RenderRequest {
        let mut values = FieldValues::new();
        if let Some(name) = recipient {
            values.insert("recipient".to_string(), FieldValue::text(name));
        }
        RenderRequest::new("invite", format, values)
    }

    #[test]
    fn test_render_produces_preset_size_png() {
        let pipeline = pipeline(EngineConfig::default());
        let result = pipeline.render(&request("whatsapp", Some("Ana"))).unwrap();
        assert_eq!((result.width, result.height), (800, 800));
        assert_eq!(result.encoding, Encoding::Png);
        assert_eq!(result.mime_type, "image/png");
        assert_eq!(result.digest, sha256_hex(&result.bytes));

        let decoded = image::load_from_memory(&result.bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (800, 800));
        // The band spans 40%..60% of the design height; 800px square crops
        // the 1000x1400 design symmetrically so its centre stays centred.
        assert_eq!(*decoded.get_pixel(400, 400), image::Rgba([0x33, 0x66, 0x99, 255]));
        assert_eq!(*decoded.get_pixel(5, 5), image::Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_missing_recipient_reported() {
        let pipeline = pipeline(EngineConfig::default());
        let err = pipeline.render(&request("instagram", None)).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.missing_fields(), ["recipient"]);
    }

    #[test]
    fn test_unknown_format_and_template() {
        let pipeline = pipeline(EngineConfig::default());
        assert!(matches!(
            pipeline.render(&request("billboard", Some("Ana"))),
            Err(EngineError::FormatNotFound(_))
        ));
        let mut missing = request("instagram", Some("Ana"));
        missing.template_id = "nope".to_string();
        assert!(matches!(pipeline.render(&missing), Err(EngineError::TemplateNotFound(_))));
    }

    #[test]
    fn test_identical_requests_identical_output() {
        let pipeline = pipeline(EngineConfig::default());
        let a = pipeline.render(&request("twitter", Some("Ana"))).unwrap();
        let b = pipeline.render(&request("twitter", Some("Ana"))).unwrap();
        assert_eq!(a.bytes, b.bytes);
        assert_eq!(a.digest, b.digest);
        assert_eq!(a.fingerprint, b.fingerprint);

        let c = pipeline.render(&request("twitter", Some("Bea"))).unwrap();
        assert_ne!(a.fingerprint, c.fingerprint);
    }

    #[test]
    fn test_jpeg_and_overrides() {
        let config = EngineConfig {
            default_encoding: Encoding::Jpeg,
            ..EngineConfig::default()
        };
        let pipeline = pipeline(config);
        let mut req = request("instagram", Some("Ana"));
        req.quality = Quality::Preview;
        let jpeg = pipeline.render(&req).unwrap();
        assert_eq!(jpeg.encoding, Encoding::Jpeg);
        assert_eq!(jpeg.mime_type, "image/jpeg");
        assert_eq!(&jpeg.bytes[..2], &[0xFF, 0xD8]);

        req.encoding = Some(Encoding::Png);
        req.fit = Some(FitPolicy::Letterbox);
        let png = pipeline.render(&req).unwrap();
        let decoded = image::load_from_memory(&png.bytes).unwrap().to_rgba8();
        // Letterboxed portrait design leaves background bars left and right
        // even across the band.
        assert_eq!(*decoded.get_pixel(2, 540), image::Rgba([255, 255, 255, 255]));
        assert_eq!(*decoded.get_pixel(540, 540), image::Rgba([0x33, 0x66, 0x99, 255]));
    }

    #[test]
    fn test_cancelled_render() {
        let pipeline = pipeline(EngineConfig::default());
        let cancel = CancelToken::default();
        cancel.cancel();
        assert!(matches!(
            pipeline.render_with(&request("instagram", Some("Ana")), cancel),
            Err(EngineError::RenderCancelled)
        ));
    }

    #[test]
    fn test_overrun_budget_fails_the_render() {
        let pipeline = pipeline(EngineConfig {
            render_timeout_ms: 1,
            ..EngineConfig::default()
        });
        let request = RenderRequest {
            quality: Quality::Download,
            ..request("pinterest", Some("Ana"))
        };
        assert!(matches!(pipeline.render(&request), Err(EngineError::RenderTimeout(1))));
    }

    #[test]
    fn test_batch_keeps_order_and_isolates_failures() {
        let pipeline = pipeline(EngineConfig {
            worker_threads: 2,
            ..EngineConfig::default()
        });
        let requests = vec![
            request("instagram", Some("Ana")),
            request("instagram", None),
            request("pinterest", Some("Ana")),
        ];
        let results = pipeline.render_batch(&requests);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().format_key, "instagram");
        assert!(results[1].as_ref().unwrap_err().is_validation());
        assert_eq!(results[2].as_ref().unwrap().height, 1500);
    }

    #[test]
    fn test_result_json_omits_bytes() {
        let pipeline = pipeline(EngineConfig::default());
        let result = pipeline.render(&request("whatsapp", Some("Ana"))).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("bytes").is_none());
        assert_eq!(json["formatKey"], "whatsapp");
        assert_eq!(json["encoding"], "png");
        assert!(!result.data_base64().is_empty());
    }
}
