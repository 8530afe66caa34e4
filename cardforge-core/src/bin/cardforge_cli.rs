//! CardForge CLI - Bridge interface for the form and batch tooling
//!
//! Commands: formats, templates, check-layout, render
//! Outputs JSON to stdout
//! Returns 2 on validation failure, 1 on any other failure

use clap::{Parser, Subcommand};
use log::debug;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use cardforge_core::{
    layout, EngineConfig, EngineError, EngineResult, Encoding, FieldValues, FitPolicy, LayoutDocument, Quality,
    RenderPipeline, RenderRequest, TemplateRegistry,
};

#[derive(Parser)]
#[command(name = "cardforge-cli")]
#[command(about = "CardForge CLI - layer-based template renderer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to templates directory
    #[arg(short, long, default_value = "templates")]
    templates_dir: PathBuf,

    /// Engine configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Live format catalog document; overrides the configured one
    #[arg(short, long)]
    formats: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List output format presets
    Formats,

    /// List available templates
    Templates,

    /// Check a layout document against its template
    CheckLayout {
        /// Layout document (JSON)
        #[arg(short, long)]
        layout: PathBuf,

        /// Template to apply the layout to; defaults to the document's own
        #[arg(short, long)]
        template: Option<String>,
    },

    /// Render a layout with field values
    Render {
        /// Layout document (JSON)
        #[arg(short, long)]
        layout: PathBuf,

        /// Output format key (e.g. instagram)
        #[arg(short = 'k', long)]
        format: String,

        /// Field values as a JSON object
        #[arg(short, long, default_value = "{}")]
        values: String,

        /// Template to apply the layout to; defaults to the document's own
        #[arg(short, long)]
        template: Option<String>,

        #[arg(short, long, value_parser = parse_keyword::<Encoding>)]
        encoding: Option<Encoding>,

        #[arg(short, long, value_parser = parse_keyword::<Quality>, default_value = "high")]
        quality: Quality,

        #[arg(short, long)]
        watermark: Option<String>,

        /// cover or letterbox
        #[arg(long, value_parser = parse_keyword::<FitPolicy>)]
        fit: Option<FitPolicy>,

        /// Write the image here; otherwise it is embedded as base64. A path
        /// without an extension gets the encoding's one.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(output) => {
            println!("{:#}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            let mut output = json!({
                "success": false,
                "error": e.to_string(),
            });
            if let EngineError::Validation { missing, invalid } = &e {
                output["missing"] = json!(missing);
                output["invalid"] = json!(invalid);
            }
            println!("{:#}", output);
            if e.is_validation() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: Cli) -> EngineResult<Value> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if cli.formats.is_some() {
        config.formats_path = cli.formats.clone();
    }
    let registry = TemplateRegistry::load_from_dir(&cli.templates_dir)?;
    debug!("loaded {} templates from {}", registry.list().len(), cli.templates_dir.display());
    let pipeline = RenderPipeline::from_config(registry, config)?;

    match cli.command {
        Commands::Formats => {
            let catalog = pipeline.catalog();
            Ok(json!({
                "live": catalog.is_live(),
                "formats": catalog.list_all(),
            }))
        }

        Commands::Templates => {
            let templates: Vec<_> = pipeline
                .list_templates()
                .iter()
                .map(|t| {
                    json!({
                        "id": t.id,
                        "title": t.title,
                        "designWidth": t.design_width,
                        "designHeight": t.design_height,
                        "fields": t.fields,
                    })
                })
                .collect();
            Ok(Value::Array(templates))
        }

        Commands::CheckLayout { layout: path, template } => {
            let (template_id, layers) = restore(&pipeline, &path, template)?;
            Ok(json!({
                "valid": true,
                "templateId": template_id,
                "layers": layers,
            }))
        }

        Commands::Render {
            layout: path,
            format,
            values,
            template,
            encoding,
            quality,
            watermark,
            fit,
            out,
        } => {
            let (template_id, _) = restore(&pipeline, &path, template)?;
            let field_values: FieldValues = serde_json::from_str(&values)?;
            let request = RenderRequest {
                encoding,
                quality,
                watermark,
                fit,
                ..RenderRequest::new(&template_id, &format, field_values)
            };

            let result = pipeline.render(&request)?;
            let mut output = json!({
                "success": true,
                "result": result,
            });
            match out {
                Some(mut out) => {
                    if out.extension().is_none() {
                        out.set_extension(result.encoding.extension());
                    }
                    fs::write(&out, &result.bytes)?;
                    output["path"] = json!(out);
                }
                None => output["dataBase64"] = json!(result.data_base64()),
            }
            Ok(output)
        }
    }
}

/// Load a layout document into the pipeline's store and return the template
/// it now belongs to with its layers.
fn restore(
    pipeline: &RenderPipeline,
    path: &Path,
    template: Option<String>,
) -> EngineResult<(String, Value)> {
    let doc = LayoutDocument::from_json(&fs::read_to_string(path)?)?;
    let template_id = template.unwrap_or_else(|| doc.template_id.clone());
    let layers = layout::restore(pipeline.store(), &template_id, &doc)?;
    Ok((template_id, serde_json::to_value(layers.as_slice())?))
}

fn parse_keyword<T: DeserializeOwned>(value: &str) -> Result<T, String> {
    serde_json::from_value(Value::String(value.to_lowercase())).map_err(|e| e.to_string())
}
