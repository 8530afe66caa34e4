//! Template System - Read-Only Design Contracts
//!
//! Templates are owned by the surrounding product. The engine only reads them:
//! the design space layers are authored in, and the fields a user may fill.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::error::EngineError;

pub type TemplateId = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: TemplateId,
    pub title: String,
    pub design_width: u32,
    pub design_height: u32,
    #[serde(default = "default_background")]
    pub background: String,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
}

fn default_background() -> String {
    "#FFFFFF".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Image,
    Date,
    Select,
    Checkbox,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Allowed values of a `select` field. Empty means unrestricted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// strftime pattern for `date` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,
}

impl FieldDecl {
    pub fn new(name: &str, field_type: FieldType, required: bool) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required,
            default: None,
            options: vec![],
            date_format: None,
        }
    }
}

impl Template {
    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.design_width == 0 || self.design_height == 0 {
            return Err(EngineError::InvalidTemplate(
                self.id.clone(),
                format!(
                    "design size {}x{} must be non-zero",
                    self.design_width, self.design_height
                ),
            ));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(EngineError::InvalidTemplate(
                    self.id.clone(),
                    format!("duplicate field '{}'", field.name),
                ));
            }
        }
        Ok(())
    }
}

/// Template registry - loads and caches templates
pub struct TemplateRegistry {
    templates: HashMap<TemplateId, Template>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self { templates: HashMap::new() }
    }

    pub fn load_from_dir(dir: &Path) -> Result<Self, std::io::Error> {
        let mut registry = Self::new();
        if dir.exists() {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().map_or(false, |e| e == "json") {
                    let content = fs::read_to_string(&path)?;
                    match serde_json::from_str::<Template>(&content) {
                        Ok(template) => {
                            if let Err(e) = registry.register(template) {
                                warn!("skipping {}: {}", path.display(), e);
                            }
                        }
                        Err(e) => warn!("skipping {}: {}", path.display(), e),
                    }
                }
            }
        }
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    /// All templates, ordered by id.
    pub fn list(&self) -> Vec<&Template> {
        let mut templates: Vec<_> = self.templates.values().collect();
        templates.sort_by(|a, b| a.id.cmp(&b.id));
        templates
    }

    pub fn register(&mut self, template: Template) -> Result<(), EngineError> {
        template.validate()?;
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
