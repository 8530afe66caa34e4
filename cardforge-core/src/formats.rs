//! Format Catalog - named output presets.
//!
//! The authoritative source may be unreachable; the catalog then serves the
//! built-in presets and says so through [`FormatAuthority`].

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::error::{EngineError, EngineResult};

/// Where a preset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FormatAuthority {
    /// Built-in constant (fallback)
    #[default]
    Default,
    /// Supplied by the authoritative source
    Live,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatPreset {
    pub key: String,
    pub width: u32,
    pub height: u32,
    pub ratio: String,
    pub description: String,
    #[serde(default)]
    pub authority: FormatAuthority,
}

impl FormatPreset {
    /// Ad-hoc preset for callers that need a size outside the catalog.
    pub fn custom(width: u32, height: u32) -> Self {
        Self {
            key: "custom".to_string(),
            width,
            height,
            ratio: format!("{}:{}", width, height),
            description: format!("Custom {}x{}", width, height),
            authority: FormatAuthority::Default,
        }
    }
}

/// One entry of the catalog wire format: `{formats: {<key>: FormatSpec}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatSpec {
    pub width: u32,
    pub height: u32,
    pub ratio: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatDocument {
    pub formats: BTreeMap<String, FormatSpec>,
}

const DEFAULT_FORMATS: &[(&str, u32, u32, &str, &str)] = &[
    ("instagram", 1080, 1080, "1:1", "Instagram (Square)"),
    ("instagramStory", 1080, 1920, "9:16", "Instagram Story"),
    ("facebook", 1200, 630, "1.91:1", "Facebook"),
    ("twitter", 1200, 675, "16:9", "Twitter"),
    ("whatsapp", 800, 800, "1:1", "WhatsApp"),
    ("pinterest", 1000, 1500, "2:3", "Pinterest"),
];

pub fn default_presets() -> Vec<FormatPreset> {
    DEFAULT_FORMATS
        .iter()
        .map(|&(key, width, height, ratio, description)| FormatPreset {
            key: key.to_string(),
            width,
            height,
            ratio: ratio.to_string(),
            description: description.to_string(),
            authority: FormatAuthority::Default,
        })
        .collect()
}

/// Authoritative provider of format presets.
pub trait FormatSource {
    fn fetch(&self) -> Result<FormatDocument, String>;
}

/// Reads a catalog document from a JSON file.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FormatSource for JsonFileSource {
    fn fetch(&self) -> Result<FormatDocument, String> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| format!("{}: {}", self.path.display(), e))?;
        serde_json::from_str(&content).map_err(|e| format!("{}: {}", self.path.display(), e))
    }
}

/// In-memory source, mostly for tests and embedding.
pub struct StaticSource(pub FormatDocument);

impl FormatSource for StaticSource {
    fn fetch(&self) -> Result<FormatDocument, String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone)]
pub struct FormatCatalog {
    presets: BTreeMap<String, FormatPreset>,
    live: bool,
}

impl FormatCatalog {
    /// Catalog made only of the built-in presets.
    pub fn builtin() -> Self {
        Self {
            presets: default_presets().into_iter().map(|p| (p.key.clone(), p)).collect(),
            live: false,
        }
    }

    /// Live presets override the built-in ones key by key. An unreachable
    /// source is not an error: the built-in set is served instead.
    pub fn load(source: &dyn FormatSource) -> Self {
        let mut catalog = Self::builtin();
        let document = match source.fetch() {
            Ok(document) => document,
            Err(e) => {
                warn!("format source unavailable, using built-in presets: {}", e);
                return catalog;
            }
        };
        catalog.live = true;
        for (key, spec) in document.formats {
            if spec.width == 0 || spec.height == 0 {
                warn!("ignoring format '{}' with size {}x{}", key, spec.width, spec.height);
                continue;
            }
            catalog.presets.insert(
                key.clone(),
                FormatPreset {
                    key,
                    width: spec.width,
                    height: spec.height,
                    ratio: spec.ratio,
                    description: spec.description,
                    authority: FormatAuthority::Live,
                },
            );
        }
        catalog
    }

    pub fn get(&self, key: &str) -> EngineResult<&FormatPreset> {
        self.presets
            .get(key)
            .ok_or_else(|| EngineError::FormatNotFound(key.to_string()))
    }

    /// Every preset, ordered by key.
    pub fn list_all(&self) -> Vec<&FormatPreset> {
        self.presets.values().collect()
    }

    /// Whether the authoritative source answered when the catalog was loaded.
    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn to_document(&self) -> FormatDocument {
        FormatDocument {
            formats: self
                .presets
                .values()
                .map(|p| {
                    (
                        p.key.clone(),
                        FormatSpec {
                            width: p.width,
                            height: p.height,
                            ratio: p.ratio.clone(),
                            description: p.description.clone(),
                        },
                    )
                })
                .collect(),
        }
    }
}

impl Default for FormatCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unreachable;

    impl FormatSource for Unreachable {
        fn fetch(&self) -> Result<FormatDocument, String> {
            Err("connection refused".to_string())
        }
    }

    #[test]
    fn test_unreachable_source_falls_back() {
        let catalog = FormatCatalog::load(&Unreachable);
        assert!(!catalog.is_live());
        let square = catalog.get("instagram").unwrap();
        assert_eq!((square.width, square.height), (1080, 1080));
        assert_eq!(square.authority, FormatAuthority::Default);
        assert_eq!(catalog.list_all().len(), DEFAULT_FORMATS.len());
    }

    #[test]
    fn test_unknown_key() {
        let catalog = FormatCatalog::builtin();
        assert!(matches!(catalog.get("tiktok"), Err(EngineError::FormatNotFound(k)) if k == "tiktok"));
    }

    #[test]
    fn test_live_entries_override_defaults() {
        let json = r#"{"formats": {
            "instagram": {"width": 1200, "height": 1200, "ratio": "1:1", "description": "Square HD"},
            "banner": {"width": 1500, "height": 500, "ratio": "3:1", "description": "Banner"},
            "broken": {"width": 0, "height": 500, "ratio": "0:1", "description": "Broken"}
        }}"#;
        let document: FormatDocument = serde_json::from_str(json).unwrap();
        let catalog = FormatCatalog::load(&StaticSource(document));

        assert!(catalog.is_live());
        let square = catalog.get("instagram").unwrap();
        assert_eq!(square.width, 1200);
        assert_eq!(square.authority, FormatAuthority::Live);
        assert_eq!(catalog.get("facebook").unwrap().authority, FormatAuthority::Default);
        assert!(catalog.get("banner").is_ok());
        assert!(catalog.get("broken").is_err());
    }

    #[test]
    fn test_json_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("formats.json");
        let document = FormatCatalog::builtin().to_document();
        fs::write(&path, serde_json::to_string(&document).unwrap()).unwrap();

        let catalog = FormatCatalog::load(&JsonFileSource::new(&path));
        assert!(catalog.is_live());
        assert_eq!(catalog.get("pinterest").unwrap().height, 1500);

        let missing = FormatCatalog::load(&JsonFileSource::new(dir.path().join("nope.json")));
        assert!(!missing.is_live());
    }
}
