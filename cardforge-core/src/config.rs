//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::encode::Encoding;
use crate::error::EngineResult;
use crate::geometry::FitPolicy;

/// Every field has a default, so `{}` is a valid configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Overall budget of one render; 0 disables the limit.
    pub render_timeout_ms: u64,
    /// Batch worker pool size; 0 uses one thread per CPU.
    pub worker_threads: usize,
    /// Directory image URIs are resolved against. No root, no asset loading.
    pub asset_root: Option<PathBuf>,
    pub default_encoding: Encoding,
    pub fit_policy: FitPolicy,
    /// Extra font directories on top of the system fonts.
    pub font_dirs: Vec<PathBuf>,
    /// Live format catalog document; built-in presets when absent or unreadable.
    pub formats_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            render_timeout_ms: 5000,
            worker_threads: 0,
            asset_root: None,
            default_encoding: Encoding::Png,
            fit_policy: FitPolicy::Cover,
            font_dirs: Vec::new(),
            formats_path: None,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> EngineResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn render_budget(&self) -> Option<Duration> {
        (self.render_timeout_ms > 0).then(|| Duration::from_millis(self.render_timeout_ms))
    }
}
