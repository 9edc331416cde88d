//! Engine configuration.

use crate::compiler::TieBreak;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables shared by every query built from one engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Allow an annotation to reuse the name of a real field
    pub allow_annotation_shadowing: bool,
    /// Which related row a conditional value picks when several match
    pub conditional_tie_break: TieBreak,
    /// Log every compiled plan at info level instead of debug
    pub log_plans: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allow_annotation_shadowing: false,
            conditional_tie_break: TieBreak::LowestKey,
            log_plans: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to parse engine configuration")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&text)
    }
}
