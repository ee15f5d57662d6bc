use refmerge_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub batch: BatchSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_true")]
    pub synthesize_edge_refs: bool,
    #[serde(default)]
    pub strict_references: bool,
    #[serde(default = "default_true")]
    pub insert_safety_valve: bool,
    #[serde(default = "default_parse_timeout_ms")]
    pub parse_timeout_ms: u64,
    #[serde(default = "default_duplication_threshold")]
    pub duplication_threshold: usize,
    #[serde(default = "default_true")]
    pub tree_sitter_fallback: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            synthesize_edge_refs: true,
            strict_references: false,
            insert_safety_valve: true,
            parse_timeout_ms: default_parse_timeout_ms(),
            duplication_threshold: default_duplication_threshold(),
            tree_sitter_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub file: bool,
    #[serde(default = "default_log_dir")]
    pub dir: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: false,
            dir: default_log_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_parse_timeout_ms() -> u64 {
    500
}
fn default_duplication_threshold() -> usize {
    20
}
fn default_level() -> String {
    "info".into()
}
fn default_log_dir() -> String {
    "logs".into()
}
fn default_max_concurrency() -> usize {
    4
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Like [`Settings::load`], falling back to defaults when the file does
    /// not exist yet.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            parse_timeout: Duration::from_millis(self.engine.parse_timeout_ms),
            strict_references: self.engine.strict_references,
            insert_safety_valve: self.engine.insert_safety_valve,
            duplication_threshold: self.engine.duplication_threshold,
            tree_sitter_fallback: self.engine.tree_sitter_fallback,
        }
    }
}
