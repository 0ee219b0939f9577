//! Settings loaded from `novelflow.toml`.
//!
//! Every field has a default, so a missing file or a partial one is fine.
//! `ANTHROPIC_API_KEY` in the environment takes precedence over the file.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::controller::ControllerConfig;
use crate::error::NovelflowError;
use crate::tool_loop::{LoopConfig, TokenBudget};

/// Looked up in the working directory.
pub const CONFIG_FILE: &str = "novelflow.toml";

/// Contents of `novelflow.toml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NovelflowConfig {
    /// Overridden by `ANTHROPIC_API_KEY`.
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Left to the provider when unset.
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Nominal paragraphs per submitted batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Source characters per chunk session.
    #[serde(default = "default_chunk_max_chars")]
    pub chunk_max_chars: usize,

    /// Model turns per tool-loop call.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    /// Reminders sent when the model stops before `end`.
    #[serde(default = "default_max_nudges")]
    pub max_nudges: usize,

    /// Summarization is disabled without a limit.
    #[serde(default = "default_context_limit_tokens")]
    pub context_limit_tokens: Option<usize>,

    /// Fraction of the context limit that triggers a summary.
    #[serde(default = "default_summarize_high_water")]
    pub summarize_high_water: f64,

    #[serde(default = "default_tokens_per_char")]
    pub tokens_per_char: f64,

    /// How long finished progress stays visible.
    #[serde(default = "default_progress_linger_ms")]
    pub progress_linger_ms: u64,
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_batch_size() -> usize {
    20
}

fn default_chunk_max_chars() -> usize {
    4000
}

fn default_max_tool_rounds() -> usize {
    20
}

fn default_max_nudges() -> usize {
    2
}

fn default_context_limit_tokens() -> Option<usize> {
    Some(200_000)
}

fn default_summarize_high_water() -> f64 {
    0.8
}

fn default_tokens_per_char() -> f64 {
    1.0
}

fn default_progress_linger_ms() -> u64 {
    3000
}

impl Default for NovelflowConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: None,
            batch_size: default_batch_size(),
            chunk_max_chars: default_chunk_max_chars(),
            max_tool_rounds: default_max_tool_rounds(),
            max_nudges: default_max_nudges(),
            context_limit_tokens: default_context_limit_tokens(),
            summarize_high_water: default_summarize_high_water(),
            tokens_per_char: default_tokens_per_char(),
            progress_linger_ms: default_progress_linger_ms(),
        }
    }
}

impl NovelflowConfig {
    /// Loads `novelflow.toml` from the current directory.
    pub fn load() -> Result<Self, NovelflowError> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self, NovelflowError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<NovelflowConfig>(&contents)?
        } else {
            Self::default()
        };

        if let Some(key) = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
        {
            config.api_key = key;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), NovelflowError> {
        if self.batch_size == 0 {
            return Err(NovelflowError::Config("batch_size must be at least 1".into()));
        }
        if self.chunk_max_chars == 0 {
            return Err(NovelflowError::Config(
                "chunk_max_chars must be at least 1".into(),
            ));
        }
        if !(self.summarize_high_water > 0.0 && self.summarize_high_water <= 1.0) {
            return Err(NovelflowError::Config(
                "summarize_high_water must be in (0, 1]".into(),
            ));
        }
        Ok(())
    }

    pub fn loop_config(&self) -> LoopConfig {
        let mut config = LoopConfig::new(&self.model);
        config.max_rounds = self.max_tool_rounds;
        config.max_tokens = self.max_tokens;
        config.temperature = self.temperature;
        config.budget = self.context_limit_tokens.map(|limit| TokenBudget {
            context_limit: limit,
            high_water: self.summarize_high_water,
            tokens_per_char: self.tokens_per_char,
        });
        config
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            batch_size: self.batch_size,
            chunk_max_chars: self.chunk_max_chars,
            max_nudges: self.max_nudges,
            progress_linger: Duration::from_millis(self.progress_linger_ms),
            tool_loop: self.loop_config(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = NovelflowConfig::default();
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.max_nudges, 2);
        assert_eq!(config.context_limit_tokens, Some(200_000));
        assert!(config.api_key.is_empty());
        assert!(config.temperature.is_none());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            model = "claude-haiku-4-5-20251001"
            batch_size = 8
            temperature = 0.3
        "#;
        let config: NovelflowConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model, "claude-haiku-4-5-20251001");
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.temperature, Some(0.3));
        assert_eq!(config.chunk_max_chars, 4000);
        assert_eq!(config.progress_linger_ms, 3000);
    }

    #[test]
    fn converts_into_runtime_configs() {
        let config = NovelflowConfig {
            max_tool_rounds: 7,
            progress_linger_ms: 500,
            summarize_high_water: 0.5,
            ..Default::default()
        };
        let controller = config.controller_config();
        assert_eq!(controller.progress_linger, Duration::from_millis(500));
        assert_eq!(controller.tool_loop.max_rounds, 7);
        let budget = controller.tool_loop.budget.unwrap();
        assert_eq!(budget.threshold(), 100_000);

        let unbounded = NovelflowConfig {
            context_limit_tokens: None,
            ..Default::default()
        };
        assert!(unbounded.loop_config().budget.is_none());
    }

    #[test]
    fn load_from_file_and_reject_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        std::fs::write(&path, "chunk_max_chars = 1200\n").unwrap();
        let config = NovelflowConfig::load_from(&path).unwrap();
        assert_eq!(config.chunk_max_chars, 1200);

        std::fs::write(&path, "batch_size = 0\n").unwrap();
        let err = NovelflowConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, NovelflowError::Config(_)));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = NovelflowConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.max_tool_rounds, 20);
    }
}
