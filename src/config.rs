//! Model and run configuration.
//!
//! A run is described by a single TOML file with a `[model]` and a `[train]`
//! section. Every field has a serde default, so a config file only needs to
//! mention what it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Hyperparameters of the reasoning model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Width of the shared token embeddings.
    #[serde(default = "default_dim_word")]
    pub dim_word: usize,
    /// Width `H` of encoder outputs; each GRU direction gets `H / 2`.
    #[serde(default = "default_dim_hidden")]
    pub dim_hidden: usize,
    /// Number of reasoning hops. Every hop always runs.
    #[serde(default = "default_num_steps")]
    pub num_steps: usize,
    /// Upper bound on active entities expanded per hop and example.
    #[serde(default = "default_max_active")]
    pub max_active: usize,
    /// Entities scoring strictly above this join the active set.
    #[serde(default = "default_active_threshold")]
    pub active_threshold: f32,
    /// Candidate edges per hop are capped at `fanout_factor * max_active`.
    #[serde(default = "default_fanout_factor")]
    pub fanout_factor: usize,
    /// Dropout on token embeddings, training only.
    #[serde(default = "default_word_dropout")]
    pub word_dropout: f32,
    /// Extra loss weight on positive answers (weight is `positive_weight + 1`).
    #[serde(default = "default_positive_weight")]
    pub positive_weight: f32,
}

fn default_dim_word() -> usize {
    300
}
fn default_dim_hidden() -> usize {
    768
}
fn default_num_steps() -> usize {
    2
}
fn default_max_active() -> usize {
    400
}
fn default_active_threshold() -> f32 {
    0.9
}
fn default_fanout_factor() -> usize {
    5
}
fn default_word_dropout() -> f32 {
    0.3
}
fn default_positive_weight() -> f32 {
    9.0
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dim_word: default_dim_word(),
            dim_hidden: default_dim_hidden(),
            num_steps: default_num_steps(),
            max_active: default_max_active(),
            active_threshold: default_active_threshold(),
            fanout_factor: default_fanout_factor(),
            word_dropout: default_word_dropout(),
            positive_weight: default_positive_weight(),
        }
    }
}

impl ModelConfig {
    /// Hard cap on candidate edges scored per hop and example.
    pub fn max_candidates(&self) -> usize {
        self.fanout_factor * self.max_active
    }

    /// Reject configurations the model cannot be built from.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |message: String| Err(ConfigError::Invalid { message });

        if self.dim_word == 0 {
            return invalid("dim_word must be > 0".into());
        }
        if self.dim_hidden == 0 || self.dim_hidden % 2 != 0 {
            return invalid(format!(
                "dim_hidden must be a positive even number, got {}",
                self.dim_hidden
            ));
        }
        if self.num_steps == 0 {
            return invalid("num_steps must be >= 1".into());
        }
        if self.max_active == 0 {
            return invalid("max_active must be >= 1".into());
        }
        if self.fanout_factor == 0 {
            return invalid("fanout_factor must be >= 1".into());
        }
        if !(0.0..1.0).contains(&self.word_dropout) {
            return invalid(format!(
                "word_dropout must be in [0, 1), got {}",
                self.word_dropout
            ));
        }
        if self.positive_weight < 0.0 {
            return invalid("positive_weight must be >= 0".into());
        }
        Ok(())
    }
}

/// Optimization settings for the training driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
    /// Seeds batch shuffling and dropout masks.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Run validation every this many epochs (0 disables it).
    #[serde(default = "default_eval_every")]
    pub eval_every: usize,
}

fn default_epochs() -> usize {
    20
}
fn default_batch_size() -> usize {
    32
}
fn default_learning_rate() -> f64 {
    1e-3
}
fn default_weight_decay() -> f64 {
    1e-5
}
fn default_seed() -> u64 {
    666
}
fn default_eval_every() -> usize {
    1
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            weight_decay: default_weight_decay(),
            seed: default_seed(),
            eval_every: default_eval_every(),
        }
    }
}

/// Full run configuration, persisted as TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub train: TrainConfig,
}

impl RunConfig {
    /// Load from a TOML file and validate the model section.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.model.validate()?;
        if config.train.batch_size == 0 {
            return Err(ConfigError::Invalid {
                message: "batch_size must be >= 1".into(),
            });
        }
        Ok(config)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = to_toml(self, path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }
}

fn to_toml<T: Serialize>(value: &T, path: &Path) -> ConfigResult<String> {
    toml::to_string_pretty(value).map_err(|e| ConfigError::Serialize {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
