//! Runtime configuration
//!
//! Every section has working defaults. `LabConfig::from_env`
//! overlays `ATTACK_LAB_*` environment variables on top of them.

use crate::error::{LabError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Attack executor tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Chance that any applicable action trips intrusion detection
    pub detection_probability: f64,
    /// Multiplier applied to the catalog base probability
    pub learning_curve: f64,
    pub success_cap: f64,
    /// Probability used for escalation actions with no entry at the current level
    pub fallback_probability: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detection_probability: 0.05,
            learning_curve: 1.1,
            success_cap: 0.95,
            fallback_probability: 0.1,
        }
    }
}

/// Q-learning hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub learning_rate: f64,
    pub discount_factor: f64,
    pub epsilon: f64,
    pub epsilon_decay: f64,
    pub min_epsilon: f64,
    /// Probability of following an applicable strategic hint outright
    pub hint_priority: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount_factor: 0.9,
            epsilon: 0.1,
            epsilon_decay: 0.995,
            min_epsilon: 0.01,
            hint_priority: 0.8,
        }
    }
}

/// Knowledge source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Query an installed `searchsploit` before the static catalog
    pub use_searchsploit: bool,
    pub searchsploit_bin: String,
    pub query_timeout_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            use_searchsploit: false,
            searchsploit_bin: "searchsploit".to_string(),
            query_timeout_secs: 5,
            probe_timeout_secs: 2,
        }
    }
}

impl KnowledgeConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    pub database_url: String,
    pub default_iterations: u32,
    /// Seed for session RNGs; `None` draws from OS entropy
    pub seed: Option<u64>,
    pub engine: EngineConfig,
    pub agent: AgentConfig,
    pub knowledge: KnowledgeConfig,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:attack_paths.db".to_string(),
            default_iterations: 100,
            seed: None,
            engine: EngineConfig::default(),
            agent: AgentConfig::default(),
            knowledge: KnowledgeConfig::default(),
        }
    }
}

impl LabConfig {
    /// Defaults overlaid with `ATTACK_LAB_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("ATTACK_LAB_DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(v) = lookup("ATTACK_LAB_ITERATIONS") {
            config.default_iterations = parse_var("ATTACK_LAB_ITERATIONS", &v)?;
        }
        if let Some(v) = lookup("ATTACK_LAB_SEED") {
            config.seed = Some(parse_var("ATTACK_LAB_SEED", &v)?);
        }
        if let Some(v) = lookup("ATTACK_LAB_DETECTION_PROBABILITY") {
            config.engine.detection_probability =
                parse_var("ATTACK_LAB_DETECTION_PROBABILITY", &v)?;
        }
        if let Some(v) = lookup("ATTACK_LAB_LEARNING_RATE") {
            config.agent.learning_rate = parse_var("ATTACK_LAB_LEARNING_RATE", &v)?;
        }
        if let Some(v) = lookup("ATTACK_LAB_EPSILON") {
            config.agent.epsilon = parse_var("ATTACK_LAB_EPSILON", &v)?;
        }
        if let Some(v) = lookup("ATTACK_LAB_SEARCHSPLOIT") {
            config.knowledge.use_searchsploit = parse_var("ATTACK_LAB_SEARCHSPLOIT", &v)?;
        }
        if let Some(bin) = lookup("ATTACK_LAB_SEARCHSPLOIT_BIN") {
            config.knowledge.searchsploit_bin = bin;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the simulator cannot run with
    pub fn validate(&self) -> Result<()> {
        let probabilities = [
            ("engine.detection_probability", self.engine.detection_probability),
            ("engine.success_cap", self.engine.success_cap),
            ("engine.fallback_probability", self.engine.fallback_probability),
            ("agent.learning_rate", self.agent.learning_rate),
            ("agent.discount_factor", self.agent.discount_factor),
            ("agent.epsilon", self.agent.epsilon),
            ("agent.epsilon_decay", self.agent.epsilon_decay),
            ("agent.min_epsilon", self.agent.min_epsilon),
            ("agent.hint_priority", self.agent.hint_priority),
        ];
        for (name, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                return Err(LabError::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if !self.engine.learning_curve.is_finite() || self.engine.learning_curve <= 0.0 {
            return Err(LabError::Config(
                "engine.learning_curve must be positive".to_string(),
            ));
        }
        if self.knowledge.query_timeout_secs == 0 || self.knowledge.probe_timeout_secs == 0 {
            return Err(LabError::Config(
                "knowledge timeouts must be at least one second".to_string(),
            ));
        }
        if self.default_iterations == 0 {
            return Err(LabError::Config(
                "default_iterations must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| LabError::Config(format!("{} has an invalid value: {:?}", name, raw)))
}
