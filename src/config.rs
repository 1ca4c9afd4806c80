use crate::analysis::scale_fusion::FusionStrategy;
use crate::types::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would only fail later, mid-request
    pub fn validate(&self) -> Result<()> {
        self.fusion_strategy()?;

        if !(0.0..=1.0).contains(&self.aggregation.min_vision_confidence) {
            anyhow::bail!(
                "aggregation.min_vision_confidence must be in [0, 1], got {}",
                self.aggregation.min_vision_confidence
            );
        }
        if !(0.0..=1.0).contains(&self.learning.learning_rate) {
            anyhow::bail!(
                "learning.learning_rate must be in [0, 1], got {}",
                self.learning.learning_rate
            );
        }
        for provider in &self.vision.providers {
            if provider.url.is_empty() {
                anyhow::bail!("vision provider '{}' has no url", provider.name);
            }
        }

        Ok(())
    }

    pub fn fusion_strategy(&self) -> crate::error::Result<FusionStrategy> {
        self.fusion.strategy.parse()
    }
}
