use anyhow::{Context, Result};
use investta_indicators::IndicatorDefinition;
use serde::Deserialize;
use std::path::Path;

/// Indicator set loaded from a TOML file:
///
/// ```toml
/// [[indicators]]
/// kind = "rsi"
/// params = { period = 14 }
///
/// [[indicators]]
/// kind = "bollinger"
/// params = { period = 20, std_dev = 2.5, source = "hlc3" }
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct IndicatorConfig {
    #[serde(default)]
    pub indicators: Vec<IndicatorDefinition>,
}

impl IndicatorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
