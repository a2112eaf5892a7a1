use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Connection pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Upper bound on open connections.
    pub max_size: u32,
    /// Idle connections the pool keeps open. `None` keeps `max_size`.
    pub min_idle: Option<u32>,
    pub busy_timeout_ms: u64,
    /// How long `get_cursor` waits for a free connection.
    pub connection_timeout_ms: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            max_size: 4,
            min_idle: None,
            busy_timeout_ms: 5_000,
            connection_timeout_ms: 30_000,
        }
    }
}

/// Accepted range for a weekly donation amount. Zero is always accepted
/// and means "stop donating".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TipConfig {
    pub min_amount: Decimal,
    pub max_amount: Decimal,
}

impl Default for TipConfig {
    fn default() -> Self {
        Self {
            min_amount: Decimal::new(1, 2),
            max_amount: Decimal::new(100_00, 2),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub db: DbConfig,
    pub tips: TipConfig,
}

impl PlatformConfig {
    /// Load from a JSON file. Missing sections fall back to defaults.
    /// In tests, use PlatformConfig::default().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let config: PlatformConfig = serde_json::from_str(content)?;
        if config.tips.min_amount > config.tips.max_amount {
            anyhow::bail!(
                "tips.min_amount ({}) exceeds tips.max_amount ({})",
                config.tips.min_amount,
                config.tips.max_amount
            );
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = PlatformConfig::from_json(r#"{"tips": {"max_amount": "50.00"}}"#).unwrap();
        assert_eq!(config.tips.max_amount, Decimal::new(50_00, 2));
        assert_eq!(config.tips.min_amount, Decimal::new(1, 2));
        assert_eq!(config.db.max_size, 4);
        assert_eq!(config.db.min_idle, None);
    }

    #[test]
    fn inverted_tip_range_is_rejected() {
        let err = PlatformConfig::from_json(
            r#"{"tips": {"min_amount": "10.00", "max_amount": "5.00"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }
}
