//! YAML configuration.
//!
//! One file, three sections: `adapter` (venue endpoints and credentials),
//! `strategy` (quoting parameters) and `logger`. Loaded from the single
//! `-config <path>` CLI argument.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub adapter: AdapterConfig,
    pub strategy: StrategyConfig,
    pub logger: LoggerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    /// Gateway display name, used in log and error messages.
    pub name: String,
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
    pub execution: EndpointConfig,
    pub streaming: EndpointConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    pub symbol: String,
    pub exchange_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    pub instrument_name: String,
    pub tick_size: f64,
    pub price_rounding: u32,
    pub mid_price_based_calculation: bool,
    pub stop_strategy_on_error: bool,
    pub positional_retreat: PositionalRetreat,
    pub orders: QuoteLevels,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PositionalRetreat {
    pub position_increment: f64,
    pub retreat_ticks: i64,
}

/// Quote ladder: `[level, qty]` pairs per side.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct QuoteLevels {
    pub asks: Vec<[f64; 2]>,
    pub bids: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggerConfig {
    pub name: String,
    pub level: String,
    #[serde(default)]
    pub logging_folder: Option<String>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(&path).map_err(|err| {
            Error::Config(format!("failed to read {}: {err}", path.as_ref().display()))
        })?;
        let config: Config = serde_yaml::from_str(&raw)
            .map_err(|err| Error::Config(format!("failed to parse config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.strategy.tick_size <= 0.0 {
            return Err(Error::Config("strategy.tick_size must be positive".to_string()));
        }
        if self.strategy.orders.asks.is_empty() && self.strategy.orders.bids.is_empty() {
            return Err(Error::Config("strategy.orders has no quote levels".to_string()));
        }
        if self.adapter.api_key.is_empty() || self.adapter.api_secret.is_empty() {
            return Err(Error::Config("adapter credentials are missing".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
adapter:
  name: emx
  url: wss://api.testnet.emx.com
  api_key: test-key
  api_secret: dGVzdC1zZWNyZXQ=
  execution:
    url: https://api.testnet.emx.com
    symbol: BTC-PERP
    exchange_name: emx
  streaming:
    url: wss://api.testnet.emx.com
    symbol: BTC-PERP
    exchange_name: emx
strategy:
  name: market_maker
  instrument_name: BTC-PERP
  tick_size: 0.5
  price_rounding: 2
  mid_price_based_calculation: true
  stop_strategy_on_error: false
  positional_retreat:
    position_increment: 100
    retreat_ticks: 5
  orders:
    asks: [[0, 1.0], [1, 2.0]]
    bids: [[0, 1.0]]
logger:
  name: mm_bot
  level: info
"#;

    #[test]
    fn test_sample_config_parses() {
        let config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.adapter.streaming.symbol, "BTC-PERP");
        assert_eq!(config.strategy.orders.asks.len(), 2);
        assert_eq!(config.strategy.orders.asks[1], [1.0, 2.0]);
        assert_eq!(config.strategy.positional_retreat.retreat_ticks, 5);
        assert!(config.logger.logging_folder.is_none());
    }

    #[test]
    fn test_zero_tick_size_is_rejected() {
        let mut config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        config.strategy.tick_size = 0.0;
        assert!(config.validate().is_err());
    }
}
