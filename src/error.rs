//! Crate-level error types.
//!
//! [`TraderError`] unifies the failures a polling cycle can surface so the
//! loop can log them and move on, while [`BrokerError`] keeps the broker's
//! own classification (rate limit / transient / permanent) visible to the
//! retry logic in the Bybit adapter.

use crate::types::Side;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TraderError>;

#[derive(Debug, thiserror::Error)]
pub enum TraderError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("cycle panicked: {0}")]
    Panic(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Rate limited (retCode=10006 or HTTP 429). retry_after in seconds.
    #[error("rate limited (retry after {retry_after}s)")]
    RateLimit { retry_after: u64 },
    /// Network, timeout, HTTP 5xx, server overload (retCode=10016).
    #[error("transient error: {0}")]
    Transient(String),
    /// Invalid params, auth failure, HTTP 4xx.
    #[error("permanent error: {0}")]
    Permanent(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Why the risk sizer refused to produce stops for an entry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SizingError {
    #[error("{side} stop-loss {stop_loss} is {distance} from price {price}, below minimum {min_distance}")]
    StopTooClose { side: Side, price: f64, stop_loss: f64, distance: f64, min_distance: f64 },

    #[error("{side} take-profit {take_profit} is {distance} from price {price}, below minimum {min_distance}")]
    TargetTooClose { side: Side, price: f64, take_profit: f64, distance: f64, min_distance: f64 },

    #[error("{side} stop-loss {stop_loss} / take-profit {take_profit} on the wrong side of price {price}")]
    WrongSide { side: Side, price: f64, stop_loss: f64, take_profit: f64 },
}
