use serde::Deserialize;
use std::path::Path;

use crate::error::ConfigError;
use crate::indicators::{EmaAdjust, Smoothing};

// ─── Bybit ────────────────────────────────────────────────────────────────────
pub const BYBIT_REST_URL: &str = "https://api-demo.bybit.com";
pub const BYBIT_PUBLIC_URL: &str = "https://api.bybit.com";
// BYBIT_API_KEY, BYBIT_SECRET, TELEGRAM_TOKEN, TELEGRAM_CHAT_ID
// are read from environment variables at runtime.

pub const CONFIG_PATH_ENV: &str = "FIBO_TRADER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/trader.toml";
const MAX_COOLDOWN_SECS: u64 = 7 * 24 * 3600;

/// Static bot configuration, loaded once at startup and never mutated.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub symbols: Vec<String>,
    pub timeframes: Timeframes,
    /// Candles requested for the entry timeframe.
    pub candle_count: usize,
    /// Candles requested for the trend / higher timeframes.
    pub trend_candle_count: usize,
    pub base_lot: f64,
    pub poll_interval_secs: u64,
    pub indicators: IndicatorSettings,
    pub strategy: StrategySettings,
    pub risk: RiskSettings,
    pub management: ManagementSettings,
    pub bybit: BybitSettings,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timeframes {
    pub entry: String,
    pub trend: String,
    /// Higher-timeframe trend filter. Disabled when absent.
    pub higher: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndicatorSettings {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub ema_adjust: EmaAdjust,
    pub strength_lookback: usize,
    pub strength_threshold: f64,
    pub rsi_period: usize,
    pub rsi_smoothing: Smoothing,
    pub atr_period: usize,
    pub atr_smoothing: Smoothing,
    pub fractal_window: usize,
    pub fractal_count: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyMode {
    /// EMA trend + Fibonacci retracement / RSI union, single symbol.
    TrendFollowing,
    /// Heikin-Ashi, then RSI, then Fibonacci zone; multi-symbol scan.
    Confluence,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrategySettings {
    pub mode: StrategyMode,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    /// Require the last closed candle to have closed beyond the entry level.
    pub confirm_candle_close: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// SL at the near swing extreme, TP at the far one.
    Fibonacci,
    /// SL/TP at ATR multiples from the entry price.
    Atr,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RiskSettings {
    pub risk_fraction: f64,
    /// Divisor turning `balance · risk / atr` into lots.
    pub atr_scaling: f64,
    pub stop_mode: StopMode,
    pub sl_atr_mult: f64,
    pub tp_atr_mult: f64,
    pub max_open_positions: usize,
    pub max_daily_drawdown_pct: f64,
    pub drawdown_cooldown_secs: u64,
    /// Minimum stop distance in points when the broker reports none.
    pub min_stop_points: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrailMode {
    /// Stop trails the price by a fixed number of points.
    Fixed { points: f64 },
    /// Stop trails the price by `multiplier · ATR`.
    Atr { multiplier: f64 },
}

/// Position management thresholds, all in broker points.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagementSettings {
    pub be_trigger: f64,
    pub be_offset: f64,
    pub trail_start: f64,
    pub trail: TrailMode,
    pub partial_trigger: f64,
    pub partial_close_ratio: f64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BybitSettings {
    pub rest_url: String,
    pub public_url: String,
    pub recv_window_ms: u64,
    pub max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            symbols: vec!["BTCUSDT".to_string()],
            timeframes: Timeframes::default(),
            candle_count: 100,
            trend_candle_count: 200,
            base_lot: 0.01,
            poll_interval_secs: 60,
            indicators: IndicatorSettings::default(),
            strategy: StrategySettings::default(),
            risk: RiskSettings::default(),
            management: ManagementSettings::default(),
            bybit: BybitSettings::default(),
        }
    }
}

impl Default for Timeframes {
    fn default() -> Self {
        Timeframes { entry: "15".into(), trend: "60".into(), higher: None }
    }
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        IndicatorSettings {
            ema_fast: 50,
            ema_slow: 200,
            ema_adjust: EmaAdjust::Recursive,
            strength_lookback: 5,
            strength_threshold: 1.0,
            rsi_period: 14,
            rsi_smoothing: Smoothing::Wilder,
            atr_period: 14,
            atr_smoothing: Smoothing::Wilder,
            fractal_window: 2,
            fractal_count: 3,
        }
    }
}

impl Default for StrategySettings {
    fn default() -> Self {
        StrategySettings {
            mode: StrategyMode::TrendFollowing,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            confirm_candle_close: true,
        }
    }
}

impl Default for RiskSettings {
    fn default() -> Self {
        RiskSettings {
            risk_fraction: 0.01,
            atr_scaling: 10.0,
            stop_mode: StopMode::Atr,
            sl_atr_mult: 1.5,
            tp_atr_mult: 2.0,
            max_open_positions: 1,
            max_daily_drawdown_pct: 5.0,
            drawdown_cooldown_secs: 3600,
            min_stop_points: 0,
        }
    }
}

impl Default for ManagementSettings {
    fn default() -> Self {
        ManagementSettings {
            be_trigger: 100.0,
            be_offset: 20.0,
            trail_start: 150.0,
            trail: TrailMode::Atr { multiplier: 1.0 },
            partial_trigger: 200.0,
            partial_close_ratio: 0.5,
        }
    }
}

impl Default for BybitSettings {
    fn default() -> Self {
        BybitSettings {
            rest_url: BYBIT_REST_URL.to_string(),
            public_url: BYBIT_PUBLIC_URL.to_string(),
            recv_window_ms: 5000,
            max_retries: 3,
        }
    }
}

impl Config {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Loads from `$FIBO_TRADER_CONFIG` or `config/trader.toml`; falls back
    /// to built-in defaults when the default path does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_PATH_ENV).ok().filter(|s| !s.is_empty()) {
            Some(path) => Self::load(Path::new(&path)),
            None => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::load(path)
                } else {
                    log::warn!("{} not found — using built-in defaults", DEFAULT_CONFIG_PATH);
                    let config = Config::default();
                    config.validate()?;
                    Ok(config)
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        let ind = &self.indicators;
        let risk = &self.risk;
        let mgmt = &self.management;

        if self.symbols.is_empty() {
            return invalid("at least one symbol is required".into());
        }
        if self.base_lot <= 0.0 {
            return invalid(format!("base_lot must be positive, got {}", self.base_lot));
        }
        if self.poll_interval_secs == 0 {
            return invalid("poll_interval_secs must be positive".into());
        }
        if ind.ema_fast == 0 || ind.ema_slow == 0 || ind.rsi_period == 0 || ind.atr_period == 0 {
            return invalid("indicator periods must be positive".into());
        }
        if ind.ema_fast >= ind.ema_slow {
            return invalid(format!(
                "ema_fast ({}) must be shorter than ema_slow ({})",
                ind.ema_fast, ind.ema_slow
            ));
        }
        if ind.fractal_window == 0 || ind.fractal_count == 0 {
            return invalid("fractal_window and fractal_count must be positive".into());
        }
        if ind.strength_lookback == 0 {
            return invalid("strength_lookback must be positive".into());
        }
        let s = &self.strategy;
        if !(0.0..=100.0).contains(&s.rsi_oversold)
            || !(0.0..=100.0).contains(&s.rsi_overbought)
            || s.rsi_oversold >= s.rsi_overbought
        {
            return invalid(format!(
                "rsi thresholds must satisfy 0 <= oversold ({}) < overbought ({}) <= 100",
                s.rsi_oversold, s.rsi_overbought
            ));
        }
        if risk.risk_fraction <= 0.0 || risk.risk_fraction > 1.0 {
            return invalid(format!("risk_fraction must be in (0, 1], got {}", risk.risk_fraction));
        }
        if risk.atr_scaling <= 0.0 || risk.sl_atr_mult <= 0.0 || risk.tp_atr_mult <= 0.0 {
            return invalid("atr_scaling, sl_atr_mult and tp_atr_mult must be positive".into());
        }
        if risk.max_open_positions == 0 {
            return invalid("max_open_positions must be at least 1".into());
        }
        if risk.max_daily_drawdown_pct <= 0.0 {
            return invalid("max_daily_drawdown_pct must be positive".into());
        }
        if risk.drawdown_cooldown_secs > MAX_COOLDOWN_SECS {
            return invalid(format!(
                "drawdown_cooldown_secs must be at most {} (one week), got {}",
                MAX_COOLDOWN_SECS, risk.drawdown_cooldown_secs
            ));
        }
        if mgmt.partial_close_ratio <= 0.0 || mgmt.partial_close_ratio >= 1.0 {
            return invalid(format!(
                "partial_close_ratio must be in (0, 1), got {}",
                mgmt.partial_close_ratio
            ));
        }
        match mgmt.trail {
            TrailMode::Fixed { points } if points <= 0.0 => {
                return invalid("trail.points must be positive".into())
            }
            TrailMode::Atr { multiplier } if multiplier <= 0.0 => {
                return invalid("trail.multiplier must be positive".into())
            }
            _ => {}
        }
        Ok(())
    }
}

/// Returns the value of an environment variable if it exists and is non-empty.
pub fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}
