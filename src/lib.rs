//! Signal-and-risk engine for a polling trading bot: classical indicators
//! fused into entry signals, ATR/Fibonacci based sizing, and stop management
//! for open positions, driven against a broker through small async traits.

pub mod broker;
pub mod bybit_api;
pub mod config;
pub mod error;
pub mod indicators;
pub mod position_manager;
pub mod risk;
pub mod signal_engine;
pub mod swing_detector;
pub mod telegram;
pub mod trader;
pub mod types;

pub use error::{Result, TraderError};
