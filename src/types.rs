use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Trade side. Also used as the direction of an emitted signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for Buy, -1 for Sell. Multiplies a price distance into a signed move.
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrendDirection {
    Bullish,
    Bearish,
}

impl TrendDirection {
    pub fn side(self) -> Side {
        match self {
            TrendDirection::Bullish => Side::Buy,
            TrendDirection::Bearish => Side::Sell,
        }
    }

    pub fn opposite(self) -> TrendDirection {
        match self {
            TrendDirection::Bullish => TrendDirection::Bearish,
            TrendDirection::Bearish => TrendDirection::Bullish,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrendStrength {
    Strong,
    Normal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrendState {
    pub direction: TrendDirection,
    pub strength: TrendStrength,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwingKind {
    High,
    Low,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SwingPoint {
    pub timestamp: i64,
    pub price: f64,
    pub kind: SwingKind,
}

/// Which indicator agreed with an emitted signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Confirmation {
    Fibonacci,
    Rsi,
    HeikinAshi,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Signal {
    pub direction: Option<Side>,
    pub confirmations: BTreeSet<Confirmation>,
}

impl Signal {
    pub fn none() -> Self {
        Signal { direction: None, confirmations: BTreeSet::new() }
    }

    pub fn new(side: Side, confirmations: impl IntoIterator<Item = Confirmation>) -> Self {
        Signal { direction: Some(side), confirmations: confirmations.into_iter().collect() }
    }

    pub fn is_none(&self) -> bool {
        self.direction.is_none()
    }
}

/// Snapshot of a broker-owned position. Read-only to the core.
#[derive(Clone, Debug, PartialEq)]
pub struct Position {
    pub ticket: String,
    pub symbol: String,
    pub side: Side,
    pub open_price: f64,
    pub volume: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RiskParameters {
    pub lot_size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

impl Quote {
    /// Price an order on `side` would fill at.
    pub fn entry_price(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.ask,
            Side::Sell => self.bid,
        }
    }

    /// Price a position on `side` would close at.
    pub fn exit_price(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.bid,
            Side::Sell => self.ask,
        }
    }
}

/// Instrument constraints reported by the broker.
#[derive(Clone, Debug, PartialEq)]
pub struct SymbolInfo {
    pub point: f64,
    pub digits: u32,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    /// Minimum stop distance in points.
    pub stops_level: u32,
}

impl SymbolInfo {
    pub fn min_stop_distance(&self) -> f64 {
        self.stops_level as f64 * self.point
    }

    pub fn round_price(&self, price: f64) -> f64 {
        round_to_digits(price, self.digits)
    }

    /// Round a volume down to the instrument's lot step.
    pub fn floor_volume(&self, volume: f64) -> f64 {
        floor_to_step(volume, self.volume_step)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderReceipt {
    pub accepted: bool,
    pub status_code: i64,
    pub detail: String,
}

impl OrderReceipt {
    pub fn accepted(detail: impl Into<String>) -> Self {
        OrderReceipt { accepted: true, status_code: 0, detail: detail.into() }
    }

    pub fn rejected(status_code: i64, detail: impl Into<String>) -> Self {
        OrderReceipt { accepted: false, status_code, detail: detail.into() }
    }
}

pub fn round_to_digits(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

/// Floors `value` to a multiple of `step`. A tiny epsilon absorbs float noise
/// such as 0.3 / 0.1 = 2.9999999999999996.
pub fn floor_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    let steps = (value / step + 1e-9).floor();
    round_to_digits(steps * step, step_decimals(step))
}

/// Number of decimals needed to print a step such as 0.001 → 3.
pub fn step_decimals(step: f64) -> u32 {
    if step <= 0.0 || step >= 1.0 {
        return 0;
    }
    let mut decimals = 0;
    let mut s = step;
    while s < 1.0 - 1e-9 && decimals < 10 {
        s *= 10.0;
        decimals += 1;
    }
    decimals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_to_step_absorbs_float_noise() {
        assert_eq!(floor_to_step(0.3, 0.1), 0.3);
        assert_eq!(floor_to_step(0.015, 0.01), 0.01);
        assert_eq!(floor_to_step(7.0, 1.0), 7.0);
    }

    #[test]
    fn step_decimals_from_lot_step() {
        assert_eq!(step_decimals(0.001), 3);
        assert_eq!(step_decimals(0.01), 2);
        assert_eq!(step_decimals(1.0), 0);
    }

    #[test]
    fn quote_prices_by_side() {
        let q = Quote { bid: 99.0, ask: 101.0 };
        assert_eq!(q.entry_price(Side::Buy), 101.0);
        assert_eq!(q.entry_price(Side::Sell), 99.0);
        assert_eq!(q.exit_price(Side::Buy), 99.0);
        assert_eq!(q.exit_price(Side::Sell), 101.0);
    }
}
