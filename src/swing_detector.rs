use std::collections::BTreeMap;

use crate::types::{Candle, SwingKind, SwingPoint, TrendDirection};

/// Swing highs and lows found by [`detect_fractals`], each oldest first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fractals {
    pub highs: Vec<SwingPoint>,
    pub lows: Vec<SwingPoint>,
}

impl Fractals {
    /// Most recent swing high/low pair, if both sides were found.
    pub fn latest_pair(&self) -> Option<(&SwingPoint, &SwingPoint)> {
        Some((self.highs.last()?, self.lows.last()?))
    }
}

/// Marks index `i` as a swing high when `high[i]` is strictly greater than
/// every other high in `[i - window, i + window]`, swing low symmetrically.
/// Only indices with a full window on both sides are considered. Returns at
/// most `count` of each kind, the most recent ones, oldest first.
///
/// Finding fewer than `count` is not an error; callers treat an empty side
/// as "insufficient data".
pub fn detect_fractals(candles: &[Candle], window: usize, count: usize) -> Fractals {
    let mut fractals = Fractals::default();
    let n = candles.len();
    if window == 0 || n < 2 * window + 1 {
        return fractals;
    }

    for i in window..(n - window) {
        let range = &candles[i - window..=i + window];
        let c = &candles[i];

        let is_high = range
            .iter()
            .enumerate()
            .all(|(k, other)| k == window || other.high < c.high);
        let is_low = range
            .iter()
            .enumerate()
            .all(|(k, other)| k == window || other.low > c.low);

        if is_high {
            fractals.highs.push(SwingPoint { timestamp: c.timestamp, price: c.high, kind: SwingKind::High });
        }
        if is_low {
            fractals.lows.push(SwingPoint { timestamp: c.timestamp, price: c.low, kind: SwingKind::Low });
        }
    }

    keep_last(&mut fractals.highs, count);
    keep_last(&mut fractals.lows, count);
    fractals
}

fn keep_last<T>(v: &mut Vec<T>, count: usize) {
    if v.len() > count {
        v.drain(..v.len() - count);
    }
}

/// Highest high and lowest low over the whole window.
pub fn swing_range(candles: &[Candle]) -> Option<(f64, f64)> {
    let first = candles.first()?;
    Some(candles.iter().fold((first.high, first.low), |(hi, lo), c| {
        (hi.max(c.high), lo.min(c.low))
    }))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FibRatio {
    R0,
    R382,
    R500,
    R618,
    R1000,
}

impl FibRatio {
    pub const ALL: [FibRatio; 5] =
        [FibRatio::R0, FibRatio::R382, FibRatio::R500, FibRatio::R618, FibRatio::R1000];

    pub fn value(self) -> f64 {
        match self {
            FibRatio::R0 => 0.0,
            FibRatio::R382 => 0.382,
            FibRatio::R500 => 0.5,
            FibRatio::R618 => 0.618,
            FibRatio::R1000 => 1.0,
        }
    }

    /// The ratio measuring the same price from the other end of the swing.
    pub fn complement(self) -> FibRatio {
        match self {
            FibRatio::R0 => FibRatio::R1000,
            FibRatio::R382 => FibRatio::R618,
            FibRatio::R500 => FibRatio::R500,
            FibRatio::R618 => FibRatio::R382,
            FibRatio::R1000 => FibRatio::R0,
        }
    }
}

/// Retracement levels of one swing.
///
/// Bullish: `level(r) = low + (high − low)·r`, so levels ascend with `r`.
/// Bearish: `level(r) = high − (high − low)·r`, so levels descend with `r`.
/// A degenerate swing (`high == low`) yields no levels at all.
#[derive(Clone, Debug, PartialEq)]
pub struct FibonacciLevels {
    bias: TrendDirection,
    high: f64,
    low: f64,
    levels: BTreeMap<FibRatio, f64>,
}

pub fn fibonacci_levels(high: f64, low: f64, bias: TrendDirection) -> FibonacciLevels {
    // swing endpoints may arrive in either order
    let (high, low) = (high.max(low), high.min(low));
    let mut levels = BTreeMap::new();
    let range = high - low;
    if range != 0.0 && range.is_finite() {
        for ratio in FibRatio::ALL {
            let price = match bias {
                TrendDirection::Bullish => low + range * ratio.value(),
                TrendDirection::Bearish => high - range * ratio.value(),
            };
            levels.insert(ratio, price);
        }
    }
    FibonacciLevels { bias, high, low, levels }
}

impl FibonacciLevels {
    pub fn bias(&self) -> TrendDirection {
        self.bias
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level(&self, ratio: FibRatio) -> Option<f64> {
        self.levels.get(&ratio).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FibRatio, f64)> + '_ {
        self.levels.iter().map(|(r, p)| (*r, *p))
    }

    /// Price reached after giving back `depth` of the swing against the bias.
    /// For a bullish swing a 0.618 retracement sits 61.8% of the range below
    /// the high, which is the 0.382 level counted from the low.
    pub fn retracement(&self, depth: FibRatio) -> Option<f64> {
        self.level(depth.complement())
    }

    /// Extreme the trade would target (`level(1.0)`): the high when bullish.
    pub fn far_extreme(&self) -> Option<f64> {
        self.level(FibRatio::R1000)
    }

    /// Extreme the trade would be invalidated at (`level(0.0)`).
    pub fn near_extreme(&self) -> Option<f64> {
        self.level(FibRatio::R0)
    }

    /// Same swing, opposite bias.
    pub fn mirrored(&self) -> FibonacciLevels {
        fibonacci_levels(self.high, self.low, self.bias.opposite())
    }

    /// Whether `price` lies between the levels of `a` and `b`, inclusive.
    pub fn contains_between(&self, price: f64, a: FibRatio, b: FibRatio) -> bool {
        match (self.level(a), self.level(b)) {
            (Some(x), Some(y)) => x.min(y) <= price && price <= x.max(y),
            _ => false,
        }
    }
}
