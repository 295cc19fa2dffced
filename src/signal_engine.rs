use crate::config::{IndicatorSettings, StrategyMode, StrategySettings};
use crate::indicators::{ema, EmaAdjust};
use crate::swing_detector::{FibRatio, FibonacciLevels};
use crate::types::{Confirmation, Side, Signal, TrendDirection, TrendState, TrendStrength};

/// Bullish when the fast EMA is above the slow EMA on the last bar.
pub fn detect_trend(
    closes: &[f64],
    fast: usize,
    slow: usize,
    adjust: EmaAdjust,
) -> Option<TrendDirection> {
    let fast_last = *ema(closes, fast, adjust).last()?;
    let slow_last = *ema(closes, slow, adjust).last()?;
    Some(if fast_last > slow_last { TrendDirection::Bullish } else { TrendDirection::Bearish })
}

/// Strong when the fast EMA moved more than `threshold` over `lookback` bars.
/// Too short a series reads as Normal.
pub fn detect_trend_strength(
    closes: &[f64],
    fast: usize,
    lookback: usize,
    threshold: f64,
    adjust: EmaAdjust,
) -> TrendStrength {
    let line = ema(closes, fast, adjust);
    if line.len() <= lookback {
        return TrendStrength::Normal;
    }
    let slope = line[line.len() - 1] - line[line.len() - 1 - lookback];
    if slope.abs() > threshold {
        TrendStrength::Strong
    } else {
        TrendStrength::Normal
    }
}

pub fn trend_state(closes: &[f64], s: &IndicatorSettings) -> Option<TrendState> {
    let direction = detect_trend(closes, s.ema_fast, s.ema_slow, s.ema_adjust)?;
    let strength = detect_trend_strength(
        closes,
        s.ema_fast,
        s.strength_lookback,
        s.strength_threshold,
        s.ema_adjust,
    );
    Some(TrendState { direction, strength })
}

/// Everything one evaluation looks at. Built fresh each cycle.
#[derive(Clone, Debug)]
pub struct SignalInputs<'a> {
    /// Primary trend. Required by the trend-following profile.
    pub trend: Option<TrendState>,
    /// Higher-timeframe direction, when that filter is configured.
    pub higher_trend: Option<TrendDirection>,
    pub rsi: Option<f64>,
    /// Live price the entry would be compared against.
    pub price: f64,
    /// Close of the most recently completed entry candle.
    pub last_closed: Option<f64>,
    pub fibonacci: &'a FibonacciLevels,
    pub heikin_ashi: Option<Side>,
}

/// Fuses trend, RSI, Fibonacci and Heikin-Ashi readings into one signal.
/// Holds only configuration; every call is independent.
#[derive(Clone, Debug)]
pub struct SignalEngine {
    settings: StrategySettings,
}

impl SignalEngine {
    pub fn new(settings: StrategySettings) -> Self {
        SignalEngine { settings }
    }

    pub fn mode(&self) -> StrategyMode {
        self.settings.mode
    }

    pub fn evaluate(&self, inputs: &SignalInputs<'_>) -> Signal {
        match self.settings.mode {
            StrategyMode::TrendFollowing => self.trend_following(inputs),
            StrategyMode::Confluence => self.confluence(inputs),
        }
    }

    /// Entry threshold for the trend: a 61.8% pullback in a normal trend,
    /// only 38.2% when the trend is strong.
    pub fn entry_level(fib: &FibonacciLevels, strength: TrendStrength) -> Option<f64> {
        match strength {
            TrendStrength::Normal => fib.retracement(FibRatio::R618),
            TrendStrength::Strong => fib.retracement(FibRatio::R382),
        }
    }

    fn trend_following(&self, inputs: &SignalInputs<'_>) -> Signal {
        let Some(trend) = inputs.trend else {
            return Signal::none();
        };
        if let Some(higher) = inputs.higher_trend {
            if higher != trend.direction {
                log::debug!("Higher timeframe {:?} disagrees with {:?} — no entry", higher, trend.direction);
                return Signal::none();
            }
        }

        let Some(entry_level) = Self::entry_level(inputs.fibonacci, trend.strength) else {
            log::debug!("Fibonacci levels inapplicable (flat swing) — no entry");
            return Signal::none();
        };

        if self.settings.confirm_candle_close {
            let confirmed = match (trend.direction, inputs.last_closed) {
                (TrendDirection::Bullish, Some(close)) => close > entry_level,
                (TrendDirection::Bearish, Some(close)) => close < entry_level,
                (_, None) => false,
            };
            if !confirmed {
                log::debug!(
                    "Last close {:?} not beyond entry level {:.5} — waiting",
                    inputs.last_closed, entry_level
                );
                return Signal::none();
            }
        }

        let by_fibo = match trend.direction {
            TrendDirection::Bullish => inputs.price <= entry_level,
            TrendDirection::Bearish => inputs.price >= entry_level,
        };
        let by_rsi = inputs.rsi.is_some_and(|rsi| match trend.direction {
            TrendDirection::Bullish => rsi < self.settings.rsi_oversold,
            TrendDirection::Bearish => rsi > self.settings.rsi_overbought,
        });

        let mut confirmations = Vec::new();
        if by_fibo {
            confirmations.push(Confirmation::Fibonacci);
        }
        if by_rsi {
            confirmations.push(Confirmation::Rsi);
        }
        if confirmations.is_empty() {
            return Signal::none();
        }
        Signal::new(trend.direction.side(), confirmations)
    }

    /// Candidates in precedence order: Heikin-Ashi, RSI, Fibonacci.
    /// The first present one picks the side.
    fn confluence(&self, inputs: &SignalInputs<'_>) -> Signal {
        let by_ha = inputs.heikin_ashi;
        let by_rsi = inputs.rsi.and_then(|rsi| {
            if rsi < self.settings.rsi_oversold {
                Some(Side::Buy)
            } else if rsi > self.settings.rsi_overbought {
                Some(Side::Sell)
            } else {
                None
            }
        });
        let by_fibo = fibonacci_zone(inputs.fibonacci, inputs.price);

        let candidates = [
            (Confirmation::HeikinAshi, by_ha),
            (Confirmation::Rsi, by_rsi),
            (Confirmation::Fibonacci, by_fibo),
        ];
        let Some(side) = candidates.iter().find_map(|(_, s)| *s) else {
            return Signal::none();
        };
        let agreeing = candidates
            .iter()
            .filter(|(_, s)| *s == Some(side))
            .map(|(c, _)| *c);
        Signal::new(side, agreeing)
    }
}

/// Buy inside the bullish 0.5–0.618 band, Sell inside the bearish one.
fn fibonacci_zone(fib: &FibonacciLevels, price: f64) -> Option<Side> {
    let (bullish, bearish) = match fib.bias() {
        TrendDirection::Bullish => (fib.clone(), fib.mirrored()),
        TrendDirection::Bearish => (fib.mirrored(), fib.clone()),
    };
    if bullish.contains_between(price, FibRatio::R500, FibRatio::R618) {
        Some(Side::Buy)
    } else if bearish.contains_between(price, FibRatio::R500, FibRatio::R618) {
        Some(Side::Sell)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swing_detector::fibonacci_levels;

    fn engine(mode: StrategyMode, confirm: bool) -> SignalEngine {
        SignalEngine::new(StrategySettings {
            mode,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            confirm_candle_close: confirm,
        })
    }

    fn bullish(strength: TrendStrength) -> Option<TrendState> {
        Some(TrendState { direction: TrendDirection::Bullish, strength })
    }

    fn inputs<'a>(fib: &'a FibonacciLevels, price: f64, rsi: f64) -> SignalInputs<'a> {
        SignalInputs {
            trend: bullish(TrendStrength::Normal),
            higher_trend: None,
            rsi: Some(rsi),
            price,
            last_closed: Some(price),
            fibonacci: fib,
            heikin_ashi: None,
        }
    }

    #[test]
    fn detects_bullish_trend_on_rising_closes() {
        let closes: Vec<f64> = (0..250).map(|i| 100.0 + i as f64).collect();
        assert_eq!(detect_trend(&closes, 50, 200, EmaAdjust::Recursive), Some(TrendDirection::Bullish));
        assert_eq!(
            detect_trend_strength(&closes, 50, 5, 1.0, EmaAdjust::Recursive),
            TrendStrength::Strong
        );
    }

    #[test]
    fn detects_bearish_trend_and_normal_strength() {
        let closes: Vec<f64> = (0..250).map(|i| 1000.0 - i as f64 * 0.01).collect();
        assert_eq!(detect_trend(&closes, 50, 200, EmaAdjust::Recursive), Some(TrendDirection::Bearish));
        assert_eq!(
            detect_trend_strength(&closes, 50, 5, 1.0, EmaAdjust::Recursive),
            TrendStrength::Normal
        );
        assert_eq!(detect_trend(&[], 50, 200, EmaAdjust::Recursive), None);
    }

    #[test]
    fn entry_level_depends_on_strength() {
        let fib = fibonacci_levels(200.0, 100.0, TrendDirection::Bullish);
        let normal = SignalEngine::entry_level(&fib, TrendStrength::Normal).unwrap();
        let strong = SignalEngine::entry_level(&fib, TrendStrength::Strong).unwrap();
        assert!((normal - 138.2).abs() < 1e-9);
        assert!((strong - 161.8).abs() < 1e-9);
    }

    #[test]
    fn rsi_oversold_fires_in_bullish_trend() {
        let fib = fibonacci_levels(200.0, 100.0, TrendDirection::Bullish);
        let sig = engine(StrategyMode::TrendFollowing, false).evaluate(&inputs(&fib, 180.0, 25.0));
        assert_eq!(sig.direction, Some(Side::Buy));
        assert!(sig.confirmations.contains(&Confirmation::Rsi));
        assert!(!sig.confirmations.contains(&Confirmation::Fibonacci));
    }

    #[test]
    fn fibonacci_pullback_fires_in_bullish_trend() {
        let fib = fibonacci_levels(200.0, 100.0, TrendDirection::Bullish);
        let sig = engine(StrategyMode::TrendFollowing, false).evaluate(&inputs(&fib, 130.0, 50.0));
        assert_eq!(sig.direction, Some(Side::Buy));
        assert_eq!(sig.confirmations.iter().copied().collect::<Vec<_>>(), vec![Confirmation::Fibonacci]);
    }

    #[test]
    fn neutral_rsi_between_levels_is_none() {
        let fib = fibonacci_levels(200.0, 100.0, TrendDirection::Bullish);
        let sig = engine(StrategyMode::TrendFollowing, false).evaluate(&inputs(&fib, 150.0, 50.0));
        assert!(sig.is_none());
    }

    #[test]
    fn bearish_trend_sells_on_overbought() {
        let fib = fibonacci_levels(200.0, 100.0, TrendDirection::Bearish);
        let mut i = inputs(&fib, 120.0, 75.0);
        i.trend = Some(TrendState { direction: TrendDirection::Bearish, strength: TrendStrength::Normal });
        let sig = engine(StrategyMode::TrendFollowing, false).evaluate(&i);
        assert_eq!(sig.direction, Some(Side::Sell));
    }

    #[test]
    fn higher_timeframe_disagreement_suppresses() {
        let fib = fibonacci_levels(200.0, 100.0, TrendDirection::Bullish);
        let mut i = inputs(&fib, 130.0, 20.0);
        i.higher_trend = Some(TrendDirection::Bearish);
        assert!(engine(StrategyMode::TrendFollowing, false).evaluate(&i).is_none());
        i.higher_trend = Some(TrendDirection::Bullish);
        assert!(!engine(StrategyMode::TrendFollowing, false).evaluate(&i).is_none());
    }

    #[test]
    fn candle_close_confirmation_requires_close_beyond_level() {
        let fib = fibonacci_levels(200.0, 100.0, TrendDirection::Bullish);
        let mut i = inputs(&fib, 130.0, 20.0);
        i.last_closed = Some(135.0);
        assert!(engine(StrategyMode::TrendFollowing, true).evaluate(&i).is_none());
        i.last_closed = Some(140.0);
        assert_eq!(engine(StrategyMode::TrendFollowing, true).evaluate(&i).direction, Some(Side::Buy));
        i.last_closed = None;
        assert!(engine(StrategyMode::TrendFollowing, true).evaluate(&i).is_none());
    }

    #[test]
    fn flat_swing_suppresses_trend_signal() {
        let fib = fibonacci_levels(150.0, 150.0, TrendDirection::Bullish);
        let sig = engine(StrategyMode::TrendFollowing, false).evaluate(&inputs(&fib, 150.0, 10.0));
        assert!(sig.is_none());
    }

    #[test]
    fn confluence_prefers_heikin_ashi() {
        let fib = fibonacci_levels(200.0, 100.0, TrendDirection::Bullish);
        let mut i = inputs(&fib, 155.0, 20.0);
        i.trend = None;
        i.heikin_ashi = Some(Side::Sell);
        let sig = engine(StrategyMode::Confluence, false).evaluate(&i);
        assert_eq!(sig.direction, Some(Side::Sell));
        assert_eq!(sig.confirmations.iter().copied().collect::<Vec<_>>(), vec![Confirmation::HeikinAshi]);
    }

    #[test]
    fn confluence_falls_back_to_rsi_then_fibonacci() {
        let fib = fibonacci_levels(200.0, 100.0, TrendDirection::Bullish);
        let mut i = inputs(&fib, 155.0, 20.0);
        i.trend = None;
        let sig = engine(StrategyMode::Confluence, false).evaluate(&i);
        assert_eq!(sig.direction, Some(Side::Buy));
        assert!(sig.confirmations.contains(&Confirmation::Rsi));
        assert!(sig.confirmations.contains(&Confirmation::Fibonacci));

        i.rsi = Some(50.0);
        i.price = 145.0;
        let sig = engine(StrategyMode::Confluence, false).evaluate(&i);
        assert_eq!(sig.direction, Some(Side::Sell));
        assert_eq!(sig.confirmations.iter().copied().collect::<Vec<_>>(), vec![Confirmation::Fibonacci]);

        i.price = 190.0;
        assert!(engine(StrategyMode::Confluence, false).evaluate(&i).is_none());
    }
}
