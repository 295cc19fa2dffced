//! Moving averages and oscillators over an ordered (oldest-first) series.
//!
//! Every function returns an owned series aligned index-for-index with its
//! input. Warm-up slots are `None` rather than zero so callers can tell
//! "not enough data" apart from a real reading.

use serde::Deserialize;

use crate::types::{Candle, Side};

/// How the first EMA values are seeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmaAdjust {
    /// `ema[0] = x[0]`, then `ema[i] = α·x[i] + (1−α)·ema[i−1]`.
    Recursive,
    /// Normalized weighted average of every past value with weights `(1−α)^k`.
    /// Diverges from `Recursive` on short series, converges on long ones.
    Weighted,
}

/// Averaging applied to RSI gains/losses and to ATR true ranges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Smoothing {
    /// Rolling arithmetic mean over the last `period` values.
    Simple,
    /// SMA seed over the first `period` values, then
    /// `avg = (avg·(period−1) + x) / period`.
    Wilder,
}

pub fn ema(series: &[f64], span: usize, adjust: EmaAdjust) -> Vec<f64> {
    if series.is_empty() || span == 0 {
        return Vec::new();
    }
    let alpha = 2.0 / (span as f64 + 1.0);
    let decay = 1.0 - alpha;
    let mut out = Vec::with_capacity(series.len());

    match adjust {
        EmaAdjust::Recursive => {
            let mut prev = series[0];
            out.push(prev);
            for &x in &series[1..] {
                prev = alpha * x + decay * prev;
                out.push(prev);
            }
        }
        EmaAdjust::Weighted => {
            let mut num = 0.0;
            let mut den = 0.0;
            for &x in series {
                num = x + decay * num;
                den = 1.0 + decay * den;
                out.push(num / den);
            }
        }
    }
    out
}

/// Relative Strength Index of `closes`. Slot `i` is `Some` once `period`
/// deltas are available (`i >= period`).
pub fn rsi(closes: &[f64], period: usize, smoothing: Smoothing) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let gains: Vec<f64> = deltas.iter().map(|d| d.max(0.0)).collect();
    let losses: Vec<f64> = deltas.iter().map(|d| (-d).max(0.0)).collect();

    let avg_gain = smooth(&gains, period, smoothing);
    let avg_loss = smooth(&losses, period, smoothing);

    for (i, (g, l)) in avg_gain.iter().zip(&avg_loss).enumerate() {
        if let (Some(g), Some(l)) = (g, l) {
            // delta i sits between closes i and i+1
            out[i + 1] = Some(rsi_from_averages(*g, *l));
        }
    }
    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .map(|w| {
            let (prev, curr) = (&w[0], &w[1]);
            (curr.high - curr.low)
                .max((curr.high - prev.close).abs())
                .max((curr.low - prev.close).abs())
        })
        .collect()
}

/// Average True Range. True range starts at the second candle, so slot `i`
/// is `Some` once `i >= period`.
pub fn atr(candles: &[Candle], period: usize, smoothing: Smoothing) -> Vec<Option<f64>> {
    let mut out = vec![None; candles.len()];
    if period == 0 || candles.len() <= period {
        return out;
    }
    let tr = true_range(candles);
    for (i, v) in smooth(&tr, period, smoothing).into_iter().enumerate() {
        out[i + 1] = v;
    }
    out
}

/// Most recent ATR reading, or 0.0 when the series is too short.
pub fn latest_atr(candles: &[Candle], period: usize, smoothing: Smoothing) -> f64 {
    atr(candles, period, smoothing).last().copied().flatten().unwrap_or(0.0)
}

fn smooth(values: &[f64], period: usize, smoothing: Smoothing) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);

    match smoothing {
        Smoothing::Simple => {
            // summed per window; a running sum drifts below zero on flat stretches
            for i in period..values.len() {
                let sum: f64 = values[i + 1 - period..=i].iter().sum();
                out[i] = Some(sum / period as f64);
            }
        }
        Smoothing::Wilder => {
            let n = period as f64;
            let mut avg = seed;
            for i in period..values.len() {
                avg = (avg * (n - 1.0) + values[i]) / n;
                out[i] = Some(avg);
            }
        }
    }
    out
}

#[derive(Clone, Debug, PartialEq)]
pub struct HeikinAshiCandle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl HeikinAshiCandle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

/// Synthetic Heikin-Ashi candles. Each `open` depends on the previous
/// synthetic candle, so the sequence is built in a single forward pass.
pub fn heikin_ashi(candles: &[Candle]) -> Vec<HeikinAshiCandle> {
    let mut out: Vec<HeikinAshiCandle> = Vec::with_capacity(candles.len());
    for c in candles {
        let close = (c.open + c.high + c.low + c.close) / 4.0;
        let open = match out.last() {
            Some(prev) => (prev.open + prev.close) / 2.0,
            None => (c.open + c.close) / 2.0,
        };
        out.push(HeikinAshiCandle {
            timestamp: c.timestamp,
            open,
            high: c.high.max(open).max(close),
            low: c.low.min(open).min(close),
            close,
        });
    }
    out
}

/// Polarity flip between the last two synthetic candles:
/// bearish → bullish is a Buy, bullish → bearish is a Sell.
pub fn heikin_ashi_reversal(ha: &[HeikinAshiCandle]) -> Option<Side> {
    let [.., prev, curr] = ha else {
        return None;
    };
    match (prev.is_bullish(), curr.is_bullish()) {
        (false, true) => Some(Side::Buy),
        (true, false) => Some(Side::Sell),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle { timestamp: ts, open, high, low, close, volume: 1.0 }
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn recursive_ema_seeds_from_first_element() {
        let out = ema(&[10.0, 20.0, 30.0], 3, EmaAdjust::Recursive);
        // alpha = 0.5
        assert_eq!(out, vec![10.0, 15.0, 22.5]);
    }

    #[test]
    fn weighted_ema_differs_on_short_series() {
        let out = ema(&[10.0, 20.0], 3, EmaAdjust::Weighted);
        // (20 + 0.5·10) / (1 + 0.5)
        assert_close(out[1], 25.0 / 1.5);
        assert_close(out[0], 10.0);
    }

    #[test]
    fn ema_of_constant_series_is_constant() {
        for adjust in [EmaAdjust::Recursive, EmaAdjust::Weighted] {
            let out = ema(&[5.0; 30], 10, adjust);
            assert!(out.iter().all(|v| (v - 5.0).abs() < 1e-12));
        }
    }

    #[test]
    fn rsi_warm_up_is_none() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let out = rsi(&closes, 14, Smoothing::Simple);
        assert!(out[..14].iter().all(Option::is_none));
        assert!(out[14].is_some());
    }

    #[test]
    fn rsi_of_rising_series_is_100() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        for smoothing in [Smoothing::Simple, Smoothing::Wilder] {
            assert_eq!(rsi(&closes, 14, smoothing).last().copied().flatten(), Some(100.0));
        }
    }

    #[test]
    fn rsi_of_flat_series_is_neutral() {
        let out = rsi(&[50.0; 20], 14, Smoothing::Wilder);
        assert_eq!(out.last().copied().flatten(), Some(50.0));
    }

    #[test]
    fn simple_rsi_balanced_moves() {
        // +1, -1 alternating over 4 deltas: avg gain = avg loss
        let closes = [10.0, 11.0, 10.0, 11.0, 10.0];
        let out = rsi(&closes, 4, Smoothing::Simple);
        assert_close(out[4].unwrap(), 50.0);
    }

    #[test]
    fn wilder_rsi_smooths_after_seed() {
        // deltas: +2, +2, -2 ; period 2
        let closes = [10.0, 12.0, 14.0, 12.0];
        let out = rsi(&closes, 2, Smoothing::Wilder);
        assert_eq!(out[2], Some(100.0));
        // gain avg = (2·1 + 0)/2 = 1, loss avg = (0·1 + 2)/2 = 1
        assert_close(out[3].unwrap(), 50.0);
    }

    #[test]
    fn true_range_uses_previous_close_gaps() {
        let candles = [candle(0, 10.0, 11.0, 9.0, 10.0), candle(1, 14.0, 15.0, 13.0, 14.0)];
        // gap up: |15 - 10| dominates high-low of 2
        assert_eq!(true_range(&candles), vec![5.0]);
    }

    #[test]
    fn atr_simple_averages_true_range() {
        let candles: Vec<Candle> =
            (0..6).map(|i| candle(i, 100.0, 101.0, 99.0, 100.0)).collect();
        let out = atr(&candles, 3, Smoothing::Simple);
        assert!(out[..3].iter().all(Option::is_none));
        assert_close(out[3].unwrap(), 2.0);
        assert_close(latest_atr(&candles, 3, Smoothing::Wilder), 2.0);
    }

    #[test]
    fn latest_atr_short_series_is_zero() {
        let candles = [candle(0, 1.0, 2.0, 0.5, 1.5)];
        assert_eq!(latest_atr(&candles, 14, Smoothing::Wilder), 0.0);
    }

    #[test]
    fn heikin_ashi_follows_recurrence() {
        let candles = [
            candle(0, 10.0, 12.0, 9.0, 11.0),
            candle(1, 11.0, 13.0, 10.0, 12.0),
            candle(2, 12.0, 12.5, 8.0, 9.0),
        ];
        let ha = heikin_ashi(&candles);
        assert_eq!(ha.len(), 3);
        assert_close(ha[0].open, 10.5);
        assert_close(ha[0].close, 10.5);
        for i in 1..ha.len() {
            assert_close(ha[i].open, (ha[i - 1].open + ha[i - 1].close) / 2.0);
            let c = &candles[i];
            assert_close(ha[i].close, (c.open + c.high + c.low + c.close) / 4.0);
            assert!(ha[i].high >= ha[i].open.max(ha[i].close));
            assert!(ha[i].low <= ha[i].open.min(ha[i].close));
        }
    }

    #[test]
    fn heikin_ashi_reversal_detects_flips() {
        let bull = HeikinAshiCandle { timestamp: 0, open: 1.0, high: 2.0, low: 0.5, close: 1.5 };
        let bear = HeikinAshiCandle { timestamp: 1, open: 1.5, high: 2.0, low: 0.5, close: 1.0 };
        assert_eq!(heikin_ashi_reversal(&[bear.clone(), bull.clone()]), Some(Side::Buy));
        assert_eq!(heikin_ashi_reversal(&[bull.clone(), bear.clone()]), Some(Side::Sell));
        assert_eq!(heikin_ashi_reversal(&[bull.clone(), bull.clone()]), None);
        assert_eq!(heikin_ashi_reversal(&[bull]), None);
    }
}
