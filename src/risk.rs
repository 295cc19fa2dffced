use chrono::{DateTime, Duration, Utc};

use crate::config::{RiskSettings, StopMode};
use crate::error::SizingError;
use crate::swing_detector::FibonacciLevels;
use crate::types::{floor_to_step, round_to_digits, RiskParameters, Side, SymbolInfo};

/// Volume bounds an order must respect.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LotLimits {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl LotLimits {
    /// Floor = the larger of our base lot and the broker minimum; cap = broker
    /// maximum, never below the floor.
    pub fn new(base_lot: f64, info: &SymbolInfo) -> Self {
        let min = base_lot.max(info.volume_min);
        let max = if info.volume_max > 0.0 { info.volume_max.max(min) } else { min };
        LotLimits { min, max, step: info.volume_step }
    }
}

/// `balance · risk_fraction / (atr · scaling)` rounded down to the lot step
/// and kept within `limits`. Undefined sizing (zero or non-finite ATR)
/// falls back to the minimum lot.
pub fn lot_size(atr: f64, risk_fraction: f64, balance: f64, scaling: f64, limits: LotLimits) -> f64 {
    if atr <= 0.0 || !atr.is_finite() || scaling <= 0.0 {
        return limits.min;
    }
    let raw = balance * risk_fraction / (atr * scaling);
    if !raw.is_finite() {
        return limits.min;
    }
    floor_to_step(raw, limits.step).max(limits.min).min(limits.max)
}

/// What the stop-loss and take-profit are measured from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StopAnchor {
    /// SL at the swing extreme behind the entry, TP at the one ahead of it.
    Fibonacci { near: f64, far: f64 },
    /// SL/TP at ATR multiples from the entry price.
    Atr { atr: f64, sl_mult: f64, tp_mult: f64 },
}

/// Derives `(stop_loss, take_profit)` for an entry at `price`, widened to the
/// broker's minimum distance and rounded to `digits`. Fails when the result
/// still violates the minimum distance or sits on the wrong side of price.
pub fn stop_and_target(
    price: f64,
    side: Side,
    anchor: StopAnchor,
    min_distance: f64,
    digits: u32,
) -> Result<(f64, f64), SizingError> {
    let dir = side.sign();
    let (sl, tp) = match anchor {
        StopAnchor::Fibonacci { near, far } => match side {
            Side::Buy => (near.min(price - min_distance), far.max(price + min_distance)),
            Side::Sell => (near.max(price + min_distance), far.min(price - min_distance)),
        },
        StopAnchor::Atr { atr, sl_mult, tp_mult } => {
            let sl_dist = (atr * sl_mult).max(min_distance);
            let tp_dist = (atr * tp_mult).max(min_distance);
            (price - dir * sl_dist, price + dir * tp_dist)
        }
    };
    let sl = round_to_digits(sl, digits);
    let tp = round_to_digits(tp, digits);

    // absorbs rounding noise such as 0.49999999999977 vs 0.5
    const EPS: f64 = 1e-9;
    let sl_distance = (price - sl).abs();
    let tp_distance = (tp - price).abs();
    if sl_distance + EPS < min_distance {
        return Err(SizingError::StopTooClose { side, price, stop_loss: sl, distance: sl_distance, min_distance });
    }
    if tp_distance + EPS < min_distance {
        return Err(SizingError::TargetTooClose { side, price, take_profit: tp, distance: tp_distance, min_distance });
    }
    let on_loss_side = (price - sl) * dir > 0.0;
    let on_profit_side = (tp - price) * dir > 0.0;
    if !on_loss_side || !on_profit_side {
        return Err(SizingError::WrongSide { side, price, stop_loss: sl, take_profit: tp });
    }
    Ok((sl, tp))
}

/// Sizes an entry from ATR, balance and the broker's constraints.
#[derive(Clone, Debug)]
pub struct RiskSizer {
    settings: RiskSettings,
    base_lot: f64,
}

impl RiskSizer {
    pub fn new(settings: RiskSettings, base_lot: f64) -> Self {
        RiskSizer { settings, base_lot }
    }

    pub fn size_entry(
        &self,
        price: f64,
        side: Side,
        atr: f64,
        balance: f64,
        fib: &FibonacciLevels,
        info: &SymbolInfo,
    ) -> Result<RiskParameters, SizingError> {
        let s = &self.settings;
        let limits = LotLimits::new(self.base_lot, info);
        let lot = lot_size(atr, s.risk_fraction, balance, s.atr_scaling, limits);

        let atr_anchor = StopAnchor::Atr { atr, sl_mult: s.sl_atr_mult, tp_mult: s.tp_atr_mult };
        let anchor = match s.stop_mode {
            StopMode::Atr => atr_anchor,
            StopMode::Fibonacci => fibonacci_anchor(fib, side).unwrap_or_else(|| {
                log::warn!("No Fibonacci anchor for {} — using ATR stops", side);
                atr_anchor
            }),
        };

        let min_distance = effective_min_distance(info, s.min_stop_points);
        let (stop_loss, take_profit) = stop_and_target(price, side, anchor, min_distance, info.digits)?;
        Ok(RiskParameters { lot_size: lot, stop_loss, take_profit })
    }
}

/// Broker stop distance, or the configured fallback when the broker reports none.
pub fn effective_min_distance(info: &SymbolInfo, fallback_points: u32) -> f64 {
    if info.stops_level > 0 {
        info.min_stop_distance()
    } else {
        fallback_points as f64 * info.point
    }
}

fn fibonacci_anchor(fib: &FibonacciLevels, side: Side) -> Option<StopAnchor> {
    let levels = if fib.bias().side() == side { fib.clone() } else { fib.mirrored() };
    Some(StopAnchor::Fibonacci { near: levels.near_extreme()?, far: levels.far_extreme()? })
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BreakerState {
    Clear { drawdown_pct: f64 },
    /// Tripped on this update.
    Tripped { drawdown_pct: f64, until: DateTime<Utc> },
    /// Still inside an earlier cool-down.
    Cooling { until: DateTime<Utc> },
}

impl BreakerState {
    pub fn entries_allowed(&self) -> bool {
        matches!(self, BreakerState::Clear { .. })
    }
}

/// Halts new entries for a cool-down once today's realized PnL magnitude
/// exceeds `max_percent` of the balance.
#[derive(Clone, Debug)]
pub struct DrawdownBreaker {
    max_percent: f64,
    cooldown: Duration,
    halted_until: Option<DateTime<Utc>>,
}

impl DrawdownBreaker {
    pub fn new(max_percent: f64, cooldown_secs: u64) -> Self {
        DrawdownBreaker {
            max_percent,
            cooldown: i64::try_from(cooldown_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
            halted_until: None,
        }
    }

    pub fn update(&mut self, realized_pnl: f64, balance: f64, now: DateTime<Utc>) -> BreakerState {
        if let Some(until) = self.halted_until {
            if now < until {
                return BreakerState::Cooling { until };
            }
            self.halted_until = None;
        }

        let drawdown_pct = drawdown_percent(realized_pnl, balance);
        if drawdown_pct > self.max_percent {
            let until = now.checked_add_signed(self.cooldown).unwrap_or(DateTime::<Utc>::MAX_UTC);
            self.halted_until = Some(until);
            BreakerState::Tripped { drawdown_pct, until }
        } else {
            BreakerState::Clear { drawdown_pct }
        }
    }
}

/// `|pnl| / balance · 100`. A non-positive balance counts as total drawdown.
pub fn drawdown_percent(realized_pnl: f64, balance: f64) -> f64 {
    if balance <= 0.0 {
        return f64::INFINITY;
    }
    realized_pnl.abs() / balance * 100.0
}
