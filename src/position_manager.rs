use crate::config::{ManagementSettings, TrailMode};
use crate::types::{Position, Quote, Side, SymbolInfo};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    BreakEven,
    Trailing,
}

/// One broker call the manager wants made for an open position.
#[derive(Clone, Debug, PartialEq)]
pub enum ManagementAction {
    ClosePartial { ticket: String, volume: f64 },
    MoveStopLoss { ticket: String, stop_loss: f64, reason: StopReason },
}

/// Floating profit in price units, measured at the price the position would
/// close at.
pub fn floating_profit(position: &Position, quote: &Quote) -> f64 {
    let exit = quote.exit_price(position.side);
    (exit - position.open_price) * position.side.sign()
}

/// Whether `candidate` protects more profit than `current` for `side`.
fn is_tighter(side: Side, candidate: f64, current: Option<f64>) -> bool {
    match (side, current) {
        (_, None) => true,
        (Side::Buy, Some(sl)) => candidate > sl,
        (Side::Sell, Some(sl)) => candidate < sl,
    }
}

/// Stop must stay on the losing side of the current exit price.
fn below_market(side: Side, stop: f64, exit: f64) -> bool {
    (exit - stop) * side.sign() > 0.0
}

/// Plans management actions for one position, in execution order: partial
/// close, break-even, trailing stop. Stops only ever move in the
/// profit-protecting direction and trailing is judged against the stop the
/// break-even step leaves behind.
pub fn plan(
    position: &Position,
    quote: &Quote,
    info: &SymbolInfo,
    atr: Option<f64>,
    settings: &ManagementSettings,
    base_lot: f64,
) -> Vec<ManagementAction> {
    let mut actions = Vec::new();
    let side = position.side;
    let dir = side.sign();
    let exit = quote.exit_price(side);
    let profit = floating_profit(position, quote);
    let pts = |n: f64| n * info.point;

    // ── Partial close ─────────────────────────────────────────────────────────
    if profit > pts(settings.partial_trigger) && position.volume >= 2.0 * base_lot {
        let volume = info.floor_volume(position.volume * settings.partial_close_ratio);
        if volume >= info.volume_min && volume < position.volume {
            actions.push(ManagementAction::ClosePartial { ticket: position.ticket.clone(), volume });
        }
    }

    // ── Break-even ────────────────────────────────────────────────────────────
    let mut stop = position.stop_loss;
    if profit > pts(settings.be_trigger) {
        let be = info.round_price(position.open_price + dir * pts(settings.be_offset));
        if is_tighter(side, be, stop) && below_market(side, be, exit) {
            actions.push(ManagementAction::MoveStopLoss {
                ticket: position.ticket.clone(),
                stop_loss: be,
                reason: StopReason::BreakEven,
            });
            stop = Some(be);
        }
    }

    // ── Trailing ──────────────────────────────────────────────────────────────
    if profit > pts(settings.trail_start) {
        let distance = match settings.trail {
            TrailMode::Fixed { points } => Some(pts(points)),
            TrailMode::Atr { multiplier } => atr.filter(|a| *a > 0.0 && a.is_finite()).map(|a| a * multiplier),
        };
        if let Some(distance) = distance {
            let trail = info.round_price(exit - dir * distance);
            if is_tighter(side, trail, stop) && below_market(side, trail, exit) {
                actions.push(ManagementAction::MoveStopLoss {
                    ticket: position.ticket.clone(),
                    stop_loss: trail,
                    reason: StopReason::Trailing,
                });
            }
        }
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> SymbolInfo {
        SymbolInfo { point: 0.01, digits: 2, volume_min: 0.01, volume_max: 10.0, volume_step: 0.01, stops_level: 0 }
    }

    fn settings() -> ManagementSettings {
        ManagementSettings {
            be_trigger: 100.0,
            be_offset: 20.0,
            trail_start: 150.0,
            trail: TrailMode::Fixed { points: 50.0 },
            partial_trigger: 200.0,
            partial_close_ratio: 0.5,
        }
    }

    fn buy(volume: f64, stop_loss: Option<f64>) -> Position {
        Position {
            ticket: "T1".into(),
            symbol: "XAUUSDT".into(),
            side: Side::Buy,
            open_price: 2000.0,
            volume,
            stop_loss,
            take_profit: Some(2010.0),
        }
    }

    #[test]
    fn nothing_below_thresholds() {
        let q = Quote { bid: 2000.5, ask: 2000.6 };
        assert!(plan(&buy(0.02, Some(1995.0)), &q, &info(), None, &settings(), 0.01).is_empty());
    }

    #[test]
    fn break_even_then_trail() {
        // profit 1.6 = 160 points: BE at 2000.20, trail at 2001.60 - 0.50
        let q = Quote { bid: 2001.6, ask: 2001.7 };
        let actions = plan(&buy(0.01, Some(1995.0)), &q, &info(), None, &settings(), 0.01);
        assert_eq!(
            actions,
            vec![
                ManagementAction::MoveStopLoss { ticket: "T1".into(), stop_loss: 2000.2, reason: StopReason::BreakEven },
                ManagementAction::MoveStopLoss { ticket: "T1".into(), stop_loss: 2001.1, reason: StopReason::Trailing },
            ]
        );
    }

    #[test]
    fn partial_close_runs_first_on_double_base_lot() {
        let q = Quote { bid: 2002.5, ask: 2002.6 };
        let actions = plan(&buy(0.02, Some(1995.0)), &q, &info(), None, &settings(), 0.01);
        assert_eq!(actions[0], ManagementAction::ClosePartial { ticket: "T1".into(), volume: 0.01 });
        assert_eq!(actions.len(), 3);

        // the remainder is below 2 × base lot, so no second partial
        let after = Position { volume: 0.01, stop_loss: Some(2002.0), ..buy(0.01, None) };
        let again = plan(&after, &q, &info(), None, &settings(), 0.01);
        assert!(again.iter().all(|a| !matches!(a, ManagementAction::ClosePartial { .. })));
    }

    #[test]
    fn stop_never_loosens() {
        let q = Quote { bid: 2001.6, ask: 2001.7 };
        let actions = plan(&buy(0.01, Some(2001.5)), &q, &info(), None, &settings(), 0.01);
        assert!(actions.is_empty());
    }

    #[test]
    fn sell_side_mirrors() {
        let pos = Position { side: Side::Sell, stop_loss: Some(2005.0), ..buy(0.01, None) };
        // ask 1998.4 → profit 160 points
        let q = Quote { bid: 1998.3, ask: 1998.4 };
        let actions = plan(&pos, &q, &info(), None, &settings(), 0.01);
        assert_eq!(
            actions,
            vec![
                ManagementAction::MoveStopLoss { ticket: "T1".into(), stop_loss: 1999.8, reason: StopReason::BreakEven },
                ManagementAction::MoveStopLoss { ticket: "T1".into(), stop_loss: 1998.9, reason: StopReason::Trailing },
            ]
        );
    }

    #[test]
    fn atr_trail_needs_atr() {
        let s = ManagementSettings { trail: TrailMode::Atr { multiplier: 1.0 }, be_trigger: 1000.0, ..settings() };
        let q = Quote { bid: 2001.6, ask: 2001.7 };
        assert!(plan(&buy(0.01, Some(1995.0)), &q, &info(), None, &s, 0.01).is_empty());
        let actions = plan(&buy(0.01, Some(1995.0)), &q, &info(), Some(0.4), &s, 0.01);
        assert_eq!(
            actions,
            vec![ManagementAction::MoveStopLoss { ticket: "T1".into(), stop_loss: 2001.2, reason: StopReason::Trailing }]
        );
    }

    #[test]
    fn profit_uses_exit_side_of_quote() {
        let q = Quote { bid: 2001.0, ask: 2001.5 };
        assert!((floating_profit(&buy(0.01, None), &q) - 1.0).abs() < 1e-9);
    }
}
