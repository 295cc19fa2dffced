use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use crate::broker::{MarketDataFeed, Notifier, OrderGateway};
use crate::config::{Config, StrategyMode};
use crate::error::{BrokerError, Result, SizingError, TraderError};
use crate::indicators::{heikin_ashi, heikin_ashi_reversal, latest_atr, rsi, Smoothing};
use crate::position_manager::{self, ManagementAction, StopReason};
use crate::risk::{BreakerState, DrawdownBreaker, RiskSizer};
use crate::signal_engine::{detect_trend, trend_state, SignalEngine, SignalInputs};
use crate::swing_detector::{detect_fractals, fibonacci_levels, swing_range, FibonacciLevels};
use crate::telegram;
use crate::types::{Candle, RiskParameters, Side, Signal, TrendDirection, TrendState};

/// What happened to one symbol's entry side during a cycle.
#[derive(Clone, Debug, PartialEq)]
pub enum SymbolOutcome {
    /// Data was missing or too short; nothing evaluated.
    Skipped(String),
    /// A broker call failed after retries; contained to this symbol.
    Failed(String),
    AtCapacity,
    EntryHalted,
    NoSignal,
    SizingRejected(SizingError),
    OrderPlaced { side: Side, risk: RiskParameters },
    OrderRejected { side: Side, status_code: i64, detail: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SymbolReport {
    pub symbol: String,
    /// Management actions the broker accepted.
    pub managed: Vec<ManagementAction>,
    pub outcome: SymbolOutcome,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CycleReport {
    pub balance: f64,
    pub breaker: Option<BreakerState>,
    pub symbols: Vec<SymbolReport>,
}

impl CycleReport {
    pub fn outcome(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.symbols.iter().find(|r| r.symbol == symbol).map(|r| &r.outcome)
    }
}

/// Indicator readings gathered for one entry decision.
struct Readings {
    trend: Option<TrendState>,
    higher_trend: Option<TrendDirection>,
    rsi: Option<f64>,
    price: f64,
    last_closed: Option<f64>,
    heikin_ashi: Option<Side>,
    fibonacci: FibonacciLevels,
    atr: f64,
}

impl Readings {
    fn inputs(&self) -> SignalInputs<'_> {
        SignalInputs {
            trend: self.trend,
            higher_trend: self.higher_trend,
            rsi: self.rsi,
            price: self.price,
            last_closed: self.last_closed,
            fibonacci: &self.fibonacci,
            heikin_ashi: self.heikin_ashi,
        }
    }
}

/// Readings, or why the symbol was skipped.
type Gathered = std::result::Result<Readings, String>;

/// Drives one read → decide → act pass per poll over every configured symbol.
pub struct Trader<F, G, N> {
    config: Config,
    feed: F,
    gateway: G,
    notifier: N,
    engine: SignalEngine,
    sizer: RiskSizer,
    breaker: DrawdownBreaker,
}

impl<F, G, N> Trader<F, G, N>
where
    F: MarketDataFeed,
    G: OrderGateway,
    N: Notifier,
{
    pub fn new(config: Config, feed: F, gateway: G, notifier: N) -> Self {
        let engine = SignalEngine::new(config.strategy.clone());
        let sizer = RiskSizer::new(config.risk.clone(), config.base_lot);
        let breaker = DrawdownBreaker::new(config.risk.max_daily_drawdown_pct, config.risk.drawdown_cooldown_secs);
        Trader { config, feed, gateway, notifier, engine, sizer, breaker }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Session check: the first balance request must succeed before any cycle.
    pub async fn start(&self) -> Result<f64> {
        let balance = self.gateway.account_balance().await?;
        log::info!(
            "Session OK — balance {:.2} | symbols {} | mode {:?}",
            balance,
            self.config.symbols.join(", "),
            self.config.strategy.mode
        );
        self.notifier
            .notify(&telegram::start_message(&self.config.symbols, &self.config.timeframes.entry, balance))
            .await;
        Ok(balance)
    }

    /// Polls until `shutdown` resolves. Shutdown is only observed between
    /// cycles; a cycle in flight always completes.
    pub async fn run<S>(&mut self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let interval = Duration::from_secs(self.config.poll_interval_secs);
        loop {
            if let Err(e) = self.run_cycle_guarded(Utc::now()).await {
                log::error!("Cycle failed: {}", e);
                self.notifier.notify(&format!("⚠️ Cycle error: {}", e)).await;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = &mut shutdown => {
                    log::info!("Shutdown requested — stopping after completed cycle");
                    break;
                }
            }
        }
    }

    /// [`run_cycle`](Self::run_cycle) with panics turned into errors.
    pub async fn run_cycle_guarded(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        match AssertUnwindSafe(self.run_cycle(now)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(TraderError::Panic(msg))
            }
        }
    }

    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        let balance = self.gateway.account_balance().await?;
        let breaker = self.update_breaker(balance, now).await;
        let entries_allowed = breaker.is_some_and(|b| b.entries_allowed());

        let mut symbols = Vec::with_capacity(self.config.symbols.len());
        for symbol in &self.config.symbols {
            let report = match self.process_symbol(symbol, balance, entries_allowed).await {
                Ok(report) => report,
                Err(e) => {
                    log::error!("[{}] Broker error: {}", symbol, e);
                    self.notifier.notify(&telegram::symbol_error_message(symbol, &e.to_string())).await;
                    SymbolReport { symbol: symbol.to_string(), managed: Vec::new(), outcome: SymbolOutcome::Failed(e.to_string()) }
                }
            };
            symbols.push(report);
        }
        Ok(CycleReport { balance, breaker, symbols })
    }

    /// `None` when today's PnL could not be read; entries stay off for the
    /// cycle, management still runs.
    async fn update_breaker(&mut self, balance: f64, now: DateTime<Utc>) -> Option<BreakerState> {
        let mut pnl = 0.0;
        for symbol in &self.config.symbols {
            match self.gateway.realized_pnl_today(symbol).await {
                Ok(p) => pnl += p,
                Err(e) => {
                    log::warn!("[{}] Realized PnL unavailable: {} — entries paused this cycle", symbol, e);
                    return None;
                }
            }
        }

        let state = self.breaker.update(pnl, balance, now);
        match state {
            BreakerState::Tripped { drawdown_pct, until } => {
                log::warn!("Daily drawdown {:.2}% exceeds limit — entries halted until {}", drawdown_pct, until);
                self.notifier
                    .notify(&telegram::risk_alert_message(&format!(
                        "Daily drawdown {:.2}% — entries halted until {}",
                        drawdown_pct,
                        until.format("%H:%M UTC")
                    )))
                    .await;
            }
            BreakerState::Cooling { until } => {
                log::info!("Drawdown breaker cooling down until {}", until);
            }
            BreakerState::Clear { drawdown_pct } => {
                log::debug!("Daily drawdown {:.2}%", drawdown_pct);
            }
        }
        Some(state)
    }

    async fn process_symbol(
        &self,
        symbol: &str,
        balance: f64,
        entries_allowed: bool,
    ) -> std::result::Result<SymbolReport, BrokerError> {
        let cfg = &self.config;
        let positions = self.gateway.list_open_positions(symbol).await?;

        let candles = match self.feed.get_candles(symbol, &cfg.timeframes.entry, cfg.candle_count).await {
            Ok(c) => Some(c),
            Err(e) => {
                log::warn!("[{}] Entry candles unavailable: {}", symbol, e);
                None
            }
        };

        // ── Manage open positions ─────────────────────────────────────────────
        let mut managed = Vec::new();
        if !positions.is_empty() {
            let quote = self.feed.get_quote(symbol).await?;
            let info = self.feed.symbol_info(symbol).await?;
            let atr = candles
                .as_deref()
                .map(|c| latest_atr(c, cfg.indicators.atr_period, cfg.indicators.atr_smoothing))
                .filter(|a| *a > 0.0);

            for position in &positions {
                let actions = position_manager::plan(position, &quote, &info, atr, &cfg.management, cfg.base_lot);
                for action in actions {
                    if self.apply(symbol, &action).await {
                        managed.push(action);
                    }
                }
            }
        }

        let report = |outcome| SymbolReport { symbol: symbol.to_string(), managed: managed.clone(), outcome };

        if positions.len() >= cfg.risk.max_open_positions {
            log::debug!("[{}] {} open position(s) — at cap", symbol, positions.len());
            return Ok(report(SymbolOutcome::AtCapacity));
        }
        if !entries_allowed {
            return Ok(report(SymbolOutcome::EntryHalted));
        }

        // ── Entry ─────────────────────────────────────────────────────────────
        let Some(candles) = candles else {
            return Ok(report(SymbolOutcome::Skipped("entry candles unavailable".into())));
        };
        let min_len = (2 * cfg.indicators.fractal_window + 1).max(cfg.indicators.rsi_period + 1);
        if candles.len() < min_len {
            log::warn!("[{}] Only {} entry candles (need {}) — skipping", symbol, candles.len(), min_len);
            return Ok(report(SymbolOutcome::Skipped(format!("{} entry candles", candles.len()))));
        }

        let readings = match cfg.strategy.mode {
            StrategyMode::TrendFollowing => self.trend_readings(symbol, &candles).await?,
            StrategyMode::Confluence => self.confluence_readings(&candles),
        };
        let readings = match readings {
            Ok(r) => r,
            Err(reason) => return Ok(report(SymbolOutcome::Skipped(reason))),
        };

        let signal = self.engine.evaluate(&readings.inputs());
        log::info!(
            "[{}] Trend {:?} | RSI {} | price {} | signal {}",
            symbol,
            readings.trend,
            readings.rsi.map_or("n/a".to_string(), |r| format!("{:.2}", r)),
            readings.price,
            describe(&signal)
        );
        let Some(side) = signal.direction else {
            return Ok(report(SymbolOutcome::NoSignal));
        };

        let outcome = self.enter(symbol, side, balance, readings.atr, &readings.fibonacci).await?;
        Ok(report(outcome))
    }

    /// Trend profile: EMA trend on the trend timeframe, optional higher
    /// timeframe filter, fractal swing on the entry timeframe.
    async fn trend_readings(
        &self,
        symbol: &str,
        candles: &[Candle],
    ) -> std::result::Result<Gathered, BrokerError> {
        let cfg = &self.config;
        let ind = &cfg.indicators;

        let trend_candles = match self.feed.get_candles(symbol, &cfg.timeframes.trend, cfg.trend_candle_count).await {
            Ok(c) if !c.is_empty() => c,
            Ok(_) => return Ok(Err("no trend candles".into())),
            Err(e) => {
                log::warn!("[{}] Trend candles unavailable: {}", symbol, e);
                return Ok(Err("trend candles unavailable".into()));
            }
        };
        let trend = trend_state(&closes(&trend_candles), ind);

        let higher_trend = match &cfg.timeframes.higher {
            Some(tf) => match self.feed.get_candles(symbol, tf, cfg.trend_candle_count).await {
                Ok(c) if !c.is_empty() => detect_trend(&closes(&c), ind.ema_fast, ind.ema_slow, ind.ema_adjust),
                Ok(_) => return Ok(Err("no higher-timeframe candles".into())),
                Err(e) => {
                    log::warn!("[{}] Higher-timeframe candles unavailable: {}", symbol, e);
                    return Ok(Err("higher-timeframe candles unavailable".into()));
                }
            },
            None => None,
        };
        let Some(state) = trend else {
            return Ok(Err("trend undetermined".into()));
        };

        let fractals = detect_fractals(candles, ind.fractal_window, ind.fractal_count);
        let Some((high, low)) = fractals.latest_pair() else {
            log::info!("[{}] No swing high/low found", symbol);
            return Ok(Err("no swing points".into()));
        };
        let fibonacci = fibonacci_levels(high.price, low.price, state.direction);
        log::debug!(
            "[{}] Swing high {} / low {} | levels {:?}",
            symbol,
            high.price,
            low.price,
            fibonacci.iter().collect::<Vec<_>>()
        );

        let quote = self.feed.get_quote(symbol).await?;
        let entry_closes = closes(candles);
        Ok(Ok(Readings {
            trend: Some(state),
            higher_trend,
            rsi: latest_rsi(&entry_closes, ind.rsi_period, ind.rsi_smoothing),
            price: quote.entry_price(state.direction.side()),
            last_closed: last_closed(candles),
            heikin_ashi: None,
            fibonacci,
            atr: latest_atr(candles, ind.atr_period, ind.atr_smoothing),
        }))
    }

    /// Confluence profile: everything from the entry timeframe, priced at the
    /// last close.
    fn confluence_readings(&self, candles: &[Candle]) -> Gathered {
        let ind = &self.config.indicators;
        let (high, low) = swing_range(candles).ok_or_else(|| "no candles".to_string())?;
        let entry_closes = closes(candles);
        let price = *entry_closes.last().ok_or_else(|| "no candles".to_string())?;
        Ok(Readings {
            trend: None,
            higher_trend: None,
            rsi: latest_rsi(&entry_closes, ind.rsi_period, ind.rsi_smoothing),
            price,
            last_closed: last_closed(candles),
            heikin_ashi: heikin_ashi_reversal(&heikin_ashi(candles)),
            fibonacci: fibonacci_levels(high, low, TrendDirection::Bullish),
            atr: latest_atr(candles, ind.atr_period, ind.atr_smoothing),
        })
    }

    async fn enter(
        &self,
        symbol: &str,
        side: Side,
        balance: f64,
        atr: f64,
        fibonacci: &FibonacciLevels,
    ) -> std::result::Result<SymbolOutcome, BrokerError> {
        let quote = self.feed.get_quote(symbol).await?;
        let info = self.feed.symbol_info(symbol).await?;
        let price = quote.entry_price(side);

        let risk = match self.sizer.size_entry(price, side, atr, balance, fibonacci, &info) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("[{}] Entry refused: {}", symbol, e);
                return Ok(SymbolOutcome::SizingRejected(e));
            }
        };

        let receipt = self
            .gateway
            .submit_market_order(symbol, side, risk.lot_size, price, risk.stop_loss, risk.take_profit)
            .await?;
        if receipt.accepted {
            log::info!(
                "[{}] {} {} @ {} | SL {} | TP {} | ATR {:.5}",
                symbol, side, risk.lot_size, price, risk.stop_loss, risk.take_profit, atr
            );
            self.notifier.notify(&telegram::trade_open_message(symbol, side, price, &risk)).await;
            Ok(SymbolOutcome::OrderPlaced { side, risk })
        } else {
            log::error!("[{}] Order rejected: code={} {}", symbol, receipt.status_code, receipt.detail);
            self.notifier
                .notify(&telegram::rejection_message(symbol, "Order", receipt.status_code, &receipt.detail))
                .await;
            Ok(SymbolOutcome::OrderRejected { side, status_code: receipt.status_code, detail: receipt.detail })
        }
    }

    /// Sends one management action. Returns whether the broker accepted it;
    /// failures are logged and never abort the remaining actions.
    async fn apply(&self, symbol: &str, action: &ManagementAction) -> bool {
        let (label, result) = match action {
            ManagementAction::ClosePartial { ticket, volume } => {
                ("Partial close", self.gateway.close_partial(ticket, *volume).await)
            }
            ManagementAction::MoveStopLoss { ticket, stop_loss, reason } => {
                let label = match reason {
                    StopReason::BreakEven => "Break-even",
                    StopReason::Trailing => "Trailing stop",
                };
                (label, self.gateway.modify_stop_loss(ticket, *stop_loss).await)
            }
        };

        match result {
            Ok(receipt) if receipt.accepted => {
                log::info!("[{}] {} applied: {:?}", symbol, label, action);
                if let Some(msg) = telegram::management_message(symbol, action) {
                    self.notifier.notify(&msg).await;
                }
                true
            }
            Ok(receipt) => {
                log::error!("[{}] {} rejected: code={} {}", symbol, label, receipt.status_code, receipt.detail);
                self.notifier
                    .notify(&telegram::rejection_message(symbol, label, receipt.status_code, &receipt.detail))
                    .await;
                false
            }
            Err(e) => {
                log::error!("[{}] {} failed: {}", symbol, label, e);
                false
            }
        }
    }
}

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// The newest candle may still be forming; the one before it is the last
/// closed one.
fn last_closed(candles: &[Candle]) -> Option<f64> {
    candles.len().checked_sub(2).map(|i| candles[i].close)
}

fn latest_rsi(closes: &[f64], period: usize, smoothing: Smoothing) -> Option<f64> {
    rsi(closes, period, smoothing).last().copied().flatten()
}

fn describe(signal: &Signal) -> String {
    match signal.direction {
        Some(side) => format!("{} {:?}", side, signal.confirmations),
        None => "none".to_string(),
    }
}
