//! Collaborator seams between the decision engine and the outside world.
//!
//! The engine never talks HTTP itself; the orchestrator drives it through
//! these traits so the Bybit adapter and the in-memory fakes used in tests
//! are interchangeable.

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::types::{Candle, OrderReceipt, Position, Quote, Side, SymbolInfo};

/// Read-only market data.
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Up to `count` candles, oldest first. The last one may still be forming.
    async fn get_candles(&self, symbol: &str, timeframe: &str, count: usize) -> Result<Vec<Candle>, BrokerError>;

    async fn get_quote(&self, symbol: &str) -> Result<Quote, BrokerError>;

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, BrokerError>;
}

/// Order entry and account state. Transport failures are `Err`; a request the
/// broker refused is `Ok` with `accepted == false`.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn submit_market_order(
        &self,
        symbol: &str,
        side: Side,
        volume: f64,
        price: f64,
        stop_loss: f64,
        take_profit: f64,
    ) -> Result<OrderReceipt, BrokerError>;

    async fn modify_stop_loss(&self, ticket: &str, stop_loss: f64) -> Result<OrderReceipt, BrokerError>;

    async fn close_partial(&self, ticket: &str, volume: f64) -> Result<OrderReceipt, BrokerError>;

    async fn list_open_positions(&self, symbol: &str) -> Result<Vec<Position>, BrokerError>;

    async fn account_balance(&self) -> Result<f64, BrokerError>;

    /// Realized PnL since 00:00 UTC today.
    async fn realized_pnl_today(&self, symbol: &str) -> Result<f64, BrokerError>;
}

/// Fire-and-forget operator notifications. Implementations log their own
/// failures and never surface them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Notifier used when no chat credentials are configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) {
        log::info!("[notify] {}", message);
    }
}
