use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::broker::{MarketDataFeed, OrderGateway};
use crate::config::{non_empty_var, BybitSettings};
use crate::error::{BrokerError, ConfigError};
use crate::types::{step_decimals, Candle, OrderReceipt, Position, Quote, Side, SymbolInfo};

type HmacSha256 = Hmac<Sha256>;

const MS_PER_DAY: i64 = 86_400_000;
/// "OrderLinkedID is duplicate": a retried create whose first attempt landed.
const DUPLICATE_LINK_ID: i64 = 110072;

static ORDER_SEQ: AtomicU64 = AtomicU64::new(0);

// ── Error classification & retry ──────────────────────────────────────────────

/// Classify a Bybit retCode + HTTP status into a BrokerError.
fn classify_error(ret_code: i64, http_status: u16, msg: &str) -> BrokerError {
    match (ret_code, http_status) {
        (10006, _) | (_, 429) => BrokerError::RateLimit { retry_after: 10 },
        (10016, _) | (_, 500..=599) => BrokerError::Transient(msg.to_string()),
        _ => BrokerError::Permanent(format!("retCode={} msg={}", ret_code, msg)),
    }
}

/// Generic retry wrapper with exponential backoff.
async fn with_retry<F, Fut, T>(operation: F, max_retries: u32) -> Result<T, BrokerError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
{
    let mut retries = 0;
    let mut delay: u64 = 1;
    loop {
        match operation().await {
            Ok(r) => return Ok(r),
            Err(BrokerError::RateLimit { retry_after }) => {
                if retries >= max_retries {
                    return Err(BrokerError::RateLimit { retry_after });
                }
                log::warn!("Rate limited — sleeping {}s (attempt {}/{})", retry_after, retries + 1, max_retries);
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                retries += 1;
            }
            Err(BrokerError::Transient(msg)) => {
                if retries >= max_retries {
                    return Err(BrokerError::Transient(msg));
                }
                log::warn!("Transient error: {} — retry in {}s ({}/{})", msg, delay, retries + 1, max_retries);
                tokio::time::sleep(Duration::from_secs(delay)).await;
                delay = (delay * 2).min(60);
                retries += 1;
            }
            Err(e @ BrokerError::Permanent(_)) => return Err(e),
        }
    }
}

// ── Response parsing ──────────────────────────────────────────────────────────

fn ret_code(json: &Value) -> i64 {
    json["retCode"].as_i64().unwrap_or(-1)
}

fn ret_msg(json: &Value) -> &str {
    json["retMsg"].as_str().unwrap_or("unknown")
}

/// `Ok(json)` for retCode 0, otherwise the classified error.
fn check(json: Value, http_status: u16) -> Result<Value, BrokerError> {
    match ret_code(&json) {
        0 => Ok(json),
        code => Err(classify_error(code, http_status, ret_msg(&json))),
    }
}

/// Order-style endpoints: a permanent refusal is a rejected receipt, not an
/// error. Rate limits and transient failures stay errors so they get retried.
fn receipt_from(json: &Value, http_status: u16) -> Result<OrderReceipt, BrokerError> {
    let code = ret_code(json);
    if code == 0 {
        let id = json["result"]["orderId"].as_str().unwrap_or("ok");
        return Ok(OrderReceipt::accepted(id));
    }
    if code == DUPLICATE_LINK_ID {
        log::warn!("Order already placed by an earlier attempt: {}", ret_msg(json));
        return Ok(OrderReceipt::accepted("duplicate orderLinkId"));
    }
    match classify_error(code, http_status, ret_msg(json)) {
        BrokerError::Permanent(_) => Ok(OrderReceipt::rejected(code, ret_msg(json))),
        other => Err(other),
    }
}

/// Client order id, fixed per submission so retries of the same create
/// cannot open a second position. Bybit caps it at 36 characters.
fn order_link_id(now_ms: i64, seq: u64) -> String {
    format!("ft-{}-{}", now_ms, seq % 1_000_000)
}

fn next_order_link_id() -> String {
    order_link_id(Utc::now().timestamp_millis(), ORDER_SEQ.fetch_add(1, Ordering::Relaxed))
}

/// Bybit sends numbers as strings; accept both.
fn num(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// A zero or missing price means "not set".
fn price_opt(v: &Value) -> Option<f64> {
    num(v).filter(|p| *p > 0.0)
}

fn result_list(json: &Value) -> &[Value] {
    json["result"]["list"].as_array().map(Vec::as_slice).unwrap_or(&[])
}

/// Kline rows arrive newest-first as string arrays; returns oldest-first.
fn parse_klines(json: &Value) -> Result<Vec<Candle>, BrokerError> {
    let list = json["result"]["list"]
        .as_array()
        .ok_or_else(|| BrokerError::Transient("missing result.list".into()))?;

    let mut candles: Vec<Candle> = list
        .iter()
        .filter_map(|row| {
            let arr = row.as_array()?;
            Some(Candle {
                timestamp: arr.first()?.as_str()?.parse().ok()?,
                open: num(arr.get(1)?)?,
                high: num(arr.get(2)?)?,
                low: num(arr.get(3)?)?,
                close: num(arr.get(4)?)?,
                volume: num(arr.get(5)?)?,
            })
        })
        .collect();
    candles.reverse();
    Ok(candles)
}

fn parse_quote(json: &Value) -> Result<Quote, BrokerError> {
    let t = result_list(json)
        .first()
        .ok_or_else(|| BrokerError::Permanent("tickers: empty list".into()))?;
    match (num(&t["bid1Price"]), num(&t["ask1Price"])) {
        (Some(bid), Some(ask)) if bid > 0.0 && ask > 0.0 => Ok(Quote { bid, ask }),
        _ => Err(BrokerError::Transient("tickers: no bid/ask".into())),
    }
}

/// Bybit has no stop-level concept; `stops_level` is left at 0 and the
/// configured fallback applies.
fn parse_instrument(json: &Value) -> Result<SymbolInfo, BrokerError> {
    let item = result_list(json)
        .first()
        .ok_or_else(|| BrokerError::Permanent("instruments-info: unknown symbol".into()))?;
    let tick = num(&item["priceFilter"]["tickSize"])
        .ok_or_else(|| BrokerError::Permanent("instruments-info: missing tickSize".into()))?;
    let lot = &item["lotSizeFilter"];
    let volume_step = num(&lot["qtyStep"]).unwrap_or(0.001);
    Ok(SymbolInfo {
        point: tick,
        digits: step_decimals(tick),
        volume_min: num(&lot["minOrderQty"]).unwrap_or(volume_step),
        volume_max: num(&lot["maxMktOrderQty"]).or_else(|| num(&lot["maxOrderQty"])).unwrap_or(0.0),
        volume_step,
        stops_level: 0,
    })
}

/// One-way mode: one position per symbol, ticket = symbol.
fn parse_positions(json: &Value) -> Vec<Position> {
    result_list(json)
        .iter()
        .filter_map(|entry| {
            let volume = num(&entry["size"])?;
            if volume <= 0.0 {
                return None;
            }
            let side = match entry["side"].as_str()? {
                "Buy" => Side::Buy,
                "Sell" => Side::Sell,
                _ => return None,
            };
            let symbol = entry["symbol"].as_str()?.to_string();
            Some(Position {
                ticket: symbol.clone(),
                symbol,
                side,
                open_price: num(&entry["avgPrice"]).unwrap_or(0.0),
                volume,
                stop_loss: price_opt(&entry["stopLoss"]),
                take_profit: price_opt(&entry["takeProfit"]),
            })
        })
        .collect()
}

fn parse_wallet_balance(json: &Value) -> Result<f64, BrokerError> {
    let account = result_list(json)
        .first()
        .ok_or_else(|| BrokerError::Permanent("wallet-balance: empty list".into()))?;
    num(&account["totalWalletBalance"])
        .or_else(|| num(&account["totalEquity"]))
        .ok_or_else(|| BrokerError::Permanent("wallet-balance: missing totalWalletBalance".into()))
}

fn sum_closed_pnl(json: &Value) -> f64 {
    result_list(json).iter().filter_map(|e| num(&e["closedPnl"])).sum()
}

/// Start of the UTC day containing `now`, in epoch milliseconds.
fn utc_day_start_ms(now: DateTime<Utc>) -> i64 {
    let ms = now.timestamp_millis();
    ms - ms.rem_euclid(MS_PER_DAY)
}

/// Shortest decimal form Bybit accepts for a qty or price.
fn fmt_decimal(value: f64, decimals: u32) -> String {
    let s = format!("{:.*}", decimals as usize, value);
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Bybit V5 linear-perpetual adapter. Market data goes to the public host,
/// account and order calls to the (demo by default) trading host.
#[derive(Clone)]
pub struct BybitClient {
    client: reqwest::Client,
    base_url: String,
    public_url: String,
    api_key: String,
    api_secret: String,
    recv_window: String,
    max_retries: u32,
    instruments: Arc<Mutex<HashMap<String, SymbolInfo>>>,
}

impl BybitClient {
    /// Reads `BYBIT_API_KEY` / `BYBIT_SECRET`; missing credentials are fatal.
    pub fn new(settings: &BybitSettings) -> Result<Self, ConfigError> {
        let api_key = non_empty_var("BYBIT_API_KEY").ok_or(ConfigError::MissingEnv("BYBIT_API_KEY"))?;
        let api_secret = non_empty_var("BYBIT_SECRET").ok_or(ConfigError::MissingEnv("BYBIT_SECRET"))?;
        Self::with_credentials(settings, api_key, api_secret)
    }

    pub fn with_credentials(
        settings: &BybitSettings,
        api_key: String,
        api_secret: String,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client build failed: {}", e)))?;

        Ok(BybitClient {
            client,
            base_url: settings.rest_url.trim_end_matches('/').to_string(),
            public_url: settings.public_url.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
            recv_window: settings.recv_window_ms.to_string(),
            max_retries: settings.max_retries,
            instruments: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn sign(&self, payload: &str) -> Result<String, BrokerError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| BrokerError::Permanent(format!("HMAC init failed: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Adds the V5 auth headers. `params` is the query string for GET and the
    /// JSON body for POST.
    fn signed(&self, req: reqwest::RequestBuilder, params: &str) -> Result<reqwest::RequestBuilder, BrokerError> {
        let ts = Utc::now().timestamp_millis().to_string();
        let payload = format!("{}{}{}{}", ts, self.api_key, self.recv_window, params);
        let signature = self.sign(&payload)?;
        Ok(req
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", ts)
            .header("X-BAPI-SIGN", signature)
            .header("X-BAPI-RECV-WINDOW", &self.recv_window))
    }

    async fn send(req: reqwest::RequestBuilder) -> Result<(Value, u16), BrokerError> {
        let resp = req
            .send()
            .await
            .map_err(|e| BrokerError::Transient(format!("HTTP error: {}", e)))?;
        let http_status = resp.status().as_u16();
        let json: Value = resp
            .json()
            .await
            .map_err(|e| {
                if http_status >= 500 || http_status == 429 {
                    classify_error(-1, http_status, &e.to_string())
                } else {
                    BrokerError::Transient(format!("Parse error: {}", e))
                }
            })?;
        Ok((json, http_status))
    }

    // ── Internal raw methods (no retry) ──────────────────────────────────────

    async fn public_get_raw(&self, path: &str, query: &str) -> Result<(Value, u16), BrokerError> {
        let url = format!("{}{}?{}", self.public_url, path, query);
        Self::send(self.client.get(&url)).await
    }

    async fn private_get_raw(&self, path: &str, query: &str) -> Result<(Value, u16), BrokerError> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        let req = self.signed(self.client.get(&url), query)?;
        Self::send(req).await
    }

    async fn private_post_raw(&self, path: &str, body: &str) -> Result<(Value, u16), BrokerError> {
        let url = format!("{}{}", self.base_url, path);
        let req = self
            .signed(self.client.post(&url), body)?
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string());
        Self::send(req).await
    }

    // ── Retrying wrappers ─────────────────────────────────────────────────────

    async fn public_get(&self, path: &str, query: &str) -> Result<Value, BrokerError> {
        with_retry(
            move || async move {
                let (json, status) = self.public_get_raw(path, query).await?;
                check(json, status)
            },
            self.max_retries,
        )
        .await
    }

    async fn private_get(&self, path: &str, query: &str) -> Result<Value, BrokerError> {
        with_retry(
            move || async move {
                let (json, status) = self.private_get_raw(path, query).await?;
                check(json, status)
            },
            self.max_retries,
        )
        .await
    }

    async fn private_order(&self, path: &str, body: &str) -> Result<OrderReceipt, BrokerError> {
        with_retry(
            move || async move {
                let (json, status) = self.private_post_raw(path, body).await?;
                receipt_from(&json, status)
            },
            self.max_retries,
        )
        .await
    }

    async fn position_for(&self, symbol: &str) -> Result<Option<Position>, BrokerError> {
        Ok(self.list_open_positions(symbol).await?.into_iter().next())
    }

    fn cached_instrument(&self, symbol: &str) -> Option<SymbolInfo> {
        self.instruments.lock().ok()?.get(symbol).cloned()
    }
}

#[async_trait]
impl MarketDataFeed for BybitClient {
    async fn get_candles(&self, symbol: &str, timeframe: &str, count: usize) -> Result<Vec<Candle>, BrokerError> {
        let query = format!("category=linear&symbol={}&interval={}&limit={}", symbol, timeframe, count);
        let json = self.public_get("/v5/market/kline", &query).await?;
        parse_klines(&json)
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, BrokerError> {
        let query = format!("category=linear&symbol={}", symbol);
        let json = self.public_get("/v5/market/tickers", &query).await?;
        parse_quote(&json)
    }

    /// Instrument filters rarely change; cached for the life of the process.
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, BrokerError> {
        if let Some(info) = self.cached_instrument(symbol) {
            return Ok(info);
        }
        let query = format!("category=linear&symbol={}", symbol);
        let json = self.public_get("/v5/market/instruments-info", &query).await?;
        let info = parse_instrument(&json)?;
        if let Ok(mut cache) = self.instruments.lock() {
            cache.insert(symbol.to_string(), info.clone());
        }
        Ok(info)
    }
}

#[async_trait]
impl OrderGateway for BybitClient {
    async fn submit_market_order(
        &self,
        symbol: &str,
        side: Side,
        volume: f64,
        price: f64,
        stop_loss: f64,
        take_profit: f64,
    ) -> Result<OrderReceipt, BrokerError> {
        let info = self.symbol_info(symbol).await?;
        let body = serde_json::json!({
            "category":    "linear",
            "symbol":      symbol,
            "side":        side.as_str(),
            "orderType":   "Market",
            "qty":         fmt_decimal(volume, step_decimals(info.volume_step)),
            "stopLoss":    fmt_decimal(stop_loss, info.digits),
            "takeProfit":  fmt_decimal(take_profit, info.digits),
            "tpslMode":    "Full",
            "positionIdx": 0,
            "orderLinkId": next_order_link_id()
        })
        .to_string();

        let receipt = self.private_order("/v5/order/create", &body).await?;
        if receipt.accepted {
            log::info!(
                "[{}] Order placed: {} qty={} ~{} SL={} TP={} orderId={}",
                symbol, side, volume, price, stop_loss, take_profit, receipt.detail
            );
        }
        Ok(receipt)
    }

    async fn modify_stop_loss(&self, ticket: &str, stop_loss: f64) -> Result<OrderReceipt, BrokerError> {
        let info = self.symbol_info(ticket).await?;
        let body = serde_json::json!({
            "category":    "linear",
            "symbol":      ticket,
            "stopLoss":    fmt_decimal(stop_loss, info.digits),
            "tpslMode":    "Full",
            "positionIdx": 0
        })
        .to_string();
        self.private_order("/v5/position/trading-stop", &body).await
    }

    async fn close_partial(&self, ticket: &str, volume: f64) -> Result<OrderReceipt, BrokerError> {
        let position = match self.position_for(ticket).await? {
            Some(p) => p,
            None => return Ok(OrderReceipt::rejected(-1, format!("no open position for {}", ticket))),
        };
        let info = self.symbol_info(ticket).await?;
        let body = serde_json::json!({
            "category":    "linear",
            "symbol":      ticket,
            "side":        position.side.opposite().as_str(),
            "orderType":   "Market",
            "qty":         fmt_decimal(volume, step_decimals(info.volume_step)),
            "reduceOnly":  true,
            "positionIdx": 0,
            "orderLinkId": next_order_link_id()
        })
        .to_string();
        self.private_order("/v5/order/create", &body).await
    }

    async fn list_open_positions(&self, symbol: &str) -> Result<Vec<Position>, BrokerError> {
        let query = format!("category=linear&symbol={}", symbol);
        let json = self.private_get("/v5/position/list", &query).await?;
        Ok(parse_positions(&json))
    }

    async fn account_balance(&self) -> Result<f64, BrokerError> {
        let json = self.private_get("/v5/account/wallet-balance", "accountType=UNIFIED").await?;
        parse_wallet_balance(&json)
    }

    async fn realized_pnl_today(&self, symbol: &str) -> Result<f64, BrokerError> {
        let start = utc_day_start_ms(Utc::now());
        let query = format!("category=linear&symbol={}&startTime={}&limit=100", symbol, start);
        let json = self.private_get("/v5/position/closed-pnl", &query).await?;
        Ok(sum_closed_pnl(&json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn classifies_ret_codes() {
        assert!(matches!(classify_error(10006, 200, ""), BrokerError::RateLimit { retry_after: 10 }));
        assert!(matches!(classify_error(0, 429, ""), BrokerError::RateLimit { .. }));
        assert!(matches!(classify_error(10016, 200, "busy"), BrokerError::Transient(_)));
        assert!(matches!(classify_error(-1, 503, ""), BrokerError::Transient(_)));
        assert!(matches!(classify_error(110007, 200, "insufficient"), BrokerError::Permanent(_)));
    }

    #[test]
    fn permanent_order_failure_is_a_rejected_receipt() {
        let rejected = json!({ "retCode": 110007, "retMsg": "ab not enough for new order" });
        let receipt = receipt_from(&rejected, 200).unwrap();
        assert!(!receipt.accepted);
        assert_eq!(receipt.status_code, 110007);

        let busy = json!({ "retCode": 10006, "retMsg": "too many visits" });
        assert!(matches!(receipt_from(&busy, 200), Err(BrokerError::RateLimit { .. })));

        let ok = json!({ "retCode": 0, "result": { "orderId": "abc" } });
        assert_eq!(receipt_from(&ok, 200).unwrap(), OrderReceipt::accepted("abc"));
    }

    #[test]
    fn retried_create_with_known_link_id_counts_as_placed() {
        let dup = json!({ "retCode": 110072, "retMsg": "OrderLinkedID is duplicate" });
        assert!(receipt_from(&dup, 200).unwrap().accepted);

        let a = order_link_id(1_700_000_000_000, 41);
        let b = order_link_id(1_700_000_000_000, 42);
        assert_ne!(a, b);
        assert!(a.len() <= 36);
        assert_ne!(next_order_link_id(), next_order_link_id());
    }

    #[test]
    fn klines_are_reversed_to_oldest_first() {
        let body = json!({ "retCode": 0, "result": { "list": [
            ["2000", "11", "12", "10", "11.5", "7"],
            ["1000", "10", "11", "9", "10.5", "3"]
        ]}});
        let candles = parse_klines(&body).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp, 1000);
        assert_eq!(candles[1].close, 11.5);
    }

    #[test]
    fn parses_instrument_filters() {
        let body = json!({ "retCode": 0, "result": { "list": [{
            "symbol": "XAUUSDT",
            "priceFilter": { "tickSize": "0.01" },
            "lotSizeFilter": { "minOrderQty": "0.01", "maxMktOrderQty": "50", "qtyStep": "0.01" }
        }]}});
        let info = parse_instrument(&body).unwrap();
        assert_eq!(info.point, 0.01);
        assert_eq!(info.digits, 2);
        assert_eq!(info.volume_max, 50.0);
        assert_eq!(info.stops_level, 0);
    }

    #[test]
    fn parses_open_positions_only() {
        let body = json!({ "retCode": 0, "result": { "list": [
            { "symbol": "XAUUSDT", "side": "Sell", "size": "0.02", "avgPrice": "2000.5",
              "stopLoss": "2010", "takeProfit": "0" },
            { "symbol": "XAUUSDT", "side": "", "size": "0", "avgPrice": "0" }
        ]}});
        let positions = parse_positions(&body);
        assert_eq!(positions.len(), 1);
        let p = &positions[0];
        assert_eq!(p.ticket, "XAUUSDT");
        assert_eq!(p.side, Side::Sell);
        assert_eq!(p.stop_loss, Some(2010.0));
        assert_eq!(p.take_profit, None);
    }

    #[test]
    fn sums_closed_pnl_and_reads_balance() {
        let pnl = json!({ "retCode": 0, "result": { "list": [
            { "closedPnl": "-12.5" }, { "closedPnl": "4.5" }
        ]}});
        assert_eq!(sum_closed_pnl(&pnl), -8.0);

        let wallet = json!({ "retCode": 0, "result": { "list": [{ "totalWalletBalance": "10000.25" }]}});
        assert_eq!(parse_wallet_balance(&wallet).unwrap(), 10000.25);
    }

    #[test]
    fn day_start_is_utc_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 17, 42, 9).unwrap();
        let midnight = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        assert_eq!(utc_day_start_ms(now), midnight.timestamp_millis());
    }

    #[test]
    fn decimal_formatting_trims_zeros() {
        assert_eq!(fmt_decimal(0.010000001, 3), "0.01");
        assert_eq!(fmt_decimal(2000.0, 2), "2000");
        assert_eq!(fmt_decimal(7.0, 0), "7");
    }

    #[test]
    fn signature_is_hex_hmac() {
        let client = BybitClient::with_credentials(&BybitSettings::default(), "key".into(), "secret".into()).unwrap();
        let sig = client.sign("payload").unwrap();
        assert_eq!(sig.len(), 64);
        assert_eq!(sig, client.sign("payload").unwrap());
    }

    #[tokio::test]
    async fn retry_gives_up_on_permanent_errors() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), BrokerError> = with_retry(
            || {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err(BrokerError::Permanent("bad".into())) }
            },
            3,
        )
        .await;
        assert!(matches!(result, Err(BrokerError::Permanent(_))));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_surfaces_rate_limit_when_exhausted() {
        let result: Result<(), BrokerError> =
            with_retry(|| async { Err(BrokerError::RateLimit { retry_after: 10 }) }, 0).await;
        assert!(matches!(result, Err(BrokerError::RateLimit { .. })));
    }
}
