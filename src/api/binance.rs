use super::PriceSource;
use crate::error::FetchError;
use crate::models::Candle;
use chrono::DateTime;
use governor::{Quota, RateLimiter};
use reqwest::{Client, Response};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const BINANCE_API_BASE: &str = "https://api.binance.com";
const TICKER_PATH: &str = "/api/v3/ticker/price";
const KLINES_PATH: &str = "/api/v3/klines";

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Binance public market-data client
///
/// Cloneable; all clones share one rate limiter. Failures are returned as-is,
/// the poller decides what a missed tick means.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    symbol: String,
    rate_limiter: Arc<BinanceRateLimiter>,
}

/// Response from /api/v3/ticker/price
#[derive(Debug, Deserialize)]
struct TickerPrice {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

impl BinanceClient {
    pub fn new(
        base_url: &str,
        symbol: &str,
        requests_per_second: u32,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let rps = NonZeroU32::new(requests_per_second)
            .ok_or(FetchError::NotConfigured("requests_per_second must be > 0"))?;
        let client = Client::builder().timeout(timeout).build()?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            symbol: symbol.to_string(),
            rate_limiter,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response, FetchError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

impl PriceSource for BinanceClient {
    async fn get_current_price(&self) -> Result<Decimal, FetchError> {
        let response = self
            .get(TICKER_PATH, &[("symbol", self.symbol.clone())])
            .await?;

        let ticker: TickerPrice = response
            .json()
            .await
            .map_err(|e| FetchError::Malformed(format!("ticker: {e}")))?;

        let price = parse_decimal(&ticker.price)?;
        if price <= Decimal::ZERO {
            return Err(FetchError::Malformed(format!(
                "non-positive price {}",
                ticker.price
            )));
        }

        Ok(price)
    }

    async fn get_recent_candles(
        &self,
        symbol: &str,
        interval: &str,
        count: u32,
    ) -> Result<Vec<Candle>, FetchError> {
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", count.to_string()),
        ];
        let response = self.get(KLINES_PATH, &query).await?;

        let rows: Vec<Vec<Value>> = response
            .json()
            .await
            .map_err(|e| FetchError::Malformed(format!("klines: {e}")))?;

        rows.iter().map(|row| parse_kline(row)).collect()
    }
}

/// `[open_time_ms, "open", "high", "low", "close", ...]`
fn parse_kline(row: &[Value]) -> Result<Candle, FetchError> {
    if row.len() < 5 {
        return Err(FetchError::Malformed(format!(
            "kline row has {} fields",
            row.len()
        )));
    }

    let open_ms = row[0]
        .as_i64()
        .ok_or_else(|| FetchError::Malformed(format!("kline open time {}", row[0])))?;
    let open_time = DateTime::from_timestamp_millis(open_ms)
        .ok_or_else(|| FetchError::Malformed(format!("kline open time {open_ms}")))?;

    let field = |i: usize| -> Result<Decimal, FetchError> {
        match &row[i] {
            Value::String(s) => parse_decimal(s),
            other => Err(FetchError::Malformed(format!("kline field {i}: {other}"))),
        }
    };

    Ok(Candle {
        open_time,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
    })
}

fn parse_decimal(text: &str) -> Result<Decimal, FetchError> {
    Decimal::from_str(text)
        .map(|d| d.normalize())
        .map_err(|e| FetchError::Malformed(format!("bad decimal {text:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(url: &str) -> BinanceClient {
        BinanceClient::new(url, "BTCUSDT", 100, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_zero_rate_limit_is_rejected() {
        let result = BinanceClient::new(BINANCE_API_BASE, "BTCUSDT", 0, Duration::from_secs(5));
        assert!(matches!(result, Err(FetchError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn test_get_current_price() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/ticker/price")
            .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"symbol":"BTCUSDT","price":"65000.12000000"}"#)
            .create_async()
            .await;

        let price = client_for(&server.url()).get_current_price().await.unwrap();
        assert_eq!(price, Decimal::new(6500012, 2));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_error_is_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/ticker/price")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let err = client_for(&server.url()).get_current_price().await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_garbage_price_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/ticker/price")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"symbol":"BTCUSDT","price":"abc"}"#)
            .create_async()
            .await;

        let err = client_for(&server.url()).get_current_price().await.unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_get_recent_candles() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
                Matcher::UrlEncoded("interval".into(), "1m".into()),
                Matcher::UrlEncoded("limit".into(), "2".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"[
                    [1700000000000,"65000.0","65100.0","64900.0","65050.0","12.5",1700000059999],
                    [1700000060000,"65050.0","65200.0","65000.0","65150.0","9.1",1700000119999]
                ]"#,
            )
            .create_async()
            .await;

        let candles = client_for(&server.url())
            .get_recent_candles("BTCUSDT", "1m", 2)
            .await
            .unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(candles[1].close, Decimal::from(65150));
    }

    #[test]
    fn test_short_kline_row_is_rejected() {
        let row = vec![Value::from(1_700_000_000_000i64), Value::from("1.0")];
        assert!(matches!(parse_kline(&row), Err(FetchError::Malformed(_))));
    }

    #[tokio::test]
    #[ignore] // Requires network access to api.binance.com
    async fn test_get_current_price_live() {
        let client = client_for(BINANCE_API_BASE);
        let price = client.get_current_price().await.unwrap();
        assert!(price > Decimal::ZERO);
    }
}
