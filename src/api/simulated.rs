use super::{AccountSource, PriceSource};
use crate::error::FetchError;
use crate::models::Position;
use crate::signal::SimulatedSignal;
use chrono::Utc;
use rust_decimal::prelude::*;
use std::sync::Mutex;

const CANDLE_INTERVAL: &str = "1m";
const CANDLE_COUNT: u32 = 10;

/// Account adapter that fabricates equity and position from market data
///
/// Used when no brokerage gateway is configured, or as the fallback behind
/// one. The signal is the only source of randomness and is seeded once.
pub struct SimulatedAccount<P, S> {
    prices: P,
    symbol: String,
    signal: Mutex<S>,
}

impl<P: PriceSource, S: SimulatedSignal> SimulatedAccount<P, S> {
    pub fn new(prices: P, symbol: &str, signal: S) -> Self {
        Self {
            prices,
            symbol: symbol.to_string(),
            signal: Mutex::new(signal),
        }
    }

    async fn recent_closes(&self) -> Result<Vec<f64>, FetchError> {
        let candles = self
            .prices
            .get_recent_candles(&self.symbol, CANDLE_INTERVAL, CANDLE_COUNT)
            .await?;

        let closes: Vec<f64> = candles.iter().filter_map(|c| c.close.to_f64()).collect();
        if closes.is_empty() {
            return Err(FetchError::Malformed(format!(
                "no candles returned for {}",
                self.symbol
            )));
        }
        Ok(closes)
    }

    fn with_signal<T>(&self, f: impl FnOnce(&mut S) -> T) -> T {
        let mut guard = match self.signal.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl<P: PriceSource, S: SimulatedSignal> AccountSource for SimulatedAccount<P, S> {
    async fn get_equity(&self) -> Result<Decimal, FetchError> {
        let closes = self.recent_closes().await?;
        let price = closes[closes.len() - 1];
        let now = Utc::now();

        Ok(self.with_signal(|signal| signal.equity(now, price)))
    }

    async fn get_position(&self) -> Result<Position, FetchError> {
        let closes = self.recent_closes().await?;
        let now = Utc::now();

        Ok(self.with_signal(|signal| signal.position(now, &closes)))
    }
}

/// Account adapter that answers from `fallback` whenever `primary` fails
pub struct FallbackAccount<A, B> {
    primary: A,
    fallback: B,
}

impl<A: AccountSource, B: AccountSource> FallbackAccount<A, B> {
    pub fn new(primary: A, fallback: B) -> Self {
        Self { primary, fallback }
    }
}

impl<A: AccountSource, B: AccountSource> AccountSource for FallbackAccount<A, B> {
    async fn get_equity(&self) -> Result<Decimal, FetchError> {
        match self.primary.get_equity().await {
            Ok(equity) => Ok(equity),
            Err(e) => {
                tracing::debug!("Primary account failed ({}), using simulated equity", e);
                self.fallback.get_equity().await
            }
        }
    }

    async fn get_position(&self) -> Result<Position, FetchError> {
        match self.primary.get_position().await {
            Ok(position) => Ok(position),
            Err(e) => {
                tracing::debug!("Primary account failed ({}), using simulated position", e);
                self.fallback.get_position().await
            }
        }
    }
}
