pub mod binance;
pub mod gateway;
pub mod simulated;

pub use binance::BinanceClient;
pub use gateway::GatewayClient;
pub use simulated::{FallbackAccount, SimulatedAccount};

use crate::error::FetchError;
use crate::models::{Candle, Position};
use crate::signal::SeededSignal;
use rust_decimal::Decimal;
use std::future::Future;

/// External quote service
pub trait PriceSource: Send + Sync {
    /// Latest traded price of the configured symbol
    fn get_current_price(&self) -> impl Future<Output = Result<Decimal, FetchError>> + Send;

    /// Most recent `count` candles, oldest first
    fn get_recent_candles(
        &self,
        symbol: &str,
        interval: &str,
        count: u32,
    ) -> impl Future<Output = Result<Vec<Candle>, FetchError>> + Send;
}

/// External brokerage account
pub trait AccountSource: Send + Sync {
    fn get_equity(&self) -> impl Future<Output = Result<Decimal, FetchError>> + Send;

    fn get_position(&self) -> impl Future<Output = Result<Position, FetchError>> + Send;
}

/// The account adapter selected from configuration at startup
pub enum AccountBackend {
    Gateway(GatewayClient),
    Simulated(SimulatedAccount<BinanceClient, SeededSignal>),
    GatewayWithFallback(FallbackAccount<GatewayClient, SimulatedAccount<BinanceClient, SeededSignal>>),
}

impl AccountBackend {
    pub fn describe(&self) -> &'static str {
        match self {
            AccountBackend::Gateway(_) => "brokerage gateway",
            AccountBackend::Simulated(_) => "simulated",
            AccountBackend::GatewayWithFallback(_) => "brokerage gateway (simulated fallback)",
        }
    }
}

impl AccountSource for AccountBackend {
    async fn get_equity(&self) -> Result<Decimal, FetchError> {
        match self {
            AccountBackend::Gateway(a) => a.get_equity().await,
            AccountBackend::Simulated(a) => a.get_equity().await,
            AccountBackend::GatewayWithFallback(a) => a.get_equity().await,
        }
    }

    async fn get_position(&self) -> Result<Position, FetchError> {
        match self {
            AccountBackend::Gateway(a) => a.get_position().await,
            AccountBackend::Simulated(a) => a.get_position().await,
            AccountBackend::GatewayWithFallback(a) => a.get_position().await,
        }
    }
}
