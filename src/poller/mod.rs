//! # Poller
//!
//! Drives the two sample streams on independent cadences, keeps the live
//! windows filled and runs the periodic retention purge.
//!
//! Adapter failures never leave this module: a failed or timed-out fetch
//! writes nothing to the store, and the live window gets the last known
//! value at the new timestamp instead. Storage failures are logged and only
//! skip that stream's write for the tick.

pub mod window;

pub use window::{SampleWindow, WindowReader};

use crate::api::{AccountSource, PriceSource};
use crate::config::{PollerSettings, RetentionSettings};
use crate::db::SampleStore;
use crate::error::{FetchError, StoreError};
use crate::models::{EquitySample, Position, PriceSample};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::future::Future;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Where the poll loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollState {
    Idle,
    Fetching,
    Persisting,
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Fresh value written to the store and the window
    Recorded,
    /// Adapter failed; last known value pushed to the window only
    Stale,
    /// Adapter failed and no value was ever known
    Skipped,
    /// Fresh value reached the window but the store write failed
    StorageFailed,
}

/// Logs a repeated adapter failure once, then quietly until it changes
#[derive(Debug, Default)]
struct FailureLog {
    last: Option<String>,
}

impl FailureLog {
    /// Returns true when the failure was new and logged at warn level
    fn report(&mut self, source: &str, err: &FetchError) -> bool {
        let text = err.to_string();
        if self.last.as_deref() == Some(text.as_str()) {
            tracing::debug!("{} source still failing: {}", source, text);
            false
        } else {
            tracing::warn!("⚠️  {} source failed: {}", source, text);
            self.last = Some(text);
            true
        }
    }

    fn recovered(&mut self, source: &str) -> bool {
        let was_failing = self.last.take().is_some();
        if was_failing {
            tracing::info!("✅ {} source recovered", source);
        }
        was_failing
    }
}

pub struct Poller<P, A> {
    prices: P,
    account: A,
    store: SampleStore,
    settings: PollerSettings,
    retention: RetentionSettings,

    price_window: SampleWindow<PriceSample>,
    equity_window: SampleWindow<EquitySample>,

    last_price: Option<Decimal>,
    last_price_at: Option<DateTime<Utc>>,
    last_equity: Option<Decimal>,
    last_position: Position,
    last_equity_at: Option<DateTime<Utc>>,

    price_failures: FailureLog,
    equity_failures: FailureLog,
    position_failures: FailureLog,

    state: watch::Sender<PollState>,
}

impl<P: PriceSource, A: AccountSource> Poller<P, A> {
    pub fn new(
        prices: P,
        account: A,
        store: SampleStore,
        settings: PollerSettings,
        retention: RetentionSettings,
    ) -> Self {
        let capacity = settings.window_capacity;
        let (state, _) = watch::channel(PollState::Idle);

        Self {
            prices,
            account,
            store,
            settings,
            retention,
            price_window: SampleWindow::new(capacity),
            equity_window: SampleWindow::new(capacity),
            last_price: None,
            last_price_at: None,
            last_equity: None,
            last_position: Position::NoPosition,
            last_equity_at: None,
            price_failures: FailureLog::default(),
            equity_failures: FailureLog::default(),
            position_failures: FailureLog::default(),
            state,
        }
    }

    pub fn price_reader(&self) -> WindowReader<PriceSample> {
        self.price_window.reader()
    }

    pub fn equity_reader(&self) -> WindowReader<EquitySample> {
        self.equity_window.reader()
    }

    /// Observe state transitions of the loop
    pub fn state(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: PollState) {
        self.state.send_replace(state);
    }

    /// Seed the last known values from what is already persisted
    pub async fn warm_up(&mut self) {
        match self.store.latest_price().await {
            Ok(Some(sample)) => {
                tracing::info!("Last stored price {} at {}", sample.price, sample.captured_at);
                self.last_price = Some(sample.price);
                self.last_price_at = Some(sample.captured_at);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Could not load last price: {}", e),
        }

        match self.store.latest_equity().await {
            Ok(Some(sample)) => {
                tracing::info!(
                    "Last stored equity {} ({}) at {}",
                    sample.equity,
                    sample.position,
                    sample.captured_at
                );
                self.last_equity = Some(sample.equity);
                self.last_position = sample.position;
                self.last_equity_at = Some(sample.captured_at);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Could not load last equity: {}", e),
        }
    }

    async fn fetch<T>(
        &self,
        call: impl Future<Output = Result<T, FetchError>>,
    ) -> Result<T, FetchError> {
        let limit = self.settings.adapter_timeout();
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(limit)),
        }
    }

    /// One price tick at wall-clock time `now`
    pub async fn price_tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        self.set_state(PollState::Fetching);
        let at = next_timestamp(&mut self.last_price_at, now);

        let result = self.fetch(self.prices.get_current_price()).await;

        self.set_state(PollState::Persisting);
        let outcome = match result {
            Ok(price) => {
                self.price_failures.recovered("Price");
                self.last_price = Some(price);
                self.price_window.push(PriceSample {
                    captured_at: at,
                    price,
                });

                match self.store.record_price(price, at).await {
                    Ok(()) => {
                        tracing::debug!("Price {} at {}", price, at);
                        TickOutcome::Recorded
                    }
                    Err(e) => {
                        tracing::error!("❌ Failed to store price: {}", e);
                        TickOutcome::StorageFailed
                    }
                }
            }
            Err(e) => {
                self.price_failures.report("Price", &e);
                match self.last_price {
                    Some(price) => {
                        self.price_window.push(PriceSample {
                            captured_at: at,
                            price,
                        });
                        TickOutcome::Stale
                    }
                    None => TickOutcome::Skipped,
                }
            }
        };

        self.set_state(PollState::Idle);
        outcome
    }

    /// One equity tick at wall-clock time `now`
    pub async fn equity_tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        self.set_state(PollState::Fetching);
        let at = next_timestamp(&mut self.last_equity_at, now);

        let result = self.fetch(self.account.get_equity()).await;
        let result = match result {
            Ok(equity) => {
                let position = match self.fetch(self.account.get_position()).await {
                    Ok(position) => {
                        self.position_failures.recovered("Position");
                        position
                    }
                    Err(e) => {
                        self.position_failures.report("Position", &e);
                        self.last_position
                    }
                };
                Ok((equity, position))
            }
            Err(e) => Err(e),
        };

        self.set_state(PollState::Persisting);
        let outcome = match result {
            Ok((equity, position)) => {
                self.equity_failures.recovered("Equity");
                self.last_equity = Some(equity);
                self.last_position = position;
                self.equity_window.push(EquitySample {
                    captured_at: at,
                    equity,
                    position,
                });

                match self.store.record_equity(equity, position, at).await {
                    Ok(()) => {
                        tracing::debug!("Equity {} ({}) at {}", equity, position, at);
                        TickOutcome::Recorded
                    }
                    Err(e) => {
                        tracing::error!("❌ Failed to store equity: {}", e);
                        TickOutcome::StorageFailed
                    }
                }
            }
            Err(e) => {
                self.equity_failures.report("Equity", &e);
                match self.last_equity {
                    Some(equity) => {
                        self.equity_window.push(EquitySample {
                            captured_at: at,
                            equity,
                            position: self.last_position,
                        });
                        TickOutcome::Stale
                    }
                    None => TickOutcome::Skipped,
                }
            }
        };

        self.set_state(PollState::Idle);
        outcome
    }

    /// Apply the retention horizon once
    pub async fn purge(&self, now: DateTime<Utc>) -> Result<(u64, u64), StoreError> {
        let (prices, equity) = self
            .store
            .purge_older_than(self.retention.horizon(), now)
            .await?;

        tracing::info!(
            "🧹 Retention purge removed {} price and {} equity samples",
            prices,
            equity
        );
        Ok((prices, equity))
    }

    /// Run until `shutdown` flips to true or its sender is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        self.warm_up().await;

        let mut price_timer = interval(self.settings.price_interval());
        price_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut equity_timer = interval(self.settings.equity_interval());
        equity_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut purge_timer = interval(self.retention.purge_interval());
        purge_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            "🔄 Poller started: price every {:?}, equity every {:?}, window {}",
            self.settings.price_interval(),
            self.settings.equity_interval(),
            self.settings.window_capacity
        );

        loop {
            tokio::select! {
                _ = price_timer.tick() => {
                    self.price_tick(Utc::now()).await;
                }
                _ = equity_timer.tick() => {
                    self.equity_tick(Utc::now()).await;
                }
                _ = purge_timer.tick() => {
                    if let Err(e) = self.purge(Utc::now()).await {
                        tracing::error!("❌ Retention purge failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.set_state(PollState::Idle);
        tracing::info!("🛑 Poller stopped");
    }
}

/// `now`, or one millisecond past the previous timestamp if the clock did not advance
fn next_timestamp(last: &mut Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    let at = match *last {
        Some(prev) if now <= prev => prev + Duration::milliseconds(1),
        _ => now,
    };
    *last = Some(at);
    at
}
