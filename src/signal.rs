use crate::models::Position;
use chrono::{DateTime, Duration, Utc};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::prelude::*;
use yata::core::{Method, PeriodType};
use yata::methods::SMA;

const SHORT_MA: usize = 3;
const LONG_MA: usize = 8;
const MOMENTUM_LOOKBACK: usize = 5;
const MOMENTUM_THRESHOLD_PCT: f64 = 0.1;

/// Source of fabricated equity and position values for simulated accounts
///
/// Implementations must be deterministic for a given construction and input
/// sequence; nothing may read the wall clock.
pub trait SimulatedSignal: Send {
    /// Simulated account equity at `at`, given the latest traded price
    fn equity(&mut self, at: DateTime<Utc>, price: f64) -> Decimal;

    /// Simulated position at `at`, given recent closes (oldest first)
    fn position(&mut self, at: DateTime<Utc>, closes: &[f64]) -> Position;
}

/// Parameters of the bounded equity curve
#[derive(Debug, Clone)]
pub struct EquityCurve {
    pub base_equity: f64,
    /// Price band that maps onto the 0..1 price factor
    pub price_floor: f64,
    pub price_ceiling: f64,
    /// Weight of the price factor in the relative change
    pub price_weight: f64,
    /// Amplitude of the hourly cosine cycle
    pub cycle_amplitude: f64,
    /// Growth over one UTC day
    pub daily_drift: f64,
    pub min_change: f64,
    pub max_change: f64,
    pub min_equity: f64,
    pub max_equity: f64,
}

impl Default for EquityCurve {
    fn default() -> Self {
        Self {
            base_equity: 10_000.0,
            price_floor: 64_000.0,
            price_ceiling: 68_000.0,
            price_weight: 0.02,
            cycle_amplitude: 0.01,
            daily_drift: 0.01,
            min_change: -0.03,
            max_change: 0.05,
            min_equity: 9_500.0,
            max_equity: 12_000.0,
        }
    }
}

impl EquityCurve {
    /// Evaluate the curve; always within `[min_equity, max_equity]`
    pub fn evaluate(&self, at: DateTime<Utc>, price: f64) -> f64 {
        let t = at.timestamp() as f64;

        let cycle = (t / 3600.0).cos() * self.cycle_amplitude;

        let band = self.price_ceiling - self.price_floor;
        let clamped_price = price.clamp(self.price_floor, self.price_ceiling);
        let price_factor = if band > 0.0 {
            (clamped_price - self.price_floor) / band
        } else {
            0.0
        };

        let day_fraction = t.rem_euclid(86_400.0) / 86_400.0;

        let change = (cycle + price_factor * self.price_weight + day_fraction * self.daily_drift)
            .clamp(self.min_change, self.max_change);

        (self.base_equity * (1.0 + change)).clamp(self.min_equity, self.max_equity)
    }
}

/// Default [`SimulatedSignal`]: bounded equity curve plus a trend-weighted,
/// seeded random position that is held for a fixed period
///
/// Seed policy: the RNG is seeded exactly once, from the value passed to
/// [`SeededSignal::new`] (normally `simulation.seed`). Two instances built with
/// the same seed and fed the same inputs produce the same outputs.
pub struct SeededSignal {
    curve: EquityCurve,
    rng: StdRng,
    hold: Duration,
    held: Option<(Position, DateTime<Utc>)>,
}

impl SeededSignal {
    pub fn new(seed: u64, hold: Duration) -> Self {
        Self::with_curve(seed, hold, EquityCurve::default())
    }

    pub fn with_curve(seed: u64, hold: Duration, curve: EquityCurve) -> Self {
        Self {
            curve,
            rng: StdRng::seed_from_u64(seed),
            hold,
            held: None,
        }
    }

    fn draw(&mut self, trend: Trend) -> Position {
        let weights = match trend {
            Trend::Up => [0.85, 0.05, 0.10],
            Trend::Down => [0.05, 0.85, 0.10],
            Trend::Flat => [0.25, 0.25, 0.50],
        };
        let choices = [Position::Buy, Position::Sell, Position::NoPosition];

        match WeightedIndex::new(weights) {
            Ok(dist) => choices[dist.sample(&mut self.rng)],
            Err(_) => Position::NoPosition,
        }
    }
}

impl SimulatedSignal for SeededSignal {
    fn equity(&mut self, at: DateTime<Utc>, price: f64) -> Decimal {
        let value = self.curve.evaluate(at, price);
        Decimal::from_f64(value)
            .unwrap_or_else(|| Decimal::from_f64(self.curve.base_equity).unwrap_or_default())
            .round_dp(2)
    }

    fn position(&mut self, at: DateTime<Utc>, closes: &[f64]) -> Position {
        if let Some((position, since)) = self.held {
            if at >= since && at - since < self.hold {
                return position;
            }
        }

        let Some(trend) = classify_trend(closes) else {
            return Position::NoPosition;
        };

        let position = self.draw(trend);
        self.held = Some((position, at));
        position
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Trend {
    Up,
    Down,
    Flat,
}

/// SMA(3) vs SMA(8) crossover confirmed by 5-period momentum
fn classify_trend(closes: &[f64]) -> Option<Trend> {
    if closes.len() < LONG_MA {
        return None;
    }

    let short = trailing_sma(closes, SHORT_MA)?;
    let long = trailing_sma(closes, LONG_MA)?;

    let last = closes[closes.len() - 1];
    let base = closes[closes.len() - MOMENTUM_LOOKBACK];
    if base == 0.0 {
        return Some(Trend::Flat);
    }
    let momentum = (last / base - 1.0) * 100.0;

    Some(if short > long && momentum > MOMENTUM_THRESHOLD_PCT {
        Trend::Up
    } else if short < long && momentum < -MOMENTUM_THRESHOLD_PCT {
        Trend::Down
    } else {
        Trend::Flat
    })
}

/// Simple moving average of the last `length` values
fn trailing_sma(values: &[f64], length: usize) -> Option<f64> {
    let window = &values[values.len().checked_sub(length)?..];
    let mut sma = SMA::new(length as PeriodType, &window[0]).ok()?;
    let mut value = window[0];
    for v in window {
        value = sma.next(v);
    }
    Some(value)
}
