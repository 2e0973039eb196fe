use crate::models::{EquitySample, OhlcBucket, Position, PriceSample};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::Serialize;

/// Vertical axis bounds for one chart pane
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

/// How tightly an axis hugs the latest value
struct AxisRule {
    /// Half-range as a fraction of the latest value
    fraction: f64,
    min_half_range: f64,
    /// Only kicks in once there are more samples than this
    lookback: usize,
    padding: f64,
    default: AxisRange,
}

const PRICE_AXIS: AxisRule = AxisRule {
    fraction: 0.002,
    min_half_range: 200.0,
    lookback: 30,
    padding: 50.0,
    default: AxisRange {
        min: 77_500.0,
        max: 79_000.0,
    },
};

const EQUITY_AXIS: AxisRule = AxisRule {
    fraction: 0.01,
    min_half_range: 500.0,
    lookback: 24,
    padding: 200.0,
    default: AxisRange {
        min: 9_000.0,
        max: 12_000.0,
    },
};

impl AxisRule {
    fn range(&self, series: &[f64]) -> AxisRange {
        let Some(&latest) = series.last() else {
            return self.default;
        };

        let half = (latest * self.fraction).max(self.min_half_range);
        let mut range = AxisRange {
            min: latest - half,
            max: latest + half,
        };

        if series.len() > self.lookback {
            let recent = &series[series.len() - self.lookback..];
            let low = recent.iter().copied().fold(f64::INFINITY, f64::min);
            let high = recent.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if low < range.min {
                range.min = low - self.padding;
            }
            if high > range.max {
                range.max = high + self.padding;
            }
        }

        range
    }
}

/// Axis centred on the latest price, widened to fit the last half minute
pub fn price_axis(series: &[f64]) -> AxisRange {
    PRICE_AXIS.range(series)
}

/// Axis centred on the latest equity, widened to fit the last minute
pub fn equity_axis(series: &[f64]) -> AxisRange {
    EQUITY_AXIS.range(series)
}

fn as_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

#[derive(Debug, Serialize)]
pub struct PricePoint {
    pub time: DateTime<Utc>,
    pub price: f64,
}

impl From<&PriceSample> for PricePoint {
    fn from(sample: &PriceSample) -> Self {
        Self {
            time: sample.captured_at,
            price: as_f64(sample.price),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub equity: f64,
    pub position: Position,
}

impl From<&EquitySample> for EquityPoint {
    fn from(sample: &EquitySample) -> Self {
        Self {
            time: sample.captured_at,
            equity: as_f64(sample.equity),
            position: sample.position,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CandlePoint {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl From<&OhlcBucket> for CandlePoint {
    fn from(bucket: &OhlcBucket) -> Self {
        Self {
            time: bucket.bucket_start,
            open: as_f64(bucket.open),
            high: as_f64(bucket.high),
            low: as_f64(bucket.low),
            close: as_f64(bucket.close),
        }
    }
}

/// Payload behind the live dashboard
#[derive(Debug, Serialize)]
pub struct LiveChart {
    pub ok: bool,
    pub prices: Vec<PricePoint>,
    pub equity: Vec<EquityPoint>,
    pub latest_price: Option<f64>,
    pub latest_equity: Option<f64>,
    pub position: Position,
    pub position_color: &'static str,
    pub price_range: AxisRange,
    pub equity_range: AxisRange,
}

impl LiveChart {
    pub fn build(prices: &[PriceSample], equity: &[EquitySample]) -> Self {
        let prices: Vec<PricePoint> = prices.iter().map(PricePoint::from).collect();
        let equity: Vec<EquityPoint> = equity.iter().map(EquityPoint::from).collect();

        let price_series: Vec<f64> = prices.iter().map(|p| p.price).collect();
        let equity_series: Vec<f64> = equity.iter().map(|e| e.equity).collect();
        let position = equity.last().map(|e| e.position).unwrap_or_default();

        Self {
            ok: true,
            latest_price: price_series.last().copied(),
            latest_equity: equity_series.last().copied(),
            position,
            position_color: position.color(),
            price_range: price_axis(&price_series),
            equity_range: equity_axis(&equity_series),
            prices,
            equity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_series_uses_defaults() {
        assert_eq!(
            price_axis(&[]),
            AxisRange {
                min: 77_500.0,
                max: 79_000.0
            }
        );
        assert_eq!(
            equity_axis(&[]),
            AxisRange {
                min: 9_000.0,
                max: 12_000.0
            }
        );
    }

    #[test]
    fn test_price_axis_percentage_wins_at_high_prices() {
        // 0.2% of 150k is 300, above the 200 floor
        let range = price_axis(&[150_000.0]);
        assert!((range.min - 149_700.0).abs() < 1e-6);
        assert!((range.max - 150_300.0).abs() < 1e-6);
    }

    #[test]
    fn test_price_axis_minimum_half_range() {
        let range = price_axis(&[50_000.0]);
        assert_eq!(range.min, 49_800.0);
        assert_eq!(range.max, 50_200.0);
    }

    #[test]
    fn test_price_axis_widens_for_recent_outlier() {
        let mut series = vec![65_000.0; 31];
        series[5] = 64_000.0;
        let range = price_axis(&series);
        assert_eq!(range.min, 63_950.0);
        assert_eq!(range.max, 65_200.0);
    }

    #[test]
    fn test_short_series_is_not_widened() {
        let mut series = vec![65_000.0; 30];
        series[0] = 60_000.0;
        let range = price_axis(&series);
        assert_eq!(range.min, 64_800.0);
    }

    #[test]
    fn test_equity_axis() {
        let range = equity_axis(&[10_000.0]);
        assert_eq!(range.min, 9_500.0);
        assert_eq!(range.max, 10_500.0);
    }

    #[test]
    fn test_live_chart_reports_latest_position() {
        let at = DateTime::from_timestamp(0, 0).unwrap();
        let equity = vec![EquitySample {
            captured_at: at,
            equity: Decimal::from(10_000),
            position: Position::Sell,
        }];

        let chart = LiveChart::build(&[], &equity);
        assert_eq!(chart.position, Position::Sell);
        assert_eq!(chart.position_color, "#aa0000");
        assert_eq!(chart.latest_equity, Some(10_000.0));
        assert!(chart.latest_price.is_none());
    }
}
