use super::chart::{CandlePoint, EquityPoint, LiveChart, PricePoint};
use super::error::ApiError;
use super::AppState;
use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

const DEFAULT_TIMEFRAME_HOURS: i64 = 5;
const DEFAULT_INTERVAL_MINUTES: i64 = 15;
/// Larger requested values are clamped to these (ten years, thirty days)
pub const MAX_TIMEFRAME_HOURS: i64 = 87_600;
pub const MAX_INTERVAL_MINUTES: i64 = 43_200;
const NO_DATA_MESSAGE: &str = "No price data available for the selected timeframe.";

const DASHBOARD_HTML: &str = include_str!("../../assets/dashboard.html");
const HISTORY_HTML: &str = include_str!("../../assets/history.html");

pub async fn dashboard_page() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

pub async fn history_page() -> Html<&'static str> {
    Html(HISTORY_HTML)
}

/// GET /api/live
pub async fn live(State(state): State<AppState>) -> Json<LiveChart> {
    let prices = state.prices.snapshot();
    let equity = state.equity.snapshot();
    Json(LiveChart::build(&prices, &equity))
}

/// Raw query string of /api/history
///
/// Unparsable or non-positive values fall back to defaults and oversized ones
/// are clamped to [`MAX_TIMEFRAME_HOURS`] / [`MAX_INTERVAL_MINUTES`].
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub timeframe: Option<String>,
    #[serde(rename = "type")]
    pub chart_type: Option<String>,
    pub interval: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Line,
    Candlestick,
}

impl HistoryQuery {
    pub fn timeframe(&self) -> Duration {
        let hours = positive_or(self.timeframe.as_deref(), DEFAULT_TIMEFRAME_HOURS);
        Duration::try_hours(hours.min(MAX_TIMEFRAME_HOURS))
            .unwrap_or(Duration::hours(DEFAULT_TIMEFRAME_HOURS))
    }

    pub fn interval(&self) -> Duration {
        let minutes = positive_or(self.interval.as_deref(), DEFAULT_INTERVAL_MINUTES);
        Duration::try_minutes(minutes.min(MAX_INTERVAL_MINUTES))
            .unwrap_or(Duration::minutes(DEFAULT_INTERVAL_MINUTES))
    }

    pub fn chart_type(&self) -> ChartType {
        match self.chart_type.as_deref() {
            Some("candlestick") => ChartType::Candlestick,
            _ => ChartType::Line,
        }
    }
}

fn positive_or(raw: Option<&str>, default: i64) -> i64 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

#[derive(Debug, Serialize)]
struct HistoryChart {
    ok: bool,
    chart_type: ChartType,
    timeframe_hours: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prices: Option<Vec<PricePoint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    candles: Option<Vec<CandlePoint>>,
    equity: Vec<EquityPoint>,
}

fn no_data() -> Response {
    Json(json!({
        "ok": true,
        "no_data": true,
        "message": NO_DATA_MESSAGE,
    }))
    .into_response()
}

/// GET /api/history
///
/// Candlestick views go through `resample_ohlc`; everything else is a plain
/// range query. An empty price result is a displayable "no data" answer, and
/// a failing equity query only empties the equity pane.
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    let end = Utc::now();
    let timeframe = query.timeframe();
    let start = end.checked_sub_signed(timeframe).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "timeframe of {} hours is out of range",
            timeframe.num_hours()
        ))
    })?;
    let chart_type = query.chart_type();

    let mut chart = HistoryChart {
        ok: true,
        chart_type,
        timeframe_hours: timeframe.num_hours(),
        interval_minutes: None,
        prices: None,
        candles: None,
        equity: Vec::new(),
    };

    match chart_type {
        ChartType::Candlestick => {
            let interval = query.interval();
            let buckets = state.store.resample_ohlc(start, end, interval).await?;
            if buckets.is_empty() {
                return Ok(no_data());
            }
            chart.interval_minutes = Some(interval.num_minutes());
            chart.candles = Some(buckets.iter().map(CandlePoint::from).collect());
        }
        ChartType::Line => {
            let prices = state.store.query_prices(start, end).await?;
            if prices.is_empty() {
                return Ok(no_data());
            }
            chart.prices = Some(prices.iter().map(PricePoint::from).collect());
        }
    }

    match state.store.query_equity(start, end).await {
        Ok(equity) => chart.equity = equity.iter().map(EquityPoint::from).collect(),
        Err(e) => tracing::warn!("⚠️  Equity history unavailable: {}", e),
    }

    Ok(Json(chart).into_response())
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let poller = *state.poll_state.borrow();
    let stored_prices = state.store.count_prices().await?;
    let stored_equity = state.store.count_equity().await?;

    Ok(Json(json!({
        "ok": true,
        "poller": poller,
        "window": {
            "capacity": state.prices.capacity(),
            "prices": state.prices.len(),
            "equity": state.equity.len(),
        },
        "store": {
            "prices": stored_prices,
            "equity": stored_equity,
        },
    })))
}
