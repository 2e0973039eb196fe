use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use cryptodash::poller::{PollState, SampleWindow};
use cryptodash::web::{router, AppState};
use cryptodash::*;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::watch;
use tower::ServiceExt;

struct Fixture {
    app: Router,
    store: SampleStore,
    prices: SampleWindow<PriceSample>,
    equity: SampleWindow<EquitySample>,
    _state: watch::Sender<PollState>,
}

async fn fixture() -> Fixture {
    fixture_with(SampleStore::open("sqlite::memory:").await.unwrap())
}

fn fixture_with(store: SampleStore) -> Fixture {
    let prices = SampleWindow::new(120);
    let equity = SampleWindow::new(120);
    let (state_tx, state_rx) = watch::channel(PollState::Idle);

    let app = router(AppState {
        store: store.clone(),
        prices: prices.reader(),
        equity: equity.reader(),
        poll_state: state_rx,
    });

    Fixture {
        app,
        store,
        prices,
        equity,
        _state: state_tx,
    }
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_history_without_data_is_displayable() {
    let f = fixture().await;

    for uri in ["/api/history", "/api/history?type=candlestick&timeframe=24"] {
        let (status, body) = get(&f.app, uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["no_data"], true);
        assert_eq!(
            body["message"],
            "No price data available for the selected timeframe."
        );
    }
}

#[tokio::test]
async fn test_history_line_chart() {
    let f = fixture().await;
    let now = Utc::now();

    f.store
        .record_price(Decimal::new(6500050, 2), now - Duration::minutes(30))
        .await
        .unwrap();
    f.store
        .record_price(Decimal::new(6501000, 2), now - Duration::minutes(10))
        .await
        .unwrap();
    f.store
        .record_price(Decimal::from(1), now - Duration::hours(6))
        .await
        .unwrap();
    f.store
        .record_equity(Decimal::from(10_000), Position::Buy, now - Duration::minutes(20))
        .await
        .unwrap();

    let (status, body) = get(&f.app, "/api/history?timeframe=bogus&type=line").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chart_type"], "line");
    assert_eq!(body["timeframe_hours"], 5);

    let prices = body["prices"].as_array().unwrap();
    assert_eq!(prices.len(), 2);
    assert_eq!(prices[0]["price"], 65000.5);
    assert!(body.get("candles").is_none());

    let equity = body["equity"].as_array().unwrap();
    assert_eq!(equity.len(), 1);
    assert_eq!(equity[0]["position"], "Buy");
}

#[tokio::test]
async fn test_history_candlestick_uses_buckets() {
    let f = fixture().await;
    let now = Utc::now();

    for (minutes_ago, price) in [(50, 100), (49, 110), (48, 90), (47, 105)] {
        f.store
            .record_price(Decimal::from(price), now - Duration::minutes(minutes_ago))
            .await
            .unwrap();
    }

    let (status, body) = get(&f.app, "/api/history?type=candlestick&timeframe=1&interval=60").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chart_type"], "candlestick");
    assert_eq!(body["interval_minutes"], 60);
    assert!(body.get("prices").is_none());

    let candles = body["candles"].as_array().unwrap();
    assert_eq!(candles.len(), 1);
    assert_eq!(candles[0]["open"], 100.0);
    assert_eq!(candles[0]["high"], 110.0);
    assert_eq!(candles[0]["low"], 90.0);
    assert_eq!(candles[0]["close"], 105.0);
}

#[tokio::test]
async fn test_oversized_history_query_is_clamped() {
    let f = fixture().await;
    f.store
        .record_price(Decimal::from(65_000), Utc::now() - Duration::minutes(10))
        .await
        .unwrap();

    let (status, body) = get(&f.app, "/api/history?timeframe=3000000000").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["timeframe_hours"], 87_600);
    assert_eq!(body["prices"].as_array().unwrap().len(), 1);

    let (status, body) = get(&f.app, "/api/history?type=candlestick&interval=999999999999999").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["interval_minutes"], 43_200);
    assert_eq!(body["candles"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unreadable_equity_leaves_price_chart_intact() {
    let path = std::env::temp_dir().join(format!("cryptodash-web-test-{}.db", std::process::id()));
    let url = format!("sqlite://{}", path.display());

    let f = fixture_with(SampleStore::open(&url).await.unwrap());
    let now = Utc::now();
    f.store
        .record_price(Decimal::from(65_000), now - Duration::minutes(10))
        .await
        .unwrap();
    f.store
        .record_equity(Decimal::from(10_000), Position::Buy, now - Duration::minutes(10))
        .await
        .unwrap();

    let raw = sqlx::SqlitePool::connect(&url).await.unwrap();
    sqlx::query("UPDATE equity_samples SET position = 'Sideways'")
        .execute(&raw)
        .await
        .unwrap();
    raw.close().await;

    let (status, body) = get(&f.app, "/api/history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prices"].as_array().unwrap().len(), 1);
    assert!(body["equity"].as_array().unwrap().is_empty());

    f.store.close().await;
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
    }
}

#[tokio::test]
async fn test_live_reflects_windows() {
    let f = fixture().await;

    let (_, body) = get(&f.app, "/api/live").await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["position"], "No Position");
    assert_eq!(body["position_color"], "#999999");
    assert_eq!(body["price_range"]["min"], 77_500.0);
    assert!(body["latest_price"].is_null());

    let now = Utc::now();
    f.prices.push(PriceSample {
        captured_at: now,
        price: Decimal::from(65_000),
    });
    f.equity.push(EquitySample {
        captured_at: now,
        equity: Decimal::from(10_000),
        position: Position::Buy,
    });

    let (_, body) = get(&f.app, "/api/live").await;
    assert_eq!(body["latest_price"], 65_000.0);
    assert_eq!(body["position"], "Buy");
    assert_eq!(body["position_color"], "#00aa00");
    assert_eq!(body["price_range"]["min"], 64_800.0);
    assert_eq!(body["equity_range"]["max"], 10_500.0);
    assert_eq!(body["prices"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_health_reports_counts() {
    let f = fixture().await;
    f.store.record_price(Decimal::ONE, Utc::now()).await.unwrap();

    let (status, body) = get(&f.app, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["poller"], "idle");
    assert_eq!(body["store"]["prices"], 1);
    assert_eq!(body["store"]["equity"], 0);
    assert_eq!(body["window"]["capacity"], 120);
}

#[tokio::test]
async fn test_health_reports_storage_failure() {
    let f = fixture().await;
    f.store.close().await;

    let (status, body) = get(&f.app, "/api/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ok"], false);
}

#[tokio::test]
async fn test_pages_are_served() {
    let f = fixture().await;

    for uri in ["/", "/history"] {
        let response = f
            .app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("<html"));
    }
}
