//! # web
//!
//! Dashboard pages and the JSON endpoints behind them.
//!
//! | Method | Path           | Description                                   |
//! |--------|----------------|-----------------------------------------------|
//! | GET    | `/`            | Live dashboard page                           |
//! | GET    | `/history`     | Historical view page                          |
//! | GET    | `/api/live`    | Live windows, latest values, axis ranges      |
//! | GET    | `/api/history` | Stored samples (`timeframe`, `type`, `interval`) |
//! | GET    | `/api/health`  | Poller state, window sizes, row counts        |

pub mod chart;
pub mod error;
pub mod handlers;

use crate::db::SampleStore;
use crate::models::{EquitySample, PriceSample};
use crate::poller::{PollState, WindowReader};
use axum::{routing::get, Router};
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Shared, read-only handles given to every request
#[derive(Clone)]
pub struct AppState {
    pub store: SampleStore,
    pub prices: WindowReader<PriceSample>,
    pub equity: WindowReader<EquitySample>,
    pub poll_state: watch::Receiver<PollState>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/",            get(handlers::dashboard_page))
        .route("/history",     get(handlers::history_page))
        .route("/api/live",    get(handlers::live))
        .route("/api/history", get(handlers::history))
        .route("/api/health",  get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
