pub mod config;
mod error;
pub mod helpers;
mod routes;
mod validation;

use axum::{
    Router,
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{HeaderMap, StatusCode, header::USER_AGENT},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use config::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracker_db::ApiQueryLog;

pub struct AppState {
    pub db: tracker_db::Database,
    pub config: Config,
}

/// Milliseconds between quota refills for a rate given in requests per second.
fn replenish_interval_ms(per_sec: u64) -> u64 {
    (1000 / per_sec.max(1)).max(1)
}

/// Milliseconds between quota refills for a rate given in requests per minute.
fn replenish_interval_ms_per_min(per_min: u64) -> u64 {
    (60_000 / per_min.max(1)).max(1)
}

/// Create the application router with the given database and configuration
pub fn create_app(db: tracker_db::Database, config: Config) -> Router {
    let base_path = config.base_path.clone();
    let request_timeout = config.request_timeout;
    let request_body_limit = config.request_body_limit;

    // Pollers may report many servers in a short window
    let ingest_governor = GovernorConfigBuilder::default()
        .per_millisecond(replenish_interval_ms(config.rate_limit_ingest_per_sec))
        .burst_size(config.rate_limit_ingest_burst.max(1))
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("rate limit quota is non-zero");

    // Consolidation rewrites the whole ledger, keep it rare
    let admin_governor = GovernorConfigBuilder::default()
        .per_millisecond(replenish_interval_ms_per_min(config.rate_limit_admin_per_min))
        .burst_size(config.rate_limit_admin_burst.max(1))
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("rate limit quota is non-zero");

    let general_governor = GovernorConfigBuilder::default()
        .per_millisecond(replenish_interval_ms(config.rate_limit_general_per_sec))
        .burst_size(config.rate_limit_general_burst.max(1))
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("rate limit quota is non-zero");

    let state = Arc::new(AppState { db, config });

    let ingest_routes = Router::new()
        .route("/api/ingest", post(routes::ingest))
        .layer(GovernorLayer::new(ingest_governor));

    let admin_routes = Router::new()
        .route(
            "/api/admin/consolidate/exact",
            post(routes::consolidate_exact),
        )
        .route(
            "/api/admin/consolidate/proximity",
            post(routes::consolidate_proximity),
        )
        .route("/api/admin/query-metrics", get(routes::query_metrics))
        .layer(GovernorLayer::new(admin_governor));

    let general_routes = Router::new()
        .route("/api/servers", get(routes::list_servers))
        .route(
            "/api/servers/{server_type}/{host}/{port}",
            get(routes::get_server),
        )
        .route(
            "/api/servers/{server_type}/{host}/{port}/sessions/active",
            get(routes::active_sessions),
        )
        .route(
            "/api/servers/{server_type}/{host}/{port}/sessions/recent",
            get(routes::recent_sessions),
        )
        .route("/api/stats", get(routes::stats))
        .route("/api/players", get(routes::players))
        .layer(GovernorLayer::new(general_governor));

    let api_routes = Router::new()
        .merge(ingest_routes)
        .merge(admin_routes)
        .merge(general_routes)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            record_api_query,
        ));

    let app = Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .merge(api_routes);

    let app = if base_path.is_empty() {
        app
    } else {
        Router::new().nest(&base_path, app)
    };

    app.layer(TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        request_timeout,
    ))
    .layer(RequestBodyLimitLayer::new(request_body_limit))
    .layer(CorsLayer::permissive())
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// Client address as seen through a reverse proxy, falling back to the peer.
fn client_ip(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .map(str::to_string)
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
}

/// Count every API request per client and matched route.
async fn record_api_query(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let ip_address = client_ip(
        request.headers(),
        request.extensions().get::<ConnectInfo<SocketAddr>>(),
    );
    let user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let response = next.run(request).await;

    if let Some(ip_address) = ip_address {
        let log = ApiQueryLog {
            ip_address,
            route,
            user_agent,
            queried_at: helpers::now(),
        };
        if let Err(e) = state.db.record_api_query(log).await {
            tracing::warn!(error = %e, "Failed to record API query");
        }
    }

    response
}
