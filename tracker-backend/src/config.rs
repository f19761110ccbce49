use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Request body size limit in bytes
    /// Env: REQUEST_BODY_LIMIT (default: 1048576 = 1MB)
    pub request_body_limit: usize,

    /// Request timeout in seconds
    /// Env: REQUEST_TIMEOUT_SECS (default: 30)
    pub request_timeout: Duration,

    /// Server port
    /// Env: PORT (default: 3000)
    pub port: u16,

    /// Database file path
    /// Env: DATABASE_PATH (default: "server-tracker.db")
    pub database_path: String,

    /// Prefix for every route, normalized to "" or "/segment"
    /// Env: WEB_SERVER_BASE_PATH (default: "")
    pub base_path: String,

    /// Key required on ingest and admin routes. Unset disables the check.
    /// Env: INGEST_API_KEY (optional)
    pub ingest_api_key: Option<String>,

    /// Close sessions left open by a previous run at startup
    /// Env: CLOSE_OPEN_SESSIONS_ON_START (default: true)
    pub close_open_sessions_on_start: bool,

    /// Default gap for proximity consolidation in milliseconds
    /// Env: MERGE_GAP_MS (default: 5000)
    pub merge_gap_ms: i64,

    /// Page size of the recent sessions view when no limit is given
    /// Env: RECENT_SESSIONS_DEFAULT_LIMIT (default: 25)
    pub recent_sessions_default_limit: u32,

    /// Largest accepted recent sessions limit
    /// Env: RECENT_SESSIONS_MAX_LIMIT (default: 500)
    pub recent_sessions_max_limit: u32,

    /// Rate limit for /api/ingest (requests per second)
    /// Env: RATE_LIMIT_INGEST_PER_SEC (default: 20)
    /// Lenient since one poller may track many servers
    pub rate_limit_ingest_per_sec: u64,

    /// Burst size for /api/ingest
    /// Env: RATE_LIMIT_INGEST_BURST (default: 40)
    pub rate_limit_ingest_burst: u32,

    /// Rate limit for admin endpoints (requests per minute)
    /// Env: RATE_LIMIT_ADMIN_PER_MIN (default: 10)
    pub rate_limit_admin_per_min: u64,

    /// Burst size for admin endpoints
    /// Env: RATE_LIMIT_ADMIN_BURST (default: 2)
    pub rate_limit_admin_burst: u32,

    /// Rate limit for read endpoints (requests per second)
    /// Env: RATE_LIMIT_GENERAL_PER_SEC (default: 10)
    pub rate_limit_general_per_sec: u64,

    /// Burst size for read endpoints
    /// Env: RATE_LIMIT_GENERAL_BURST (default: 20)
    pub rate_limit_general_burst: u32,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv();
        let defaults = Self::default();
        Self {
            request_body_limit: env_or_default("REQUEST_BODY_LIMIT", defaults.request_body_limit),
            request_timeout: Duration::from_secs(env_or_default(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            port: env_or_default("PORT", defaults.port),
            database_path: env_or_default_string("DATABASE_PATH", &defaults.database_path),
            base_path: normalize_base_path(var("WEB_SERVER_BASE_PATH").ok().as_deref()),
            ingest_api_key: var("INGEST_API_KEY")
                .ok()
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            close_open_sessions_on_start: env_or_default(
                "CLOSE_OPEN_SESSIONS_ON_START",
                defaults.close_open_sessions_on_start,
            ),
            merge_gap_ms: env_or_default("MERGE_GAP_MS", defaults.merge_gap_ms),
            recent_sessions_default_limit: env_or_default(
                "RECENT_SESSIONS_DEFAULT_LIMIT",
                defaults.recent_sessions_default_limit,
            ),
            recent_sessions_max_limit: env_or_default(
                "RECENT_SESSIONS_MAX_LIMIT",
                defaults.recent_sessions_max_limit,
            ),
            rate_limit_ingest_per_sec: env_or_default(
                "RATE_LIMIT_INGEST_PER_SEC",
                defaults.rate_limit_ingest_per_sec,
            ),
            rate_limit_ingest_burst: env_or_default(
                "RATE_LIMIT_INGEST_BURST",
                defaults.rate_limit_ingest_burst,
            ),
            rate_limit_admin_per_min: env_or_default(
                "RATE_LIMIT_ADMIN_PER_MIN",
                defaults.rate_limit_admin_per_min,
            ),
            rate_limit_admin_burst: env_or_default(
                "RATE_LIMIT_ADMIN_BURST",
                defaults.rate_limit_admin_burst,
            ),
            rate_limit_general_per_sec: env_or_default(
                "RATE_LIMIT_GENERAL_PER_SEC",
                defaults.rate_limit_general_per_sec,
            ),
            rate_limit_general_burst: env_or_default(
                "RATE_LIMIT_GENERAL_BURST",
                defaults.rate_limit_general_burst,
            ),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_body_limit: 1024 * 1024, // 1 MB
            request_timeout: Duration::from_secs(30),
            port: 3000,
            database_path: "server-tracker.db".to_string(),
            base_path: String::new(),
            ingest_api_key: None,
            close_open_sessions_on_start: true,
            merge_gap_ms: tracker_db::ProximityOptions::DEFAULT_MERGE_GAP_MS,
            recent_sessions_default_limit: 25,
            recent_sessions_max_limit: 500,
            rate_limit_ingest_per_sec: 20,
            rate_limit_ingest_burst: 40,
            rate_limit_admin_per_min: 10,
            rate_limit_admin_burst: 2,
            rate_limit_general_per_sec: 10,
            rate_limit_general_burst: 20,
        }
    }
}

/// Normalize a route prefix: leading slash, no trailing slash, "/" -> "".
pub fn normalize_base_path(raw: Option<&str>) -> String {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return String::new();
    }

    let without_trailing = trimmed.trim_end_matches('/');
    if without_trailing.is_empty() {
        return String::new();
    }

    if without_trailing.starts_with('/') {
        without_trailing.to_string()
    } else {
        format!("/{without_trailing}")
    }
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}
