use serde::{Deserialize, Serialize};

/// Name stored for players whose reported name is blank.
pub const UNNAMED_PLAYER: &str = "(unnamed player)";

/// Composite key of a tracked game server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerIdentity {
  /// Game/protocol type (e.g. "rust")
  #[serde(rename = "type")]
  pub server_type: String,
  pub host: String,
  pub port: u16,
}

impl ServerIdentity {
  pub fn new(server_type: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
    Self {
      server_type: server_type.into(),
      host: host.into(),
      port,
    }
  }
}

/// Last known metadata of a server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDetails {
  #[serde(flatten)]
  pub identity: ServerIdentity,
  pub name: Option<String>,
  pub map: Option<String>,
  pub current_players: Option<u32>,
  pub max_players: Option<u32>,
  pub ping: Option<u32>,
}

/// A registry row: server metadata plus the time of the latest poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSummary {
  pub server: ServerDetails,
  /// Unix millis of the latest poll
  pub last_seen_at: i64,
}

/// Metadata reported by one poll. `None` means the poller had no value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerObservation {
  pub name: Option<String>,
  pub map: Option<String>,
  pub num_players: Option<u32>,
  pub max_players: Option<u32>,
  pub ping: Option<u32>,
}

/// One entry of a poll's player list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedPlayer {
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default, alias = "steamId")]
  pub stable_id: Option<String>,
  /// How long the server says the player has been connected
  #[serde(default)]
  pub start_offset_seconds: Option<f64>,
}

impl ObservedPlayer {
  pub fn named(name: impl Into<String>) -> Self {
    Self {
      name: Some(name.into()),
      ..Default::default()
    }
  }
}

/// A complete poll result for one server.
#[derive(Debug, Clone)]
pub struct PollInput {
  pub server: ServerIdentity,
  pub observation: ServerObservation,
  pub players: Vec<ObservedPlayer>,
  /// Unix millis at which the poll completed
  pub timestamp: i64,
}

/// Counts of ledger transitions applied by one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollOutcome {
  pub created: usize,
  pub updated: usize,
  pub closed: usize,
}

/// An open session as exposed by the active sessions view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
  pub id: i64,
  pub player_name: String,
  pub steam_id: Option<String>,
  pub started_at: i64,
  pub last_seen_at: i64,
}

/// A full session row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
  pub id: i64,
  pub player_name: String,
  pub steam_id: Option<String>,
  pub started_at: i64,
  pub last_seen_at: i64,
  /// `None` while the session is open
  pub ended_at: Option<i64>,
}

impl SessionRecord {
  pub fn is_open(&self) -> bool {
    self.ended_at.is_none()
  }

  /// End of the presence as far as the ledger knows it.
  pub fn effective_end(&self) -> i64 {
    self.ended_at.unwrap_or(self.last_seen_at).max(self.last_seen_at)
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStats {
  pub total_sessions: u64,
  pub unique_players: u64,
  pub active_sessions: u64,
  pub server_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSessionStats {
  pub player_name: String,
  pub session_count: u64,
  /// Earliest `started_at` across the player's sessions
  pub first_seen: i64,
}

/// One API request to be counted.
#[derive(Debug, Clone)]
pub struct ApiQueryLog {
  pub ip_address: String,
  pub route: String,
  pub user_agent: Option<String>,
  pub queried_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiQueryRouteMetric {
  pub route: String,
  pub query_count: u64,
  pub last_queried_at: i64,
  pub last_user_agent: Option<String>,
}

/// Query counters of a single client IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiQueryMetric {
  pub ip_address: String,
  pub total_queries: u64,
  pub last_queried_at: i64,
  pub routes: Vec<ApiQueryRouteMetric>,
}

/// Result of one consolidation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationSummary {
  /// Candidate groups looked at
  pub groups_examined: u64,
  /// Exact groups or proximity clusters collapsed into one row
  pub merged: u64,
  /// Keeper rows whose fields changed
  pub updated: u64,
  pub deleted: u64,
  /// Groups skipped because of an error
  pub failed: u64,
  pub dry_run: bool,
}

/// Options of the time-proximity policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProximityOptions {
  pub dry_run: bool,
  pub merge_gap_ms: i64,
}

impl ProximityOptions {
  pub const DEFAULT_MERGE_GAP_MS: i64 = 5_000;
}

impl Default for ProximityOptions {
  fn default() -> Self {
    Self {
      dry_run: false,
      merge_gap_ms: Self::DEFAULT_MERGE_GAP_MS,
    }
  }
}
