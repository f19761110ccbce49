pub mod consolidate;
mod error;
pub mod ledger;
mod metrics;
mod models;
mod registry;
mod views;

pub use error::{DbError, Result};
pub use models::{
  ActiveSession, ApiQueryLog, ApiQueryMetric, ApiQueryRouteMetric, ConsolidationSummary,
  DatabaseStats, ObservedPlayer, PlayerSessionStats, PollInput, PollOutcome, ProximityOptions,
  ServerDetails, ServerIdentity, ServerObservation, ServerSummary, SessionRecord, UNNAMED_PLAYER,
};

use std::path::Path;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::params;
use tracing::{debug, info, warn};

/// Bumped whenever the table layout changes incompatibly.
const SCHEMA_VERSION: i64 = 2;

/// Database wrapper for all tracker operations.
///
/// All statements run on the connection's single worker thread, so writes
/// from one process never interleave: a poll and a consolidation group can
/// not overlap.
#[derive(Clone)]
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create a database at the given path.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = Connection::open(path).await.map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Create an in-memory database (useful for testing).
  pub async fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .await
      .map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Initialize the database schema.
  async fn initialize(&self) -> Result<()> {
    let previous_version = self
      .conn
      .call(|conn| {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version != SCHEMA_VERSION {
          conn.execute_batch(
            r#"
            DROP TABLE IF EXISTS player_sessions;
            DROP TABLE IF EXISTS servers;
            DROP TABLE IF EXISTS api_query_metrics;
            "#,
          )?;
          conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        conn.execute_batch(
          r#"
          CREATE TABLE IF NOT EXISTS servers (
              server_type TEXT NOT NULL,
              host TEXT NOT NULL,
              port INTEGER NOT NULL,
              name TEXT,
              map TEXT,
              max_players INTEGER,
              current_players INTEGER,
              last_ping INTEGER,
              last_seen_at INTEGER NOT NULL,
              PRIMARY KEY (server_type, host, port)
          );

          -- One row per continuous presence; ended_at NULL while open
          CREATE TABLE IF NOT EXISTS player_sessions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              server_type TEXT NOT NULL,
              host TEXT NOT NULL,
              port INTEGER NOT NULL,
              player_name TEXT NOT NULL,
              steam_id TEXT,
              started_at INTEGER NOT NULL,
              ended_at INTEGER,
              last_seen_at INTEGER NOT NULL,
              FOREIGN KEY (server_type, host, port) REFERENCES servers(server_type, host, port) ON DELETE CASCADE
          );

          CREATE TABLE IF NOT EXISTS api_query_metrics (
              ip_address TEXT NOT NULL,
              route TEXT NOT NULL,
              user_agent TEXT,
              last_queried_at INTEGER NOT NULL,
              query_count INTEGER NOT NULL DEFAULT 1,
              PRIMARY KEY (ip_address, route)
          );

          CREATE INDEX IF NOT EXISTS idx_player_sessions_active
              ON player_sessions(server_type, host, port, ended_at, last_seen_at);
          CREATE INDEX IF NOT EXISTS idx_player_sessions_name
              ON player_sessions(player_name);
          CREATE INDEX IF NOT EXISTS idx_api_query_metrics_last
              ON api_query_metrics(last_queried_at);
          "#,
        )?;
        Ok(version)
      })
      .await?;

    if previous_version != 0 && previous_version != SCHEMA_VERSION {
      warn!(
        previous_version,
        current_version = SCHEMA_VERSION,
        "schema version changed, tracker tables were recreated"
      );
    }

    info!("database initialized");
    Ok(())
  }

  // ========================================================================
  // Ingest
  // ========================================================================

  /// Record one poll: upsert the server row and apply the session
  /// transitions, all in a single transaction.
  pub async fn ingest_poll(&self, poll: PollInput) -> Result<PollOutcome> {
    validate_identity(&poll.server)?;

    let PollInput {
      server,
      observation,
      players,
      timestamp,
    } = poll;
    let log_server = server.clone();
    let player_count = players.len();

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        registry::upsert_server(&tx, &server, &observation, players.len(), timestamp)?;
        let outcome = ledger::apply_poll(&tx, &server, &players, timestamp)?;
        tx.commit()?;
        Ok(outcome)
      })
      .await?;

    debug!(
      server_type = %log_server.server_type,
      host = %log_server.host,
      port = log_server.port,
      players = player_count,
      created = outcome.created,
      updated = outcome.updated,
      closed = outcome.closed,
      "ingested poll"
    );
    Ok(outcome)
  }

  /// Close every open session, e.g. after a restart when presence since the
  /// last poll is unknown.
  pub async fn close_open_sessions(&self, now: i64) -> Result<u64> {
    let closed = self
      .conn
      .call(move |conn| {
        let closed = conn
          .prepare_cached(
            "UPDATE player_sessions SET ended_at = MAX(?1, last_seen_at) WHERE ended_at IS NULL",
          )?
          .execute(params![now])?;
        Ok(closed as u64)
      })
      .await?;

    if closed > 0 {
      info!(closed, "closed sessions left open by a previous run");
    }

    Ok(closed)
  }
}

fn validate_identity(server: &ServerIdentity) -> Result<()> {
  if server.server_type.trim().is_empty() {
    return Err(DbError::InvalidInput("server type cannot be empty".to_string()));
  }
  if server.host.trim().is_empty() {
    return Err(DbError::InvalidInput("server host cannot be empty".to_string()));
  }
  if server.port == 0 {
    return Err(DbError::InvalidInput("server port cannot be 0".to_string()));
  }
  Ok(())
}
