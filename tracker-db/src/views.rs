//! Read-only projections over the registry and the ledger.

use tokio_rusqlite::rusqlite::{self, OptionalExtension, Row, params};

use crate::error::{DbError, Result};
use crate::models::{
  ActiveSession, DatabaseStats, PlayerSessionStats, ServerIdentity, ServerSummary, SessionRecord,
};
use crate::registry::{SELECT_SERVER_COLUMNS, server_from_row};
use crate::Database;

/// Map `id, player_name, steam_id, started_at, last_seen_at, ended_at`.
pub(crate) fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
  Ok(SessionRecord {
    id: row.get(0)?,
    player_name: row.get(1)?,
    steam_id: row.get(2)?,
    started_at: row.get(3)?,
    last_seen_at: row.get(4)?,
    ended_at: row.get(5)?,
  })
}

impl Database {
  /// All servers ever polled.
  pub async fn list_servers(&self) -> Result<Vec<ServerSummary>> {
    let servers = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare_cached(&format!(
          "{SELECT_SERVER_COLUMNS} ORDER BY server_type, host, port"
        ))?;

        let servers = stmt
          .query_map([], server_from_row)?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(servers)
      })
      .await?;

    Ok(servers)
  }

  /// A single registry row. Returns None if the server was never polled.
  pub async fn get_server(&self, server: ServerIdentity) -> Result<Option<ServerSummary>> {
    let summary = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(&format!(
            "{SELECT_SERVER_COLUMNS} WHERE server_type = ?1 AND host = ?2 AND port = ?3"
          ))?
          .query_row(
            params![&server.server_type, &server.host, server.port],
            server_from_row,
          )
          .optional()
      })
      .await?;

    Ok(summary)
  }

  /// Open sessions of a server, oldest first.
  pub async fn list_active_sessions(&self, server: ServerIdentity) -> Result<Vec<ActiveSession>> {
    let sessions = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          r#"
          SELECT id, player_name, steam_id, started_at, last_seen_at
          FROM player_sessions
          WHERE server_type = ?1 AND host = ?2 AND port = ?3 AND ended_at IS NULL
          ORDER BY started_at ASC, id ASC
          "#,
        )?;

        let sessions = stmt
          .query_map(params![&server.server_type, &server.host, server.port], |row| {
            Ok(ActiveSession {
              id: row.get(0)?,
              player_name: row.get(1)?,
              steam_id: row.get(2)?,
              started_at: row.get(3)?,
              last_seen_at: row.get(4)?,
            })
          })?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sessions)
      })
      .await?;

    Ok(sessions)
  }

  /// The `limit` most recently started sessions of a server, newest first.
  pub async fn list_recent_sessions(
    &self,
    server: ServerIdentity,
    limit: u32,
  ) -> Result<Vec<SessionRecord>> {
    if limit == 0 {
      return Err(DbError::InvalidInput("limit must be positive".to_string()));
    }

    let sessions = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          r#"
          SELECT id, player_name, steam_id, started_at, last_seen_at, ended_at
          FROM player_sessions
          WHERE server_type = ?1 AND host = ?2 AND port = ?3
          ORDER BY started_at DESC, id DESC
          LIMIT ?4
          "#,
        )?;

        let sessions = stmt
          .query_map(
            params![&server.server_type, &server.host, server.port, limit],
            session_from_row,
          )?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sessions)
      })
      .await?;

    Ok(sessions)
  }

  /// Database-wide counters.
  pub async fn database_stats(&self) -> Result<DatabaseStats> {
    let stats = self
      .conn
      .call(|conn| {
        conn
          .prepare_cached(
            r#"
            SELECT
              (SELECT COUNT(*) FROM player_sessions) AS total_sessions,
              (SELECT COUNT(DISTINCT player_name) FROM player_sessions) AS unique_players,
              (SELECT COUNT(*) FROM player_sessions WHERE ended_at IS NULL) AS active_sessions,
              (SELECT COUNT(*) FROM servers) AS server_count
            "#,
          )?
          .query_row([], |row| {
            Ok(DatabaseStats {
              total_sessions: row.get(0)?,
              unique_players: row.get(1)?,
              active_sessions: row.get(2)?,
              server_count: row.get(3)?,
            })
          })
      })
      .await?;

    Ok(stats)
  }

  /// Session count and first sighting per player name, busiest first.
  pub async fn list_player_session_stats(&self) -> Result<Vec<PlayerSessionStats>> {
    let stats = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare_cached(
          r#"
          SELECT player_name, COUNT(*) AS session_count, MIN(started_at) AS first_seen
          FROM player_sessions
          GROUP BY player_name
          ORDER BY session_count DESC, player_name ASC
          "#,
        )?;

        let stats = stmt
          .query_map([], |row| {
            Ok(PlayerSessionStats {
              player_name: row.get(0)?,
              session_count: row.get(1)?,
              first_seen: row.get(2)?,
            })
          })?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(stats)
      })
      .await?;

    Ok(stats)
  }
}
