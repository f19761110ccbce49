//! Server registry: one row per `(type, host, port)` ever polled.

use tokio_rusqlite::rusqlite::{self, Row, Transaction, params};

use crate::ledger::sanitize_text;
use crate::models::{ServerDetails, ServerIdentity, ServerObservation, ServerSummary};

/// Upsert the registry row for a polled server.
///
/// Best-effort protocol fields keep their previous value when the poll has
/// none. Player count and last-seen always overwrite. A declared player count
/// wins over `listed_players`.
pub(crate) fn upsert_server(
  tx: &Transaction<'_>,
  server: &ServerIdentity,
  observation: &ServerObservation,
  listed_players: usize,
  timestamp: i64,
) -> rusqlite::Result<()> {
  let current_players = observation
    .num_players
    .unwrap_or_else(|| u32::try_from(listed_players).unwrap_or(u32::MAX));

  tx.prepare_cached(
    r#"
    INSERT INTO servers (server_type, host, port, name, map, max_players, current_players, last_ping, last_seen_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
    ON CONFLICT(server_type, host, port) DO UPDATE SET
      name = COALESCE(excluded.name, servers.name),
      map = COALESCE(excluded.map, servers.map),
      max_players = COALESCE(excluded.max_players, servers.max_players),
      current_players = excluded.current_players,
      last_ping = COALESCE(excluded.last_ping, servers.last_ping),
      last_seen_at = excluded.last_seen_at
    "#,
  )?
  .execute(params![
    &server.server_type,
    &server.host,
    server.port,
    sanitize_text(observation.name.as_deref()),
    sanitize_text(observation.map.as_deref()),
    observation.max_players,
    current_players,
    observation.ping,
    timestamp,
  ])?;

  Ok(())
}

pub(crate) const SELECT_SERVER_COLUMNS: &str =
  "SELECT server_type, host, port, name, map, max_players, current_players, last_ping, last_seen_at FROM servers";

pub(crate) fn server_from_row(row: &Row<'_>) -> rusqlite::Result<ServerSummary> {
  Ok(ServerSummary {
    server: ServerDetails {
      identity: ServerIdentity {
        server_type: row.get(0)?,
        host: row.get(1)?,
        port: row.get(2)?,
      },
      name: row.get(3)?,
      map: row.get(4)?,
      max_players: row.get(5)?,
      current_players: row.get(6)?,
      ping: row.get(7)?,
    },
    last_seen_at: row.get(8)?,
  })
}
