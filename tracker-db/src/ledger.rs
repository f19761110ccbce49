//! Session ledger: turns one poll's player list into session transitions.
//!
//! The transition is planned by [`plan_poll`] without touching storage and
//! then applied inside the caller's transaction by [`apply_poll`]. Absence
//! from a poll is the only disconnect signal, so every open session whose
//! player is missing from the poll gets closed.

use std::collections::{HashMap, HashSet};

use tokio_rusqlite::rusqlite::{self, Transaction, params};

use crate::models::{ObservedPlayer, PollOutcome, ServerIdentity, UNNAMED_PLAYER};

/// An open session as the planner sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSession {
  pub id: i64,
  pub player_name: String,
  pub steam_id: Option<String>,
}

/// A session to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
  pub player_name: String,
  pub steam_id: Option<String>,
  pub started_at: i64,
}

/// An open session that was seen again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTouch {
  pub id: i64,
  /// Stable id to back-fill; only set when the session has none yet
  pub steam_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollPlan {
  pub to_create: Vec<NewSession>,
  pub to_update: Vec<SessionTouch>,
  /// Ids of open sessions whose player was absent
  pub to_close: Vec<i64>,
}

impl PollPlan {
  pub fn outcome(&self) -> PollOutcome {
    PollOutcome {
      created: self.to_create.len(),
      updated: self.to_update.len(),
      closed: self.to_close.len(),
    }
  }
}

/// Trim a reported name, substituting the placeholder for blank names.
pub fn normalize_player_name(name: Option<&str>) -> String {
  match name.map(str::trim) {
    Some(trimmed) if !trimmed.is_empty() => trimmed.to_string(),
    _ => UNNAMED_PLAYER.to_string(),
  }
}

/// Trim an optional text field; blank becomes `None`.
pub fn sanitize_text(value: Option<&str>) -> Option<String> {
  value
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .map(str::to_string)
}

/// Resolve a declared connection duration into an absolute start time.
///
/// Negative, non-finite, or too-large offsets are ignored and the poll
/// timestamp is used instead.
pub fn resolve_started_at(start_offset_seconds: Option<f64>, timestamp: i64) -> i64 {
  let Some(seconds) = start_offset_seconds else {
    return timestamp;
  };
  if !seconds.is_finite() || seconds < 0.0 {
    return timestamp;
  }

  let offset_ms = (seconds * 1000.0).round() as i64;
  let started_at = timestamp.saturating_sub(offset_ms);
  if started_at > 0 && started_at <= timestamp {
    started_at
  } else {
    timestamp
  }
}

/// Compute the transitions for one poll.
///
/// `open` must be the server's open sessions as they were before the poll.
pub fn plan_poll(open: &[OpenSession], players: &[ObservedPlayer], timestamp: i64) -> PollPlan {
  let mut open_by_name: HashMap<&str, Vec<&OpenSession>> = HashMap::new();
  for session in open {
    open_by_name
      .entry(session.player_name.as_str())
      .or_default()
      .push(session);
  }

  let mut plan = PollPlan::default();
  let mut seen: HashSet<String> = HashSet::with_capacity(players.len());

  for player in players {
    let player_name = normalize_player_name(player.name.as_deref());
    if seen.contains(&player_name) {
      continue;
    }
    let steam_id = sanitize_text(player.stable_id.as_deref());

    match open_by_name.get(player_name.as_str()) {
      // More than one match only happens when the invariant was already
      // broken; all of them stay alive until consolidation repairs it.
      Some(sessions) => {
        for session in sessions {
          plan.to_update.push(SessionTouch {
            id: session.id,
            steam_id: match session.steam_id {
              Some(_) => None,
              None => steam_id.clone(),
            },
          });
        }
      }
      None => plan.to_create.push(NewSession {
        player_name: player_name.clone(),
        steam_id,
        started_at: resolve_started_at(player.start_offset_seconds, timestamp),
      }),
    }

    seen.insert(player_name);
  }

  plan.to_close = open
    .iter()
    .filter(|session| !seen.contains(&session.player_name))
    .map(|session| session.id)
    .collect();

  plan
}

/// Load the open sessions of a server, oldest first.
pub(crate) fn load_open_sessions(
  tx: &Transaction<'_>,
  server: &ServerIdentity,
) -> rusqlite::Result<Vec<OpenSession>> {
  let mut stmt = tx.prepare_cached(
    r#"
    SELECT id, player_name, steam_id
    FROM player_sessions
    WHERE server_type = ?1 AND host = ?2 AND port = ?3 AND ended_at IS NULL
    ORDER BY started_at ASC, id ASC
    "#,
  )?;

  let sessions = stmt
    .query_map(params![&server.server_type, &server.host, server.port], |row| {
      Ok(OpenSession {
        id: row.get(0)?,
        player_name: row.get(1)?,
        steam_id: row.get(2)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  Ok(sessions)
}

/// Plan and apply one poll inside the given transaction.
pub(crate) fn apply_poll(
  tx: &Transaction<'_>,
  server: &ServerIdentity,
  players: &[ObservedPlayer],
  timestamp: i64,
) -> rusqlite::Result<PollOutcome> {
  let open = load_open_sessions(tx, server)?;
  let plan = plan_poll(&open, players, timestamp);

  {
    let mut touch_stmt = tx.prepare_cached(
      r#"
      UPDATE player_sessions
      SET last_seen_at = MAX(last_seen_at, ?1),
          steam_id = COALESCE(steam_id, ?2)
      WHERE id = ?3
      "#,
    )?;
    for touch in &plan.to_update {
      touch_stmt.execute(params![timestamp, &touch.steam_id, touch.id])?;
    }
  }

  {
    let mut insert_stmt = tx.prepare_cached(
      r#"
      INSERT INTO player_sessions (server_type, host, port, player_name, steam_id, started_at, last_seen_at)
      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
      "#,
    )?;
    for session in &plan.to_create {
      insert_stmt.execute(params![
        &server.server_type,
        &server.host,
        server.port,
        &session.player_name,
        &session.steam_id,
        session.started_at,
        timestamp,
      ])?;
    }
  }

  {
    let mut close_stmt = tx.prepare_cached(
      "UPDATE player_sessions SET ended_at = MAX(?1, last_seen_at) WHERE id = ?2 AND ended_at IS NULL",
    )?;
    for id in &plan.to_close {
      close_stmt.execute(params![timestamp, id])?;
    }
  }

  Ok(plan.outcome())
}
