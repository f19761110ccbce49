//! Duplicate session consolidation.
//!
//! Two policies repair rows that should describe one continuous presence:
//!
//! - **exact**: rows sharing `(server, player, started_at)` collapse onto a
//!   single keeper, the others are deleted untouched.
//! - **proximity**: rows of one `(server, player)` are clustered by start
//!   time; a row joins the running cluster when it starts no later than the
//!   cluster's effective end plus the merge gap. Each cluster is folded into
//!   its keeper.
//!
//! Every candidate group is read, planned and written in its own
//! transaction. A failing group is logged and skipped; groups already
//! processed stay committed.

use std::cmp::Ordering;

use tokio_rusqlite::rusqlite::{self, Transaction, params};
use tracing::{debug, info, warn};

use crate::error::{DbError, Result};
use crate::models::{ConsolidationSummary, ProximityOptions, ServerIdentity, SessionRecord};
use crate::views::session_from_row;
use crate::Database;

/// Keeper order of the exact policy: open, then later end, then later last
/// seen, then the oldest row.
fn exact_rank(a: &SessionRecord, b: &SessionRecord) -> Ordering {
  a.is_open()
    .cmp(&b.is_open())
    .then_with(|| a.ended_at.unwrap_or(-1).cmp(&b.ended_at.unwrap_or(-1)))
    .then_with(|| a.last_seen_at.cmp(&b.last_seen_at))
    .then_with(|| b.id.cmp(&a.id))
}

/// Keeper order of the proximity policy: known stable id, then later last
/// seen, then the oldest row.
fn proximity_rank(a: &SessionRecord, b: &SessionRecord) -> Ordering {
  a.steam_id
    .is_some()
    .cmp(&b.steam_id.is_some())
    .then_with(|| a.last_seen_at.cmp(&b.last_seen_at))
    .then_with(|| b.id.cmp(&a.id))
}

/// Pick the row that survives an exact duplicate group.
pub fn choose_exact_keeper(rows: &[SessionRecord]) -> Result<&SessionRecord> {
  rows
    .iter()
    .max_by(|a, b| exact_rank(a, b))
    .ok_or(DbError::NoKeeperCandidate)
}

/// Pick the row that survives a proximity cluster.
pub fn choose_proximity_keeper<'a>(rows: &[&'a SessionRecord]) -> Result<&'a SessionRecord> {
  rows
    .iter()
    .copied()
    .max_by(|a, b| proximity_rank(a, b))
    .ok_or(DbError::NoKeeperCandidate)
}

/// Field values a cluster keeper ends up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedSession {
  pub started_at: i64,
  pub last_seen_at: i64,
  pub ended_at: Option<i64>,
  pub steam_id: Option<String>,
}

/// The write set for one proximity cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMerge {
  pub keeper_id: i64,
  pub merged: MergedSession,
  /// Whether the keeper row differs from `merged`
  pub keeper_changed: bool,
  pub delete_ids: Vec<i64>,
}

/// Fold a cluster (in start order) into its keeper.
pub fn merge_cluster(cluster: &[&SessionRecord]) -> Result<ClusterMerge> {
  let keeper = choose_proximity_keeper(cluster)?;

  let started_at = cluster.iter().map(|r| r.started_at).min().unwrap_or(keeper.started_at);
  let last_seen_at = cluster
    .iter()
    .map(|r| r.last_seen_at)
    .max()
    .unwrap_or(keeper.last_seen_at);
  let ended_at = if cluster.iter().any(|r| r.is_open()) {
    None
  } else {
    cluster.iter().map(|r| r.effective_end()).max()
  };
  let steam_id = keeper
    .steam_id
    .clone()
    .or_else(|| cluster.iter().find_map(|r| r.steam_id.clone()));

  let merged = MergedSession {
    started_at,
    last_seen_at,
    ended_at,
    steam_id,
  };
  let keeper_changed = keeper.started_at != merged.started_at
    || keeper.last_seen_at != merged.last_seen_at
    || keeper.ended_at != merged.ended_at
    || keeper.steam_id != merged.steam_id;

  Ok(ClusterMerge {
    keeper_id: keeper.id,
    merged,
    keeper_changed,
    delete_ids: cluster
      .iter()
      .filter(|r| r.id != keeper.id)
      .map(|r| r.id)
      .collect(),
  })
}

/// Split one player's sessions into proximity clusters and plan the merge of
/// every cluster with more than one row.
pub fn plan_clusters(rows: &[SessionRecord], merge_gap_ms: i64) -> Result<Vec<ClusterMerge>> {
  let mut ordered: Vec<&SessionRecord> = rows.iter().collect();
  ordered.sort_by_key(|r| (r.started_at, r.id));

  let mut plans = Vec::new();
  let mut cluster: Vec<&SessionRecord> = Vec::new();
  let mut running_end = i64::MIN;

  for row in ordered {
    if !cluster.is_empty() && row.started_at > running_end.saturating_add(merge_gap_ms) {
      if cluster.len() > 1 {
        plans.push(merge_cluster(&cluster)?);
      }
      cluster.clear();
    }

    running_end = if cluster.is_empty() {
      row.effective_end()
    } else {
      running_end.max(row.effective_end())
    };
    cluster.push(row);
  }

  if cluster.len() > 1 {
    plans.push(merge_cluster(&cluster)?);
  }

  Ok(plans)
}

/// What one group contributed to the summary.
#[derive(Debug, Default)]
struct GroupResult {
  merged: u64,
  updated: u64,
  deleted: u64,
}

impl ConsolidationSummary {
  fn absorb(&mut self, result: GroupResult) {
    self.merged += result.merged;
    self.updated += result.updated;
    self.deleted += result.deleted;
  }
}

const SELECT_SESSION_COLUMNS: &str =
  "SELECT id, player_name, steam_id, started_at, last_seen_at, ended_at FROM player_sessions";

fn delete_sessions(tx: &Transaction<'_>, ids: &[i64]) -> rusqlite::Result<u64> {
  let mut stmt = tx.prepare_cached("DELETE FROM player_sessions WHERE id = ?1")?;
  let mut deleted = 0;
  for id in ids {
    deleted += stmt.execute(params![id])? as u64;
  }
  Ok(deleted)
}

impl Database {
  /// Collapse rows sharing `(server, player, started_at)` onto one keeper.
  ///
  /// Dropping the returned future between groups is safe: each group
  /// commits on its own.
  pub async fn consolidate_exact_duplicates(&self, dry_run: bool) -> Result<ConsolidationSummary> {
    let groups = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare_cached(
          r#"
          SELECT server_type, host, port, player_name, started_at, COUNT(*) AS total
          FROM player_sessions
          GROUP BY server_type, host, port, player_name, started_at
          HAVING total > 1
          ORDER BY total DESC, player_name ASC
          "#,
        )?;

        let groups = stmt
          .query_map([], |row| {
            Ok((
              ServerIdentity {
                server_type: row.get(0)?,
                host: row.get(1)?,
                port: row.get(2)?,
              },
              row.get::<_, String>(3)?,
              row.get::<_, i64>(4)?,
            ))
          })?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(groups)
      })
      .await?;

    let mut summary = ConsolidationSummary {
      dry_run,
      ..Default::default()
    };

    for (server, player_name, started_at) in groups {
      summary.groups_examined += 1;
      let log_name = player_name.clone();

      let result = self
        .conn
        .call(move |conn| {
          let tx = conn.transaction()?;

          let rows = tx
            .prepare_cached(&format!(
              "{SELECT_SESSION_COLUMNS} WHERE server_type = ?1 AND host = ?2 AND port = ?3 AND player_name = ?4 AND started_at = ?5 ORDER BY id ASC"
            ))?
            .query_map(
              params![&server.server_type, &server.host, server.port, &player_name, started_at],
              session_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

          if rows.len() <= 1 {
            return Ok(Ok(GroupResult::default()));
          }

          let keeper_id = match choose_exact_keeper(&rows) {
            Ok(keeper) => keeper.id,
            Err(e) => return Ok(Err(e)),
          };
          let doomed: Vec<i64> = rows.iter().map(|r| r.id).filter(|id| *id != keeper_id).collect();

          let deleted = if dry_run {
            doomed.len() as u64
          } else {
            let deleted = delete_sessions(&tx, &doomed)?;
            tx.commit()?;
            deleted
          };

          Ok(Ok(GroupResult {
            merged: 1,
            updated: 0,
            deleted,
          }))
        })
        .await
        .map_err(DbError::from)
        .and_then(|r| r);

      match result {
        Ok(group) => {
          if group.deleted > 0 {
            debug!(player_name = %log_name, started_at, deleted = group.deleted, "collapsed exact duplicates");
          }
          summary.absorb(group);
        }
        Err(e) => {
          warn!(player_name = %log_name, started_at, error = %e, "skipping duplicate group");
          summary.failed += 1;
        }
      }
    }

    info!(
      groups = summary.groups_examined,
      merged = summary.merged,
      deleted = summary.deleted,
      failed = summary.failed,
      dry_run,
      "exact duplicate consolidation finished"
    );
    Ok(summary)
  }

  /// Merge sessions of the same player that lie within `merge_gap_ms` of
  /// each other.
  ///
  /// With `dry_run` the same counts are computed without writing anything.
  /// Dropping the returned future between groups is safe.
  pub async fn consolidate_by_proximity(
    &self,
    options: ProximityOptions,
  ) -> Result<ConsolidationSummary> {
    if options.merge_gap_ms < 0 {
      return Err(DbError::InvalidInput(format!(
        "merge gap must be non-negative, got {}",
        options.merge_gap_ms
      )));
    }

    let groups = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare_cached(
          r#"
          SELECT server_type, host, port, player_name
          FROM player_sessions
          GROUP BY server_type, host, port, player_name
          HAVING COUNT(*) > 1
          ORDER BY server_type, host, port, player_name
          "#,
        )?;

        let groups = stmt
          .query_map([], |row| {
            Ok((
              ServerIdentity {
                server_type: row.get(0)?,
                host: row.get(1)?,
                port: row.get(2)?,
              },
              row.get::<_, String>(3)?,
            ))
          })?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(groups)
      })
      .await?;

    let ProximityOptions {
      dry_run,
      merge_gap_ms,
    } = options;
    let mut summary = ConsolidationSummary {
      dry_run,
      ..Default::default()
    };

    for (server, player_name) in groups {
      summary.groups_examined += 1;
      let log_name = player_name.clone();

      let result = self
        .conn
        .call(move |conn| {
          let tx = conn.transaction()?;

          let rows = tx
            .prepare_cached(&format!(
              "{SELECT_SESSION_COLUMNS} WHERE server_type = ?1 AND host = ?2 AND port = ?3 AND player_name = ?4 ORDER BY started_at ASC, id ASC"
            ))?
            .query_map(
              params![&server.server_type, &server.host, server.port, &player_name],
              session_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

          let plans = match plan_clusters(&rows, merge_gap_ms) {
            Ok(plans) => plans,
            Err(e) => return Ok(Err(e)),
          };

          let mut group = GroupResult {
            merged: plans.len() as u64,
            ..Default::default()
          };
          if plans.is_empty() {
            return Ok(Ok(group));
          }

          if dry_run {
            group.updated = plans.iter().filter(|p| p.keeper_changed).count() as u64;
            group.deleted = plans.iter().map(|p| p.delete_ids.len() as u64).sum();
            return Ok(Ok(group));
          }

          {
            let mut update_stmt = tx.prepare_cached(
              r#"
              UPDATE player_sessions
              SET started_at = ?1,
                  last_seen_at = ?2,
                  ended_at = ?3,
                  steam_id = COALESCE(steam_id, ?4)
              WHERE id = ?5
              "#,
            )?;
            for plan in &plans {
              group.deleted += delete_sessions(&tx, &plan.delete_ids)?;
              if plan.keeper_changed {
                update_stmt.execute(params![
                  plan.merged.started_at,
                  plan.merged.last_seen_at,
                  plan.merged.ended_at,
                  &plan.merged.steam_id,
                  plan.keeper_id,
                ])?;
                group.updated += 1;
              }
            }
          }

          tx.commit()?;
          Ok(Ok(group))
        })
        .await
        .map_err(DbError::from)
        .and_then(|r| r);

      match result {
        Ok(group) => {
          if group.merged > 0 {
            debug!(
              player_name = %log_name,
              clusters = group.merged,
              deleted = group.deleted,
              dry_run,
              "merged nearby sessions"
            );
          }
          summary.absorb(group);
        }
        Err(e) => {
          warn!(player_name = %log_name, error = %e, "skipping session group");
          summary.failed += 1;
        }
      }
    }

    info!(
      groups = summary.groups_examined,
      merged = summary.merged,
      updated = summary.updated,
      deleted = summary.deleted,
      failed = summary.failed,
      merge_gap_ms,
      dry_run,
      "proximity consolidation finished"
    );
    Ok(summary)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn session(
    id: i64,
    started_at: i64,
    last_seen_at: i64,
    ended_at: Option<i64>,
    steam_id: Option<&str>,
  ) -> SessionRecord {
    SessionRecord {
      id,
      player_name: "Alice".to_string(),
      steam_id: steam_id.map(str::to_string),
      started_at,
      last_seen_at,
      ended_at,
    }
  }

  #[test]
  fn test_exact_keeper_prefers_open_row() {
    let rows = vec![
      session(1, 0, 5_000, Some(6_000), None),
      session(2, 0, 1_000, None, None),
    ];
    assert_eq!(choose_exact_keeper(&rows).unwrap().id, 2);

    let reversed = vec![rows[1].clone(), rows[0].clone()];
    assert_eq!(choose_exact_keeper(&reversed).unwrap().id, 2);
  }

  #[test]
  fn test_exact_keeper_tie_breaks() {
    // later end wins
    let rows = vec![
      session(1, 0, 900, Some(1_000), None),
      session(2, 0, 900, Some(2_000), None),
    ];
    assert_eq!(choose_exact_keeper(&rows).unwrap().id, 2);

    // same end, later last seen wins
    let rows = vec![
      session(1, 0, 900, Some(2_000), None),
      session(2, 0, 800, Some(2_000), None),
    ];
    assert_eq!(choose_exact_keeper(&rows).unwrap().id, 1);

    // everything equal, oldest row wins
    let rows = vec![
      session(7, 0, 900, Some(2_000), None),
      session(3, 0, 900, Some(2_000), None),
      session(5, 0, 900, Some(2_000), None),
    ];
    assert_eq!(choose_exact_keeper(&rows).unwrap().id, 3);
  }

  #[test]
  fn test_empty_group_has_no_keeper() {
    assert!(matches!(choose_exact_keeper(&[]), Err(DbError::NoKeeperCandidate)));
    assert!(matches!(merge_cluster(&[]), Err(DbError::NoKeeperCandidate)));
  }

  #[test]
  fn test_cluster_merges_within_gap() {
    let rows = vec![
      session(1, 0, 1_000, Some(2_000), None),
      session(2, 4_000, 9_000, None, None),
    ];
    let plans = plan_clusters(&rows, 5_000).unwrap();

    assert_eq!(plans.len(), 1);
    let plan = &plans[0];
    assert_eq!(plan.keeper_id, 2);
    assert_eq!(
      plan.merged,
      MergedSession {
        started_at: 0,
        last_seen_at: 9_000,
        ended_at: None,
        steam_id: None,
      }
    );
    assert!(plan.keeper_changed);
    assert_eq!(plan.delete_ids, vec![1]);
  }

  #[test]
  fn test_cluster_does_not_merge_beyond_gap() {
    let rows = vec![
      session(1, 0, 1_000, Some(2_000), None),
      session(2, 4_000, 9_000, None, None),
    ];
    assert!(plan_clusters(&rows, 1_000).unwrap().is_empty());
  }

  #[test]
  fn test_gap_boundary_is_inclusive() {
    let rows = vec![
      session(1, 0, 1_000, Some(2_000), None),
      session(2, 3_000, 4_000, Some(4_000), None),
    ];
    assert_eq!(plan_clusters(&rows, 1_000).unwrap().len(), 1);
    assert!(plan_clusters(&rows, 999).unwrap().is_empty());
  }

  #[test]
  fn test_closed_cluster_end_restores_ordering() {
    // second row was closed before its last sighting
    let rows = vec![
      session(1, 0, 1_000, Some(1_500), None),
      session(2, 2_000, 8_000, Some(7_000), None),
    ];
    let plans = plan_clusters(&rows, 5_000).unwrap();

    assert_eq!(plans[0].merged.ended_at, Some(8_000));
    assert_eq!(plans[0].merged.last_seen_at, 8_000);
  }

  #[test]
  fn test_keeper_prefers_stable_id_and_back_fills() {
    let rows = vec![
      session(1, 0, 1_000, Some(1_000), Some("steam-1")),
      session(2, 1_500, 9_000, Some(9_000), None),
      session(3, 2_000, 3_000, Some(3_000), Some("steam-3")),
    ];
    let plans = plan_clusters(&rows, 5_000).unwrap();

    assert_eq!(plans.len(), 1);
    // both 1 and 3 carry an id; 3 was seen later
    assert_eq!(plans[0].keeper_id, 3);
    assert_eq!(plans[0].merged.steam_id.as_deref(), Some("steam-3"));
    assert_eq!(plans[0].delete_ids, vec![1, 2]);
  }

  #[test]
  fn test_cluster_without_stable_ids_keeps_none() {
    let cluster_rows = [
      session(1, 0, 1_000, Some(1_000), None),
      session(2, 500, 2_000, Some(2_000), None),
    ];
    let refs: Vec<&SessionRecord> = cluster_rows.iter().collect();
    let plan = merge_cluster(&refs).unwrap();

    assert_eq!(plan.keeper_id, 2);
    assert_eq!(plan.merged.steam_id, None);
  }

  #[test]
  fn test_running_end_spans_whole_cluster() {
    // a long session swallows a later short one that starts after the
    // middle row's end but before the first row's end
    let rows = vec![
      session(1, 0, 20_000, Some(20_000), None),
      session(2, 1_000, 2_000, Some(2_000), None),
      session(3, 15_000, 16_000, Some(16_000), None),
      session(4, 40_000, 41_000, Some(41_000), None),
    ];
    let plans = plan_clusters(&rows, 1_000).unwrap();

    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].keeper_id, 1);
    assert_eq!(plans[0].delete_ids, vec![2, 3]);
    assert!(!plans[0].keeper_changed);
  }

  #[test]
  fn test_merged_output_is_stable() {
    let rows = vec![
      session(1, 0, 1_000, Some(2_000), None),
      session(2, 4_000, 9_000, None, Some("s")),
      session(3, 30_000, 31_000, Some(31_000), None),
      session(4, 33_000, 34_000, Some(35_000), None),
    ];
    let plans = plan_clusters(&rows, 5_000).unwrap();
    assert_eq!(plans.len(), 2);

    let merged_rows: Vec<SessionRecord> = plans
      .iter()
      .map(|p| SessionRecord {
        id: p.keeper_id,
        player_name: "Alice".to_string(),
        steam_id: p.merged.steam_id.clone(),
        started_at: p.merged.started_at,
        last_seen_at: p.merged.last_seen_at,
        ended_at: p.merged.ended_at,
      })
      .collect();
    assert!(plan_clusters(&merged_rows, 5_000).unwrap().is_empty());
  }
}
