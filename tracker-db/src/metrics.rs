//! Per-client API usage counters.

use std::collections::HashMap;

use tokio_rusqlite::rusqlite::params;

use crate::error::Result;
use crate::ledger::sanitize_text;
use crate::models::{ApiQueryLog, ApiQueryMetric, ApiQueryRouteMetric};
use crate::Database;

impl Database {
  /// Count one API request. Requests without an ip or route are ignored.
  pub async fn record_api_query(&self, log: ApiQueryLog) -> Result<()> {
    let (Some(ip_address), Some(route)) = (
      sanitize_text(Some(&log.ip_address)),
      sanitize_text(Some(&log.route)),
    ) else {
      return Ok(());
    };
    let user_agent = sanitize_text(log.user_agent.as_deref());
    let queried_at = log.queried_at;

    self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            r#"
            INSERT INTO api_query_metrics (ip_address, route, user_agent, last_queried_at, query_count)
            VALUES (?1, ?2, ?3, ?4, 1)
            ON CONFLICT(ip_address, route) DO UPDATE SET
              user_agent = COALESCE(excluded.user_agent, api_query_metrics.user_agent),
              last_queried_at = MAX(excluded.last_queried_at, api_query_metrics.last_queried_at),
              query_count = api_query_metrics.query_count + 1
            "#,
          )?
          .execute(params![&ip_address, &route, &user_agent, queried_at])?;
        Ok(())
      })
      .await?;

    Ok(())
  }

  /// Usage per client IP, heaviest clients first.
  pub async fn list_api_query_metrics(&self) -> Result<Vec<ApiQueryMetric>> {
    let rows = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare_cached(
          r#"
          SELECT ip_address, route, user_agent, last_queried_at, query_count
          FROM api_query_metrics
          ORDER BY ip_address ASC, route ASC
          "#,
        )?;

        let rows = stmt
          .query_map([], |row| {
            Ok((
              row.get::<_, String>(0)?,
              ApiQueryRouteMetric {
                route: row.get(1)?,
                last_user_agent: row.get(2)?,
                last_queried_at: row.get(3)?,
                query_count: row.get(4)?,
              },
            ))
          })?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
      })
      .await?;

    let mut by_ip: HashMap<String, ApiQueryMetric> = HashMap::new();
    for (ip_address, route) in rows {
      let metric = by_ip
        .entry(ip_address.clone())
        .or_insert_with(|| ApiQueryMetric {
          ip_address,
          total_queries: 0,
          last_queried_at: route.last_queried_at,
          routes: Vec::new(),
        });
      metric.total_queries += route.query_count;
      metric.last_queried_at = metric.last_queried_at.max(route.last_queried_at);
      metric.routes.push(route);
    }

    let mut metrics: Vec<ApiQueryMetric> = by_ip.into_values().collect();
    for metric in &mut metrics {
      metric.routes.sort_by(|a, b| {
        b.last_queried_at
          .cmp(&a.last_queried_at)
          .then_with(|| b.query_count.cmp(&a.query_count))
      });
    }
    metrics.sort_by(|a, b| {
      b.total_queries
        .cmp(&a.total_queries)
        .then_with(|| b.last_queried_at.cmp(&a.last_queried_at))
        .then_with(|| a.ip_address.cmp(&b.ip_address))
    });

    Ok(metrics)
  }
}
