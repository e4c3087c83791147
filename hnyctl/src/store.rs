//! Dependency persistence and trend queries.
//!
//! SQLite-backed: an upserted edge table keyed on (parent, child), an
//! append-only observation history, and a service roster. Absence from the
//! latest snapshot toggles the active flag off rather than deleting rows, so
//! removed edges stay queryable.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::deps::Snapshot;
use crate::error::Result;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS dependencies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_service TEXT NOT NULL,
        child_service TEXT NOT NULL,
        first_seen TIMESTAMP NOT NULL,
        last_seen TIMESTAMP NOT NULL,
        total_calls INTEGER DEFAULT 0,
        active BOOLEAN DEFAULT 1,
        UNIQUE(parent_service, child_service)
    )",
    "CREATE TABLE IF NOT EXISTS dependency_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_service TEXT NOT NULL,
        child_service TEXT NOT NULL,
        observed_at TIMESTAMP NOT NULL,
        call_count INTEGER NOT NULL,
        time_range_start TIMESTAMP,
        time_range_end TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS services (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL,
        first_seen TIMESTAMP NOT NULL,
        last_seen TIMESTAMP NOT NULL,
        active BOOLEAN DEFAULT 1
    )",
    "CREATE INDEX IF NOT EXISTS idx_deps_parent ON dependencies(parent_service)",
    "CREATE INDEX IF NOT EXISTS idx_deps_child ON dependencies(child_service)",
    "CREATE INDEX IF NOT EXISTS idx_deps_active ON dependencies(active)",
];

/// One tracked caller→callee edge.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EdgeRecord {
    pub parent_service: String,
    pub child_service: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_calls: i64,
    pub active: bool,
}

/// One neighbor of a service, for the per-service view.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ServiceLink {
    pub service: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_calls: i64,
}

/// Active neighbors of one service in both directions.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceDependencies {
    pub service: String,
    pub outgoing_dependencies: Vec<ServiceLink>,
    pub incoming_dependencies: Vec<ServiceLink>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ConnectedService {
    pub service: String,
    pub outgoing: i64,
    pub incoming: i64,
    pub total: i64,
}

/// Roll-up counts across the whole store.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub active_dependencies: i64,
    pub inactive_dependencies: i64,
    pub active_services: i64,
    pub inactive_services: i64,
    pub most_connected_services: Vec<ConnectedService>,
}

/// Active-edge export, shaped for validation against external inventories.
#[derive(Debug, Clone, Serialize)]
pub struct Export {
    pub export_time: DateTime<Utc>,
    pub total_dependencies: usize,
    pub dependencies: Vec<EdgeRecord>,
}

pub struct DependencyStore {
    pool: SqlitePool,
}

impl DependencyStore {
    /// Open (or create) a store at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// In-memory store; state lives only as long as the pool.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Reconcile a fetched snapshot into the store.
    ///
    /// Every observed edge is upserted (accumulating total_calls) and
    /// appended to history; edges and services absent from the snapshot are
    /// flipped inactive. Returns the number of distinct edges observed.
    pub async fn record_snapshot(&self, snapshot: &Snapshot) -> Result<usize> {
        let fetch_time = snapshot.fetch_time;
        let range_start = snapshot
            .start_time
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
        let range_end = snapshot
            .end_time
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

        let mut tx = self.pool.begin().await?;
        let mut seen: HashSet<(&str, &str)> = HashSet::new();

        for dep in &snapshot.dependencies {
            let parent = dep.parent_node.name.as_str();
            let child = dep.child_node.name.as_str();
            let call_count = dep.call_count.unwrap_or(0) as i64;
            seen.insert((parent, child));

            for service in [parent, child] {
                sqlx::query(
                    "INSERT INTO services (name, first_seen, last_seen, active)
                     VALUES (?, ?, ?, 1)
                     ON CONFLICT(name) DO UPDATE SET
                         last_seen = excluded.last_seen,
                         active = 1",
                )
                .bind(service)
                .bind(fetch_time)
                .bind(fetch_time)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query(
                "INSERT INTO dependencies
                 (parent_service, child_service, first_seen, last_seen, total_calls, active)
                 VALUES (?, ?, ?, ?, ?, 1)
                 ON CONFLICT(parent_service, child_service) DO UPDATE SET
                     last_seen = excluded.last_seen,
                     total_calls = total_calls + excluded.total_calls,
                     active = 1",
            )
            .bind(parent)
            .bind(child)
            .bind(fetch_time)
            .bind(fetch_time)
            .bind(call_count)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO dependency_history
                 (parent_service, child_service, observed_at, call_count,
                  time_range_start, time_range_end)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(parent)
            .bind(child)
            .bind(fetch_time)
            .bind(call_count)
            .bind(range_start)
            .bind(range_end)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE dependencies SET active = 0 WHERE last_seen < ?")
            .bind(fetch_time)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE services SET active = 0 WHERE last_seen < ?")
            .bind(fetch_time)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(edges = seen.len(), "Recorded snapshot");
        Ok(seen.len())
    }

    /// All tracked edges, ordered by (parent, child).
    pub async fn all_edges(&self, active_only: bool) -> Result<Vec<EdgeRecord>> {
        let query = if active_only {
            "SELECT parent_service, child_service, first_seen, last_seen, total_calls, active
             FROM dependencies WHERE active = 1
             ORDER BY parent_service, child_service"
        } else {
            "SELECT parent_service, child_service, first_seen, last_seen, total_calls, active
             FROM dependencies
             ORDER BY parent_service, child_service"
        };
        Ok(sqlx::query_as(query).fetch_all(&self.pool).await?)
    }

    /// Active neighbors of one service, both directions.
    pub async fn service_dependencies(&self, service: &str) -> Result<ServiceDependencies> {
        let outgoing = sqlx::query_as(
            "SELECT child_service AS service, first_seen, last_seen, total_calls
             FROM dependencies
             WHERE parent_service = ? AND active = 1
             ORDER BY child_service",
        )
        .bind(service)
        .fetch_all(&self.pool)
        .await?;

        let incoming = sqlx::query_as(
            "SELECT parent_service AS service, first_seen, last_seen, total_calls
             FROM dependencies
             WHERE child_service = ? AND active = 1
             ORDER BY parent_service",
        )
        .bind(service)
        .fetch_all(&self.pool)
        .await?;

        Ok(ServiceDependencies {
            service: service.to_string(),
            outgoing_dependencies: outgoing,
            incoming_dependencies: incoming,
        })
    }

    /// Edges first seen at or after the given time, newest first.
    pub async fn new_since(&self, since: DateTime<Utc>) -> Result<Vec<EdgeRecord>> {
        Ok(sqlx::query_as(
            "SELECT parent_service, child_service, first_seen, last_seen, total_calls, active
             FROM dependencies
             WHERE first_seen >= ?
             ORDER BY first_seen DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Edges that went inactive but were still seen at or after the given
    /// time, most recently seen first.
    pub async fn removed_since(&self, since: DateTime<Utc>) -> Result<Vec<EdgeRecord>> {
        Ok(sqlx::query_as(
            "SELECT parent_service, child_service, first_seen, last_seen, total_calls, active
             FROM dependencies
             WHERE active = 0 AND last_seen >= ?
             ORDER BY last_seen DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn statistics(&self) -> Result<Statistics> {
        let active_dependencies =
            sqlx::query_scalar("SELECT COUNT(*) FROM dependencies WHERE active = 1")
                .fetch_one(&self.pool)
                .await?;
        let inactive_dependencies =
            sqlx::query_scalar("SELECT COUNT(*) FROM dependencies WHERE active = 0")
                .fetch_one(&self.pool)
                .await?;
        let active_services = sqlx::query_scalar("SELECT COUNT(*) FROM services WHERE active = 1")
            .fetch_one(&self.pool)
            .await?;
        let inactive_services =
            sqlx::query_scalar("SELECT COUNT(*) FROM services WHERE active = 0")
                .fetch_one(&self.pool)
                .await?;

        let most_connected_services = sqlx::query_as(
            "SELECT s.name AS service,
                    COUNT(DISTINCT d1.child_service) AS outgoing,
                    COUNT(DISTINCT d2.parent_service) AS incoming,
                    COUNT(DISTINCT d1.child_service) + COUNT(DISTINCT d2.parent_service) AS total
             FROM services s
             LEFT JOIN dependencies d1 ON s.name = d1.parent_service AND d1.active = 1
             LEFT JOIN dependencies d2 ON s.name = d2.child_service AND d2.active = 1
             WHERE s.active = 1
             GROUP BY s.name
             ORDER BY total DESC
             LIMIT 10",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(Statistics {
            active_dependencies,
            inactive_dependencies,
            active_services,
            inactive_services,
            most_connected_services,
        })
    }

    /// Active edges shaped for export.
    pub async fn export(&self) -> Result<Export> {
        let dependencies = self.all_edges(true).await?;
        Ok(Export {
            export_time: Utc::now(),
            total_dependencies: dependencies.len(),
            dependencies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::{Dependency, DependencyNode};
    use chrono::TimeZone;

    fn edge(parent: &str, child: &str, calls: u64) -> Dependency {
        Dependency {
            parent_node: DependencyNode {
                name: parent.to_string(),
            },
            child_node: DependencyNode {
                name: child.to_string(),
            },
            call_count: Some(calls),
        }
    }

    fn snapshot(fetch_time: DateTime<Utc>, dependencies: Vec<Dependency>) -> Snapshot {
        Snapshot {
            fetch_time,
            time_range: 604_800,
            start_time: None,
            end_time: None,
            total_dependencies: dependencies.len(),
            unique_services: 0,
            dependencies,
        }
    }

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 20, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn records_and_lists_edges() {
        let store = DependencyStore::in_memory().await.unwrap();
        let seen = store
            .record_snapshot(&snapshot(
                t(1),
                vec![edge("web", "api", 10), edge("api", "db", 5)],
            ))
            .await
            .unwrap();
        assert_eq!(seen, 2);

        let edges = store.all_edges(true).await.unwrap();
        assert_eq!(edges.len(), 2);
        // Ordered by (parent, child).
        assert_eq!(edges[0].parent_service, "api");
        assert_eq!(edges[1].parent_service, "web");
        assert_eq!(edges[1].total_calls, 10);
        assert!(edges[1].active);
    }

    #[tokio::test]
    async fn upsert_accumulates_calls_and_keeps_first_seen() {
        let store = DependencyStore::in_memory().await.unwrap();
        store
            .record_snapshot(&snapshot(t(1), vec![edge("web", "api", 10)]))
            .await
            .unwrap();
        store
            .record_snapshot(&snapshot(t(2), vec![edge("web", "api", 4)]))
            .await
            .unwrap();

        let edges = store.all_edges(true).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].total_calls, 14);
        assert_eq!(edges[0].first_seen, t(1));
        assert_eq!(edges[0].last_seen, t(2));
    }

    #[tokio::test]
    async fn absent_edges_go_inactive() {
        let store = DependencyStore::in_memory().await.unwrap();
        store
            .record_snapshot(&snapshot(
                t(1),
                vec![edge("web", "api", 1), edge("api", "db", 1)],
            ))
            .await
            .unwrap();
        store
            .record_snapshot(&snapshot(t(2), vec![edge("web", "api", 1)]))
            .await
            .unwrap();

        let active = store.all_edges(true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].parent_service, "web");

        let all = store.all_edges(false).await.unwrap();
        assert_eq!(all.len(), 2);

        let removed = store.removed_since(t(1)).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].parent_service, "api");
        assert!(!removed[0].active);
    }

    #[tokio::test]
    async fn new_since_filters_on_first_seen() {
        let store = DependencyStore::in_memory().await.unwrap();
        store
            .record_snapshot(&snapshot(t(1), vec![edge("web", "api", 1)]))
            .await
            .unwrap();
        store
            .record_snapshot(&snapshot(
                t(3),
                vec![edge("web", "api", 1), edge("api", "cache", 1)],
            ))
            .await
            .unwrap();

        let new = store.new_since(t(2)).await.unwrap();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].child_service, "cache");
    }

    #[tokio::test]
    async fn per_service_view_splits_directions() {
        let store = DependencyStore::in_memory().await.unwrap();
        store
            .record_snapshot(&snapshot(
                t(1),
                vec![
                    edge("web", "api", 1),
                    edge("api", "db", 2),
                    edge("api", "cache", 3),
                ],
            ))
            .await
            .unwrap();

        let view = store.service_dependencies("api").await.unwrap();
        let outgoing: Vec<_> = view
            .outgoing_dependencies
            .iter()
            .map(|l| l.service.as_str())
            .collect();
        let incoming: Vec<_> = view
            .incoming_dependencies
            .iter()
            .map(|l| l.service.as_str())
            .collect();
        assert_eq!(outgoing, vec!["cache", "db"]);
        assert_eq!(incoming, vec!["web"]);
    }

    #[tokio::test]
    async fn statistics_count_edges_and_rank_services() {
        let store = DependencyStore::in_memory().await.unwrap();
        store
            .record_snapshot(&snapshot(
                t(1),
                vec![edge("web", "api", 1), edge("stale", "api", 1)],
            ))
            .await
            .unwrap();
        store
            .record_snapshot(&snapshot(
                t(2),
                vec![edge("web", "api", 1), edge("api", "db", 1)],
            ))
            .await
            .unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.active_dependencies, 2);
        assert_eq!(stats.inactive_dependencies, 1);
        assert_eq!(stats.active_services, 3);
        assert_eq!(stats.inactive_services, 1);
        assert_eq!(stats.most_connected_services[0].service, "api");
        assert_eq!(stats.most_connected_services[0].total, 2);
    }
}
