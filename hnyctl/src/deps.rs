//! Service dependency fetching from the service-map API.
//!
//! A dependency fetch is the same async shape as an analytical query: create
//! a request, poll until ready, then page through the results. Large service
//! lists go out in fixed-size filter batches with a pause in between.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::client::resources::{page_cursor, Links};
use crate::client::ApiClient;
use crate::error::Result;
use crate::poll::{await_ready, PollState};

/// Fetch window default, seven days.
pub const DEFAULT_TIME_RANGE_SECS: u64 = 604_800;
/// Max dependencies per request.
pub const DEFAULT_LIMIT: usize = 10_000;
/// Service filters per request.
pub const DEFAULT_FILTER_BATCH: usize = 100;
const READY_MAX_WAIT: Duration = Duration::from_secs(300);
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);
const BATCH_PAUSE: Duration = Duration::from_secs(1);

/// The query window for a dependency request. Absolute bounds take
/// precedence: with both set the range is implied, with one set the range
/// anchors the other end, with neither the range is relative to now.
#[derive(Debug, Clone, Copy)]
pub struct TimeWindow {
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub time_range: u64,
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self {
            start_time: None,
            end_time: None,
            time_range: DEFAULT_TIME_RANGE_SECS,
        }
    }
}

impl TimeWindow {
    fn body(&self, service_filters: Option<&[String]>) -> serde_json::Value {
        let mut payload = serde_json::Map::new();
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => {
                payload.insert("start_time".into(), start.into());
                payload.insert("end_time".into(), end.into());
            }
            (Some(start), None) => {
                payload.insert("start_time".into(), start.into());
                payload.insert("time_range".into(), self.time_range.into());
            }
            (None, Some(end)) => {
                payload.insert("end_time".into(), end.into());
                payload.insert("time_range".into(), self.time_range.into());
            }
            (None, None) => {
                payload.insert("time_range".into(), self.time_range.into());
            }
        }
        if let Some(services) = service_filters {
            let filters: Vec<serde_json::Value> = services
                .iter()
                .map(|name| serde_json::json!({ "name": name, "type": "service" }))
                .collect();
            payload.insert("filters".into(), filters.into());
        }
        serde_json::Value::Object(payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyNode {
    pub name: String,
}

/// One caller→callee edge from the service map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub parent_node: DependencyNode,
    pub child_node: DependencyNode,
    #[serde(default)]
    pub call_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct CreatedDependencyRequest {
    request_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DependencyPage {
    status: String,
    #[serde(default)]
    dependencies: Vec<Dependency>,
    #[serde(default)]
    links: Links,
}

impl ApiClient {
    /// Create a dependency-map request; returns its id for polling.
    pub async fn create_dependency_request(
        &self,
        window: TimeWindow,
        service_filters: Option<&[String]>,
        limit: usize,
    ) -> Result<String> {
        let body = window.body(service_filters);
        let response = self
            .send(
                Method::POST,
                &format!("maps/dependencies/requests?limit={limit}"),
                Some(&body),
            )
            .await?;
        let created: CreatedDependencyRequest = response.json()?;
        tracing::info!(request_id = %created.request_id, "Created dependency request");
        Ok(created.request_id)
    }

    async fn get_dependency_page(
        &self,
        request_id: &str,
        cursor: Option<&str>,
    ) -> Result<DependencyPage> {
        let endpoint = match cursor {
            Some(c) => format!("maps/dependencies/requests/{request_id}?page[next]={c}"),
            None => format!("maps/dependencies/requests/{request_id}"),
        };
        self.get_json(&endpoint).await
    }

    /// Wait for a dependency request to become ready, then drain every page.
    pub async fn fetch_dependencies(
        &self,
        request_id: &str,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> Result<Vec<Dependency>> {
        let client = self.clone();
        let request_id_owned = request_id.to_string();
        let mut page = await_ready(
            "dependency request",
            move || {
                let client = client.clone();
                let request_id = request_id_owned.clone();
                async move {
                    let page = client.get_dependency_page(&request_id, None).await?;
                    Ok(match page.status.as_str() {
                        "ready" => PollState::Ready(page),
                        "error" => PollState::Failed(format!(
                            "dependency request {request_id} reported an error"
                        )),
                        _ => PollState::Pending,
                    })
                }
            },
            max_wait,
            poll_interval,
        )
        .await?;

        let mut all = std::mem::take(&mut page.dependencies);
        while let Some(cursor) = page.links.next.as_deref().and_then(page_cursor) {
            page = self.get_dependency_page(request_id, Some(&cursor)).await?;
            all.extend(std::mem::take(&mut page.dependencies));
        }
        Ok(all)
    }
}

/// A completed fetch run, shaped for JSON export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub fetch_time: DateTime<Utc>,
    pub time_range: u64,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub total_dependencies: usize,
    pub unique_services: usize,
    pub dependencies: Vec<Dependency>,
}

impl Snapshot {
    fn new(window: TimeWindow, dependencies: Vec<Dependency>) -> Self {
        let mut services: Vec<&str> = dependencies
            .iter()
            .flat_map(|d| [d.parent_node.name.as_str(), d.child_node.name.as_str()])
            .collect();
        services.sort_unstable();
        services.dedup();

        Self {
            fetch_time: Utc::now(),
            time_range: window.time_range,
            start_time: window.start_time,
            end_time: window.end_time,
            total_dependencies: dependencies.len(),
            unique_services: services.len(),
            dependencies,
        }
    }
}

/// Load service names from a file, one per line; blank lines and `#`
/// comments are skipped.
pub fn load_services(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Drives batched dependency fetches against one client.
pub struct DependencyFetcher {
    client: ApiClient,
    pub max_wait: Duration,
    pub poll_interval: Duration,
    pub filter_batch: usize,
    pub limit: usize,
}

impl DependencyFetcher {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            max_wait: READY_MAX_WAIT,
            poll_interval: READY_POLL_INTERVAL,
            filter_batch: DEFAULT_FILTER_BATCH,
            limit: DEFAULT_LIMIT,
        }
    }

    /// Fetch the dependency graph for the window, optionally filtered to the
    /// named services. Filters go out in batches; a failed batch is logged
    /// and skipped so one bad batch does not lose the rest of the run.
    pub async fn fetch(
        &self,
        window: TimeWindow,
        service_filters: Option<&[String]>,
    ) -> Result<Snapshot> {
        let batches: Vec<Option<&[String]>> = match service_filters {
            Some(services) if !services.is_empty() => {
                services.chunks(self.filter_batch.max(1)).map(Some).collect()
            }
            _ => vec![None],
        };
        let total = batches.len();

        let mut dependencies = Vec::new();
        for (i, batch) in batches.into_iter().enumerate() {
            if let Some(batch) = batch {
                tracing::info!(batch = i + 1, total, services = batch.len(), "Processing batch");
            }
            match self.fetch_batch(window, batch).await {
                Ok(mut deps) => {
                    tracing::info!(batch = i + 1, fetched = deps.len(), "Fetched dependencies");
                    dependencies.append(&mut deps);
                }
                Err(e) => {
                    tracing::error!(batch = i + 1, error = %e, "Batch failed, skipping");
                }
            }
            if i + 1 < total {
                tokio::time::sleep(BATCH_PAUSE).await;
            }
        }

        Ok(Snapshot::new(window, dependencies))
    }

    async fn fetch_batch(
        &self,
        window: TimeWindow,
        service_filters: Option<&[String]>,
    ) -> Result<Vec<Dependency>> {
        let request_id = self
            .client
            .create_dependency_request(window, service_filters, self.limit)
            .await?;
        self.client
            .fetch_dependencies(&request_id, self.max_wait, self.poll_interval)
            .await
    }
}
