//! Typed operations over the remote resource collections.
//!
//! Thin, explicit wrappers around [`ApiClient::send`]: existence checks map
//! 404 to `false`, list operations transparently follow `links.next`
//! pagination, and the query-result driver runs the full create→poll→retrieve
//! lifecycle for analytical queries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use super::ApiClient;
use crate::error::{HnyError, Result};
use crate::poll::{await_ready, PollState};
use crate::query::QuerySpec;

/// A dataset as listed by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_written_at: Option<DateTime<Utc>>,
}

/// A schema column within a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub key_name: String,
    #[serde(rename = "type", default)]
    pub column_type: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_written: Option<DateTime<Utc>>,
}

/// The measured indicator behind an SLO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sli {
    pub alias: String,
}

/// An SLO as listed by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slo {
    pub id: String,
    pub name: String,
    pub sli: Sli,
    #[serde(default)]
    pub time_period_days: Option<u32>,
    #[serde(default)]
    pub target_per_million: Option<u64>,
}

/// Team/environment names for the current credential.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthInfo {
    pub team: Named,
    pub environment: Named,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Named {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedQuery {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedAnnotation {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedQueryResult {
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Links {
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub board_url: Option<String>,
}

/// A created board; `links.board_url` is what the user wants to see.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedBoard {
    #[serde(default)]
    pub links: Links,
}

/// One result row of an analytical query. The `data` map carries the
/// breakdown columns plus the calculation outputs (e.g. `COUNT`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub data: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryResultData {
    #[serde(default)]
    pub results: Vec<ResultRow>,
}

/// Envelope returned while polling a query result.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResultEnvelope {
    pub id: String,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub data: Option<QueryResultData>,
    #[serde(default)]
    pub links: Option<Links>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Extract the `page[next]` cursor from a `links.next` URL, which may be
/// absolute or server-relative.
pub(crate) fn page_cursor(next_link: &str) -> Option<String> {
    let parsed = Url::parse(next_link).or_else(|_| {
        Url::parse("https://cursor.invalid/").and_then(|base| base.join(next_link))
    });
    let url = parsed.ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "page[next]")
        .map(|(_, value)| value.into_owned())
}

/// Append a pagination cursor to an endpoint that may already carry a query
/// string.
fn with_cursor(endpoint: &str, cursor: &str) -> String {
    if endpoint.contains('?') {
        format!("{endpoint}&page[next]={cursor}")
    } else {
        format!("{endpoint}?page[next]={cursor}")
    }
}

impl ApiClient {
    /// GET an endpoint, mapping 404 to `false` and any other non-2xx to a
    /// propagated error.
    pub async fn exists(&self, endpoint: &str) -> Result<bool> {
        match self.send(Method::GET, endpoint, None).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// List a collection, following `links.next` pagination until exhausted.
    ///
    /// Handles both response shapes: a bare JSON array (single page) and an
    /// envelope with a `data` array plus `links`.
    pub async fn list_all<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page_endpoint = match &cursor {
                Some(c) => with_cursor(endpoint, c),
                None => endpoint.to_string(),
            };
            let response = self.send(Method::GET, &page_endpoint, None).await?;
            let value: serde_json::Value = serde_json::from_str(&response.body)?;

            match value {
                serde_json::Value::Array(page) => {
                    for entry in page {
                        items.push(serde_json::from_value(entry)?);
                    }
                    return Ok(items);
                }
                serde_json::Value::Object(mut envelope) => {
                    if let Some(serde_json::Value::Array(page)) = envelope.remove("data") {
                        for entry in page {
                            items.push(serde_json::from_value(entry)?);
                        }
                    }
                    cursor = envelope
                        .get("links")
                        .and_then(|l| l.get("next"))
                        .and_then(|n| n.as_str())
                        .and_then(page_cursor);
                    if cursor.is_none() {
                        return Ok(items);
                    }
                }
                other => {
                    return Err(HnyError::UnexpectedResponse(format!(
                        "expected array or envelope from {endpoint}, got {other}"
                    )));
                }
            }
        }
    }

    /// Team and environment for the current credential.
    pub async fn auth_info(&self) -> Result<AuthInfo> {
        self.get_json("auth").await
    }

    pub async fn list_datasets(&self) -> Result<Vec<Dataset>> {
        self.list_all("datasets").await
    }

    pub async fn dataset_exists(&self, slug: &str) -> Result<bool> {
        tracing::info!(dataset = slug, "Checking if dataset exists");
        self.exists(&format!("datasets/{slug}")).await
    }

    pub async fn create_dataset(&self, name: &str) -> Result<Dataset> {
        tracing::info!(dataset = name, "Creating dataset");
        self.post_json("datasets", &serde_json::json!({ "name": name }))
            .await
    }

    /// Clear the delete-protection setting so the dataset can be deleted.
    pub async fn disable_delete_protection(&self, slug: &str) -> Result<()> {
        tracing::info!(dataset = slug, "Removing delete protection");
        self.send(
            Method::PUT,
            &format!("datasets/{slug}"),
            Some(&serde_json::json!({ "settings": { "delete_protected": false } })),
        )
        .await?;
        Ok(())
    }

    pub async fn delete_dataset(&self, slug: &str) -> Result<()> {
        tracing::info!(dataset = slug, "Deleting dataset");
        self.send(Method::DELETE, &format!("datasets/{slug}"), None)
            .await?;
        Ok(())
    }

    pub async fn list_columns(&self, dataset: &str) -> Result<Vec<Column>> {
        self.list_all(&format!("columns/{dataset}")).await
    }

    pub async fn column_exists(&self, dataset: &str, column: &str) -> Result<bool> {
        tracing::info!(dataset, column, "Checking if column exists");
        self.exists(&format!("columns/{dataset}/{column}")).await
    }

    pub async fn create_column(
        &self,
        dataset: &str,
        key_name: &str,
        column_type: &str,
    ) -> Result<Column> {
        tracing::info!(dataset, column = key_name, "Creating column");
        self.post_json(
            &format!("columns/{dataset}"),
            &serde_json::json!({ "key_name": key_name, "type": column_type }),
        )
        .await
    }

    pub async fn delete_column(&self, dataset: &str, column_id: &str) -> Result<()> {
        tracing::info!(dataset, column_id, "Deleting column");
        self.send(Method::DELETE, &format!("columns/{dataset}/{column_id}"), None)
            .await?;
        Ok(())
    }

    pub async fn create_query(&self, dataset: &str, spec: &QuerySpec) -> Result<CreatedQuery> {
        tracing::info!(dataset, "Creating query");
        self.post_json(&format!("queries/{dataset}"), &serde_json::to_value(spec)?)
            .await
    }

    pub async fn create_annotation(
        &self,
        dataset: &str,
        query_id: &str,
        name: &str,
        description: &str,
    ) -> Result<CreatedAnnotation> {
        tracing::info!(dataset, query_id, "Creating annotation");
        self.post_json(
            &format!("annotations/{dataset}"),
            &serde_json::json!({
                "query_id": query_id,
                "name": name,
                "description": description,
            }),
        )
        .await
    }

    pub async fn create_board<B: Serialize>(&self, board: &B) -> Result<CreatedBoard> {
        self.post_json("boards", &serde_json::to_value(board)?).await
    }

    pub async fn list_slos(&self, dataset: &str) -> Result<Vec<Slo>> {
        tracing::info!(dataset, "Fetching SLOs");
        self.list_all(&format!("slos/{dataset}")).await
    }

    /// Burn alert payloads are passed through verbatim for the report.
    pub async fn list_burn_alerts(
        &self,
        dataset: &str,
        slo_id: &str,
    ) -> Result<Vec<serde_json::Value>> {
        tracing::info!(dataset, slo_id, "Fetching burn alerts");
        self.list_all(&format!("burn_alerts/{dataset}?slo_id={slo_id}"))
            .await
    }

    pub async fn create_query_result(
        &self,
        dataset: &str,
        query_id: &str,
    ) -> Result<CreatedQueryResult> {
        tracing::info!(dataset, query_id, "Creating query result");
        self.post_json(
            &format!("query_results/{dataset}"),
            &serde_json::json!({
                "query_id": query_id,
                "disable_series": true,
                "limit": 10000,
            }),
        )
        .await
    }

    pub async fn get_query_result(
        &self,
        dataset: &str,
        result_id: &str,
    ) -> Result<QueryResultEnvelope> {
        self.get_json(&format!("query_results/{dataset}/{result_id}"))
            .await
    }

    /// Full lifecycle for an analytical query: create the query, create its
    /// result request, then poll until complete and return the rows.
    ///
    /// A server-reported `error` in the envelope surfaces as
    /// [`HnyError::QueryFailed`]; the budget is enforced by
    /// [`await_ready`](crate::poll::await_ready).
    pub async fn run_query(
        &self,
        dataset: &str,
        spec: &QuerySpec,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> Result<Vec<ResultRow>> {
        let query = self.create_query(dataset, spec).await?;
        let result = self.create_query_result(dataset, &query.id).await?;

        let client = self.clone();
        let dataset = dataset.to_string();
        let result_id = result.id;
        await_ready(
            "query result",
            move || {
                let client = client.clone();
                let dataset = dataset.clone();
                let result_id = result_id.clone();
                async move {
                    let envelope = client.get_query_result(&dataset, &result_id).await?;
                    if let Some(error) = envelope.error {
                        return Ok(PollState::Failed(error));
                    }
                    if envelope.complete {
                        let rows = envelope.data.map(|d| d.results).unwrap_or_default();
                        return Ok(PollState::Ready(rows));
                    }
                    Ok(PollState::Pending)
                }
            },
            max_wait,
            poll_interval,
        )
        .await
    }
}
