//! SLO/SLI health reporting.
//!
//! Collects every SLO across every dataset (burn alerts fetched through a
//! bounded fan-out), runs the SLI scan through the adaptive batch executor,
//! and reduces the raw rows into per-SLO statistics.

use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::batch::{run_adaptive, DEFAULT_MAX_ATTEMPTS};
use crate::client::resources::{ResultRow, Sli, Slo};
use crate::client::ApiClient;
use crate::error::Result;
use crate::query::{Filter, FilterCombination, QuerySpec};

/// Parallelism for burn-alert fetches within one dataset.
const BURN_ALERT_FANOUT: usize = 10;

/// SLI scan window in seconds.
const SLI_TIME_RANGE_SECS: u64 = 86400;

/// Event counts by SLI truth value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliValues {
    #[serde(rename = "true")]
    pub true_count: u64,
    #[serde(rename = "false")]
    pub false_count: u64,
}

/// One SLO's report row. Created empty and populated exactly once per report
/// run by [`aggregate`]; re-invoking on the same rows double-counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloEntity {
    pub id: String,
    pub name: String,
    pub dataset: String,
    pub sli: Sli,
    pub burn_alerts: Vec<serde_json::Value>,
    pub sli_values: SliValues,
    pub sli_service_names: Vec<String>,
    pub sli_event_count: u64,
    pub sli_service_count: usize,
}

impl SloEntity {
    pub fn new(slo: Slo, dataset: String, burn_alerts: Vec<serde_json::Value>) -> Self {
        Self {
            id: slo.id,
            name: slo.name,
            dataset,
            sli: slo.sli,
            burn_alerts,
            sli_values: SliValues::default(),
            sli_service_names: Vec::new(),
            sli_event_count: 0,
            sli_service_count: 0,
        }
    }
}

/// Reduce raw SLI scan rows into per-entity statistics.
///
/// A row contributes when it carries the entity's SLI column as a boolean and
/// a COUNT field; its `service.name` is appended once, preserving first
/// appearance order. Rows lacking either field contribute nothing.
pub fn aggregate(entities: &mut [SloEntity], rows: &[ResultRow]) {
    for entity in entities.iter_mut() {
        let alias = entity.sli.alias.clone();

        for row in rows {
            let Some(sli_value) = row.data.get(&alias).and_then(|v| v.as_bool()) else {
                continue;
            };
            let Some(count) = row.data.get("COUNT").and_then(|v| v.as_u64()) else {
                continue;
            };

            if sli_value {
                entity.sli_values.true_count += count;
            } else {
                entity.sli_values.false_count += count;
            }
            tracing::debug!(sli = %alias, sli_value, count, "SLI row counted");

            if let Some(service) = row.data.get("service.name").and_then(|v| v.as_str()) {
                if !entity.sli_service_names.iter().any(|s| s == service) {
                    entity.sli_service_names.push(service.to_string());
                }
            }
        }

        entity.sli_event_count = entity.sli_values.true_count + entity.sli_values.false_count;
        entity.sli_service_count = entity.sli_service_names.len();
    }
}

/// Drives a full SLO report run against one client.
pub struct SloReporter {
    client: ApiClient,
    /// Budget for each SLI query to reach completion.
    pub max_wait: Duration,
    pub poll_interval: Duration,
}

impl SloReporter {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            max_wait: Duration::from_secs(90),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Fetch every SLO in every dataset, with burn alerts attached.
    ///
    /// Burn-alert fetches within a dataset run through a fan-out of degree
    /// ten and are reassembled in arrival order; an SLO whose burn-alert
    /// fetch fails is logged and skipped rather than aborting the report.
    pub async fn fetch_all_slos(&self) -> Result<Vec<SloEntity>> {
        let datasets = self.client.list_datasets().await?;

        let mut entities = Vec::new();
        for dataset in datasets {
            let slos = match self.client.list_slos(&dataset.slug).await {
                Ok(slos) => slos,
                Err(e) => {
                    tracing::error!(dataset = %dataset.slug, error = %e, "Skipping dataset: SLO listing failed");
                    continue;
                }
            };
            for slo in &slos {
                tracing::info!(dataset = %dataset.slug, slo = %slo.name, id = %slo.id, "Found SLO");
            }

            let mut fetches = futures::stream::iter(slos.into_iter().map(|slo| {
                let client = self.client.clone();
                let dataset = dataset.slug.clone();
                async move {
                    let alerts = client.list_burn_alerts(&dataset, &slo.id).await;
                    (slo, dataset, alerts)
                }
            }))
            .buffer_unordered(BURN_ALERT_FANOUT);

            while let Some((slo, dataset, alerts)) = fetches.next().await {
                match alerts {
                    Ok(burn_alerts) => entities.push(SloEntity::new(slo, dataset, burn_alerts)),
                    Err(e) => {
                        tracing::error!(slo_id = %slo.id, error = %e, "Skipping SLO: burn alert fetch failed");
                    }
                }
            }
        }

        Ok(entities)
    }

    /// Run the SLI scan for one dataset's batch of SLOs and aggregate the
    /// results into the entities.
    ///
    /// The scan goes through the adaptive batch executor: a query referencing
    /// an invalid SLI column fails as a whole, so halving isolates the bad
    /// alias while the healthy ones still get counted.
    pub async fn populate_sli_counts(&self, dataset: &str, slos: &mut [SloEntity]) -> Result<()> {
        let aliases: Vec<String> = slos.iter().map(|s| s.sli.alias.clone()).collect();

        let client = self.client.clone();
        let dataset_owned = dataset.to_string();
        let max_wait = self.max_wait;
        let poll_interval = self.poll_interval;
        let outcome = run_adaptive(
            &aliases,
            move |batch: Vec<String>| {
                let client = client.clone();
                let dataset = dataset_owned.clone();
                async move {
                    let filters: Vec<Filter> =
                        batch.iter().map(|alias| Filter::exists(alias.as_str())).collect();
                    let mut breakdowns = batch.clone();
                    breakdowns.push("service.name".to_string());
                    let spec = QuerySpec::builder()
                        .time_range(SLI_TIME_RANGE_SECS)
                        .filters(filters)
                        .filter_combination(FilterCombination::Or)
                        .breakdowns(breakdowns)
                        .build();
                    client.run_query(&dataset, &spec, max_wait, poll_interval).await
                }
            },
            DEFAULT_MAX_ATTEMPTS,
        )
        .await;

        if outcome.exhausted {
            tracing::error!(dataset, "SLI scan exhausted its retry budget, no counts recorded");
        }
        for alias in &outcome.failed {
            tracing::error!(dataset, sli = %alias, "SLI scan failed for this alias, counts stay zero");
        }

        aggregate(slos, &outcome.results);
        Ok(())
    }

    /// Full report: fetch SLOs, then populate SLI counts dataset by dataset
    /// in batches of `batch_size`.
    pub async fn run(&self, batch_size: usize) -> Result<Vec<SloEntity>> {
        let mut entities = self.fetch_all_slos().await?;

        // Group contiguously by dataset, preserving fetch order.
        let mut start = 0;
        while start < entities.len() {
            let dataset = entities[start].dataset.clone();
            let end = entities[start..]
                .iter()
                .position(|e| e.dataset != dataset)
                .map(|offset| start + offset)
                .unwrap_or(entities.len());

            tracing::info!(dataset = %dataset, slos = end - start, "Running SLI batches for dataset");
            for chunk in entities[start..end].chunks_mut(batch_size.max(1)) {
                self.populate_sli_counts(&dataset, chunk).await?;
            }
            start = end;
        }

        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(entries: serde_json::Value) -> ResultRow {
        ResultRow {
            data: entries.as_object().unwrap().clone(),
        }
    }

    fn entity(alias: &str) -> SloEntity {
        SloEntity::new(
            Slo {
                id: "slo1".to_string(),
                name: "Availability".to_string(),
                sli: Sli {
                    alias: alias.to_string(),
                },
                time_period_days: None,
                target_per_million: None,
            },
            "web".to_string(),
            vec![],
        )
    }

    #[test]
    fn aggregates_counts_and_dedups_services() {
        let mut entities = vec![entity("sli")];
        let rows = vec![
            row(json!({"COUNT": 5, "sli": true, "service.name": "a"})),
            row(json!({"COUNT": 3, "sli": false, "service.name": "a"})),
            row(json!({"COUNT": 2, "sli": true, "service.name": "b"})),
        ];

        aggregate(&mut entities, &rows);

        let e = &entities[0];
        assert_eq!(e.sli_values, SliValues { true_count: 7, false_count: 3 });
        assert_eq!(e.sli_service_names, vec!["a", "b"]);
        assert_eq!(e.sli_event_count, 10);
        assert_eq!(e.sli_service_count, 2);
    }

    #[test]
    fn rows_missing_the_alias_or_count_contribute_nothing() {
        let mut entities = vec![entity("sli")];
        let rows = vec![
            row(json!({"COUNT": 5, "other_sli": true, "service.name": "a"})),
            row(json!({"sli": true, "service.name": "b"})),
            row(json!({"COUNT": 4, "sli": "not-a-bool"})),
        ];

        aggregate(&mut entities, &rows);

        let e = &entities[0];
        assert_eq!(e.sli_event_count, 0);
        assert!(e.sli_service_names.is_empty());
    }

    #[test]
    fn each_entity_scans_all_rows_independently() {
        let mut entities = vec![entity("sli_a"), entity("sli_b")];
        let rows = vec![
            row(json!({"COUNT": 1, "sli_a": true, "service.name": "svc1"})),
            row(json!({"COUNT": 2, "sli_b": false, "service.name": "svc2"})),
        ];

        aggregate(&mut entities, &rows);

        assert_eq!(entities[0].sli_values.true_count, 1);
        assert_eq!(entities[0].sli_service_names, vec!["svc1"]);
        assert_eq!(entities[1].sli_values.false_count, 2);
        assert_eq!(entities[1].sli_service_names, vec!["svc2"]);
    }

    #[tokio::test]
    async fn fetch_all_slos_skips_failed_burn_alert_fetches() {
        use crate::client::test_support::test_client;
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1/datasets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "web", "slug": "web"},
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1/slos/web"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "s1", "name": "good", "sli": {"alias": "sli_good"}},
                {"id": "s2", "name": "bad", "sli": {"alias": "sli_bad"}},
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1/burn_alerts/web"))
            .and(query_param("slo_id", "s1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "ba1"}])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1/burn_alerts/web"))
            .and(query_param("slo_id", "s2"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let reporter = SloReporter::new(test_client(&server.uri(), "k"));
        let entities = reporter.fetch_all_slos().await.unwrap();

        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, "s1");
        assert_eq!(entities[0].dataset, "web");
        assert_eq!(entities[0].burn_alerts.len(), 1);
    }
}
