//! Standard operations-board construction.
//!
//! A board is a set of annotated queries over a service's dataset. Every
//! service gets the base query set; the service type adds a capability set
//! (required columns + extra queries) resolved once through an explicit
//! table, not a dynamic lookup.

use serde::Serialize;

use crate::client::ApiClient;
use crate::error::Result;
use crate::query::{Calculation, Filter, QuerySpec};

/// Window for all standard board queries: one day.
const BOARD_TIME_RANGE_SECS: u64 = 86400;

/// Columns every service dataset needs for the base queries.
const SERVICE_REQUIRED_COLUMNS: &[(&str, &str)] = &[
    ("duration_ms", "float"),
    ("error", "boolean"),
    ("http.response.status_code", "integer"),
    ("status_code", "integer"),
    ("http.route", "string"),
];

const JAVA_REQUIRED_COLUMNS: &[(&str, &str)] = &[
    ("jvm.memory.used", "integer"),
    ("jvm.memory.limit", "integer"),
    ("jvm.memory.committed", "integer"),
    ("jvm.memory.used_after_last_gc", "integer"),
    ("jvm.memory.type", "string"),
    ("jvm.memory.pool.name", "string"),
    ("jvm.gc.duration.avg", "float"),
    ("jvm.gc.duration.max", "float"),
    ("jvm.gc.action", "string"),
    ("jvm.cpu.recent_utilization", "float"),
    ("host.name", "string"),
];

/// The service-type tag selecting extra board content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ServiceType {
    Java,
    Ruby,
    Python,
    Node,
    Go,
    Php,
    Other,
}

/// What a service type contributes beyond the base board.
pub struct Capabilities {
    pub required_columns: &'static [(&'static str, &'static str)],
    pub extra_queries: Vec<BoardQuery>,
}

impl ServiceType {
    /// Resolve the capability set for this type. Types with no curated
    /// queries yet resolve to an empty set.
    pub fn capabilities(self) -> Capabilities {
        match self {
            ServiceType::Java => Capabilities {
                required_columns: JAVA_REQUIRED_COLUMNS,
                extra_queries: java_queries(),
            },
            ServiceType::Ruby | ServiceType::Python | ServiceType::Node | ServiceType::Go
            | ServiceType::Php | ServiceType::Other => {
                if self != ServiceType::Other {
                    tracing::warn!(service_type = ?self, "No extra queries defined for this service type yet");
                }
                Capabilities {
                    required_columns: &[],
                    extra_queries: Vec::new(),
                }
            }
        }
    }
}

/// A named, annotated query destined for a board.
pub struct BoardQuery {
    pub name: &'static str,
    pub description: &'static str,
    pub spec: QuerySpec,
}

/// The base query set every service board carries.
pub fn base_queries() -> Vec<BoardQuery> {
    vec![
        BoardQuery {
            name: "Latency",
            description: "Heatmap of event duration in milliseconds",
            spec: QuerySpec::builder()
                .time_range(BOARD_TIME_RANGE_SECS)
                .calculations(vec![Calculation::over("HEATMAP", "duration_ms")])
                .build(),
        },
        BoardQuery {
            name: "Error counts by status code",
            description: "Counts of events where error = true, grouped by status code",
            spec: QuerySpec::builder()
                .time_range(BOARD_TIME_RANGE_SECS)
                .filters(vec![Filter::exists("error")])
                .breakdowns(["http.response.status_code", "status_code"])
                .build(),
        },
        BoardQuery {
            name: "Route Breakdown",
            description: "Counts of events grouped by http.route",
            spec: QuerySpec::builder()
                .time_range(BOARD_TIME_RANGE_SECS)
                .breakdowns(["http.route"])
                .build(),
        },
    ]
}

fn jvm_memory_calculations() -> Vec<Calculation> {
    vec![
        Calculation::over("MAX", "jvm.memory.used"),
        Calculation::over("MAX", "jvm.memory.committed"),
        Calculation::over("MAX", "jvm.memory.limit"),
        Calculation::over("MAX", "jvm.memory.used_after_last_gc"),
    ]
}

fn java_queries() -> Vec<BoardQuery> {
    vec![
        BoardQuery {
            name: "JVM Memory (Young Generation)",
            description: "Eden space on the JVM heap is where newly created objects are stored. \
                When it fills, a minor GC occurs, moving all \"live\" objects to the Survivor \
                space. In addition to current memory usage, committed represents the guaranteed \
                available memory, and limit represents maximum usable.",
            spec: QuerySpec::builder()
                .time_range(BOARD_TIME_RANGE_SECS)
                .breakdowns(["jvm.memory.pool.name", "host.name"])
                .filters(vec![
                    Filter::eq("jvm.memory.type", "heap"),
                    Filter::is_in(
                        "jvm.memory.pool.name",
                        vec!["Eden Space".into(), "Survivor Space".into()],
                    ),
                    Filter::exists("jvm.memory.used"),
                ])
                .calculations(jvm_memory_calculations())
                .build(),
        },
        BoardQuery {
            name: "JVM Memory (Old Generation)",
            description: "Tenured Gen JVM heap space stores long-lived objects. When a Full or \
                Major GC is performed, it is expensive and may pause app execution. Committed \
                represents guaranteed available memory, and limit represents maximum usable memory.",
            spec: QuerySpec::builder()
                .time_range(BOARD_TIME_RANGE_SECS)
                .breakdowns(["jvm.memory.pool.name", "host.name"])
                .filters(vec![
                    Filter::eq("jvm.memory.type", "heap"),
                    Filter::eq("jvm.memory.pool.name", "Tenured Gen"),
                    Filter::exists("jvm.memory.used"),
                ])
                .calculations(jvm_memory_calculations())
                .build(),
        },
        BoardQuery {
            name: "JVM Non-Heap Memory Usage",
            description: "JVM non-heap memory is allocated above and beyond the heap size you've \
                configured. It is a section of memory in the JVM that stores class information \
                (Metaspace), compiled code cache, thread stack, etc. It cannot be garbage collected.",
            spec: QuerySpec::builder()
                .time_range(BOARD_TIME_RANGE_SECS)
                .breakdowns(["jvm.memory.pool.name", "host.name"])
                .filters(vec![
                    Filter::eq("jvm.memory.type", "non_heap"),
                    Filter::exists("jvm.memory.used"),
                ])
                .calculations(vec![
                    Calculation::over("MAX", "jvm.memory.used"),
                    Calculation::over("MAX", "jvm.memory.committed"),
                    Calculation::over("MAX", "jvm.memory.limit"),
                ])
                .build(),
        },
        BoardQuery {
            name: "JVM GC (Garbage Collection) Activity",
            description: "JVM GC actions occur periodically to reclaim memory but consume CPU \
                cycles to do so. In the worst cases, a GC can cause the entire JVM to pause, \
                making the application appear unresponsive.",
            spec: QuerySpec::builder()
                .time_range(BOARD_TIME_RANGE_SECS)
                .breakdowns(["jvm.gc.action", "host.name"])
                .filters(vec![Filter::exists("jvm.gc.action")])
                .calculations(vec![
                    Calculation::over("AVG", "jvm.gc.duration.avg"),
                    Calculation::over("MAX", "jvm.gc.duration.max"),
                ])
                .build(),
        },
        BoardQuery {
            name: "JVM CPU Utilization",
            description: "Shows system CPU utilization, as captured by the JVM",
            spec: QuerySpec::builder()
                .time_range(BOARD_TIME_RANGE_SECS)
                .breakdowns(["host.name"])
                .filters(vec![Filter::exists("jvm.cpu.recent_utilization")])
                .calculations(vec![Calculation::over("MAX", "jvm.cpu.recent_utilization")])
                .build(),
        },
    ]
}

/// A created query + annotation pair referenced by the board body.
#[derive(Debug, Clone, Serialize)]
pub struct BoardQueryRef {
    pub query_id: String,
    pub annotation_id: String,
}

#[derive(Serialize)]
struct BoardSpecQuery<'a> {
    dataset: &'a str,
    query_id: &'a str,
    query_annotation_id: &'a str,
    graph_settings: serde_json::Value,
}

#[derive(Serialize)]
struct BoardSpec<'a> {
    name: String,
    dataset: &'a str,
    queries: Vec<BoardSpecQuery<'a>>,
    column_layout: &'static str,
}

/// Builds one service's standard board.
pub struct BoardBuilder {
    client: ApiClient,
    dry_run: bool,
}

impl BoardBuilder {
    pub fn new(client: ApiClient, dry_run: bool) -> Self {
        Self { client, dry_run }
    }

    /// Create the dataset if it does not exist.
    async fn ensure_dataset(&self, name: &str) -> Result<()> {
        if self.client.dataset_exists(name).await? {
            return Ok(());
        }
        if self.dry_run {
            tracing::info!(dataset = name, "dry-run: would create dataset");
            return Ok(());
        }
        self.client.create_dataset(name).await?;
        Ok(())
    }

    /// Create any of `columns` missing from the dataset.
    async fn ensure_columns(&self, dataset: &str, columns: &[(&str, &str)]) -> Result<()> {
        for (name, column_type) in columns {
            if self.client.column_exists(dataset, name).await? {
                continue;
            }
            if self.dry_run {
                tracing::info!(dataset, column = name, "dry-run: would create column");
                continue;
            }
            self.client.create_column(dataset, name, column_type).await?;
        }
        Ok(())
    }

    /// Create the query and its annotation, returning the pair of IDs the
    /// board body references.
    async fn craft_board_query(&self, dataset: &str, query: &BoardQuery) -> Result<BoardQueryRef> {
        tracing::info!(name = query.name, "Crafting board query");
        let created = self.client.create_query(dataset, &query.spec).await?;
        let annotation = self
            .client
            .create_annotation(dataset, &created.id, query.name, query.description)
            .await?;
        Ok(BoardQueryRef {
            query_id: created.id,
            annotation_id: annotation.id,
        })
    }

    /// Build the full board for a service and return its URL, or `None` in
    /// dry-run mode where nothing is created.
    pub async fn build_service_board(
        &self,
        service_name: &str,
        service_type: ServiceType,
    ) -> Result<Option<String>> {
        tracing::info!(service = service_name, ?service_type, "Building board");
        let capabilities = service_type.capabilities();

        self.ensure_dataset(service_name).await?;
        self.ensure_columns(service_name, SERVICE_REQUIRED_COLUMNS).await?;
        self.ensure_columns(service_name, capabilities.required_columns).await?;

        let mut queries = base_queries();
        queries.extend(capabilities.extra_queries);

        if self.dry_run {
            for query in &queries {
                tracing::info!(name = query.name, "dry-run: would create board query");
            }
            return Ok(None);
        }

        let mut refs = Vec::with_capacity(queries.len());
        for query in &queries {
            refs.push(self.craft_board_query(service_name, query).await?);
        }

        let board = BoardSpec {
            name: format!("{service_name} Operations Overview"),
            dataset: service_name,
            queries: refs
                .iter()
                .map(|r| BoardSpecQuery {
                    dataset: service_name,
                    query_id: &r.query_id,
                    query_annotation_id: &r.annotation_id,
                    graph_settings: serde_json::json!({
                        "hide_markers": false,
                        "log_scale": false,
                        "omit_missing_values": false,
                        "stacked_graphs": false,
                        "utc_xaxis": false,
                        "overlaid_charts": false,
                    }),
                })
                .collect(),
            column_layout: "multi",
        };

        let created = self.client.create_board(&board).await?;
        Ok(created.links.board_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::test_client;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn capability_table_resolves_per_type() {
        let java = ServiceType::Java.capabilities();
        assert_eq!(java.required_columns.len(), 11);
        assert_eq!(java.extra_queries.len(), 5);

        let ruby = ServiceType::Ruby.capabilities();
        assert!(ruby.required_columns.is_empty());
        assert!(ruby.extra_queries.is_empty());
    }

    #[test]
    fn base_queries_use_the_one_day_window() {
        let queries = base_queries();
        assert_eq!(queries.len(), 3);
        assert!(queries.iter().all(|q| q.spec.time_range == 86400));
        assert_eq!(
            queries[0].spec.calculations,
            vec![Calculation::over("HEATMAP", "duration_ms")]
        );
    }

    #[tokio::test]
    async fn builds_a_board_for_a_fresh_service() {
        let server = MockServer::start().await;
        // Dataset and columns do not exist yet.
        Mock::given(method("GET"))
            .and(path("/1/datasets/shop"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/1/datasets"))
            .and(body_partial_json(json!({"name": "shop"})))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"name": "shop", "slug": "shop"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        for (column, _) in SERVICE_REQUIRED_COLUMNS {
            Mock::given(method("GET"))
                .and(path(format!("/1/columns/shop/{column}")))
                .respond_with(ResponseTemplate::new(404))
                .mount(&server)
                .await;
        }
        Mock::given(method("POST"))
            .and(path("/1/columns/shop"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "c1", "key_name": "whatever",
            })))
            .expect(5)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/1/queries/shop"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "q1"})))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/1/annotations/shop"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "a1"})))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/1/boards"))
            .and(body_partial_json(json!({
                "name": "shop Operations Overview",
                "column_layout": "multi",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "links": {"board_url": "https://ui.honeycomb.io/boards/b1"},
            })))
            .expect(1)
            .mount(&server)
            .await;

        let builder = BoardBuilder::new(test_client(&server.uri(), "k"), false);
        let url = builder
            .build_service_board("shop", ServiceType::Other)
            .await
            .unwrap();
        assert_eq!(url.as_deref(), Some("https://ui.honeycomb.io/boards/b1"));
    }

    #[tokio::test]
    async fn dry_run_performs_reads_but_no_mutations() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1/datasets/shop"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        for (column, _) in SERVICE_REQUIRED_COLUMNS {
            Mock::given(method("GET"))
                .and(path(format!("/1/columns/shop/{column}")))
                .respond_with(ResponseTemplate::new(404))
                .mount(&server)
                .await;
        }
        // No POST mocks mounted: any mutating call would 404 the mock server
        // and fail the build.

        let builder = BoardBuilder::new(test_client(&server.uri(), "k"), true);
        let url = builder
            .build_service_board("shop", ServiceType::Other)
            .await
            .unwrap();
        assert_eq!(url, None);
    }
}
