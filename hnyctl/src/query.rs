//! Query specification builder.
//!
//! Pure construction of the wire shape for the query-data API. Defaults match
//! the platform's documented ones: a two hour window, a single COUNT
//! calculation, AND filter combination, and a 1000 row limit.

use serde::{Deserialize, Serialize};

/// How multiple filters are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterCombination {
    #[default]
    And,
    Or,
}

/// A single calculation, e.g. `COUNT` or `MAX(duration_ms)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calculation {
    pub op: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

impl Calculation {
    /// The default COUNT calculation.
    pub fn count() -> Self {
        Self {
            op: "COUNT".to_string(),
            column: None,
        }
    }

    /// A calculation over a column, e.g. `MAX`, `AVG`, `HEATMAP`.
    pub fn over(op: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            column: Some(column.into()),
        }
    }
}

/// A single filter clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl Filter {
    /// `column exists` — no value operand.
    pub fn exists(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op: "exists".to_string(),
            value: None,
        }
    }

    /// `column = value`.
    pub fn eq(column: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            column: column.into(),
            op: "=".to_string(),
            value: Some(value.into()),
        }
    }

    /// `column in [values...]`.
    pub fn is_in(column: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        Self {
            column: column.into(),
            op: "in".to_string(),
            value: Some(serde_json::Value::Array(values)),
        }
    }
}

/// A fully-shaped query body, ready to POST.
///
/// Invariant: `calculations` is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub time_range: u64,
    pub filter_combination: FilterCombination,
    pub limit: u32,
    pub calculations: Vec<Calculation>,
    pub breakdowns: Vec<String>,
    pub filters: Vec<Filter>,
    pub havings: Vec<serde_json::Value>,
}

impl Default for QuerySpec {
    fn default() -> Self {
        QueryBuilder::new().build()
    }
}

impl QuerySpec {
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }
}

/// Builder applying the documented defaults for omitted fields. Pure: no I/O,
/// and caller-supplied collections are moved in, never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    time_range: Option<u64>,
    breakdowns: Vec<String>,
    calculations: Vec<Calculation>,
    filters: Vec<Filter>,
    filter_combination: Option<FilterCombination>,
    limit: Option<u32>,
    havings: Vec<serde_json::Value>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query window in seconds (default 7200).
    pub fn time_range(mut self, seconds: u64) -> Self {
        self.time_range = Some(seconds);
        self
    }

    pub fn breakdowns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.breakdowns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn calculations(mut self, calculations: Vec<Calculation>) -> Self {
        self.calculations = calculations;
        self
    }

    pub fn filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    pub fn filter_combination(mut self, combination: FilterCombination) -> Self {
        self.filter_combination = Some(combination);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn havings(mut self, havings: Vec<serde_json::Value>) -> Self {
        self.havings = havings;
        self
    }

    /// Assemble the spec. An empty calculation list is replaced by the COUNT
    /// default to uphold the non-empty invariant.
    pub fn build(self) -> QuerySpec {
        let calculations = if self.calculations.is_empty() {
            vec![Calculation::count()]
        } else {
            self.calculations
        };
        QuerySpec {
            time_range: self.time_range.unwrap_or(7200),
            filter_combination: self.filter_combination.unwrap_or_default(),
            limit: self.limit.unwrap_or(1000),
            calculations,
            breakdowns: self.breakdowns,
            filters: self.filters,
            havings: self.havings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_the_documented_shape() {
        let spec = QuerySpec::default();
        let wire = serde_json::to_value(&spec).unwrap();
        assert_eq!(
            wire,
            json!({
                "time_range": 7200,
                "filter_combination": "AND",
                "limit": 1000,
                "calculations": [{"op": "COUNT"}],
                "breakdowns": [],
                "filters": [],
                "havings": [],
            })
        );
    }

    #[test]
    fn builder_substitutes_only_omitted_fields() {
        let spec = QuerySpec::builder()
            .time_range(86400)
            .breakdowns(["http.route"])
            .filter_combination(FilterCombination::Or)
            .filters(vec![Filter::exists("error")])
            .build();
        assert_eq!(spec.time_range, 86400);
        assert_eq!(spec.limit, 1000);
        assert_eq!(spec.filter_combination, FilterCombination::Or);
        assert_eq!(spec.breakdowns, vec!["http.route".to_string()]);
        assert_eq!(spec.calculations, vec![Calculation::count()]);
    }

    #[test]
    fn empty_calculations_fall_back_to_count() {
        let spec = QuerySpec::builder().calculations(vec![]).build();
        assert_eq!(spec.calculations, vec![Calculation::count()]);
    }

    #[test]
    fn filter_serialization_omits_missing_value() {
        let wire = serde_json::to_value(Filter::exists("error")).unwrap();
        assert_eq!(wire, json!({"column": "error", "op": "exists"}));

        let wire = serde_json::to_value(Filter::eq("jvm.memory.type", "heap")).unwrap();
        assert_eq!(
            wire,
            json!({"column": "jvm.memory.type", "op": "=", "value": "heap"})
        );
    }
}
