//! Request model for the dynamic query path.
//!
//! Every type here is deserialized fresh from untrusted JSON for a single
//! request. Nothing in this module validates; the query crate owns that.
//! Optional collections accept `null` as well as a missing field, since
//! browser clients send both.

use serde::{Deserialize, Deserializer, Serialize};

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A full dynamic query request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_table: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub columns: Vec<ColumnRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub expression_columns: Vec<ExpressionColumn>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub joins: Vec<JoinSpec>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub filters: Filters,
    #[serde(default, deserialize_with = "null_as_default")]
    pub group_by: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub order_by: Vec<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    /// Columns to facet under the same filters, answered alongside the data.
    #[serde(default, deserialize_with = "null_as_default")]
    pub facet_columns: Vec<String>,
}

/// A selected column, optionally aggregated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRef {
    /// Column name, optionally qualified (`c.category`).
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_function: Option<String>,
}

impl ColumnRef {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ..Self::default()
        }
    }
}

/// A computed column from a raw SQL fragment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpressionColumn {
    #[serde(default)]
    pub expression: String,
    #[serde(default)]
    pub alias: String,
}

/// A filter value as sent by the client.
///
/// `Null` only appears inside lists; a top-level `null` reads as an absent
/// value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<FilterValue>),
}

impl FilterValue {
    /// Whether this value counts as "not filled in".
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.is_empty(),
            Self::List(items) => items.iter().all(|v| *v == Self::Null),
            _ => false,
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<i64> for FilterValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for FilterValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

/// A leaf predicate. Form rows may arrive with any field missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    #[serde(default, deserialize_with = "null_as_default")]
    pub column: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub operator: String,
    #[serde(default)]
    pub value: Option<FilterValue>,
}

impl FilterCondition {
    pub fn new(
        column: impl Into<String>,
        operator: impl Into<String>,
        value: Option<FilterValue>,
    ) -> Self {
        Self {
            column: column.into(),
            operator: operator.into(),
            value,
        }
    }
}

/// A boolean combination of conditions and nested groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterGroup {
    /// `AND` or `OR`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub operator: String,
    pub conditions: Vec<FilterNode>,
}

/// One node in a filter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterNode {
    Group(FilterGroup),
    Condition(FilterCondition),
}

/// Top-level filters: either a flat list (implicitly AND-ed) or a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filters {
    Group(FilterGroup),
    List(Vec<FilterNode>),
}

impl Default for Filters {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

/// Join equality condition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinOn {
    pub left: String,
    pub right: String,
}

/// A join against another allow-listed source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    /// `LEFT` or `INNER`.
    #[serde(rename = "type", default = "default_join_type")]
    pub join_type: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub on: JoinOn,
}

fn default_join_type() -> String {
    "LEFT".to_string()
}

/// One ORDER BY entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default = "default_direction")]
    pub direction: String,
}

fn default_direction() -> String {
    "ASC".to_string()
}

/// A facet request: distinct value counts per column under a filter set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacetQueryConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_table: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub columns: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub joins: Vec<JoinSpec>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub filters: Filters,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_config_accepts_minimal_body() {
        let cfg: QueryConfig = serde_json::from_value(json!({
            "sourceTable": "Referenda",
            "columns": [{"column": "id"}]
        }))
        .unwrap();
        assert_eq!(cfg.source_table, "Referenda");
        assert_eq!(cfg.columns, vec![ColumnRef::new("id")]);
        assert_eq!(cfg.filters, Filters::List(vec![]));
        assert!(cfg.limit.is_none());
    }

    #[test]
    fn nulls_read_as_empty_collections() {
        let cfg: QueryConfig = serde_json::from_value(json!({
            "sourceTable": null,
            "columns": null,
            "expressionColumns": null,
            "filters": null,
            "groupBy": null
        }))
        .unwrap();
        assert!(cfg.source_table.is_empty());
        assert!(cfg.columns.is_empty());
        assert!(cfg.expression_columns.is_empty());
        assert!(cfg.group_by.is_empty());
    }

    #[test]
    fn filter_tree_distinguishes_groups_from_conditions() {
        let filters: Filters = serde_json::from_value(json!({
            "operator": "OR",
            "conditions": [
                {"column": "status", "operator": "=", "value": "Executed"},
                {"operator": "AND", "conditions": [
                    {"column": "DOT_latest", "operator": ">", "value": 100},
                    {"column": "track", "operator": "IN", "value": ["Root", "Treasurer"]}
                ]}
            ]
        }))
        .unwrap();
        let Filters::Group(group) = filters else {
            panic!("expected a group");
        };
        assert_eq!(group.operator, "OR");
        assert!(matches!(group.conditions[0], FilterNode::Condition(_)));
        let FilterNode::Group(inner) = &group.conditions[1] else {
            panic!("expected nested group");
        };
        let FilterNode::Condition(c) = &inner.conditions[0] else {
            panic!("expected condition");
        };
        assert_eq!(c.value, Some(FilterValue::Integer(100)));
    }

    #[test]
    fn filter_values_keep_their_json_shape() {
        let c: FilterCondition =
            serde_json::from_value(json!({"column": "x", "operator": "=", "value": 1.5}))
                .unwrap();
        assert_eq!(c.value, Some(FilterValue::Float(1.5)));

        let c: FilterCondition =
            serde_json::from_value(json!({"column": "x", "operator": "IS NULL", "value": null}))
                .unwrap();
        assert!(c.value.is_none());

        let c: FilterCondition =
            serde_json::from_value(json!({"column": "x", "operator": "IS NULL"})).unwrap();
        assert!(c.value.is_none());
    }

    #[test]
    fn half_filled_rows_still_parse() {
        let filters: Filters = serde_json::from_value(json!([
            {"operator": "=", "value": ""},
            {"column": "track", "operator": "IN", "value": ["Root", null]},
            {"column": null, "operator": null, "value": null},
            {}
        ]))
        .unwrap();
        let Filters::List(nodes) = filters else {
            panic!("expected a list");
        };
        assert_eq!(nodes.len(), 4);

        let FilterNode::Condition(missing_column) = &nodes[0] else {
            panic!("expected condition");
        };
        assert!(missing_column.column.is_empty());
        assert_eq!(missing_column.operator, "=");

        let FilterNode::Condition(with_null) = &nodes[1] else {
            panic!("expected condition");
        };
        assert_eq!(
            with_null.value,
            Some(FilterValue::List(vec!["Root".into(), FilterValue::Null]))
        );
    }

    #[test]
    fn groups_still_win_over_conditions() {
        let node: FilterNode = serde_json::from_value(json!({
            "operator": "OR",
            "conditions": [{"column": "status", "operator": "=", "value": "x"}]
        }))
        .unwrap();
        assert!(matches!(node, FilterNode::Group(_)));
    }

    #[test]
    fn blank_values() {
        assert!(FilterValue::Text(String::new()).is_blank());
        assert!(FilterValue::List(vec![]).is_blank());
        assert!(FilterValue::List(vec![FilterValue::Null, FilterValue::Null]).is_blank());
        assert!(!FilterValue::List(vec![FilterValue::Null, "x".into()]).is_blank());
        assert!(!FilterValue::Integer(0).is_blank());
        assert!(!FilterValue::Text("0".into()).is_blank());
    }

    #[test]
    fn join_spec_reads_type_field() {
        let join: JoinSpec = serde_json::from_value(json!({
            "type": "INNER",
            "table": "Categories",
            "alias": "c",
            "on": {"left": "category_id", "right": "c.id"}
        }))
        .unwrap();
        assert_eq!(join.join_type, "INNER");
        assert_eq!(join.alias.as_deref(), Some("c"));

        let join: JoinSpec = serde_json::from_value(json!({
            "table": "Categories",
            "on": {"left": "category_id", "right": "id"}
        }))
        .unwrap();
        assert_eq!(join.join_type, "LEFT");
    }
}
