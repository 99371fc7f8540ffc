//! Result formatting: JSON, Table, and Markdown output.

use serde::{Deserialize, Serialize};
use tdash_store::Row;

/// Output format for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
    Markdown,
}

/// A complete query result set, shaped like the `/query/execute` body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub data: Vec<Row>,
    pub row_count: usize,
    /// Rows (or groups) matching without LIMIT/OFFSET; only computed when
    /// an offset was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}

/// Format query results in the specified output format.
#[must_use]
pub fn format_results(result: &QueryResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => format_json(result),
        OutputFormat::Table => format_table(result),
        OutputFormat::Markdown => format_markdown(result),
    }
}

fn format_json(result: &QueryResult) -> String {
    serde_json::to_string_pretty(result).unwrap_or_else(|_| "{}".to_string())
}

/// Column names of the first row; later rows share the SELECT list.
fn columns(result: &QueryResult) -> Vec<String> {
    result
        .data
        .first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default()
}

fn cell(row: &Row, column: &str) -> String {
    row.get(column)
        .map(value_to_display)
        .unwrap_or_else(|| "null".to_string())
}

fn format_table(result: &QueryResult) -> String {
    if result.data.is_empty() {
        return "(no results)".to_string();
    }

    let columns = columns(result);
    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in &result.data {
        for (i, col) in columns.iter().enumerate() {
            widths[i] = widths[i].max(cell(row, col).chars().count());
        }
    }

    let mut output = String::new();

    let header: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:width$}", c, width = widths[i]))
        .collect();
    output.push_str(&header.join(" | "));
    output.push('\n');

    let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    output.push_str(&sep.join("-+-"));
    output.push('\n');

    for row in &result.data {
        let vals: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{:width$}", cell(row, col), width = widths[i]))
            .collect();
        output.push_str(&vals.join(" | "));
        output.push('\n');
    }

    if let Some(total) = result.total_count {
        output.push_str(&format!("({} of {total} rows)\n", result.row_count));
    }

    output
}

fn format_markdown(result: &QueryResult) -> String {
    if result.data.is_empty() {
        return "*No results*\n".to_string();
    }

    let columns = columns(result);
    let mut output = String::new();

    output.push_str("| ");
    output.push_str(&columns.join(" | "));
    output.push_str(" |\n");

    output.push_str("| ");
    let seps: Vec<&str> = columns.iter().map(|_| "---").collect();
    output.push_str(&seps.join(" | "));
    output.push_str(" |\n");

    for row in &result.data {
        output.push_str("| ");
        let vals: Vec<String> = columns
            .iter()
            .map(|col| cell(row, col).replace('|', "\\|"))
            .collect();
        output.push_str(&vals.join(" | "));
        output.push_str(" |\n");
    }

    output
}

fn value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn sample_result() -> QueryResult {
        QueryResult {
            data: vec![
                row(json!({"id": 1, "title": "Alpha | Ops", "DOT_latest": 1000.5})),
                row(json!({"id": 2, "title": "Beta", "DOT_latest": null})),
            ],
            row_count: 2,
            total_count: Some(7),
        }
    }

    #[test]
    fn format_as_json() {
        let output = format_results(&sample_result(), OutputFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["rowCount"], 2);
        assert_eq!(parsed["totalCount"], 7);
        assert_eq!(parsed["data"][0]["title"], "Alpha | Ops");
    }

    #[test]
    fn format_as_table() {
        let output = format_results(&sample_result(), OutputFormat::Table);
        assert!(output.contains("id"));
        assert!(output.contains("title"));
        assert!(output.contains("Alpha | Ops"));
        assert!(output.contains("null"));
        assert!(output.contains("-+-"));
        assert!(output.ends_with("(2 of 7 rows)\n"));
    }

    #[test]
    fn format_as_markdown() {
        let output = format_results(&sample_result(), OutputFormat::Markdown);
        assert!(output.contains("| DOT_latest"));
        assert!(output.contains("| ---"));
        assert!(output.contains("Alpha \\| Ops"));
        assert!(output.ends_with("|\n"));
    }

    #[test]
    fn format_empty_result() {
        let result = QueryResult::default();
        assert_eq!(format_results(&result, OutputFormat::Table), "(no results)");
        assert_eq!(
            format_results(&result, OutputFormat::Markdown),
            "*No results*\n"
        );
        let json: serde_json::Value =
            serde_json::from_str(&format_results(&result, OutputFormat::Json)).unwrap();
        assert!(json.get("totalCount").is_none());
    }
}
