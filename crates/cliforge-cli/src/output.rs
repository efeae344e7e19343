//! Terminal output rendering for operation responses.

use anyhow::{anyhow, Result};
use cliforge_core::traits::OutputFormatter;
use owo_colors::OwoColorize;
use serde_json::Value;

pub struct DefaultFormatter;

impl OutputFormatter for DefaultFormatter {
    fn render(&self, value: &Value, format: &str, color: bool, pretty: bool) -> Result<String> {
        match format {
            "json" => {
                if pretty {
                    Ok(serde_json::to_string_pretty(value)?)
                } else {
                    Ok(serde_json::to_string(value)?)
                }
            }
            "yaml" => Ok(serde_yaml::to_string(value)?),
            "raw" => Ok(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            "table" => Ok(render_table(value, color)),
            other => Err(anyhow!("unsupported output format: {}", other)),
        }
    }
}

fn render_table(value: &Value, color: bool) -> String {
    match value {
        Value::Array(rows) if rows.iter().all(Value::is_object) && !rows.is_empty() => {
            let mut columns: Vec<String> = Vec::new();
            for row in rows {
                if let Value::Object(map) = row {
                    for key in map.keys() {
                        if !columns.contains(key) {
                            columns.push(key.clone());
                        }
                    }
                }
            }

            let mut widths: Vec<usize> = columns.iter().map(String::len).collect();
            let cells: Vec<Vec<String>> = rows
                .iter()
                .map(|row| {
                    columns
                        .iter()
                        .enumerate()
                        .map(|(i, column)| {
                            let cell = row
                                .get(column)
                                .map(cell_text)
                                .unwrap_or_default();
                            widths[i] = widths[i].max(cell.len());
                            cell
                        })
                        .collect()
                })
                .collect();

            let mut lines = Vec::with_capacity(rows.len() + 1);
            let header: Vec<String> = columns
                .iter()
                .enumerate()
                .map(|(i, column)| format!("{:<width$}", column.to_uppercase(), width = widths[i]))
                .collect();
            let header = header.join("  ");
            lines.push(if color {
                header.bold().to_string()
            } else {
                header
            });
            for row in cells {
                let rendered: Vec<String> = row
                    .iter()
                    .enumerate()
                    .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
                    .collect();
                lines.push(rendered.join("  ").trim_end().to_string());
            }
            lines.join("\n")
        }
        Value::Object(map) => {
            let width = map.keys().map(String::len).max().unwrap_or(0);
            map.iter()
                .map(|(key, value)| format!("{:<width$}  {}", key, cell_text(value), width = width))
                .collect::<Vec<_>>()
                .join("\n")
        }
        Value::Array(items) => items.iter().map(cell_text).collect::<Vec<_>>().join("\n"),
        other => cell_text(other),
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_pretty_and_compact() {
        let formatter = DefaultFormatter;
        let value = json!({"a": 1});
        assert_eq!(formatter.render(&value, "json", false, false).unwrap(), r#"{"a":1}"#);
        assert!(formatter
            .render(&value, "json", false, true)
            .unwrap()
            .contains("\n"));
    }

    #[test]
    fn table_of_objects_aligns_columns() {
        let formatter = DefaultFormatter;
        let value = json!([
            {"id": "p-1", "name": "alpha"},
            {"id": "p-22", "name": "beta"},
        ]);
        let table = formatter.render(&value, "table", false, false).unwrap();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].contains("alpha"));
        assert!(lines[2].contains("p-22"));
    }

    #[test]
    fn raw_strings_are_unquoted() {
        let formatter = DefaultFormatter;
        assert_eq!(
            formatter.render(&json!("plain"), "raw", false, false).unwrap(),
            "plain"
        );
    }

    #[test]
    fn unknown_format_is_an_error() {
        let formatter = DefaultFormatter;
        assert!(formatter.render(&json!(1), "csv", false, false).is_err());
    }
}
