//! Output formatters for generated datasets.

use crate::generator::Dataset;
use crate::{TestDataError, TestDataResult};
use serde_json::{Map, Value};
use std::fmt;

/// Textual encodings a dataset can be rendered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
    Xml,
    Sql,
    Pipe,
    Python,
    JavaScript,
    Php,
}

impl OutputFormat {
    /// Case-insensitive; anything unrecognised renders as JSON.
    pub fn parse_lossy(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "csv" => OutputFormat::Csv,
            "xml" => OutputFormat::Xml,
            "sql" => OutputFormat::Sql,
            "pipe" => OutputFormat::Pipe,
            "python" => OutputFormat::Python,
            "javascript" | "js" => OutputFormat::JavaScript,
            "php" => OutputFormat::Php,
            _ => OutputFormat::Json,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Xml => "xml",
            OutputFormat::Sql => "sql",
            OutputFormat::Pipe => "pipe",
            OutputFormat::Python => "python",
            OutputFormat::JavaScript => "javascript",
            OutputFormat::Php => "php",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render `dataset` as text.
pub fn render(dataset: &Dataset, format: OutputFormat) -> TestDataResult<String> {
    match format {
        OutputFormat::Json => to_json(dataset),
        OutputFormat::Csv => to_csv(dataset),
        OutputFormat::Xml => Ok(to_xml(dataset)),
        OutputFormat::Sql => Ok(to_sql(dataset)),
        OutputFormat::Pipe => Ok(to_pipe(dataset)),
        OutputFormat::Python => Ok(format!("data = {}", to_json(dataset)?)),
        OutputFormat::JavaScript => Ok(format!("const data = {};", to_json(dataset)?)),
        OutputFormat::Php => Ok(to_php(dataset)),
    }
}

fn objects(dataset: &Dataset) -> Vec<Value> {
    dataset
        .rows
        .iter()
        .map(|row| {
            let object: Map<String, Value> = dataset
                .columns
                .iter()
                .cloned()
                .zip(row.iter().cloned().map(Value::String))
                .collect();
            Value::Object(object)
        })
        .collect()
}

fn to_json(dataset: &Dataset) -> TestDataResult<String> {
    serde_json::to_string_pretty(&objects(dataset))
        .map_err(|e| TestDataError::Render(e.to_string()))
}

fn to_csv(dataset: &Dataset) -> TestDataResult<String> {
    let render_err = |e: csv::Error| TestDataError::Render(e.to_string());
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());
    writer.write_record(&dataset.columns).map_err(render_err)?;
    for row in &dataset.rows {
        writer.write_record(row).map_err(render_err)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| TestDataError::Render(e.to_string()))?;
    let text = String::from_utf8(bytes).map_err(|e| TestDataError::Render(e.to_string()))?;
    Ok(text.trim_end_matches('\n').to_string())
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn to_xml(dataset: &Dataset) -> String {
    let mut out = String::from("<data>\n");
    for row in &dataset.rows {
        out.push_str("  <row>\n");
        for (column, value) in dataset.columns.iter().zip(row) {
            let tag = xml_escape(column);
            out.push_str(&format!("    <{tag}>{}</{tag}>\n", xml_escape(value)));
        }
        out.push_str("  </row>\n");
    }
    out.push_str("</data>");
    out
}

fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn to_sql(dataset: &Dataset) -> String {
    let columns = dataset.columns.join(", ");
    dataset
        .rows
        .iter()
        .map(|row| {
            let values = row.iter().map(|v| sql_quote(v)).collect::<Vec<_>>().join(", ");
            format!("INSERT INTO table_name ({columns}) VALUES ({values});")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn to_pipe(dataset: &Dataset) -> String {
    std::iter::once(dataset.columns.join("|"))
        .chain(dataset.rows.iter().map(|row| row.join("|")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn php_quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn to_php(dataset: &Dataset) -> String {
    let rows = dataset
        .rows
        .iter()
        .map(|row| {
            let pairs = dataset
                .columns
                .iter()
                .zip(row)
                .map(|(k, v)| format!("{} => {}", php_quote(k), php_quote(v)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("    [{pairs}]")
        })
        .collect::<Vec<_>>()
        .join(",\n");
    format!("<?php\n$data = [\n{rows}\n];\n?>")
}
