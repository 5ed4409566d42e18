use anyhow::{bail, Context, Result};
use semsearch_vector::SourceRecord;
use serde_json::Value;
use std::path::Path;

/// Load seed records from a JSON array or JSON lines file
pub fn read_records(path: &Path, text_fields: &[String], id_field: Option<&str>) -> Result<Vec<SourceRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_records(&content, text_fields, id_field)
        .with_context(|| format!("Invalid record file {}", path.display()))
}

pub fn parse_records(content: &str, text_fields: &[String], id_field: Option<&str>) -> Result<Vec<SourceRecord>> {
    let values: Vec<Value> = if content.trim_start().starts_with('[') {
        serde_json::from_str(content).context("Malformed JSON array")?
    } else {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).with_context(|| format!("Malformed JSON on line {}", n + 1))
            })
            .collect::<Result<_>>()?
    };

    values
        .into_iter()
        .enumerate()
        .map(|(n, value)| match value {
            Value::Object(payload) => Ok(SourceRecord::from_payload(payload, text_fields, id_field)),
            other => bail!("Record {} is not a JSON object: {}", n + 1, other),
        })
        .collect()
}
