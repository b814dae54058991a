use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::OutputFormat;

/// One spreadsheet row per top-level thread. Absent values are empty strings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRow {
    pub heading: String,
    pub requirement_id: String,
    pub anchor_text: String,
    pub thread_text: String,
}

impl ThreadRow {
    pub fn as_tuple(&self) -> (&str, &str, &str, &str) {
        (
            &self.heading,
            &self.requirement_id,
            &self.anchor_text,
            &self.thread_text,
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreadRowsJson {
    pub version: u32,
    pub source: String,
    pub source_sha256: String,
    pub rows: Vec<ThreadRow>,
}

pub const TSV_HEADER: [&str; 4] = ["heading", "requirement_id", "anchor_text", "thread_text"];

fn escape_tsv_field(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn rows_to_tsv(rows: &[ThreadRow]) -> String {
    let mut out = TSV_HEADER.join("\t");
    out.push('\n');
    for row in rows {
        let (a, b, c, d) = row.as_tuple();
        let fields = [a, b, c, d].map(escape_tsv_field);
        out.push_str(&fields.join("\t"));
        out.push('\n');
    }
    out
}

pub fn write_rows(
    output: &Path,
    format: OutputFormat,
    source: &str,
    source_sha256: &str,
    rows: &[ThreadRow],
) -> anyhow::Result<()> {
    let bytes = match format {
        OutputFormat::Json => {
            let doc = ThreadRowsJson {
                version: 1,
                source: source.to_string(),
                source_sha256: source_sha256.to_string(),
                rows: rows.to_vec(),
            };
            serde_json::to_vec_pretty(&doc).context("serialize rows json")?
        }
        OutputFormat::Tsv => rows_to_tsv(rows).into_bytes(),
    };
    fs::write(output, bytes).with_context(|| format!("write rows: {}", output.display()))?;
    Ok(())
}
