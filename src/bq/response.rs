// src/bq/response.rs

use arrow::{
    array::{ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::error::{Result, RxError};

/// Body of both `jobs.query` and `jobs.getQueryResults`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[serde(default)]
    pub schema: Option<TableSchema>,
    pub job_reference: Option<JobReference>,
    #[serde(default)]
    pub job_complete: bool,
    pub page_token: Option<String>,
    #[serde(default)]
    pub rows: Vec<TableRow>,
    #[serde(default)]
    pub errors: Vec<ErrorProto>,
    pub status: Option<JobStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    pub job_id: String,
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TableRow {
    #[serde(default)]
    pub f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
pub struct TableCell {
    pub v: Value,
}

#[derive(Debug, Deserialize)]
pub struct ErrorProto {
    pub reason: Option<String>,
    pub message: Option<String>,
}

/// `{"error": {...}}` envelope returned with non-2xx statuses.
#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub code: Option<u16>,
    pub message: String,
}

fn describe(e: &ErrorProto) -> String {
    format!(
        "{}: {}",
        e.reason.as_deref().unwrap_or("error"),
        e.message.as_deref().unwrap_or("")
    )
}

impl QueryResponse {
    /// Fail on a job-level error result, or on `errors` that came without
    /// any result. Alongside a result they are warnings and only logged.
    pub fn check_errors(&self) -> Result<()> {
        if let Some(err) = self.status.as_ref().and_then(|s| s.error_result.as_ref()) {
            return Err(RxError::Remote(describe(err)));
        }
        if self.errors.is_empty() {
            return Ok(());
        }
        let msgs = self.errors.iter().map(describe).collect::<Vec<_>>().join("; ");
        if self.schema.is_none() && self.rows.is_empty() {
            return Err(RxError::Remote(msgs));
        }
        warn!(warnings = %msgs, "query succeeded with warnings");
        Ok(())
    }
}

fn arrow_type(bq_type: &str) -> DataType {
    match bq_type.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT64" => DataType::Int64,
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => DataType::Float64,
        "BOOLEAN" | "BOOL" => DataType::Boolean,
        _ => DataType::Utf8,
    }
}

/// BigQuery sends every scalar as a JSON string; null stays null.
fn cell_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// TIMESTAMP cells arrive as epoch seconds in float notation ("1.5593472E9").
fn timestamp_text(raw: &str) -> Result<String> {
    let secs: f64 = raw
        .parse()
        .map_err(|_| RxError::Remote(format!("bad TIMESTAMP value {:?}", raw)))?;
    let micros = (secs * 1_000_000.0).round() as i64;
    let dt = DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| RxError::Remote(format!("TIMESTAMP out of range {:?}", raw)))?;
    Ok(dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Assemble all pages of a finished query into a single batch.
pub fn rows_to_batch(schema: &TableSchema, rows: &[TableRow]) -> Result<RecordBatch> {
    let arrow_schema = Arc::new(Schema::new(
        schema
            .fields
            .iter()
            .map(|f| Field::new(&f.name, arrow_type(&f.field_type), true))
            .collect::<Vec<_>>(),
    ));

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields.len());
    for (idx, field) in schema.fields.iter().enumerate() {
        let cells = rows.iter().map(|r| {
            r.f.get(idx).and_then(|c| cell_text(&c.v))
        });
        let parse_err = |v: &str| {
            RxError::Remote(format!(
                "column {} ({}) has unparseable value {:?}",
                field.name, field.field_type, v
            ))
        };

        let array: ArrayRef = match arrow_type(&field.field_type) {
            DataType::Int64 => {
                let mut b = Int64Builder::with_capacity(rows.len());
                for cell in cells {
                    match cell {
                        Some(s) => b.append_value(s.parse().map_err(|_| parse_err(&s))?),
                        None => b.append_null(),
                    }
                }
                Arc::new(b.finish())
            }
            DataType::Float64 => {
                let mut b = Float64Builder::with_capacity(rows.len());
                for cell in cells {
                    match cell {
                        Some(s) => b.append_value(s.parse().map_err(|_| parse_err(&s))?),
                        None => b.append_null(),
                    }
                }
                Arc::new(b.finish())
            }
            DataType::Boolean => {
                let mut b = BooleanBuilder::with_capacity(rows.len());
                for cell in cells {
                    match cell.as_deref() {
                        Some("true") => b.append_value(true),
                        Some("false") => b.append_value(false),
                        Some(s) => return Err(parse_err(s)),
                        None => b.append_null(),
                    }
                }
                Arc::new(b.finish())
            }
            _ => {
                let is_ts = field.field_type.eq_ignore_ascii_case("TIMESTAMP");
                let mut b = StringBuilder::new();
                for cell in cells {
                    match cell {
                        Some(s) if is_ts => b.append_value(timestamp_text(&s)?),
                        Some(s) => b.append_value(s),
                        None => b.append_null(),
                    }
                }
                Arc::new(b.finish())
            }
        };
        columns.push(array);
    }

    RecordBatch::try_new(arrow_schema, columns)
        .map_err(|e| RxError::Remote(format!("assembling result batch: {}", e)))
}
