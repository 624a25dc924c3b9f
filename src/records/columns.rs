// src/records/columns.rs

use arrow::{
    array::{Array, Float64Array, StringArray},
    compute::cast,
    datatypes::DataType,
    record_batch::RecordBatch,
};
use chrono::{Datelike, NaiveDate};

use crate::error::{Result, RxError};

/// Parse a month cell and normalize it to the first of the month.
///
/// Accepts `YYYY-MM-DD` optionally followed by a time part, with a space or
/// `T` separator (`2019-06-01 00:00:00`, `2019-06-01T00:00:00+00:00`, ...).
pub fn parse_month(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim().trim_matches('"');
    if s.len() < 10 || !s.is_char_boundary(10) {
        return None;
    }
    let (date, rest) = s.split_at(10);
    if !(rest.is_empty() || rest.starts_with(' ') || rest.starts_with('T')) {
        return None;
    }
    let d = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    d.with_day(1)
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a dyn Array> {
    batch
        .column_by_name(name)
        .map(|c| c.as_ref())
        .ok_or_else(|| RxError::Data(format!("missing column `{}`", name)))
}

/// Any column rendered as text (ints, floats, dates and timestamps included).
pub fn text_column(batch: &RecordBatch, name: &str) -> Result<StringArray> {
    let col = column(batch, name)?;
    let casted = cast(col, &DataType::Utf8)
        .map_err(|e| RxError::Data(format!("column `{}` is not text-like: {}", name, e)))?;
    casted
        .as_any()
        .downcast_ref::<StringArray>()
        .cloned()
        .ok_or_else(|| RxError::Data(format!("column `{}` did not cast to Utf8", name)))
}

/// A numeric column; textual cells are parsed, unparseable ones become null
/// and are rejected by `required_f64`.
pub fn f64_column(batch: &RecordBatch, name: &str) -> Result<Float64Array> {
    let col = column(batch, name)?;
    let casted = if col.data_type() == &DataType::Utf8 {
        // csv snapshots keep numbers as text, possibly with padding
        let trimmed: StringArray = col
            .as_any()
            .downcast_ref::<StringArray>()
            .map(|s| s.iter().map(|v| v.map(str::trim)).collect())
            .ok_or_else(|| RxError::Data(format!("column `{}` is not Utf8", name)))?;
        cast(&trimmed, &DataType::Float64)
    } else {
        cast(col, &DataType::Float64)
    };
    let source = casted
        .map_err(|e| RxError::Data(format!("column `{}` is not numeric: {}", name, e)))?;
    source
        .as_any()
        .downcast_ref::<Float64Array>()
        .cloned()
        .ok_or_else(|| RxError::Data(format!("column `{}` did not cast to Float64", name)))
}

pub fn required_text<'a>(col: &'a StringArray, name: &str, row: usize) -> Result<&'a str> {
    if col.is_null(row) {
        return Err(RxError::Data(format!("null `{}` at row {}", name, row)));
    }
    Ok(col.value(row))
}

pub fn required_f64(col: &Float64Array, name: &str, row: usize) -> Result<f64> {
    if col.is_null(row) {
        return Err(RxError::Data(format!(
            "missing or non-numeric `{}` at row {}",
            name, row
        )));
    }
    Ok(col.value(row))
}

pub fn required_month(col: &StringArray, name: &str, row: usize) -> Result<NaiveDate> {
    let raw = required_text(col, name, row)?;
    parse_month(raw).ok_or_else(|| {
        RxError::Data(format!("`{}` at row {} is not a date: {:?}", name, row, raw))
    })
}
