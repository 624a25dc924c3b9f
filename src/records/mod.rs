// src/records/mod.rs

//! Typed rows for the tables the pipeline works on. Column lookups happen
//! once, in `from_batch`; everything downstream uses named fields.

use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use serde::Serialize;

use crate::error::Result;

pub mod columns;

use columns::{f64_column, required_f64, required_month, required_text, text_column};

/// A table whose rows can be lifted out of a query result.
pub trait FromBatch: Sized {
    /// Columns the query must provide.
    const COLUMNS: &'static [&'static str];

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>>;
}

/// One (region, month, drug code, dose-per-item) aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrescribingRecord {
    pub region: String,
    pub month: NaiveDate,
    pub bnf_name: String,
    pub bnf_code: String,
    /// ml dispensed per item
    pub quantity_per_item: f64,
    pub total_items: f64,
    pub total_cost: f64,
}

impl FromBatch for PrescribingRecord {
    const COLUMNS: &'static [&'static str] = &[
        "pct",
        "month",
        "bnf_name",
        "bnf_code",
        "quantity_per_item",
        "total_items",
        "total_cost",
    ];

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let region = text_column(batch, "pct")?;
        let month = text_column(batch, "month")?;
        let bnf_name = text_column(batch, "bnf_name")?;
        let bnf_code = text_column(batch, "bnf_code")?;
        let qty = f64_column(batch, "quantity_per_item")?;
        let items = f64_column(batch, "total_items")?;
        let cost = f64_column(batch, "total_cost")?;

        (0..batch.num_rows())
            .map(|i| {
                Ok(PrescribingRecord {
                    region: required_text(&region, "pct", i)?.to_string(),
                    month: required_month(&month, "month", i)?,
                    bnf_name: required_text(&bnf_name, "bnf_name", i)?.to_string(),
                    bnf_code: required_text(&bnf_code, "bnf_code", i)?.to_string(),
                    quantity_per_item: required_f64(&qty, "quantity_per_item", i)?,
                    total_items: required_f64(&items, "total_items", i)?,
                    total_cost: required_f64(&cost, "total_cost", i)?,
                })
            })
            .collect()
    }
}

/// Average registered population of a region in a month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopulationStat {
    pub region: String,
    pub month: NaiveDate,
    pub list_size: f64,
}

impl FromBatch for PopulationStat {
    const COLUMNS: &'static [&'static str] = &["month", "pct", "list_size"];

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let month = text_column(batch, "month")?;
        let region = text_column(batch, "pct")?;
        let list_size = f64_column(batch, "list_size")?;

        (0..batch.num_rows())
            .map(|i| {
                Ok(PopulationStat {
                    region: required_text(&region, "pct", i)?.to_string(),
                    month: required_month(&month, "month", i)?,
                    list_size: required_f64(&list_size, "list_size", i)?,
                })
            })
            .collect()
    }
}

/// A prescribing row with its dispensed volume (`quantity_times_item`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeRecord {
    #[serde(flatten)]
    pub record: PrescribingRecord,
    pub quantity_times_item: f64,
}

/// Summed volume for one (region, month).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionMonthVolume {
    pub region: String,
    pub month: NaiveDate,
    pub quantity_times_item: f64,
}

/// Volume joined with list size, plus the per-1000 rate. The rate is `None`
/// when the list size cannot serve as a denominator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateMeasure {
    pub region: String,
    pub month: NaiveDate,
    pub quantity_times_item: f64,
    pub list_size: f64,
    pub ml_per_1000_pts: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RxError;
    use arrow::{
        array::{Float64Array, Int64Array, StringArray},
        datatypes::{DataType, Field, Schema},
    };
    use std::sync::Arc;

    fn prescribing_batch(months: Vec<&str>) -> RecordBatch {
        let n = months.len();
        let fields = PrescribingRecord::COLUMNS
            .iter()
            .map(|c| {
                let dt = match *c {
                    "total_items" => DataType::Int64,
                    "quantity_per_item" | "total_cost" => DataType::Float64,
                    _ => DataType::Utf8,
                };
                Field::new(*c, dt, true)
            })
            .collect::<Vec<_>>();
        RecordBatch::try_new(
            Arc::new(Schema::new(fields)),
            vec![
                Arc::new(StringArray::from(vec!["15N"; n])),
                Arc::new(StringArray::from(months)),
                Arc::new(StringArray::from(vec![
                    "Morphine 10mg/5ml oral solution";
                    n
                ])),
                Arc::new(StringArray::from(vec!["0407020Q0AAAFAF"; n])),
                Arc::new(Float64Array::from(vec![500.0; n])),
                Arc::new(Int64Array::from(vec![10; n])),
                Arc::new(Float64Array::from(vec![42.0; n])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn prescribing_rows_are_typed() {
        let rows = PrescribingRecord::from_batch(&prescribing_batch(vec![
            "2019-06-01 00:00:00",
            "2019-07-01",
        ]))
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].region, "15N");
        assert_eq!(rows[0].month, NaiveDate::from_ymd_opt(2019, 6, 1).unwrap());
        assert_eq!(rows[1].month, NaiveDate::from_ymd_opt(2019, 7, 1).unwrap());
        assert_eq!(rows[0].quantity_per_item, 500.0);
        assert_eq!(rows[0].total_items, 10.0);
    }

    #[test]
    fn bad_month_is_data_error() {
        let err = PrescribingRecord::from_batch(&prescribing_batch(vec!["soon"])).unwrap_err();
        assert!(matches!(err, RxError::Data(_)));
        assert!(err.to_string().contains("month"));
    }

    #[test]
    fn population_needs_list_size() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("month", DataType::Utf8, true),
            Field::new("pct", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["2019-06-01"])),
                Arc::new(StringArray::from(vec!["15N"])),
            ],
        )
        .unwrap();
        let err = PopulationStat::from_batch(&batch).unwrap_err();
        assert!(err.to_string().contains("list_size"));
    }
}
