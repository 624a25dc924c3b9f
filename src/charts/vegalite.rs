// src/charts/vegalite.rs

//! Vega-Lite v5 documents for each chart kind, with the data inlined.

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::Chart;
use crate::error::{Result, RxError};
use crate::pipeline::{DecileRow, RegionRate};
use crate::records::RateMeasure;

pub const SCHEMA_URL: &str = "https://vega.github.io/schema/vega-lite/v5.json";

/// Serialize rows to Vega-Lite `values`, checking that every named field
/// exists on the first row.
fn inline_values<T: Serialize>(rows: &[T], fields: &[&str]) -> Result<Vec<Value>> {
    if rows.is_empty() {
        return Err(RxError::Chart("no rows to plot".to_string()));
    }
    let values = rows
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| RxError::Chart(format!("serializing chart data: {}", e)))?;
    let first = values[0]
        .as_object()
        .ok_or_else(|| RxError::Chart("chart rows must serialize to objects".to_string()))?;
    for f in fields {
        if !first.contains_key(*f) {
            return Err(RxError::Chart(format!("no field `{}` in chart data", f)));
        }
    }
    Ok(values)
}

fn base(title: &str, values: Vec<Value>) -> Map<String, Value> {
    let mut spec = Map::new();
    spec.insert("$schema".into(), json!(SCHEMA_URL));
    spec.insert("title".into(), json!(title.split('\n').collect::<Vec<_>>()));
    spec.insert("width".into(), json!(640));
    spec.insert("height".into(), json!(320));
    spec.insert("data".into(), json!({ "values": values }));
    spec
}

/// Time series of `y` against a monthly `x`. `y_max` pins the axis top.
pub fn line<T: Serialize>(
    name: &str,
    title: &str,
    rows: &[T],
    x: &str,
    y: &str,
    y_max: Option<f64>,
) -> Result<Chart> {
    let values = inline_values(rows, &[x, y])?;
    let mut y_enc = json!({ "field": y, "type": "quantitative" });
    if let Some(max) = y_max {
        y_enc["scale"] = json!({ "domain": [0.0, max] });
    }
    let mut spec = base(title, values);
    spec.insert("mark".into(), json!({ "type": "line", "point": false }));
    spec.insert(
        "encoding".into(),
        json!({
            "x": { "field": x, "type": "temporal", "timeUnit": "yearmonth", "title": x },
            "y": y_enc,
        }),
    );
    Ok(Chart::new(name, Value::Object(spec)))
}

/// Distribution of `x`, each row weighted by `weight`.
pub fn histogram<T: Serialize>(
    name: &str,
    title: &str,
    rows: &[T],
    x: &str,
    weight: &str,
    max_bins: u32,
) -> Result<Chart> {
    let values = inline_values(rows, &[x, weight])?;
    let mut spec = base(title, values);
    spec.insert("mark".into(), json!("bar"));
    spec.insert(
        "encoding".into(),
        json!({
            "x": { "field": x, "type": "quantitative", "bin": { "maxbins": max_bins } },
            "y": { "aggregate": "sum", "field": weight, "type": "quantitative", "title": weight },
        }),
    );
    Ok(Chart::new(name, Value::Object(spec)))
}

/// One bar per distinct `x`.
pub fn bar<T: Serialize>(name: &str, title: &str, rows: &[T], x: &str, y: &str) -> Result<Chart> {
    let values = inline_values(rows, &[x, y])?;
    let mut spec = base(title, values);
    spec.insert("mark".into(), json!({ "type": "bar", "tooltip": true }));
    spec.insert("params".into(), json!([{ "name": "zoom", "select": "interval", "bind": "scales" }]));
    spec.insert(
        "encoding".into(),
        json!({
            "x": { "field": x, "type": "quantitative" },
            "y": { "field": y, "type": "quantitative" },
        }),
    );
    Ok(Chart::new(name, Value::Object(spec)))
}

/// Decile lines (median solid, the rest dashed) with one region drawn over
/// them as a red dashed line.
pub fn deciles(
    name: &str,
    title: &str,
    deciles: &[DecileRow],
    subject: &[RateMeasure],
    subject_label: &str,
) -> Result<Chart> {
    let decile_values = inline_values(deciles, &["month", "percentile", "value"])?;
    let subject_values: Vec<Value> = subject
        .iter()
        .filter_map(|r| {
            r.ml_per_1000_pts
                .map(|v| json!({ "month": r.month, "value": v, "region": r.region }))
        })
        .collect();

    let x = json!({ "field": "month", "type": "temporal", "timeUnit": "yearmonth", "title": "month" });
    let decile_layer = json!({
        "data": { "values": decile_values },
        "mark": { "type": "line", "color": "#1f77b4" },
        "encoding": {
            "x": x,
            "y": { "field": "value", "type": "quantitative", "title": "ml per 1000 patients" },
            "detail": { "field": "percentile", "type": "ordinal" },
            "strokeDash": {
                "condition": { "test": "datum.percentile === 50", "value": [1, 0] },
                "value": [5, 5],
            },
            "strokeWidth": {
                "condition": { "test": "datum.percentile === 50", "value": 1.5 },
                "value": 0.8,
            },
        },
    });

    let mut layers = vec![decile_layer];
    if subject_values.is_empty() {
        tracing::warn!(region = subject_label, "subject region has no defined rates; overlay omitted");
    } else {
        layers.push(json!({
            "data": { "values": subject_values },
            "mark": { "type": "line", "color": "red", "strokeDash": [4, 4] },
            "encoding": {
                "x": x,
                "y": { "field": "value", "type": "quantitative" },
                "tooltip": [{ "field": "region" }, { "field": "value", "format": ".1f" }],
            },
        }));
    }

    let spec = json!({
        "$schema": SCHEMA_URL,
        "title": title.split('\n').collect::<Vec<_>>(),
        "width": 640,
        "height": 320,
        "layer": layers,
    });
    Ok(Chart::new(name, spec))
}

/// Regions shaded by rate, drawn from a TopoJSON whose features carry the
/// region code in `properties.code`.
pub fn choropleth(
    name: &str,
    title: &str,
    rates: &[RegionRate],
    boundaries_url: &str,
    feature: &str,
) -> Result<Chart> {
    let values = inline_values(rates, &["region", "ml_per_1000_pts"])?;
    let spec = json!({
        "$schema": SCHEMA_URL,
        "title": title.split('\n').collect::<Vec<_>>(),
        "width": 500,
        "height": 600,
        "data": {
            "url": boundaries_url,
            "format": { "type": "topojson", "feature": feature },
        },
        "transform": [{
            "lookup": "properties.code",
            "from": {
                "data": { "values": values },
                "key": "region",
                "fields": ["ml_per_1000_pts"],
            },
        }],
        "projection": { "type": "mercator" },
        "mark": { "type": "geoshape", "stroke": "white", "strokeWidth": 0.3 },
        "encoding": {
            "color": {
                "field": "ml_per_1000_pts",
                "type": "quantitative",
                "scale": { "scheme": "redblue", "reverse": true },
                "title": "ml per 1000",
            },
            "tooltip": [
                { "field": "properties.code", "title": "region" },
                { "field": "ml_per_1000_pts", "format": ".1f" },
            ],
        },
    });
    Ok(Chart::new(name, spec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[derive(Serialize)]
    struct Point {
        month: NaiveDate,
        total_items: f64,
    }

    fn points() -> Vec<Point> {
        vec![
            Point {
                month: NaiveDate::from_ymd_opt(2019, 6, 1).unwrap(),
                total_items: 10.0,
            },
            Point {
                month: NaiveDate::from_ymd_opt(2019, 7, 1).unwrap(),
                total_items: 12.0,
            },
        ]
    }

    #[test]
    fn line_inlines_data_and_axis_limit() {
        let chart = line("items", "Total items", &points(), "month", "total_items", Some(250000.0))
            .unwrap();
        let spec = &chart.spec;
        assert_eq!(spec["$schema"], SCHEMA_URL);
        assert_eq!(spec["data"]["values"][0]["month"], "2019-06-01");
        assert_eq!(spec["encoding"]["y"]["scale"]["domain"][1], 250000.0);
        assert_eq!(spec["mark"]["type"], "line");
    }

    #[test]
    fn unknown_field_is_chart_error() {
        assert!(matches!(
            line("x", "t", &points(), "month", "cost", None),
            Err(RxError::Chart(_))
        ));
        let empty: Vec<Point> = Vec::new();
        assert!(matches!(
            bar("x", "t", &empty, "month", "total_items"),
            Err(RxError::Chart(_))
        ));
    }

    #[test]
    fn multi_line_titles_split() {
        let chart = histogram("h", "Oramorph\nper item", &points(), "total_items", "total_items", 40)
            .unwrap();
        assert_eq!(chart.spec["title"], json!(["Oramorph", "per item"]));
        assert_eq!(chart.spec["encoding"]["y"]["aggregate"], "sum");
    }

    #[test]
    fn decile_overlay_skips_undefined_rates() {
        let month = NaiveDate::from_ymd_opt(2019, 6, 1).unwrap();
        let rows = vec![DecileRow {
            month,
            percentile: 50,
            value: 3.0,
        }];
        let subject = vec![
            RateMeasure {
                region: "15N".into(),
                month,
                quantity_times_item: 10.0,
                list_size: 1.0,
                ml_per_1000_pts: Some(4.0),
            },
            RateMeasure {
                region: "15N".into(),
                month: NaiveDate::from_ymd_opt(2019, 7, 1).unwrap(),
                quantity_times_item: 10.0,
                list_size: 0.0,
                ml_per_1000_pts: None,
            },
        ];
        let chart = deciles("d", "t", &rows, &subject, "15N").unwrap();
        let layers = chart.spec["layer"].as_array().unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[1]["data"]["values"].as_array().unwrap().len(), 1);
        assert_eq!(layers[1]["mark"]["color"], "red");
    }

    #[test]
    fn choropleth_looks_up_region_codes() {
        let rates = vec![RegionRate {
            region: "15N".into(),
            ml_per_1000_pts: 12.5,
            months: 12,
        }];
        let chart = choropleth("m", "t", &rates, "https://example.org/ccg.topojson", "ccg")
            .unwrap();
        assert_eq!(chart.spec["data"]["format"]["type"], "topojson");
        assert_eq!(chart.spec["transform"][0]["from"]["key"], "region");
        assert_eq!(
            chart.spec["transform"][0]["from"]["data"]["values"][0]["ml_per_1000_pts"],
            12.5
        );
    }
}
