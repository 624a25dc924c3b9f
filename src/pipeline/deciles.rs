// src/pipeline/deciles.rs

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

use super::MonthWindow;
use crate::records::RateMeasure;

/// One decile line point: the `percentile`th percentile of the regional
/// rates in `month`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecileRow {
    pub month: NaiveDate,
    pub percentile: u8,
    pub value: f64,
}

/// Quantile `q` of an ascending slice, interpolating linearly between the
/// two nearest ranks.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// 10th..90th percentiles per month. Rows with an undefined rate are skipped.
pub fn deciles(rates: &[RateMeasure]) -> Vec<DecileRow> {
    let mut by_month: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for r in rates {
        if let Some(v) = r.ml_per_1000_pts {
            by_month.entry(r.month).or_default().push(v);
        }
    }

    let mut out = Vec::with_capacity(by_month.len() * 9);
    for (month, mut values) in by_month {
        values.sort_by(f64::total_cmp);
        for percentile in (10..=90).step_by(10) {
            if let Some(value) = quantile(&values, percentile as f64 / 100.0) {
                out.push(DecileRow {
                    month,
                    percentile,
                    value,
                });
            }
        }
    }
    out
}

/// Mean rate of one region across a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionRate {
    pub region: String,
    pub ml_per_1000_pts: f64,
    pub months: usize,
}

/// Per-region mean of the defined rates inside `window`, ordered by region.
pub fn region_means(rates: &[RateMeasure], window: &MonthWindow) -> Vec<RegionRate> {
    let mut acc: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for r in rates.iter().filter(|r| window.contains(r.month)) {
        if let Some(v) = r.ml_per_1000_pts {
            let e = acc.entry(r.region.as_str()).or_insert((0.0, 0));
            e.0 += v;
            e.1 += 1;
        }
    }
    acc.into_iter()
        .map(|(region, (sum, months))| RegionRate {
            region: region.to_string(),
            ml_per_1000_pts: sum / months as f64,
            months,
        })
        .collect()
}

/// One region's rows, by month.
pub fn region_series(rates: &[RateMeasure], region: &str) -> Vec<RateMeasure> {
    let mut rows: Vec<RateMeasure> = rates.iter().filter(|r| r.region == region).cloned().collect();
    rows.sort_by_key(|r| r.month);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month(m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, m, 1).unwrap()
    }

    fn rate(region: &str, m: u32, v: Option<f64>) -> RateMeasure {
        RateMeasure {
            region: region.to_string(),
            month: month(m),
            quantity_times_item: 0.0,
            list_size: 1.0,
            ml_per_1000_pts: v,
        }
    }

    #[test]
    fn quantile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        let close = |got: Option<f64>, want: f64| (got.unwrap() - want).abs() < 1e-9;
        assert!(close(quantile(&v, 0.5), 3.0));
        assert!(close(quantile(&v, 0.1), 1.4));
        assert!(close(quantile(&v, 0.9), 4.6));
        assert_eq!(quantile(&[7.0], 0.3), Some(7.0));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn nine_deciles_per_month() {
        let mut rates: Vec<RateMeasure> = (0..11)
            .map(|i| rate(&format!("R{:02}", i), 6, Some(i as f64 * 10.0)))
            .collect();
        rates.push(rate("ZZZ", 6, None));
        rates.push(rate("R00", 7, Some(1.0)));

        let rows = deciles(&rates);
        let june: Vec<_> = rows.iter().filter(|r| r.month == month(6)).collect();
        assert_eq!(june.len(), 9);
        assert_eq!(june[0].percentile, 10);
        assert!((june[0].value - 10.0).abs() < 1e-9);
        assert!((june[4].value - 50.0).abs() < 1e-9);
        assert_eq!(june[8].percentile, 90);

        let july: Vec<_> = rows.iter().filter(|r| r.month == month(7)).collect();
        assert!(july.iter().all(|r| r.value == 1.0));
    }

    #[test]
    fn means_respect_window_and_skip_undefined() {
        let rates = vec![
            rate("15N", 1, Some(2.0)),
            rate("15N", 2, Some(4.0)),
            rate("15N", 3, None),
            rate("99A", 5, Some(9.0)),
        ];
        let window = MonthWindow::new(month(1), month(3)).unwrap();
        let means = region_means(&rates, &window);
        assert_eq!(means.len(), 1);
        assert_eq!(means[0].region, "15N");
        assert_eq!(means[0].ml_per_1000_pts, 3.0);
        assert_eq!(means[0].months, 2);
    }

    #[test]
    fn series_is_one_region_in_order() {
        let rates = vec![
            rate("15N", 3, Some(1.0)),
            rate("99A", 1, Some(1.0)),
            rate("15N", 1, Some(2.0)),
        ];
        let s = region_series(&rates, "15N");
        assert_eq!(s.len(), 2);
        assert_eq!(s[0].month, month(1));
    }
}
