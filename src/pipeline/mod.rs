// src/pipeline/mod.rs

//! Pure transformations between the fetched tables and the charts.

use chrono::NaiveDate;
use serde::Serialize;
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    ops::AddAssign,
};
use tracing::{debug, warn};

use crate::error::{Result, RxError};
use crate::records::{
    PopulationStat, PrescribingRecord, RateMeasure, RegionMonthVolume, VolumeRecord,
};

pub mod deciles;
pub mod like;

pub use deciles::{deciles, region_means, region_series, DecileRow, RegionRate};
pub use like::LikePattern;

/// Inclusive `[start, end]` range of months.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl MonthWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(RxError::Data(format!(
                "window start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, month: NaiveDate) -> bool {
        self.start <= month && month <= self.end
    }
}

/// Rows that carry a month.
pub trait Monthly {
    fn month(&self) -> NaiveDate;
}

impl Monthly for VolumeRecord {
    fn month(&self) -> NaiveDate {
        self.record.month
    }
}

impl Monthly for RegionMonthVolume {
    fn month(&self) -> NaiveDate {
        self.month
    }
}

impl Monthly for RateMeasure {
    fn month(&self) -> NaiveDate {
        self.month
    }
}

pub fn within_window<T: Monthly + Clone>(rows: &[T], window: &MonthWindow) -> Vec<T> {
    rows.iter()
        .filter(|r| window.contains(r.month()))
        .cloned()
        .collect()
}

/// Attach `quantity_times_item = quantity_per_item * total_items`.
pub fn with_volume(rows: Vec<PrescribingRecord>) -> Vec<VolumeRecord> {
    rows.into_iter()
        .map(|record| {
            let quantity_times_item = record.quantity_per_item * record.total_items;
            VolumeRecord {
                record,
                quantity_times_item,
            }
        })
        .collect()
}

/// The summable columns of a prescribing row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Totals {
    pub total_items: f64,
    pub quantity_times_item: f64,
    pub total_cost: f64,
}

impl AddAssign for Totals {
    fn add_assign(&mut self, rhs: Self) {
        self.total_items += rhs.total_items;
        self.quantity_times_item += rhs.quantity_times_item;
        self.total_cost += rhs.total_cost;
    }
}

impl From<&VolumeRecord> for Totals {
    fn from(r: &VolumeRecord) -> Self {
        Totals {
            total_items: r.record.total_items,
            quantity_times_item: r.quantity_times_item,
            total_cost: r.record.total_cost,
        }
    }
}

/// Group `rows` by `key` and sum their totals. Keys come back ordered.
pub fn group_sum<T, K, F>(rows: &[T], key: F) -> BTreeMap<K, Totals>
where
    K: Ord,
    F: Fn(&T) -> K,
    for<'a> &'a T: Into<Totals>,
{
    let mut groups: BTreeMap<K, Totals> = BTreeMap::new();
    for row in rows {
        let totals: Totals = row.into();
        *groups.entry(key(row)).or_default() += totals;
    }
    groups
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthTotals {
    pub month: NaiveDate,
    #[serde(flatten)]
    pub totals: Totals,
}

/// National series: items, volume and cost per month.
pub fn national_totals(rows: &[VolumeRecord]) -> Vec<MonthTotals> {
    group_sum(rows, |r| r.record.month)
        .into_iter()
        .map(|(month, totals)| MonthTotals { month, totals })
        .collect()
}

/// Total-ordered wrapper so a dose can key a `BTreeMap`.
#[derive(Debug, Clone, Copy)]
struct Dose(f64);

impl PartialEq for Dose {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Dose {}

impl PartialOrd for Dose {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dose {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuantityTotals {
    pub quantity_per_item: f64,
    #[serde(flatten)]
    pub totals: Totals,
}

/// Sum per dose-per-item. Volume is recomputed from the summed item count.
pub fn totals_by_quantity(rows: &[VolumeRecord]) -> Vec<QuantityTotals> {
    group_sum(rows, |r| Dose(r.record.quantity_per_item))
        .into_iter()
        .map(|(Dose(q), mut totals)| {
            totals.quantity_times_item = q * totals.total_items;
            QuantityTotals {
                quantity_per_item: q,
                totals,
            }
        })
        .collect()
}

/// Largest doses first (ties: more items first), truncated to `n`.
pub fn rank_by_quantity(rows: &[QuantityTotals], n: usize) -> Vec<QuantityTotals> {
    let mut ranked = rows.to_vec();
    ranked.sort_by(|a, b| {
        b.quantity_per_item
            .total_cmp(&a.quantity_per_item)
            .then(b.totals.total_items.total_cmp(&a.totals.total_items))
    });
    ranked.truncate(n);
    ranked
}

/// Items dispensed at a dose of `threshold` or more.
pub fn excess_items(rows: &[QuantityTotals], threshold: f64) -> f64 {
    rows.iter()
        .filter(|r| r.quantity_per_item >= threshold)
        .map(|r| r.totals.total_items)
        .sum()
}

/// Volume per (region, month), ordered by region then month.
pub fn volume_by_region_month(rows: &[VolumeRecord]) -> Vec<RegionMonthVolume> {
    group_sum(rows, |r| (r.record.region.clone(), r.record.month))
        .into_iter()
        .map(|((region, month), totals)| RegionMonthVolume {
            region,
            month,
            quantity_times_item: totals.quantity_times_item,
        })
        .collect()
}

/// `1000 * numerator / denominator`, or `None` when the denominator is zero,
/// negative or not finite.
pub fn rate_per_1000(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator.is_finite() && denominator > 0.0 {
        Some(1000.0 * numerator / denominator)
    } else {
        None
    }
}

/// Inner join on (region, month). Pairs missing from either side are dropped.
pub fn join_population(
    volumes: &[RegionMonthVolume],
    population: &[PopulationStat],
) -> Vec<RateMeasure> {
    let lookup: HashMap<(&str, NaiveDate), f64> = population
        .iter()
        .map(|p| ((p.region.as_str(), p.month), p.list_size))
        .collect();

    let mut undefined = 0usize;
    let joined: Vec<RateMeasure> = volumes
        .iter()
        .filter_map(|v| {
            let list_size = *lookup.get(&(v.region.as_str(), v.month))?;
            let rate = rate_per_1000(v.quantity_times_item, list_size);
            if rate.is_none() {
                undefined += 1;
                warn!(region = %v.region, month = %v.month, list_size, "no usable list size; rate left undefined");
            }
            Some(RateMeasure {
                region: v.region.clone(),
                month: v.month,
                quantity_times_item: v.quantity_times_item,
                list_size,
                ml_per_1000_pts: rate,
            })
        })
        .collect();

    debug!(
        left = volumes.len(),
        right = population.len(),
        joined = joined.len(),
        undefined,
        "joined volumes with list sizes"
    );
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn month(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    fn rx(region: &str, m: NaiveDate, qty: f64, items: f64, cost: f64) -> PrescribingRecord {
        PrescribingRecord {
            region: region.to_string(),
            month: m,
            bnf_name: "Morphine 10mg/5ml oral solution".to_string(),
            bnf_code: "0407020Q0AAAFAF".to_string(),
            quantity_per_item: qty,
            total_items: items,
            total_cost: cost,
        }
    }

    fn sample() -> Vec<VolumeRecord> {
        with_volume(vec![
            rx("15N", month(2019, 6), 500.0, 10.0, 20.0),
            rx("15N", month(2019, 6), 100.0, 3.0, 2.5),
            rx("99A", month(2019, 6), 500.0, 1.0, 2.0),
            rx("15N", month(2019, 7), 300.0, 2.0, 1.0),
            rx("99A", month(2018, 12), 6000.0, 4.0, 90.0),
            rx("99A", month(2020, 1), 7000.0, 2.0, 80.0),
        ])
    }

    #[test]
    fn volume_is_dose_times_items() {
        let rows = sample();
        assert_eq!(rows[0].quantity_times_item, 5000.0);
        for r in &rows {
            assert_eq!(
                r.quantity_times_item,
                r.record.quantity_per_item * r.record.total_items
            );
        }
    }

    #[test]
    fn national_totals_sum_each_month() {
        let totals = national_totals(&sample());
        let june = totals.iter().find(|t| t.month == month(2019, 6)).unwrap();
        assert_eq!(june.totals.total_items, 14.0);
        assert_eq!(june.totals.quantity_times_item, 5000.0 + 300.0 + 500.0);
        assert_eq!(june.totals.total_cost, 24.5);
        // ordered by month
        let months: Vec<_> = totals.iter().map(|t| t.month).collect();
        let mut sorted = months.clone();
        sorted.sort();
        assert_eq!(months, sorted);
    }

    #[test]
    fn window_is_inclusive() {
        let window = MonthWindow::new(month(2019, 1), month(2019, 12)).unwrap();
        let kept = within_window(&sample(), &window);
        assert_eq!(kept.len(), 4);
        assert!(kept.iter().all(|r| window.contains(r.month())));
        assert!(window.contains(month(2019, 1)));
        assert!(window.contains(month(2019, 12)));
        assert!(!window.contains(month(2020, 1)));
        assert!(MonthWindow::new(month(2019, 2), month(2019, 1)).is_err());
    }

    #[test]
    fn region_month_sum_matches_raw_rows() {
        let rows = sample();
        let grouped = volume_by_region_month(&rows);
        for g in &grouped {
            let expected: f64 = rows
                .iter()
                .filter(|r| r.record.region == g.region && r.record.month == g.month)
                .map(|r| r.quantity_times_item)
                .sum();
            assert_eq!(g.quantity_times_item, expected);
        }
        let total: f64 = grouped.iter().map(|g| g.quantity_times_item).sum();
        let raw: f64 = rows.iter().map(|r| r.quantity_times_item).sum();
        assert_eq!(total, raw);
        assert_eq!(grouped.len(), 5);
    }

    #[test]
    fn quantity_ranking_and_excess() {
        let window = MonthWindow::new(month(2018, 1), month(2020, 12)).unwrap();
        let by_qty = totals_by_quantity(&within_window(&sample(), &window));
        let five_hundred = by_qty
            .iter()
            .find(|q| q.quantity_per_item == 500.0)
            .unwrap();
        assert_eq!(five_hundred.totals.total_items, 11.0);
        assert_eq!(five_hundred.totals.quantity_times_item, 5500.0);

        let top = rank_by_quantity(&by_qty, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].quantity_per_item, 7000.0);
        assert_eq!(top[1].quantity_per_item, 6000.0);

        assert_eq!(excess_items(&by_qty, 6000.0), 6.0);
        assert_eq!(excess_items(&by_qty, 10_000.0), 0.0);
    }

    #[test]
    fn join_keeps_only_shared_keys() {
        let volumes = volume_by_region_month(&sample());
        let population = vec![
            PopulationStat {
                region: "15N".into(),
                month: month(2019, 6),
                list_size: 1_000_000.0,
            },
            PopulationStat {
                region: "99A".into(),
                month: month(2019, 6),
                list_size: 0.0,
            },
            PopulationStat {
                region: "00C".into(),
                month: month(2019, 6),
                list_size: 5.0,
            },
        ];
        let joined = join_population(&volumes, &population);

        let left: HashSet<_> = volumes.iter().map(|v| (v.region.clone(), v.month)).collect();
        let right: HashSet<_> = population
            .iter()
            .map(|p| (p.region.clone(), p.month))
            .collect();
        for j in &joined {
            assert!(left.contains(&(j.region.clone(), j.month)));
            assert!(right.contains(&(j.region.clone(), j.month)));
        }
        assert_eq!(joined.len(), 2);
        assert!(joined.len() <= left.len().min(right.len()));

        let devon = joined.iter().find(|j| j.region == "15N").unwrap();
        let expected = 1000.0 * devon.quantity_times_item / devon.list_size;
        assert!((devon.ml_per_1000_pts.unwrap() - expected).abs() < 1e-6);
        assert!((devon.ml_per_1000_pts.unwrap() - 5.3).abs() < 1e-6);

        let zero = joined.iter().find(|j| j.region == "99A").unwrap();
        assert_eq!(zero.ml_per_1000_pts, None);
    }

    #[test]
    fn rate_guards_denominator() {
        assert_eq!(rate_per_1000(5.0, 1000.0), Some(5.0));
        assert_eq!(rate_per_1000(5.0, 0.0), None);
        assert_eq!(rate_per_1000(5.0, -1.0), None);
        assert_eq!(rate_per_1000(5.0, f64::NAN), None);
    }
}
