// src/report.rs

//! The full analysis: fetch both tables, derive every measure, build every chart.

use tracing::{info, warn};

use crate::bq::QueryBackend;
use crate::cache::{cached_read, CacheStore};
use crate::charts::{vegalite, Chart};
use crate::config::Config;
use crate::error::Result;
use crate::pipeline::{
    deciles, excess_items, join_population, national_totals, rank_by_quantity, region_means,
    region_series, totals_by_quantity, volume_by_region_month, with_volume, within_window,
    LikePattern, MonthTotals, QuantityTotals,
};
use crate::queries::{prescribing_sql, LIST_SIZE_SQL};
use crate::records::{FromBatch, PopulationStat, PrescribingRecord, RateMeasure};

const PRESCRIBING_KEY_PREFIX: &str = "oramorph_ccg";
pub const LIST_SIZE_KEY: &str = "listsize_ccg.csv";

/// Cache key for the prescribing query built from `bnf_pattern`, so each
/// pattern gets its own snapshot. `%` becomes `-`; anything other than
/// ASCII alphanumerics and `_` is written as `~XX` per byte, keeping the
/// mapping one-to-one.
pub fn prescribing_key(bnf_pattern: &str) -> String {
    let mut key = format!("{}_", PRESCRIBING_KEY_PREFIX);
    for b in bnf_pattern.bytes() {
        match b {
            b'%' => key.push('-'),
            b if b.is_ascii_alphanumeric() || b == b'_' => key.push(b as char),
            other => key.push_str(&format!("~{:02X}", other)),
        }
    }
    key.push_str(".csv");
    key
}

/// Axis tops for the national charts.
const ITEMS_Y_MAX: f64 = 250_000.0;
const VOLUME_Y_MAX: f64 = 60_000_000.0;
const COST_Y_MAX: f64 = 1_200_000.0;

#[derive(Debug)]
pub struct Report {
    pub national: Vec<MonthTotals>,
    /// Window totals per dose-per-item, largest dose first.
    pub top_quantities: Vec<QuantityTotals>,
    /// Items in the window dispensed at or above the excess threshold.
    pub excess_items: f64,
    pub rates: Vec<RateMeasure>,
    pub charts: Vec<Chart>,
}

pub fn run(cfg: &Config, backend: &dyn QueryBackend, store: &dyn CacheStore) -> Result<Report> {
    let analysis = &cfg.analysis;
    let window = analysis.window()?;
    let pattern = LikePattern::new(&analysis.bnf_pattern)?;

    // ─── fetch ───────────────────────────────────────────────────────
    let rx_batch = cached_read(
        backend,
        store,
        &prescribing_sql(pattern.as_str()),
        &prescribing_key(pattern.as_str()),
    )?;
    // Entries are per pattern, but a hand-placed file can still hold strays.
    let (prescribing, dropped) = pattern.retain(PrescribingRecord::from_batch(&rx_batch)?);
    if dropped > 0 {
        warn!(dropped, pattern = pattern.as_str(), "cached rows outside the BNF pattern ignored");
    }
    info!(rows = prescribing.len(), "prescribing rows");

    let list_batch = cached_read(backend, store, LIST_SIZE_SQL, LIST_SIZE_KEY)?;
    let population = PopulationStat::from_batch(&list_batch)?;
    info!(rows = population.len(), "list size rows");

    // ─── national trends ─────────────────────────────────────────────
    let volumes = with_volume(prescribing);
    let national = national_totals(&volumes);

    // ─── quantity per prescription ───────────────────────────────────
    let in_window = within_window(&volumes, &window);
    let by_quantity = totals_by_quantity(&in_window);
    let top_quantities = rank_by_quantity(&by_quantity, analysis.top_quantities);
    let excess = excess_items(&by_quantity, analysis.excess_threshold);
    info!(
        threshold = analysis.excess_threshold,
        items = excess,
        "items at or above the excess threshold"
    );

    // ─── regional variation ──────────────────────────────────────────
    let regional = volume_by_region_month(&volumes);
    let rates = join_population(&regional, &population);
    let decile_rows = deciles(&rates);
    let subject = region_series(&rates, &analysis.subject_region);
    let map_rates = region_means(&rates, &window);

    let period = format!("{} to {}", window.start.format("%b %Y"), window.end.format("%b %Y"));
    let charts = vec![
        vegalite::line(
            "national_items",
            "Total number of items of Oramorph",
            &national,
            "month",
            "total_items",
            Some(ITEMS_Y_MAX),
        )?,
        vegalite::line(
            "national_volume",
            "Total millilitres of Oramorph",
            &national,
            "month",
            "quantity_times_item",
            Some(VOLUME_Y_MAX),
        )?,
        vegalite::line(
            "national_cost",
            "Total cost [£] of Oramorph",
            &national,
            "month",
            "total_cost",
            Some(COST_Y_MAX),
        )?,
        vegalite::histogram(
            "quantity_histogram",
            &format!("Items by quantity per prescription\n{}", period),
            &by_quantity,
            "quantity_per_item",
            "total_items",
            40,
        )?,
        vegalite::bar(
            "quantity_bar",
            &format!("Items by quantity per prescription\n{}", period),
            &by_quantity,
            "quantity_per_item",
            "total_items",
        )?,
        vegalite::deciles(
            "rate_deciles",
            "Millilitres of Oramorph per 1000 patients\nCCG deciles",
            &decile_rows,
            &subject,
            &analysis.subject_region,
        )?,
        vegalite::choropleth(
            "rate_map",
            &format!("Millilitres of Oramorph per 1000 patients\nEngland {}", period),
            &map_rates,
            &cfg.boundaries_url,
            "ccg_boundaries",
        )?,
    ];

    Ok(Report {
        national,
        top_quantities,
        excess_items: excess,
        rates,
        charts,
    })
}
