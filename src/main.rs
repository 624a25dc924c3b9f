use anyhow::{Context, Result};
use oramorph::{bq::BigQueryClient, cache::FsStore, config::Config, report};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    // ─── 2) config, cache, remote ────────────────────────────────────
    let cfg = Config::load().context("loading config")?;
    let store = FsStore::new(&cfg.cache_dir).context("opening cache")?;
    info!(cache = %store.root().display(), "cache ready");
    let client = BigQueryClient::new(&cfg.bigquery).context("creating BigQuery client")?;

    // ─── 3) fetch → transform → chart specs ──────────────────────────
    let report = report::run(&cfg, &client, &store).context("running analysis")?;

    for q in &report.top_quantities {
        info!(
            quantity_per_item = q.quantity_per_item,
            total_items = q.totals.total_items,
            quantity_times_item = q.totals.quantity_times_item,
            "largest quantity per prescription"
        );
    }
    info!(
        threshold = cfg.analysis.excess_threshold,
        items = report.excess_items,
        "excessive prescriptions in window"
    );

    // ─── 4) write charts ─────────────────────────────────────────────
    for chart in &report.charts {
        chart
            .write_to(&cfg.output_dir)
            .with_context(|| format!("writing chart {}", chart.name))?;
    }

    info!(charts = report.charts.len(), "all done");
    Ok(())
}
