//! ValRank CLI: fetch valuation history and rank it.
//!
//! Commands:
//! - `fetch`: sync a security into the local Parquet cache
//! - `rank`: percentile-rank PE or PB over a range (or trailing) and print it
//! - `current`: latest valuation, its trailing percentile and zone
//! - `history`: recently used securities
//! - `cache status`: report cache size, security count, date ranges
//! - `cache forget`: remove a security from the cache and registry

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use valrank_core::config::{AppConfig, LookbackRange, ProviderKind};
use valrank_core::data::{
    CancelToken, CircuitBreaker, CsvProvider, DataProvider, SecurityRegistry, SyncOutcome,
    SyncPipeline, SyncRequest, SyncSource, SyntheticProvider, TracingProgress, YahooProvider,
};
use valrank_core::domain::{MetricSelector, SecurityCode};
use valrank_core::logging::{init_logging, LogFormat};
use valrank_core::percentile::{
    compute, compute_trailing, current_valuation, RankMode, RankedSeries, ValueSource,
    ZoneThresholds,
};

#[derive(Parser)]
#[command(
    name = "valrank",
    about = "ValRank: historical PE/PB percentile ranking"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data provider: yahoo, csv or synthetic. Overrides the config file.
    #[arg(long, global = true)]
    provider: Option<ProviderKind>,

    /// Cache directory. Overrides the config file.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Directory of CSV exports for the csv provider.
    #[arg(long, global = true)]
    csv_dir: Option<PathBuf>,

    /// Log output format: pretty or json.
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync a security's daily history into the local cache.
    Fetch {
        /// Security code (e.g. 600519, sh.600519, sz.000001).
        code: String,

        /// Start date (YYYY-MM-DD). Defaults to the configured look-back.
        #[arg(long)]
        start: Option<NaiveDate>,

        /// End date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Re-download even if cached.
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Offline mode: cache only, no network access.
        #[arg(long, default_value_t = false)]
        offline: bool,
    },
    /// Percentile-rank a valuation metric and print the ranked series.
    Rank {
        code: String,

        /// Valuation metric: pe or pb.
        #[arg(long, default_value = "pe")]
        metric: MetricSelector,

        /// Look-back preset: 1y, 3y, 5y, 10y or all. Ignored when --start is given.
        #[arg(long)]
        range: Option<LookbackRange>,

        #[arg(long)]
        start: Option<NaiveDate>,

        #[arg(long)]
        end: Option<NaiveDate>,

        /// Rank each day against its own history only.
        #[arg(long, default_value_t = false)]
        trailing: bool,

        /// Trailing mode: restrict to the last N days before ranking.
        #[arg(long, requires = "trailing")]
        window_days: Option<u32>,

        /// Only print rows from this date on (percentiles are not recomputed).
        #[arg(long)]
        visible_from: Option<NaiveDate>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,

        /// Table format: number of most recent rows to print (0 for all).
        #[arg(long, default_value_t = 20)]
        tail: usize,

        #[arg(long, default_value_t = false)]
        offline: bool,
    },
    /// Latest valuation with its trailing percentile and zone.
    Current {
        code: String,

        #[arg(long, default_value = "pe")]
        metric: MetricSelector,

        /// Look-back in years. Defaults to the configured value.
        #[arg(long)]
        years: Option<u32>,

        #[arg(long, default_value_t = false)]
        offline: bool,
    },
    /// List recently used securities.
    History,
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cache size, security count, and date ranges.
    Status,
    /// Remove a security from the cache and the registry.
    Forget { code: String },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }
    if let Some(provider) = cli.provider {
        config.provider = provider;
    }
    if let Some(dir) = cli.csv_dir {
        config.csv_dir = dir;
    }
    init_logging(&config.log_level, cli.log_format);
    tracing::debug!(?config, "resolved configuration");

    match cli.command {
        Commands::Fetch {
            code,
            start,
            end,
            force,
            offline,
        } => run_fetch(&config, &code, start, end, force, offline),
        Commands::Rank {
            code,
            metric,
            range,
            start,
            end,
            trailing,
            window_days,
            visible_from,
            format,
            tail,
            offline,
        } => {
            let opts = RankOptions {
                metric,
                range,
                start,
                end,
                trailing,
                window_days,
                visible_from,
                format,
                tail,
            };
            run_rank(&config, &code, &opts, offline)
        }
        Commands::Current {
            code,
            metric,
            years,
            offline,
        } => run_current(&config, &code, metric, years, offline),
        Commands::History => run_history(&config),
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&config),
            CacheAction::Forget { code } => run_cache_forget(&config, &code),
        },
    }
}

fn build_provider(config: &AppConfig) -> Result<Box<dyn DataProvider>> {
    Ok(match config.provider {
        ProviderKind::Yahoo => {
            let circuit_breaker = Arc::new(CircuitBreaker::for_http());
            Box::new(YahooProvider::new(circuit_breaker)?)
        }
        ProviderKind::Csv => Box::new(CsvProvider::new(&config.csv_dir)),
        ProviderKind::Synthetic => Box::new(SyntheticProvider),
    })
}

fn build_pipeline(config: &AppConfig, offline: bool) -> Result<SyncPipeline> {
    if offline {
        return Ok(SyncPipeline::offline(&config.cache_dir));
    }
    Ok(SyncPipeline::new(&config.cache_dir, build_provider(config)?))
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn sync(
    config: &AppConfig,
    code: &str,
    request: SyncRequest,
    offline: bool,
) -> Result<SyncOutcome> {
    let pipeline = build_pipeline(config, offline)?;
    let outcome = pipeline.sync(code, request, &TracingProgress, &CancelToken::new())?;
    if let SyncSource::StaleCache { reason } = &outcome.source {
        eprintln!("warning: using cached data ({reason})");
    }
    if let Some(note) = outcome.freshness.note() {
        eprintln!("note: {note}");
    }
    Ok(outcome)
}

fn display_name(outcome: &SyncOutcome) -> String {
    match &outcome.name {
        Some(name) => format!("{} {name}", outcome.code),
        None => outcome.code.to_string(),
    }
}

fn run_fetch(
    config: &AppConfig,
    code: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    force: bool,
    offline: bool,
) -> Result<()> {
    let end = end.unwrap_or_else(today);
    let start = start.unwrap_or_else(|| config.default_range().start_or_earliest(end));
    if start > end {
        bail!("--start {start} is after --end {end}");
    }

    let outcome = sync(config, code, SyncRequest { start, end, force }, offline)?;

    println!("Security:  {}", display_name(&outcome));
    match (outcome.series.first_date(), outcome.series.last_date()) {
        (Some(first), Some(last)) => println!("Period:    {first} to {last}"),
        _ => println!("Period:    (no rows in range)"),
    }
    println!("Rows:      {}", outcome.series.len());
    let fields = outcome.series.fields();
    println!(
        "Columns:   close{}{}",
        if fields.has_pe { ", pe" } else { "" },
        if fields.has_pb { ", pb" } else { "" }
    );
    match &outcome.source {
        SyncSource::Cache => println!("Source:    cache (up to date)"),
        SyncSource::Fetched { source, rows } => println!("Source:    {source} (+{rows} rows)"),
        SyncSource::StaleCache { .. } => println!("Source:    cache (stale)"),
    }
    Ok(())
}

struct RankOptions {
    metric: MetricSelector,
    range: Option<LookbackRange>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    trailing: bool,
    window_days: Option<u32>,
    visible_from: Option<NaiveDate>,
    format: OutputFormat,
    tail: usize,
}

fn run_rank(config: &AppConfig, code: &str, opts: &RankOptions, offline: bool) -> Result<()> {
    let end = opts.end.unwrap_or_else(today);
    let range = opts.range.unwrap_or_else(|| config.default_range());
    let start = opts.start.unwrap_or_else(|| range.start_or_earliest(end));
    if start > end {
        bail!("--start {start} is after --end {end}");
    }

    let outcome = sync(
        config,
        code,
        SyncRequest {
            start,
            end,
            force: false,
        },
        offline,
    )?;

    let mut ranked = if opts.trailing {
        compute_trailing(&outcome.series, opts.metric, opts.window_days)
    } else {
        compute(&outcome.series, Some(start), Some(end), opts.metric)
    };
    if let Some(from) = opts.visible_from {
        ranked = ranked.visible(Some(from), None);
    }

    if ranked.is_price_fallback() {
        eprintln!(
            "warning: no {} column in this data; ranking the close price instead (reduced fidelity)",
            opts.metric.label()
        );
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match opts.format {
        OutputFormat::Json => {
            let doc = serde_json::json!({
                "name": outcome.name,
                "freshness": outcome.freshness,
                "ranked": ranked,
            });
            serde_json::to_writer_pretty(&mut out, &doc)?;
            writeln!(out)?;
        }
        OutputFormat::Csv => write_csv(&mut out, &ranked)?,
        OutputFormat::Table => {
            let thresholds = config.thresholds.for_metric(opts.metric);
            print_table(&mut out, &outcome, &ranked, thresholds, opts.tail)?
        }
    }
    Ok(())
}

fn format_opt(v: Option<f64>, precision: usize) -> String {
    v.map(|v| format!("{v:.precision$}")).unwrap_or_default()
}

fn write_csv(out: &mut impl Write, ranked: &RankedSeries) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record([
        "date",
        "close",
        ranked.metric.value_field(),
        ranked.metric.percentile_field(),
    ])?;
    for r in ranked.records() {
        writer.write_record([
            r.date().to_string(),
            format!("{:.4}", r.close()),
            format_opt(r.value, 4),
            format_opt(r.percentile, 4),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn print_table(
    out: &mut impl Write,
    outcome: &SyncOutcome,
    ranked: &RankedSeries,
    thresholds: &ZoneThresholds,
    tail: usize,
) -> Result<()> {
    let label = ranked.metric.label();
    writeln!(out)?;
    writeln!(out, "=== {} {} percentile ===", display_name(outcome), label)?;
    match ranked.mode {
        RankMode::Range { start, end } => writeln!(
            out,
            "Mode:      range {} to {}",
            start.map(|d| d.to_string()).unwrap_or_else(|| "start".into()),
            end.map(|d| d.to_string()).unwrap_or_else(|| "end".into())
        )?,
        RankMode::Trailing { window_days } => match window_days {
            Some(days) => writeln!(out, "Mode:      trailing, last {days} days")?,
            None => writeln!(out, "Mode:      trailing, full history")?,
        },
    }
    writeln!(
        out,
        "Rows:      {} ({} ranked)",
        ranked.len(),
        ranked.ranked_count()
    )?;

    if let Some(latest) = ranked.latest() {
        let zone = thresholds
            .classify(latest.percentile)
            .map(|z| z.to_string())
            .unwrap_or_else(|| "n/a".into());
        writeln!(
            out,
            "Latest:    {}  {label} {}  percentile {}  ({zone})",
            latest.date(),
            format_opt(latest.value, 2),
            format_opt(latest.percentile, 1)
        )?;
    }
    if let Some(ext) = ranked.extremes() {
        writeln!(
            out,
            "Low:       {}  {}",
            ext.min.date(),
            format_opt(ext.min.value, 2)
        )?;
        writeln!(
            out,
            "High:      {}  {}",
            ext.max.date(),
            format_opt(ext.max.value, 2)
        )?;
    }
    if ranked.is_empty() {
        writeln!(out, "(no rows)")?;
        return Ok(());
    }

    writeln!(out)?;
    writeln!(out, "{:<12} {:>10} {:>10} {:>10}", "Date", "Close", label, "Pctl")?;
    writeln!(out, "{}", "-".repeat(45))?;
    let skip = if tail == 0 {
        0
    } else {
        ranked.len().saturating_sub(tail)
    };
    for r in &ranked.records()[skip..] {
        writeln!(
            out,
            "{:<12} {:>10.2} {:>10} {:>10}",
            r.date(),
            r.close(),
            format_opt(r.value, 2),
            format_opt(r.percentile, 1)
        )?;
    }
    Ok(())
}

fn run_current(
    config: &AppConfig,
    code: &str,
    metric: MetricSelector,
    years: Option<u32>,
    offline: bool,
) -> Result<()> {
    let years = years.unwrap_or(config.default_years);
    if years == 0 {
        bail!("--years must be at least 1");
    }
    let end = today();
    let start = LookbackRange::Years(years).start_or_earliest(end);

    let outcome = sync(
        config,
        code,
        SyncRequest {
            start,
            end,
            force: false,
        },
        offline,
    )?;

    let Some(current) = current_valuation(&outcome.series, metric, Some(years)) else {
        bail!("no data for {} in the last {years} years", outcome.code);
    };
    if current.source == ValueSource::ClosePrice {
        eprintln!(
            "warning: no {} column in this data; ranking the close price instead (reduced fidelity)",
            metric.label()
        );
    }

    let zone = current
        .zone(config.thresholds.for_metric(metric))
        .map(|z| z.to_string())
        .unwrap_or_else(|| "n/a".into());

    println!("Security:    {}", display_name(&outcome));
    println!("Date:        {}", current.date);
    println!("Close:       {:.2}", current.close);
    println!("{:<12} {}", format!("{}:", metric.label()), format_opt(current.value, 2));
    println!(
        "Percentile:  {} ({years}y, {} days)",
        format_opt(current.percentile, 1),
        current.total_days
    );
    println!("Zone:        {zone}");
    Ok(())
}

fn run_history(config: &AppConfig) -> Result<()> {
    let entries = SecurityRegistry::in_cache_dir(&config.cache_dir).list();
    if entries.is_empty() {
        println!("No securities used yet.");
        return Ok(());
    }

    println!("{:<12} {:<24} {:<20}", "Code", "Name", "Last used");
    println!("{}", "-".repeat(58));
    for e in entries {
        println!(
            "{:<12} {:<24} {:<20}",
            e.code,
            e.name.unwrap_or_default(),
            e.last_used.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn run_cache_status(config: &AppConfig) -> Result<()> {
    let pipeline = SyncPipeline::offline(&config.cache_dir);
    let cache_dir = pipeline.cache().cache_dir();
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }

    let statuses = pipeline.cache().status()?;
    if statuses.is_empty() {
        println!("Cache is empty: {}", cache_dir.display());
        return Ok(());
    }
    let total_size: u64 = statuses.iter().map(|s| s.size_bytes).sum();

    println!("Cache: {}", cache_dir.display());
    println!("Securities: {}", statuses.len());
    println!("Total size: {}", format_size(total_size));
    println!();
    println!(
        "{:<12} {:<25} {:<10} {:<8} {:>10}",
        "Code", "Date Range", "Rows", "Columns", "Size"
    );
    println!("{}", "-".repeat(69));
    for s in &statuses {
        let (range, rows, columns) = match &s.meta {
            Some(meta) => (
                format!("{} to {}", meta.start_date, meta.end_date),
                meta.row_count.to_string(),
                match (meta.fields.has_pe, meta.fields.has_pb) {
                    (true, true) => "pe,pb",
                    (true, false) => "pe",
                    (false, true) => "pb",
                    (false, false) => "close",
                },
            ),
            None => ("(no meta)".into(), "-".into(), "-"),
        };
        println!(
            "{:<12} {:<25} {:<10} {:<8} {:>10}",
            s.code,
            range,
            rows,
            columns,
            format_size(s.size_bytes)
        );
    }
    Ok(())
}

fn run_cache_forget(config: &AppConfig, code: &str) -> Result<()> {
    let code = SecurityCode::normalize(code).context("invalid security code")?;
    let pipeline = SyncPipeline::offline(&config.cache_dir);

    let removed = pipeline.cache().remove(code.as_str())?;
    let forgotten = pipeline.registry().forget(code.as_str())?;
    if removed || forgotten {
        println!("Removed: {code}");
    } else {
        println!("Not cached: {code}");
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
