use anyhow::{Context, Result};
use chartpulse::concentration::ConcentrationAnalyzer;
use chartpulse::model::{ChartSnapshot, Period, Territory};
use chartpulse::movers::MoverRow;
use chartpulse::pipeline::{EnrichOptions, Pipeline};
use chartpulse::source::HttpChartSource;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chartpulse", version, about = "Music chart trends analyzer")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest the current chart snapshot (resolve, enrich, score, store)
    Ingest {
        /// Chart territory
        #[arg(short, long, value_enum)]
        territory: Territory,

        /// Chart cadence
        #[arg(short, long, value_enum, default_value = "weekly")]
        period: Period,

        /// Chart date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<String>,

        /// Skip identifier resolution and metadata enrichment
        #[arg(long)]
        skip_enrich: bool,
    },

    /// Collect a multi-week history window (oldest first)
    History {
        #[arg(short, long, value_enum)]
        territory: Territory,

        #[arg(short, long, value_enum, default_value = "weekly")]
        period: Period,

        /// Number of weeks to collect
        #[arg(short, long, default_value = "12")]
        weeks: u32,
    },

    /// Compare the latest stored week with the previous one
    Compare {
        #[arg(short, long, value_enum)]
        territory: Territory,

        #[arg(short, long, value_enum, default_value = "weekly")]
        period: Period,
    },

    /// Label market share and concentration for the latest stored snapshot
    Labels {
        #[arg(short, long, value_enum)]
        territory: Territory,

        #[arg(short, long, value_enum, default_value = "weekly")]
        period: Period,

        /// Number of labels to display
        #[arg(short = 'n', long, default_value = "15")]
        limit: usize,
    },

    /// Biggest climbers and fallers in the latest stored snapshot
    Movers {
        #[arg(short, long, value_enum)]
        territory: Territory,

        #[arg(short, long, value_enum, default_value = "weekly")]
        period: Period,

        /// Rows per table
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Momentum leaderboard for the latest stored snapshot
    Top {
        #[arg(short, long, value_enum)]
        territory: Territory,

        #[arg(short, long, value_enum, default_value = "weekly")]
        period: Period,

        /// Number of results
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Show stored-snapshot statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = chartpulse::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(chartpulse::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = chartpulse::db::Database::open(&db_path).context("Failed to open database")?;

    match cli.command {
        Commands::Ingest {
            territory,
            period,
            date,
            skip_enrich,
        } => {
            let date = match date {
                Some(d) => NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                    .with_context(|| format!("Invalid date \"{d}\", expected YYYY-MM-DD"))?,
                None => chrono::Utc::now().date_naive(),
            };

            let source = HttpChartSource::new(&config.source.base_url);
            let provider = if skip_enrich {
                None
            } else {
                config.provider_client()
            };
            let pipeline = Pipeline::new(
                &db,
                &source,
                provider.as_ref(),
                config.momentum_weights,
                config.enrich_options(),
                config.source.request_delay_ms,
            );

            let outcome = pipeline
                .ingest(territory, period, date)
                .context("Ingestion failed")?;

            println!(
                "Ingested {}: {} tracks ({} enriched, {} degraded, {} resolved by fuzzy match)",
                outcome.snapshot.key,
                outcome.snapshot.tracks.len(),
                outcome.enrich_stats.enriched,
                outcome.enrich_stats.degraded,
                outcome.resolved,
            );
            print_validation(&outcome.validation);

            let summary = chartpulse::movers::summarize(&outcome.snapshot.tracks, 5);
            if !summary.top_gainers.is_empty() {
                println!();
                println!("Top climbers this week:");
                print_mover_table(&summary.top_gainers);
            }
        }

        Commands::History {
            territory,
            period,
            weeks,
        } => {
            let source = HttpChartSource::new(&config.source.base_url);
            let pipeline = Pipeline::new(
                &db,
                &source,
                None,
                config.momentum_weights,
                EnrichOptions {
                    batch_size: config.provider.batch_size,
                    batch_pause_ms: config.provider.batch_pause_ms,
                },
                config.source.request_delay_ms,
            );

            let today = chrono::Utc::now().date_naive();
            let collected = pipeline
                .collect_history(territory, period, weeks, today)
                .context("History collection failed")?;

            println!("Collected {} weeks for {territory} {period}:", collected.len());
            println!();
            print_history_table(&collected);

            let simulated = collected
                .iter()
                .filter(|s| s.source == chartpulse::model::SnapshotSource::Simulated)
                .count();
            if simulated > 0 {
                println!();
                println!(
                    "{simulated} week(s) are simulated fill-ins; they are excluded from \
                     momentum history and growth comparisons."
                );
            }
        }

        Commands::Compare { territory, period } => {
            let source = HttpChartSource::new(&config.source.base_url);
            let pipeline = Pipeline::new(
                &db,
                &source,
                None,
                config.momentum_weights,
                config.enrich_options(),
                config.source.request_delay_ms,
            );

            let comparison = pipeline
                .compare_week(territory, period)
                .context("Comparison failed")?;

            match comparison {
                None => println!("No snapshots stored for {territory} {period}. Run `chartpulse ingest` first."),
                Some(cmp) => {
                    println!(
                        "Current:  {} ({}, {} tracks)",
                        cmp.current.key, cmp.current.chart_date, cmp.current.aggregates.track_count
                    );
                    match &cmp.previous {
                        Some(prev) => println!(
                            "Previous: {} ({}, {} tracks)",
                            prev.key, prev.chart_date, prev.aggregates.track_count
                        ),
                        None => println!("Previous: none observed (growth reported as 0)"),
                    }
                    println!();
                    println!(
                        "Streams growth:  top 10 {:+.1}%   top 50 {:+.1}%   top 200 {:+.1}%",
                        cmp.growth.top10, cmp.growth.top50, cmp.growth.top200
                    );
                }
            }
        }

        Commands::Labels {
            territory,
            period,
            limit,
        } => {
            let snapshot = require_snapshot(&db, territory, period)?;
            let analyzer = ConcentrationAnalyzer::new(&config.major_labels);
            let report = analyzer.analyze(&snapshot.tracks);

            if report.labels.is_empty() {
                println!("Snapshot {} has no tracks.", snapshot.key);
                return Ok(());
            }

            println!(
                "Label market share for {} ({} labels):",
                snapshot.key,
                report.labels.len()
            );
            println!();
            println!(
                "{:<32} {:>5} {:>6} {:>7} {:>6} {:>6} {:>14}",
                "Label", "Type", "Tracks", "Share%", "AvgPos", "Top10", "Streams"
            );
            println!("{}", "-".repeat(82));
            for label in report.labels.iter().take(limit) {
                let name: String = if label.label.len() > 32 {
                    format!("{}...", &label.label[..29])
                } else {
                    label.label.clone()
                };
                println!(
                    "{:<32} {:>5} {:>6} {:>6.1}% {:>6.1} {:>6} {:>14}",
                    name,
                    match label.label_type {
                        chartpulse::model::LabelType::Major => "major",
                        chartpulse::model::LabelType::Independent => "indie",
                    },
                    label.track_count,
                    label.market_share_pct,
                    label.average_position,
                    label.top10_track_count,
                    label.total_streams,
                );
            }

            println!();
            println!(
                "Concentration: top 3 {:.1}%   top 5 {:.1}%   HHI {:.0}",
                report.concentration.top3_labels_share_pct,
                report.concentration.top5_labels_share_pct,
                report.concentration.hhi_index,
            );
        }

        Commands::Movers {
            territory,
            period,
            limit,
        } => {
            let snapshot = require_snapshot(&db, territory, period)?;
            let summary = chartpulse::movers::summarize(&snapshot.tracks, limit);

            if summary.top_gainers.is_empty() && summary.top_losers.is_empty() {
                println!(
                    "No carried-over tracks in {} (all debuts/re-entries).",
                    snapshot.key
                );
                return Ok(());
            }

            println!("Movers for {}:", snapshot.key);
            println!();
            if !summary.top_gainers.is_empty() {
                println!("Climbers:");
                print_mover_table(&summary.top_gainers);
                println!();
            }
            if !summary.top_losers.is_empty() {
                println!("Fallers:");
                print_mover_table(&summary.top_losers);
                println!();
            }
            println!(
                "Mean delta {:+.2}   median {:+.1}   volatility index {:.2}",
                summary.mean_delta_position,
                summary.median_delta_position,
                summary.volatility_index,
            );
        }

        Commands::Top {
            territory,
            period,
            limit,
        } => {
            let snapshot = require_snapshot(&db, territory, period)?;
            let mut ranked: Vec<&chartpulse::model::TrackAnalysis> =
                snapshot.tracks.iter().collect();
            ranked.sort_by(|a, b| {
                b.features
                    .momentum_score
                    .partial_cmp(&a.features.momentum_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            ranked.truncate(limit);

            println!("Momentum leaderboard for {}:", snapshot.key);
            println!();
            println!(
                "{:<30} {:<20} {:>4} {:>6} {:>5} {:>6} {:>6}",
                "Title", "Artist", "Pos", "Mom", "Delta", "Spd4w", "Accel"
            );
            println!("{}", "-".repeat(84));
            for t in ranked {
                println!(
                    "{:<30} {:<20} {:>4} {:>6.1} {:>+5} {:>6.1} {:>+6.1}",
                    truncate(&t.entry.title, 30),
                    truncate(&t.entry.artist, 20),
                    t.entry.position,
                    t.features.momentum_score,
                    t.features.delta_position,
                    t.features.speed_4w,
                    t.features.acceleration,
                );
            }
        }

        Commands::Stats => {
            let stats = db.stats().context("Failed to get stats")?;
            println!("Store Statistics");
            println!("================");
            println!("Total snapshots:     {}", stats.total_snapshots);
            println!("Observed snapshots:  {}", stats.observed_snapshots);
            println!("Simulated snapshots: {}", stats.simulated_snapshots);

            if !stats.series.is_empty() {
                println!();
                println!(
                    "{:<10} {:<8} {:>6}  {:<12} {:<12}",
                    "Territory", "Period", "Weeks", "From", "To"
                );
                println!("{}", "-".repeat(54));
                for (territory, period, count, from, to) in &stats.series {
                    println!(
                        "{:<10} {:<8} {:>6}  {:<12} {:<12}",
                        territory, period, count, from, to
                    );
                }
            }
        }
    }

    Ok(())
}

/// Load the latest stored snapshot for a series or bail with a hint.
fn require_snapshot(
    db: &chartpulse::db::Database,
    territory: Territory,
    period: Period,
) -> Result<ChartSnapshot> {
    db.latest_snapshot(territory, period)
        .context("Query failed")?
        .with_context(|| {
            format!("No snapshots stored for {territory} {period}. Run `chartpulse ingest` first.")
        })
}

fn print_validation(report: &chartpulse::pipeline::ValidationReport) {
    if report.is_valid {
        println!(
            "Validation: OK ({:.1}% complete)",
            report.completeness_pct
        );
    } else {
        println!(
            "Validation: {} issue(s), {:.1}% complete",
            report.issues.len(),
            report.completeness_pct
        );
        for issue in &report.issues {
            println!("  - {issue}");
        }
    }
}

/// Print a table of mover rows.
fn print_mover_table(rows: &[MoverRow]) {
    println!(
        "{:<30} {:<20} {:>4} {:>6} {:>8} {:>6}",
        "Title", "Artist", "Pos", "Delta", "Strm%", "Mom"
    );
    println!("{}", "-".repeat(80));
    for row in rows {
        println!(
            "{:<30} {:<20} {:>4} {:>+6} {:>+7.1}% {:>6.1}",
            truncate(&row.title, 30),
            truncate(&row.artist, 20),
            row.position,
            row.delta_position,
            row.delta_streams_pct,
            row.momentum_score,
        );
    }
}

/// Print a per-week history table.
fn print_history_table(snapshots: &[ChartSnapshot]) {
    println!(
        "{:<20} {:<12} {:<9} {:>6} {:>13} {:>13} {:>14} {:>6} {:>4}",
        "Week", "Date", "Source", "Tracks", "Top10", "Top50", "Top200", "Debuts", "ReE"
    );
    println!("{}", "-".repeat(106));
    for s in snapshots {
        println!(
            "{:<20} {:<12} {:<9} {:>6} {:>13} {:>13} {:>14} {:>6} {:>4}",
            s.key.storage_id(),
            s.chart_date.to_string(),
            s.source.as_str(),
            s.aggregates.track_count,
            s.aggregates.top10_streams,
            s.aggregates.top50_streams,
            s.aggregates.top200_streams,
            s.aggregates.debut_count,
            s.aggregates.reentry_count,
        );
    }
}

/// Truncate long names for table display.
fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let cut = s
            .char_indices()
            .take_while(|(i, _)| *i <= max.saturating_sub(3))
            .last()
            .map(|(i, _)| i)
            .unwrap_or(0);
        format!("{}...", &s[..cut])
    } else {
        s.to_string()
    }
}
