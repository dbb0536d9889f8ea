use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use netpulse::config::{LoggingConfig, NetpulseConfig};
use netpulse::metrics::MetricValues;
use netpulse::scoring::{self, Profile, QualityScore};
use netpulse::storage::Measurement;
use netpulse::NetPulse;

#[derive(Parser)]
#[command(
    name = "netpulse",
    about = "Connection quality monitor with time-of-week anomaly detection",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (overrides NETPULSE_CONFIG and /etc/netpulse/netpulse.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides the config file)
    #[arg(long, global = true, env = "NETPULSE_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the background jobs until interrupted
    Serve,

    /// Grade a connection, from explicit values or live from the database
    Score {
        /// Score this probe's measurements instead of explicit values
        #[arg(long)]
        probe: Option<String>,

        /// Window for a live score, in minutes
        #[arg(long, default_value = "60")]
        window: i64,

        /// Weighting profile: general, gaming, video_calls, streaming
        #[arg(long, default_value = "general")]
        profile: Profile,

        #[arg(long)]
        latency: Option<f64>,
        #[arg(long)]
        jitter: Option<f64>,
        #[arg(long)]
        packet_loss: Option<f64>,
        #[arg(long)]
        dns: Option<f64>,
        #[arg(long)]
        bufferbloat: Option<f64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Compute hour-of-week baselines and summarise them
    Baseline {
        #[arg(long)]
        json: bool,
    },

    /// Run one detection pass (computes baselines first)
    Detect,

    /// List recurring weekly degradation patterns
    Patterns {
        #[arg(long)]
        json: bool,
    },

    /// List recent anomalies
    Anomalies {
        #[arg(long, default_value = "20")]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Run one alert evaluation pass
    Alerts,

    /// Import JSON-lines measurements and refresh rollups
    Ingest {
        /// File with one measurement object per line
        file: PathBuf,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    // stdout is reserved for command output
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(cli: &Cli) -> Result<NetpulseConfig> {
    let mut config = match &cli.config {
        Some(path) => NetpulseConfig::load(path)?,
        None => NetpulseConfig::load_or_default(),
    };
    if let Some(db) = &cli.db {
        config.storage.db_path = db.clone();
    }
    Ok(config)
}

fn print_score(score: &QualityScore) {
    println!("\nConnection Quality ({})", score.profile);
    println!("Score: {:.0}/100  Grade: {} ({})", score.score, score.grade, score.label);
    println!("{:<12} | {:>10} | {:>8} | Status", "Metric", "Value", "Penalty");
    println!("{:-<12}-|-{:->10}-|-{:->8}-|-{:-<8}", "", "", "", "");
    for (metric, b) in &score.breakdown {
        println!(
            "{:<12} | {:>8.1}{:<2} | {:>8.1} | {:?}",
            metric.as_str(),
            b.value,
            metric.unit(),
            b.penalty,
            b.status
        );
    }
    if let Some(issue) = &score.primary_issue {
        println!("\nPrimary issue: {}", issue);
    }
    println!();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve => {
            tracing::info!("Starting NetPulse");
            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("shutdown requested");
                    trigger.cancel();
                }
            });
            netpulse::serve(config, shutdown).await?;
        }
        Commands::Score {
            probe,
            window,
            profile,
            latency,
            jitter,
            packet_loss,
            dns,
            bufferbloat,
            json,
        } => {
            let score = match probe {
                Some(probe) => {
                    let app = NetPulse::open(config)?;
                    scoring::live_score(app.store.as_ref(), &probe, profile, Duration::minutes(window), Utc::now())
                        .await
                        .with_context(|| format!("failed to score probe {}", probe))?
                }
                None => {
                    let values = MetricValues { latency, jitter, packet_loss, dns, bufferbloat };
                    scoring::compute(&values, profile)
                }
            };
            if json {
                print_json(&score)?;
            } else {
                print_score(&score);
            }
        }
        Commands::Baseline { json } => {
            let app = NetPulse::open(config)?;
            let snapshot = app.engine.refresh_baselines(Utc::now()).await?;
            if json {
                let mut buckets: Vec<_> = snapshot.buckets().collect();
                buckets.sort_by(|a, b| {
                    (&a.probe_id, a.metric, a.hour_of_week).cmp(&(&b.probe_id, b.metric, b.hour_of_week))
                });
                print_json(&buckets)?;
            } else {
                println!(
                    "Computed {} baseline buckets across {} probes",
                    snapshot.len(),
                    snapshot.probe_count()
                );
            }
        }
        Commands::Detect => {
            let app = NetPulse::open(config)?;
            let now = Utc::now();
            app.engine.refresh_baselines(now).await?;
            match app.engine.run_detection(now).await? {
                None => println!("No baselines available; nothing to compare against."),
                Some(report) => println!(
                    "{} candidates: {} opened, {} extended, {} closed, {} failed",
                    report.candidates,
                    report.summary.opened,
                    report.summary.extended,
                    report.summary.closed,
                    report.summary.failed
                ),
            }
        }
        Commands::Patterns { json } => {
            let app = NetPulse::open(config)?;
            let patterns = app.engine.scan_patterns(Utc::now()).await?;
            if json {
                print_json(&patterns)?;
            } else if patterns.is_empty() {
                println!("No recurring patterns found.");
            } else {
                for p in &patterns {
                    println!("[{}] {} ({} occurrences)", p.probe_id, p.description, p.occurrences);
                }
            }
        }
        Commands::Anomalies { limit, json } => {
            let app = NetPulse::open(config)?;
            let anomalies = app.store.recent_anomalies(limit).await?;
            if json {
                print_json(&anomalies)?;
            } else if anomalies.is_empty() {
                println!("No anomalies recorded.");
            } else {
                println!("{:<20} | {:<12} | {:<9} | {:<6} | Description", "Started", "Probe", "Severity", "State");
                println!("{:-<20}-|-{:-<12}-|-{:-<9}-|-{:-<6}-|-{:-<40}", "", "", "", "", "");
                for a in anomalies {
                    println!(
                        "{:<20} | {:<12} | {:<9} | {:<6} | {}",
                        a.started_at.format("%Y-%m-%d %H:%M"),
                        a.probe_id,
                        a.severity,
                        if a.is_open() { "open" } else { "closed" },
                        a.description
                    );
                }
            }
        }
        Commands::Alerts => {
            let app = NetPulse::open(config)?;
            let fired = app.evaluator.lock().await.evaluate(Utc::now()).await?;
            println!("Fired {} alerts", fired);
        }
        Commands::Ingest { file } => {
            let app = NetPulse::open(config)?;
            let reader = std::io::BufReader::new(
                std::fs::File::open(&file).with_context(|| format!("failed to open {}", file.display()))?,
            );

            let mut span: Option<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)> = None;
            let mut count = 0usize;
            for (n, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let m: Measurement = serde_json::from_str(&line)
                    .with_context(|| format!("{}:{}: invalid measurement", file.display(), n + 1))?;
                app.store.insert_measurement(&m).await?;
                span = Some(match span {
                    None => (m.time, m.time),
                    Some((lo, hi)) => (lo.min(m.time), hi.max(m.time)),
                });
                app.events.emit(netpulse::events::Event::Measurement(m));
                count += 1;
            }

            let rollups = match span {
                Some((from, to)) => app.store.refresh_rollups(from, to).await?,
                None => 0,
            };
            println!("Imported {} measurements into {} rollup buckets", count, rollups);
        }
    }

    Ok(())
}
