// SRA Leaderboard - CLI
//
// Usage:
//   sra-leaderboard update zandvoort dry          # Merge new sessions into the current season
//   sra-leaderboard update spa wet 3 --pages 5    # Re-scan 5 pages on every host
//   sra-leaderboard update spa dry --simulate     # Write spa_POST.csv instead of saving
//   sra-leaderboard refresh                       # Every key listed under [[tracked]]
//   sra-leaderboard show monza dry                # Print the stored board as CSV

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use sra_leaderboard::store::write_leaderboard_csv;
use sra_leaderboard::{
    build_query, Backend, Condition, Config, CsvStore, Cycle, CycleOptions, CycleReport, HttpSessionSource,
    LeaderboardKey, LeaderboardStore, Publisher, RemoteService, SessionQuery, SqliteStore, Track,
};

#[derive(Parser)]
#[command(name = "sra-leaderboard")]
#[command(about = "Build hotlap leaderboards from SRA race-server results", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, value_parser = ["error", "warn", "info", "debug", "trace"], default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge new sessions from every host into one leaderboard
    Update {
        track: Track,
        condition: Condition,
        /// Defaults to the current season
        season: Option<u32>,

        /// Ignore watermarks and scan this many pages per host
        #[arg(long)]
        pages: Option<usize>,

        /// Write <track>_POST.csv instead of saving or publishing
        #[arg(long)]
        simulate: bool,

        /// Accept sessions without the league password marker
        #[arg(long)]
        no_password: bool,
    },

    /// Update every tracked leaderboard from the config file
    Refresh {
        #[arg(long)]
        pages: Option<usize>,

        #[arg(long)]
        simulate: bool,
    },

    /// Print a stored leaderboard as CSV
    Show {
        track: Track,
        condition: Condition,
        season: Option<u32>,
    },

    /// Print the listing URL a host would be asked for
    Query {
        host: String,
        track: Track,
        condition: Condition,
        season: Option<u32>,

        #[arg(long, default_value = "0")]
        page: usize,
    },
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level)).init();

    if let Err(e) = run(cli) {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load_from(&config_path)?;

    match cli.command {
        Commands::Update {
            track,
            condition,
            season,
            pages,
            simulate,
            no_password,
        } => {
            let key = resolve_key(&config, track, condition, season)?;
            let options = CycleOptions {
                page_limit: pages,
                password_required: !no_password,
                simulate,
            };
            let report = with_cycle(&config, |cycle| Ok(cycle.run(key, &options)?))?;
            print_report(&report);
            if report.written.is_none() {
                bail!("no host could be read for {}", key);
            }
            Ok(())
        }

        Commands::Refresh { pages, simulate } => {
            if config.tracked.is_empty() {
                println!("⚠️  No [[tracked]] leaderboards in {}", config_path.display());
                return Ok(());
            }
            let options = CycleOptions {
                page_limit: pages,
                simulate,
                ..CycleOptions::default()
            };
            let results = with_cycle(&config, |cycle| Ok(cycle.refresh(&config.tracked, &options)))?;

            let mut failed = 0;
            for (key, result) in &results {
                match result {
                    Ok(report) => print_report(report),
                    Err(e) => {
                        failed += 1;
                        println!("❌ {}: {}", key, e);
                    }
                }
            }
            println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            println!("✅ {} refreshed, {} failed", results.len() - failed, failed);
            if failed > 0 {
                bail!("{} leaderboard(s) failed to refresh", failed);
            }
            Ok(())
        }

        Commands::Show {
            track,
            condition,
            season,
        } => {
            let key = resolve_key(&config, track, condition, season)?;
            let store = open_store(&config)?;
            let state = store
                .load(&key)
                .with_context(|| format!("Failed to load {} from {}", key, store.name()))?;
            write_leaderboard_csv(std::io::stdout().lock(), &state)?;
            Ok(())
        }

        Commands::Query {
            host,
            track,
            condition,
            season,
            page,
        } => {
            let key = resolve_key(&config, track, condition, season)?;
            let season = config.calendar().get(key.season)?.clone();
            let query = SessionQuery {
                track,
                condition,
                start: season.start,
                end: season.end,
            };
            println!("{}", build_query(&config.scheme, &host, &query, page));
            Ok(())
        }
    }
}

fn resolve_key(config: &Config, track: Track, condition: Condition, season: Option<u32>) -> Result<LeaderboardKey> {
    let season = match season {
        Some(number) => number,
        None => config
            .calendar()
            .current()
            .map(|s| s.number)
            .context("No seasons configured")?,
    };
    Ok(LeaderboardKey {
        track,
        condition,
        season,
    })
}

fn open_store(config: &Config) -> Result<Box<dyn LeaderboardStore>> {
    let store: Box<dyn LeaderboardStore> = match config.backend {
        Backend::Remote => Box::new(remote_service(config)?),
        Backend::Sqlite => Box::new(
            SqliteStore::open(&config.sqlite_path)
                .with_context(|| format!("Failed to open {}", config.sqlite_path.display()))?,
        ),
        Backend::Csv => Box::new(CsvStore::new(&config.csv_dir)),
    };
    Ok(store)
}

fn remote_service(config: &Config) -> Result<RemoteService> {
    RemoteService::new(&config.api_base_url, config.api_token.clone(), config.request_timeout())
        .context("Failed to build leaderboard service client")
}

/// Wires the HTTP source, the configured store and the optional publisher
fn with_cycle<T>(config: &Config, f: impl FnOnce(&Cycle) -> Result<T>) -> Result<T> {
    let source = HttpSessionSource::new(&config.scheme, config.password_markers.clone(), config.request_timeout())
        .context("Failed to build session source")?;
    let store = open_store(config)?;
    println!("📦 Store: {}", store.name());

    let publisher = match config.backend {
        Backend::Remote => None,
        _ if config.publish => Some(remote_service(config)?),
        _ => None,
    };

    let mut cycle = Cycle::new(config, &source, store.as_ref());
    if let Some(publisher) = &publisher {
        println!("📤 Publishing to {}", config.api_base_url);
        cycle = cycle.with_publisher(publisher as &dyn Publisher);
    }
    f(&cycle)
}

fn print_report(report: &CycleReport) {
    println!("\n🏁 {}", report);
    if report.failed_hosts().next().is_some() {
        println!("⚠️  Failed hosts keep their watermark and are retried next cycle");
    }
}
