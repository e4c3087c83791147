use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};

use hnyctl::boards::{BoardBuilder, ServiceType};
use hnyctl::cleanup::{Cleaner, ColumnMode, DatasetMode};
use hnyctl::config::{init_tracing, ConnectionArgs};
use hnyctl::deps::{load_services, DependencyFetcher, TimeWindow};
use hnyctl::report::SloReporter;
use hnyctl::store::DependencyStore;

#[derive(Parser)]
#[command(name = "hnyctl", version, about = "Operations toolkit for the Honeycomb API")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a standard operations board for a service
    Board {
        #[command(flatten)]
        connection: ConnectionArgs,
        /// Service name; doubles as the dataset name
        #[arg(long)]
        service: String,
        /// Service type selecting extra board content
        #[arg(long, value_enum, default_value_t = ServiceType::Other)]
        service_type: ServiceType,
        /// Log what would be created without creating anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete stale or garbage columns from a dataset
    Columns {
        #[command(flatten)]
        connection: ConnectionArgs,
        #[arg(long)]
        dataset: String,
        #[arg(long, value_enum)]
        mode: ColumnMode,
        /// Cutoff date for the date-based modes (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete stale or garbage datasets
    Datasets {
        #[command(flatten)]
        connection: ConnectionArgs,
        #[arg(long, value_enum)]
        mode: DatasetMode,
        /// Cutoff date for the date-based modes (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Fetch and track service dependency graphs
    Deps {
        #[command(subcommand)]
        command: DepsCommand,
    },
    /// Compile an SLO/SLI health report across every dataset
    SloReport {
        #[command(flatten)]
        connection: ConnectionArgs,
        /// SLOs per SLI scan query
        #[arg(long, default_value_t = 5)]
        batch_size: usize,
        /// Write the report here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum DepsCommand {
    /// Fetch the dependency graph and write a snapshot file
    Fetch {
        #[command(flatten)]
        connection: ConnectionArgs,
        /// File of service names to filter on, one per line
        #[arg(long)]
        services_file: Option<PathBuf>,
        /// Window in seconds when no absolute bounds are given
        #[arg(long, default_value_t = hnyctl::deps::DEFAULT_TIME_RANGE_SECS)]
        time_range: u64,
        /// Window start (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<NaiveDate>,
        /// Window end (YYYY-MM-DD)
        #[arg(long)]
        end_date: Option<NaiveDate>,
        /// Service filters per request
        #[arg(long, default_value_t = hnyctl::deps::DEFAULT_FILTER_BATCH)]
        batch_size: usize,
        /// Max dependencies per request
        #[arg(long, default_value_t = hnyctl::deps::DEFAULT_LIMIT)]
        limit: usize,
        #[arg(long, default_value = "dependencies.json")]
        output: PathBuf,
    },
    /// Reconcile a snapshot file into the tracking database
    Update {
        /// Snapshot file produced by `deps fetch`
        snapshot: PathBuf,
        #[arg(long, default_value = "dependencies.db")]
        db: PathBuf,
    },
    /// Query the tracking database
    Query {
        /// Show one service's incoming and outgoing edges
        #[arg(long)]
        service: Option<String>,
        /// Show edges first seen since this date (YYYY-MM-DD)
        #[arg(long)]
        new_since: Option<NaiveDate>,
        /// Show edges gone inactive but seen since this date (YYYY-MM-DD)
        #[arg(long)]
        removed_since: Option<NaiveDate>,
        /// Show roll-up statistics
        #[arg(long)]
        stats: bool,
        #[arg(long, default_value = "dependencies.db")]
        db: PathBuf,
    },
    /// Export active edges for validation against external inventories
    Export {
        output: PathBuf,
        #[arg(long, default_value = "dependencies.db")]
        db: PathBuf,
    },
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Board {
            connection,
            service,
            service_type,
            dry_run,
        } => {
            let builder = BoardBuilder::new(connection.client()?, dry_run);
            match builder.build_service_board(&service, service_type).await? {
                Some(url) => println!("Board created: {url}"),
                None => println!("Dry run complete, nothing created"),
            }
        }
        Command::Columns {
            connection,
            dataset,
            mode,
            date,
            dry_run,
        } => {
            let cleaner = Cleaner::new(connection.client()?, dry_run);
            let deleted = cleaner.cleanup_columns(&dataset, mode, date).await?;
            let verb = if dry_run { "Would delete" } else { "Deleted" };
            println!("{verb} {deleted} columns from {dataset}");
        }
        Command::Datasets {
            connection,
            mode,
            date,
            dry_run,
        } => {
            let cleaner = Cleaner::new(connection.client()?, dry_run);
            let deleted = cleaner.cleanup_datasets(mode, date).await?;
            let verb = if dry_run { "Would delete" } else { "Deleted" };
            println!("{verb} {deleted} datasets");
        }
        Command::Deps { command } => run_deps(command).await?,
        Command::SloReport {
            connection,
            batch_size,
            output,
        } => {
            let client = connection.client()?;
            let auth = client.auth_info().await?;
            println!(
                "SLO report for team {}, environment {}",
                auth.team.name, auth.environment.name
            );

            let reporter = SloReporter::new(client);
            let entities = reporter.run(batch_size).await?;
            let report = serde_json::to_string_pretty(&entities)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, report)?;
                    println!("Report for {} SLOs written to {}", entities.len(), path.display());
                }
                None => println!("{report}"),
            }
        }
    }
    Ok(())
}

async fn run_deps(command: DepsCommand) -> anyhow::Result<()> {
    match command {
        DepsCommand::Fetch {
            connection,
            services_file,
            time_range,
            start_date,
            end_date,
            batch_size,
            limit,
            output,
        } => {
            let services = services_file
                .map(|path| load_services(&path))
                .transpose()?;
            if let Some(services) = &services {
                tracing::info!(count = services.len(), "Loaded service filters");
            }

            let window = TimeWindow {
                start_time: start_date.map(|d| day_start(d).timestamp()),
                end_time: end_date.map(|d| day_start(d).timestamp()),
                time_range,
            };

            let mut fetcher = DependencyFetcher::new(connection.client()?);
            fetcher.filter_batch = batch_size;
            fetcher.limit = limit;

            let snapshot = fetcher.fetch(window, services.as_deref()).await?;
            std::fs::write(&output, serde_json::to_string_pretty(&snapshot)?)?;
            println!(
                "Fetched {} dependencies across {} services, saved to {}",
                snapshot.total_dependencies,
                snapshot.unique_services,
                output.display()
            );
        }
        DepsCommand::Update { snapshot, db } => {
            let contents = std::fs::read_to_string(&snapshot)?;
            let snapshot: hnyctl::deps::Snapshot = serde_json::from_str(&contents)?;
            let store = DependencyStore::open(&db).await?;
            let updated = store.record_snapshot(&snapshot).await?;
            println!("Updated {updated} dependencies");
        }
        DepsCommand::Query {
            service,
            new_since,
            removed_since,
            stats,
            db,
        } => {
            let store = DependencyStore::open(&db).await?;
            if let Some(service) = service {
                print_json(&store.service_dependencies(&service).await?)?;
            } else if let Some(since) = new_since {
                print_json(&store.new_since(day_start(since)).await?)?;
            } else if let Some(since) = removed_since {
                print_json(&store.removed_since(day_start(since)).await?)?;
            } else if stats {
                print_json(&store.statistics().await?)?;
            } else {
                anyhow::bail!(
                    "specify a query: --service, --new-since, --removed-since, or --stats"
                );
            }
        }
        DepsCommand::Export { output, db } => {
            let store = DependencyStore::open(&db).await?;
            let export = store.export().await?;
            std::fs::write(&output, serde_json::to_string_pretty(&export)?)?;
            println!(
                "Exported {} dependencies to {}",
                export.total_dependencies,
                output.display()
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    tokio::select! {
        result = run(cli.command) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            // Conventional exit status for SIGINT: 128 + 2.
            std::process::exit(130);
        }
    }
}
