mod output;
mod prompts;

use clap::{ArgAction, Parser, Subcommand};
use futures::StreamExt;
use miette::{Result, miette};
use shadow_config::Config;
use shadow_engine::{
    Collaborators, CreateDirectory, DEFAULT_LIST_FORMAT, Engine, Event, ItemTemplate, Outcome, RunSummary,
    SnapshotLibrary, UpdateOptions,
};
use shadow_manifest::{Database, Manifest};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a log filter, e.g. `SHADOW_LOG=shadow_engine=debug`.
const LOG_ENV: &str = "SHADOW_LOG";

/// shadow - keep alternative versions of a music library in sync
#[derive(Parser)]
#[command(name = "shadow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (YAML or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log more; repeat for even more
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring collections up to date with the library
    Update {
        /// Collection to update
        collection: Option<String>,

        /// Update every configured collection
        #[arg(short, long, conflicts_with = "collection")]
        all: bool,

        /// Create missing collection directories without asking
        #[arg(long, conflicts_with = "no_create")]
        create: bool,

        /// Skip collections whose directory is missing, without asking
        #[arg(long)]
        no_create: bool,

        /// Only consider items matching this expression
        #[arg(short, long)]
        query: Option<String>,
    },

    /// List the items stored in a collection
    ListTracks {
        collection: String,

        /// Template rendered for each item
        #[arg(short, long, default_value = DEFAULT_LIST_FORMAT)]
        format: String,
    },
}

fn report<E>(err: exn::Exn<E>) -> miette::Report
where
    E: std::error::Error + Send + Sync + 'static,
{
    tracing::debug!("{err:?}");
    miette!("{}", &*err)
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref()).map_err(report)?;
    match cli.command {
        Commands::Update { collection, all, create, no_create, query } => {
            if collection.is_none() && !all {
                miette::bail!("Please specify a collection name or the --all flag");
            }
            let create = match (create, no_create) {
                (true, _) => CreateDirectory::Yes,
                (_, true) => CreateDirectory::No,
                _ => CreateDirectory::Ask,
            };
            let engine = engine(&config).await?;
            let names = match collection {
                Some(name) => vec![name],
                None => engine.collections().map(str::to_string).collect(),
            };
            cmd_update(&engine, &names, create, query).await
        },
        Commands::ListTracks { collection, format } => {
            let engine = engine(&config).await?;
            cmd_list_tracks(&engine, &collection, &format).await
        },
    }
}

async fn engine(config: &Config) -> Result<Engine> {
    let path = config.library.as_deref().ok_or_else(|| {
        miette!(help = "set `library` to the path of a JSON library export", "No library configured")
    })?;
    let library = SnapshotLibrary::load(path).await.map_err(report)?;
    let database = Database::connect(&config.manifest).await.map_err(report)?;
    let specs = config.collection_specs().map_err(report)?;
    Ok(Engine::new(
        specs,
        Manifest::from(&database),
        Collaborators::new(Arc::new(library)),
        config.max_workers,
    ))
}

async fn cmd_update(engine: &Engine, names: &[String], create: CreateDirectory, query: Option<String>) -> Result<()> {
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, finishing the actions in progress");
                cancel.cancel();
            }
        }
    });

    for name in names {
        let mut options = UpdateOptions { create, query: query.clone(), cancel: cancel.clone() };
        let summary = loop {
            let summary = run(engine, name, &options).await?;
            match &summary.outcome {
                Outcome::NeedsConfirmation(dir) => {
                    eprintln!("Collection directory {} does not exist.", dir.display());
                    options.create = match prompts::confirm("Do you want to create the collection?")? {
                        true => CreateDirectory::Yes,
                        false => CreateDirectory::No,
                    };
                },
                _ => break summary,
            }
        };
        match &summary.outcome {
            Outcome::Declined(dir) => {
                if let Some(reason) = summary.outcome.error() {
                    tracing::warn!(collection = %name, "{reason}");
                }
                eprintln!("Skipping creation of {}", dir.display());
            },
            Outcome::Cancelled => {
                eprintln!("{summary} (cancelled)");
                break;
            },
            _ => eprintln!("{summary}"),
        }
    }
    Ok(())
}

/// Run one collection, printing a line per action.
async fn run(engine: &Engine, name: &str, options: &UpdateOptions) -> Result<RunSummary> {
    let events = engine.run(name, options);
    futures::pin_mut!(events);
    while let Some(event) = events.next().await {
        match event.map_err(report)? {
            Event::Started { collection } => tracing::info!(collection = %collection, "Updating collection"),
            Event::Planned { collection, actions } => tracing::info!(collection = %collection, actions, "Planned actions"),
            Event::Applied(applied) => println!("{}", output::progress(&applied)),
            Event::Failed(failure) => eprintln!("{} {failure}", output::symbols::FAILED),
            Event::Complete(summary) => return Ok(summary),
        }
    }
    Err(miette!("Update of '{name}' ended without a summary"))
}

async fn cmd_list_tracks(engine: &Engine, name: &str, format: &str) -> Result<()> {
    let template: ItemTemplate = format.parse().map_err(report)?;
    for track in engine.list_tracks(name).await.map_err(report)? {
        println!("{}", template.render(&track.view()).map_err(report)?);
    }
    Ok(())
}
