pub mod config;
pub mod connectors;
pub mod daemon;
pub mod indexer;
pub mod model;
pub mod search;
pub mod service;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use config::SearchConfig;
use daemon::{DaemonClientConfig, DaemonConfig, SearchDaemon, UdsDaemonClient};
use model::types::ContentType;
use service::{
    RebuildResponse, SearchRequest, SearchResponse, SearchService, StatusResponse,
    SuggestRequest, SuggestResponse,
};

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "csearch",
    version,
    about = "Relevance search over markdown content trees and curated catalogs"
)]
pub struct Cli {
    /// Path to a search.toml (defaults to the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Daemon socket path (overrides config)
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    /// Send the request to a running daemon instead of indexing in-process
    #[arg(long, global = true, default_value_t = false)]
    pub remote: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search the index; with no query, list the newest entries of a type
    Search {
        query: Option<String>,

        /// Restrict results to one content type
        #[arg(long = "type", short = 't')]
        content_type: Option<ContentType>,

        /// Maximum results (0 = default)
        #[arg(long, short)]
        limit: Option<usize>,

        /// Print the JSON response
        #[arg(long)]
        json: bool,
    },
    /// Autocomplete suggestions for a partial query
    Suggest {
        partial: String,

        #[arg(long, short)]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },
    /// Rebuild the index from all sources now
    Rebuild {
        #[arg(long)]
        json: bool,
    },
    /// Show index freshness and build state
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Run the search daemon in the foreground
    Serve,
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

pub async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "csearch", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = SearchConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(socket) = cli.socket {
        config.socket_path = Some(socket);
    }

    if let Commands::Serve = cli.command {
        return serve(config).await;
    }

    let backend = if cli.remote {
        Backend::Remote(UdsDaemonClient::new(
            DaemonClientConfig::with_socket(config.socket_path()).with_env_overrides(),
        ))
    } else {
        Backend::Local(SearchService::from_config(&config))
    };
    let command = cli.command;
    tokio::task::spawn_blocking(move || execute(&backend, command))
        .await
        .context("command task panicked")?
}

/// Stderr logging. `RUST_LOG` wins; otherwise `info`, or `debug` with `-v`.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

async fn serve(config: SearchConfig) -> Result<ExitCode> {
    let daemon = SearchDaemon::new(
        DaemonConfig::from_search_config(&config),
        SearchService::from_config(&config),
    );
    let runner = daemon.clone();
    let mut server = tokio::task::spawn_blocking(move || runner.run());

    let finished = tokio::select! {
        result = &mut server => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            tracing::info!("interrupt_received");
            daemon.request_shutdown();
            server.await
        }
    };
    result.context("daemon task panicked")??;
    Ok(ExitCode::SUCCESS)
}

enum Backend {
    Local(SearchService),
    Remote(UdsDaemonClient),
}

impl Backend {
    fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        match self {
            Backend::Local(service) => Ok(service.search(&request)),
            Backend::Remote(client) => Ok(client.search(request)?),
        }
    }

    fn suggest(&self, request: SuggestRequest) -> Result<SuggestResponse> {
        match self {
            Backend::Local(service) => Ok(service.suggest(&request)),
            Backend::Remote(client) => Ok(client.suggest(request)?),
        }
    }

    fn rebuild(&self) -> Result<RebuildResponse> {
        match self {
            Backend::Local(service) => Ok(service.rebuild()),
            Backend::Remote(client) => Ok(client.rebuild()?),
        }
    }

    fn status(&self) -> Result<StatusResponse> {
        match self {
            Backend::Local(service) => {
                // A local process starts empty; build so status describes real data.
                let _ = service.store().get();
                Ok(service.status())
            }
            Backend::Remote(client) => Ok(client.status()?),
        }
    }
}

fn execute(backend: &Backend, command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Search {
            query,
            content_type,
            limit,
            json,
        } => {
            let response = backend.search(SearchRequest {
                query: query.unwrap_or_default(),
                content_type,
                limit,
            })?;
            emit(json, &response, print_search)?;
            Ok(exit_code(response.success))
        }
        Commands::Suggest {
            partial,
            limit,
            json,
        } => {
            let response = backend.suggest(SuggestRequest {
                query: partial,
                limit,
            })?;
            emit(json, &response, |r| {
                for suggestion in &r.suggestions {
                    println!("{suggestion}");
                }
            })?;
            if let Some(error) = &response.error {
                eprintln!("error: {error}");
            }
            Ok(exit_code(response.success))
        }
        Commands::Rebuild { json } => {
            let response = backend.rebuild()?;
            emit(json, &response, |r| {
                if r.success {
                    println!("indexed {} records ({} skipped)", r.count, r.skipped);
                    for failed in &r.failed_sources {
                        println!("source failed: {failed}");
                    }
                }
            })?;
            if let Some(error) = &response.error {
                eprintln!("error: {error}");
            }
            Ok(exit_code(response.success))
        }
        Commands::Status { json } => {
            let response = backend.status()?;
            emit(json, &response, |s| {
                println!("records:    {}", s.index_size);
                match (s.built_at, s.age_secs) {
                    (Some(built), Some(age)) => {
                        println!("built:      {} ({age}s ago)", built.to_rfc3339())
                    }
                    _ => println!("built:      never"),
                }
                println!("stale:      {}", s.stale);
                println!("rebuilding: {}", s.rebuilding);
                println!("builds:     {}", s.builds);
                if let Some(error) = &s.last_error {
                    println!("last error: {error}");
                }
            })?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Serve | Commands::Completions { .. } => Ok(ExitCode::SUCCESS),
    }
}

fn print_search(response: &SearchResponse) {
    if let Some(error) = &response.error {
        eprintln!("error: {error}");
        return;
    }
    if response.results.is_empty() {
        println!("no results for {:?}", response.query);
        return;
    }
    for result in &response.results {
        println!(
            "{:>8.1}  {:<13} {}  {}",
            result.relevance_score,
            result.content_type.as_str(),
            result.title,
            result.url
        );
    }
}

fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
