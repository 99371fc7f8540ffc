//! tdash CLI: treasury dashboard query service
//!
//! Commands: serve, schema, query, compile, completions

mod observability;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, ValueEnum};
use clap_complete::Shell;
use tracing::info;

use tdash_core::config::AppConfig;
use tdash_core::model::QueryConfig;
use tdash_query::{
    execute, format_results, OutputFormat, QueryCompiler, SchemaCatalog, DEFAULT_ALLOWED_SOURCES,
};
use tdash_server::{build_app, serve, AppState};
use tdash_store::Store;

#[derive(Parser)]
#[command(name = "tdash")]
#[command(version)]
#[command(about = "Treasury dashboard query service")]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database (overrides `database.path`)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Port to listen on (overrides `server.port`)
        #[arg(long)]
        port: Option<u16>,
        /// Host to bind (overrides `server.host`)
        #[arg(long)]
        host: Option<String>,
    },
    /// Print the allow-listed schema as JSON
    Schema,
    /// Execute a query description from a JSON file
    #[command(alias = "q")]
    Query {
        file: PathBuf,
        #[arg(long, short, value_enum, default_value_t = Format::Table)]
        format: Format,
    },
    /// Compile a query description without executing it
    Compile { file: PathBuf },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Table,
    Markdown,
}

impl From<Format> for OutputFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Json => OutputFormat::Json,
            Format::Table => OutputFormat::Table,
            Format::Markdown => OutputFormat::Markdown,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "tdash", &mut io::stdout());
        return Ok(());
    }

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database.path = db;
    }
    if let Commands::Serve { port, host } = &cli.command {
        if let Some(port) = port {
            config.server.port = *port;
        }
        if let Some(host) = host {
            config.server.host.clone_from(host);
        }
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    observability::init_tracing(&config.logging.level);

    let (store, catalog) = open_catalog(&config)?;

    match cli.command {
        Commands::Serve { .. } => {
            let addr = config.addr()?;
            let state = AppState::new(store, catalog, config.query.clone());
            let app = build_app(state, config.server.body_limit_bytes);
            serve(addr, app).await?;
        }
        Commands::Schema => {
            println!("{}", serde_json::to_string_pretty(catalog.schema())?);
        }
        Commands::Query { file, format } => {
            let query = read_query(&file)?;
            let compiled = QueryCompiler::new(&catalog, &config.query).compile(&query)?;
            let result = execute(&store, &compiled)?;
            println!("{}", format_results(&result, format.into()));
        }
        Commands::Compile { file } => {
            let query = read_query(&file)?;
            let compiled = QueryCompiler::new(&catalog, &config.query).compile(&query)?;
            println!("{}", serde_json::to_string_pretty(&compiled)?);
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(AppConfig::default()),
    }
}

fn open_catalog(config: &AppConfig) -> Result<(Store, SchemaCatalog)> {
    let path = &config.database.path;
    let store =
        Store::open(path).with_context(|| format!("failed to open database {}", path.display()))?;
    let catalog = match &config.query.allowed_sources {
        Some(allowed) => SchemaCatalog::introspect(&store, allowed.as_slice())?,
        None => SchemaCatalog::introspect(&store, DEFAULT_ALLOWED_SOURCES)?,
    };
    info!(db = %path.display(), "database opened");
    Ok((store, catalog))
}

fn read_query(file: &Path) -> Result<QueryConfig> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid query JSON in {}", file.display()))
}
