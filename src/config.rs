use crate::services::content_store::ConflictPolicy;
use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::{env, path::PathBuf, str::FromStr, time::Duration};
use uuid::Uuid;

const DEFAULT_CONCURRENCY: usize = 4;
const MAX_CONCURRENCY: usize = 64;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Base URL stored objects are served from; prefixes every `storage_url`.
    pub public_base_url: String,
    /// Owning project tag, first segment of every derived storage key.
    pub project: String,
    /// Max sibling files uploaded at once.
    pub concurrency: usize,
    /// Overall run deadline, if any.
    pub deadline: Option<Duration>,
    /// What the content store does when a key exists and the caller did not ask to reuse it.
    pub on_conflict: ConflictPolicy,
    /// Re-upload payloads whose key already exists instead of reusing them.
    pub refresh: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Bulk 3D asset importer")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every subcommand. Each overrides its `ASSET_IMPORT_*` variable.
#[derive(Args, Debug, Default, Clone)]
pub struct GlobalArgs {
    /// Host to bind to (overrides ASSET_IMPORT_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to (overrides ASSET_IMPORT_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides ASSET_IMPORT_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides ASSET_IMPORT_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Public base URL for stored objects (overrides ASSET_IMPORT_PUBLIC_BASE_URL)
    #[arg(long, global = true)]
    pub public_base_url: Option<String>,

    /// Owning project tag (overrides ASSET_IMPORT_PROJECT)
    #[arg(long, global = true)]
    pub project: Option<String>,

    /// Parallel uploads per directory (overrides ASSET_IMPORT_CONCURRENCY)
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Abort starting new work after this many seconds (overrides ASSET_IMPORT_DEADLINE_SECS)
    #[arg(long, global = true)]
    pub deadline_secs: Option<u64>,

    /// Behaviour when a destination key already exists (overrides ASSET_IMPORT_ON_CONFLICT)
    #[arg(long, global = true, value_enum)]
    pub on_conflict: Option<ConflictPolicy>,

    /// Re-upload files whose key already exists, applying --on-conflict (overrides ASSET_IMPORT_REFRESH)
    #[arg(long, global = true)]
    pub refresh: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import a directory tree, one category per directory
    Import(ImportArgs),

    /// Import a flat directory of animations, classified by filename
    ImportAnimations(ImportArgs),

    /// Manage operators
    #[command(subcommand)]
    Admin(AdminCommand),

    /// Run migrations and exit
    Migrate,

    /// Serve stored objects and the imported catalog over HTTP
    Serve,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Source directory to import
    pub source: PathBuf,

    /// Operator of record; defaults to the first registered admin
    #[arg(long)]
    pub admin_id: Option<Uuid>,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum AdminCommand {
    /// Register a new operator
    Add {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// List registered operators
    List,
}

impl AppConfig {
    /// Parse CLI args and merge them with the process environment.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        let cli = Cli::parse();
        let cfg = Self::merge(cli.global, |name| env::var(name))?;
        Ok((cfg, cli.command))
    }

    /// Merge explicit arguments over values read through `lookup`, then defaults.
    pub fn merge<F>(args: GlobalArgs, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let env_host = lookup("ASSET_IMPORT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_var::<u16, _>(&lookup, "ASSET_IMPORT_PORT")?.unwrap_or(3000);
        let env_storage =
            lookup("ASSET_IMPORT_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = lookup("ASSET_IMPORT_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/assets.db".into());
        let env_base_url = lookup("ASSET_IMPORT_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:3000".into());
        let env_project = lookup("ASSET_IMPORT_PROJECT").unwrap_or_else(|_| "default".into());
        let env_concurrency = parse_var::<usize, _>(&lookup, "ASSET_IMPORT_CONCURRENCY")?;
        let env_deadline = parse_var::<u64, _>(&lookup, "ASSET_IMPORT_DEADLINE_SECS")?;
        let env_refresh = parse_var::<bool, _>(&lookup, "ASSET_IMPORT_REFRESH")?;
        let env_conflict = match lookup("ASSET_IMPORT_ON_CONFLICT") {
            Ok(value) => Some(
                <ConflictPolicy as ValueEnum>::from_str(&value, true)
                    .map_err(|err| anyhow!(err))
                    .with_context(|| format!("parsing ASSET_IMPORT_ON_CONFLICT value `{}`", value))?,
            ),
            Err(env::VarError::NotPresent) => None,
            Err(err) => return Err(err).context("reading ASSET_IMPORT_ON_CONFLICT"),
        };

        let project = args.project.unwrap_or(env_project);
        let project = project.trim_matches('/').to_string();
        if project.is_empty() {
            anyhow::bail!("project tag must not be empty");
        }

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url: args
                .public_base_url
                .unwrap_or(env_base_url)
                .trim_end_matches('/')
                .to_string(),
            project,
            concurrency: args
                .concurrency
                .or(env_concurrency)
                .unwrap_or(DEFAULT_CONCURRENCY)
                .clamp(1, MAX_CONCURRENCY),
            deadline: args
                .deadline_secs
                .or(env_deadline)
                .map(Duration::from_secs),
            on_conflict: args
                .on_conflict
                .or(env_conflict)
                .unwrap_or(ConflictPolicy::Overwrite),
            refresh: args.refresh || env_refresh.unwrap_or(false),
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse an optional variable; a present but malformed value is an error.
fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Result<String, env::VarError>,
{
    match lookup(name) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
