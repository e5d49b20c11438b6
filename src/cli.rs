use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::ResponseCache;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::index::BrowserIndex;
use crate::pipeline::{Pipeline, RunOptions};

const DEFAULT_INDEX_PATH: &str = "user_agents.json";

#[derive(Parser, Debug)]
#[command(
    name = "ua-catalog",
    about = "Keeps a sorted, deduplicated catalog of browser User-Agent strings up to date",
    version
)]
pub struct Cli {
    /// JSON config listing the source pages (built-in useragents.me source if omitted)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch all sources and merge new User-Agents into the catalog
    Update(UpdateArgs),
    /// Rebuild the browser index JSON from the catalog (no network)
    Index {
        #[arg(long)]
        catalog: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Response cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Print the User-Agent used for fetching (chrome on linux)
    DefaultUa {
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Delete expired and corrupt cache records
    Prune {
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Default)]
pub struct UpdateArgs {
    /// Catalog file to merge into
    #[arg(long)]
    pub catalog: Option<PathBuf>,
    /// Response cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
    /// Response freshness window in seconds
    #[arg(long)]
    pub cache_ttl: Option<u64>,
    /// Minimum accepted User-Agent length
    #[arg(long)]
    pub min_length: Option<usize>,
    /// Also write the browser index JSON here
    #[arg(long)]
    pub index: Option<PathBuf>,
    /// Report what would change without writing anything
    #[arg(long)]
    pub dry_run: bool,
}

impl UpdateArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.catalog {
            config.catalog_path = path.clone();
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(ttl) = self.cache_ttl {
            config.cache_ttl = Duration::from_secs(ttl);
        }
        if let Some(min) = self.min_length {
            config.min_ua_length = min;
        }
        if let Some(path) = &self.index {
            config.index_path = Some(path.clone());
        }
    }
}

/// Config file (or built-in default) with environment overrides applied.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env()?;
    Ok(config)
}

fn load_existing_catalog(path: &Path) -> Result<Catalog> {
    match Catalog::load(path)? {
        Some(catalog) => Ok(catalog),
        None => bail!("catalog not found: {}", path.display()),
    }
}

pub async fn execute(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Update(args) => {
            args.apply(&mut config);
            println!("🚀 Updating catalog {}", config.catalog_path.display());
            let summary = Pipeline::new(&config)
                .run(RunOptions { dry_run: args.dry_run })
                .await
                .context("update failed")?;
            println!("{}", summary);
        }
        Command::Index { catalog, out } => {
            let catalog_path = catalog.unwrap_or(config.catalog_path);
            let out = out
                .or(config.index_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_INDEX_PATH));
            let catalog = load_existing_catalog(&catalog_path)?;
            let written = BrowserIndex::build(&catalog).write_if_changed(&out)?;
            if written {
                println!("💾 Index written to {} ({} entries)", out.display(), catalog.len());
            } else {
                println!("Index {} already up to date", out.display());
            }
        }
        Command::Cache {
            action: CacheAction::Prune { cache_dir },
        } => {
            let dir = cache_dir.unwrap_or(config.cache_dir);
            let cache = ResponseCache::new(dir, config.cache_ttl)?;
            let removed = cache.purge_expired().await?;
            println!("🧹 Removed {} expired cache records from {}", removed, cache.dir().display());
        }
        Command::DefaultUa { catalog } => {
            let catalog_path = catalog.unwrap_or(config.catalog_path);
            let catalog = Catalog::load(&catalog_path)?.unwrap_or_default();
            println!("{}", BrowserIndex::build(&catalog).default_user_agent());
        }
    }

    Ok(())
}
