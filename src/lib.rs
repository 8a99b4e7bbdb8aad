pub mod config;
pub mod indexer;
pub mod model;
pub mod search;
pub mod storage;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use config::AppConfig;
use indexer::CatalogImporter;
use indexer::resolver::{PlaceholderResolver, Resolved, ResolvedFrom};
use model::types::{CardRecord, parse_colors};
use search::filter::{FilterSpec, SearchPrefs};
use search::query::{SearchCoordinator, SearchResponse};
use search::remote::{RemoteCatalog, ScryfallClient};
use storage::sqlite::CardStore;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "deck-search",
    version,
    about = "Card search over a local cache and the Scryfall API"
)]
pub struct Cli {
    /// Path to the SQLite card cache (defaults to platform data dir)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Path to a TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search cards. Plain names use the local cache when it has data;
    /// queries with `:` syntax go to the remote API.
    Search {
        #[arg(default_value = "")]
        query: String,

        #[command(flatten)]
        filters: FilterArgs,

        /// Print the raw response body as JSON
        #[arg(long)]
        json: bool,
    },
    /// Look up one card in the local cache
    Get {
        name: String,

        #[arg(long)]
        json: bool,
    },
    /// Count cached cards
    Count,
    /// Refresh the cache from the remote bulk data file
    Import {
        /// Import a previously downloaded bulk file instead
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// List every remote match for a query, following all pages
    Enumerate {
        query: String,

        #[arg(long)]
        json: bool,
    },
    /// Resolve card names, fetching and caching any the store lacks
    Resolve {
        #[arg(required = true)]
        names: Vec<String>,

        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

#[derive(Args, Debug, Default)]
pub struct FilterArgs {
    /// Commander color identity, e.g. `wub` or `c`
    #[arg(long)]
    pub commander_identity: Option<String>,

    /// Allowed colors, e.g. `rg`
    #[arg(long)]
    pub colors: Option<String>,

    /// Type line substring, e.g. `Creature`
    #[arg(long = "type")]
    pub card_type: Option<String>,

    /// Comma-separated subtypes, all required
    #[arg(long)]
    pub subtype: Option<String>,

    /// Mana value comparison: `3`, `>=2`, `<5`
    #[arg(long)]
    pub cmc: Option<String>,

    /// Keywords that must all appear in rules text
    #[arg(long)]
    pub text: Option<String>,

    /// Turn on an include preference (e.g. `include_funny`)
    #[arg(long = "include", value_name = "PREF")]
    pub include: Vec<String>,

    /// Exclude a crossover group by key (e.g. `ub_lotr`, `ub_other`)
    #[arg(long = "exclude", value_name = "KEY")]
    pub exclude: Vec<String>,

    /// Base filter set as a JSON file; flags override its fields
    #[arg(long, value_name = "FILE")]
    pub filters: Option<PathBuf>,
}

impl FilterArgs {
    pub fn into_spec(self) -> Result<FilterSpec> {
        let mut spec = match &self.filters {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("reading filters from {}", path.display()))?;
                serde_json::from_str::<FilterSpec>(&raw)
                    .with_context(|| format!("parsing filters in {}", path.display()))?
            }
            None => FilterSpec::default(),
        };

        if let Some(raw) = &self.commander_identity {
            spec.commander_identity = Some(
                parse_colors(raw).with_context(|| format!("invalid color identity '{raw}'"))?,
            );
        }
        if let Some(raw) = &self.colors {
            spec.colors =
                Some(parse_colors(raw).with_context(|| format!("invalid colors '{raw}'"))?);
        }
        if self.card_type.is_some() {
            spec.card_type = self.card_type;
        }
        if self.subtype.is_some() {
            spec.subtype = self.subtype;
        }
        if self.cmc.is_some() {
            spec.cmc = self.cmc;
        }
        if self.text.is_some() {
            spec.text = self.text;
        }

        let prefs: &mut SearchPrefs = &mut spec.prefs;
        for key in &self.include {
            prefs.set(key, true);
        }
        for key in &self.exclude {
            prefs.set(key, false);
        }
        Ok(spec)
    }
}

/// Entry point. The work is blocking (SQLite, blocking HTTP), so it runs on
/// the runtime's blocking pool.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    tokio::task::spawn_blocking(move || dispatch(cli))
        .await
        .context("command worker panicked")?
}

fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "deck-search", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Man => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            let mut out = std::io::stdout();
            man.render(&mut out)?;
            return Ok(());
        }
        _ => {}
    }

    let mut cfg = AppConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        cfg.db_path = db;
    }
    let store = Arc::new(CardStore::open(&cfg.db_path)?);
    tracing::debug!(db = %store.path().display(), api = cfg.api_base.as_str(), "store_opened");

    match cli.command {
        Commands::Search {
            query,
            filters,
            json,
        } => run_search(&cfg, store, &query, filters.into_spec()?, json),
        Commands::Get { name, json } => run_get(&store, &name, json),
        Commands::Count => {
            println!("{}", store.count()?);
            Ok(())
        }
        Commands::Import { file } => run_import(&cfg, store, file.as_deref()),
        Commands::Enumerate { query, json } => run_enumerate(&cfg, &query, json),
        Commands::Resolve { names, json } => run_resolve(&cfg, store, names, json),
        Commands::Completions { .. } | Commands::Man => Ok(()),
    }
}

fn remote_client(cfg: &AppConfig) -> Result<Arc<ScryfallClient>> {
    Ok(Arc::new(ScryfallClient::from_config(cfg)?))
}

fn run_search(
    cfg: &AppConfig,
    store: Arc<CardStore>,
    query: &str,
    spec: FilterSpec,
    json: bool,
) -> Result<()> {
    let remote: Arc<dyn RemoteCatalog> = remote_client(cfg)?;
    let coordinator = Arc::new(
        SearchCoordinator::new(store, remote, Arc::new(cfg.crossover.clone()))
            .with_local_limit(cfg.local_result_limit),
    );

    let response = coordinator
        .spawn_search(query.to_string(), spec)
        .recv()
        .context("search worker exited without a response")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response.body)?);
    }
    if !response.is_success() {
        bail!("search failed: {}", describe_failure(&response));
    }
    if !json {
        let cards = response.cards();
        if cards.is_empty() {
            println!("{}", "No cards found.".dimmed());
        }
        for card in &cards {
            print_card_line(card);
        }
    }
    Ok(())
}

fn describe_failure(response: &SearchResponse) -> String {
    match response.details() {
        Some(details) => format!("HTTP {}: {details}", response.status),
        None => format!("HTTP {}", response.status),
    }
}

fn run_get(store: &CardStore, name: &str, json: bool) -> Result<()> {
    let Some(card) = store.get(name)? else {
        bail!("'{name}' is not in the local cache");
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&card)?);
        return Ok(());
    }
    print_card_line(&card);
    let text = card.combined_oracle_text();
    if !text.is_empty() {
        println!("{text}");
    }
    for url in card.image_urls() {
        println!("{}", url.dimmed());
    }
    Ok(())
}

fn run_import(cfg: &AppConfig, store: Arc<CardStore>, file: Option<&Path>) -> Result<()> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    if let Some(path) = file {
        let importer = CatalogImporter::new(store, remote_client(cfg)?);
        let progress_bar = bar.clone();
        let written = importer.import_file(path, &mut |p| {
            progress_bar.set_position(p.percent as u64);
            progress_bar.set_message(p.status);
        })?;
        bar.finish_with_message(format!("Imported {written} cards"));
        return Ok(());
    }

    let importer = Arc::new(CatalogImporter::new(store, remote_client(cfg)?));
    let (tx, rx) = crossbeam_channel::bounded(1);
    let progress_bar = bar.clone();
    let worker = importer.update_database(
        move |p| {
            progress_bar.set_position(p.percent as u64);
            progress_bar.set_message(p.status);
        },
        move |ok, message| {
            let _ = tx.send((ok, message));
        },
    );
    let outcome = rx.recv().context("update worker exited without reporting")?;
    if worker.join().is_err() {
        bail!("update worker panicked");
    }

    match outcome {
        (true, message) => {
            bar.finish_with_message(message);
            Ok(())
        }
        (false, message) => {
            bar.abandon_with_message(message.clone());
            bail!(message)
        }
    }
}

fn run_enumerate(cfg: &AppConfig, query: &str, json: bool) -> Result<()> {
    let client = remote_client(cfg)?;
    let cards = client.search_all(query)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&cards)?);
    } else {
        for card in &cards {
            println!("{}", card.name);
        }
    }
    Ok(())
}

fn run_resolve(cfg: &AppConfig, store: Arc<CardStore>, names: Vec<String>, json: bool) -> Result<()> {
    // The whole batch is known up front, so the queue must hold all of it.
    let batch_cfg = AppConfig {
        resolver_queue_capacity: cfg.resolver_queue_capacity.max(names.len()),
        ..cfg.clone()
    };
    let (tx, rx) = crossbeam_channel::unbounded::<Resolved>();
    let resolver = PlaceholderResolver::start(store, remote_client(cfg)?, &batch_cfg, move |r| {
        let _ = tx.send(r);
    });
    let mut unqueued = Vec::new();
    for name in names {
        if let Err(e) = resolver.enqueue(name.as_str()) {
            tracing::warn!(name = name.as_str(), error = %e, "name not queued");
            unqueued.push(name);
        }
    }
    resolver.join();

    let results: Vec<Resolved> = rx.iter().collect();
    if json {
        let cards: Vec<&CardRecord> = results.iter().filter_map(|r| r.card.as_ref()).collect();
        println!("{}", serde_json::to_string_pretty(&cards)?);
    } else {
        print_resolved(&results);
    }
    if !unqueued.is_empty() {
        bail!("{} name(s) were not queued: {}", unqueued.len(), unqueued.join(", "));
    }
    Ok(())
}

fn print_resolved(results: &[Resolved]) {
    for r in results {
        match (&r.card, r.source) {
            (Some(card), source) => {
                let from = match source {
                    ResolvedFrom::Local => "cache",
                    ResolvedFrom::RemoteExact => "remote",
                    _ => "remote, fuzzy",
                };
                println!("{} -> {} ({})", r.name, card.name.bold(), from.dimmed());
            }
            (None, ResolvedFrom::Failed) => println!("{} -> {}", r.name, "lookup failed".red()),
            (None, _) => println!("{} -> {}", r.name, "not found".yellow()),
        }
    }
}

fn print_card_line(card: &CardRecord) {
    let cost = card.mana_cost.as_deref().unwrap_or("");
    println!(
        "{} {} {}",
        card.name.bold(),
        cost.cyan(),
        card.projected_type_line().dimmed()
    );
}

pub fn default_db_path() -> PathBuf {
    default_data_dir().join("cards.db")
}

pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "deck-search", "deck-search").map_or_else(
        || PathBuf::from(".deck-search"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}
