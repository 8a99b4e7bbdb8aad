//! Runtime configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an optional
//! TOML file, then `DECK_SEARCH_*` environment variables (read via `dotenvy`
//! so a local `.env` works too).
//!
//! ```toml
//! db_path = "/home/me/.local/share/deck-search/cards.db"
//! api_base = "https://api.scryfall.com"
//! http_timeout_secs = 10
//!
//! [[crossover]]
//! name = "Doctor Who"
//! key = "ub_who"
//! sets = ["who"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://api.scryfall.com";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Validation error: {0}")]
    Validation(String),
}

/// A third-party crossover brand and the set codes printed under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossoverGroup {
    /// Display name, e.g. "Doctor Who".
    pub name: String,
    /// Preference key toggling this group, e.g. "ub_who".
    pub key: String,
    /// Lower-case set codes.
    pub sets: Vec<String>,
}

impl CrossoverGroup {
    pub fn new(name: &str, key: &str, sets: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            key: key.to_string(),
            sets: sets.iter().map(|s| s.to_lowercase()).collect(),
        }
    }
}

/// Ordered, immutable list of known crossover groups.
///
/// Shared by the local predicate and the remote translator so both apply the
/// same exclusions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CrossoverConfig {
    groups: Vec<CrossoverGroup>,
}

/// Preference key covering crossover cards outside every known group.
pub const UB_OTHER_KEY: &str = "ub_other";

impl CrossoverConfig {
    pub fn new(groups: Vec<CrossoverGroup>) -> Self {
        let groups = groups
            .into_iter()
            .map(|mut g| {
                for code in &mut g.sets {
                    *code = code.to_lowercase();
                }
                g
            })
            .collect();
        Self { groups }
    }

    pub fn groups(&self) -> &[CrossoverGroup] {
        &self.groups
    }

    /// The group a (lower-case) set code belongs to.
    pub fn group_for_set(&self, code: &str) -> Option<&CrossoverGroup> {
        self.groups
            .iter()
            .find(|g| g.sets.iter().any(|s| s == code))
    }

    pub fn is_known_set(&self, code: &str) -> bool {
        self.group_for_set(code).is_some()
    }

    /// All known set codes in group order.
    pub fn all_sets(&self) -> impl Iterator<Item = &str> {
        self.groups
            .iter()
            .flat_map(|g| g.sets.iter().map(String::as_str))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for group in &self.groups {
            if group.key.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "crossover group '{}' has an empty key",
                    group.name
                )));
            }
            if group.key == UB_OTHER_KEY {
                return Err(ConfigError::Validation(format!(
                    "crossover key '{UB_OTHER_KEY}' is reserved"
                )));
            }
            if !seen.insert(group.key.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate crossover key '{}'",
                    group.key
                )));
            }
            if group.sets.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "crossover group '{}' lists no sets",
                    group.name
                )));
            }
        }
        Ok(())
    }
}

impl Default for CrossoverConfig {
    fn default() -> Self {
        Self::new(vec![
            CrossoverGroup::new("Warhammer 40,000", "ub_40k", &["40k"]),
            CrossoverGroup::new("Lord of the Rings", "ub_lotr", &["ltr", "ltc"]),
            CrossoverGroup::new("Doctor Who", "ub_who", &["who"]),
            CrossoverGroup::new("Fallout", "ub_fallout", &["pip"]),
            CrossoverGroup::new("Assassin's Creed", "ub_acr", &["acr"]),
            CrossoverGroup::new("Transformers", "ub_bot", &["bot"]),
            CrossoverGroup::new("Jurassic World", "ub_rex", &["rex"]),
            CrossoverGroup::new("Dungeons & Dragons", "ub_dnd", &["afr", "afc", "clb"]),
            CrossoverGroup::new("Final Fantasy", "ub_ff", &["fin", "fic"]),
            CrossoverGroup::new("Marvel", "ub_marvel", &["mar"]),
        ])
    }
}

/// On-disk shape of the config file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    api_base: Option<String>,
    http_timeout_secs: Option<u64>,
    local_result_limit: Option<usize>,
    resolver_queue_capacity: Option<usize>,
    resolver_delay_ms: Option<u64>,
    crossover: Option<Vec<CrossoverGroup>>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub api_base: String,
    pub http_timeout: Duration,
    /// Cap on local fast-path results.
    pub local_result_limit: usize,
    pub resolver_queue_capacity: usize,
    /// Pause after each remote lookup made by the placeholder resolver.
    pub resolver_delay: Duration,
    pub crossover: CrossoverConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: crate::default_db_path(),
            api_base: DEFAULT_API_BASE.to_string(),
            http_timeout: Duration::from_secs(10),
            local_result_limit: 100,
            resolver_queue_capacity: 256,
            resolver_delay: Duration::from_millis(100),
            crossover: CrossoverConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, the default config file is
    /// used only if present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        let file = match path {
            Some(p) => Some(read_file(p)?),
            None => {
                let default = default_config_path();
                if default.exists() {
                    Some(read_file(&default)?)
                } else {
                    None
                }
            }
        };
        if let Some(file) = file {
            cfg.apply_file(file);
        }

        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document on top of the defaults (no env, no disk).
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        let mut cfg = Self::default();
        cfg.apply_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(p) = file.db_path {
            self.db_path = p;
        }
        if let Some(base) = file.api_base {
            self.api_base = base;
        }
        if let Some(secs) = file.http_timeout_secs {
            self.http_timeout = Duration::from_secs(secs);
        }
        if let Some(limit) = file.local_result_limit {
            self.local_result_limit = limit;
        }
        if let Some(cap) = file.resolver_queue_capacity {
            self.resolver_queue_capacity = cap;
        }
        if let Some(ms) = file.resolver_delay_ms {
            self.resolver_delay = Duration::from_millis(ms);
        }
        if let Some(groups) = file.crossover {
            self.crossover = CrossoverConfig::new(groups);
        }
    }

    fn apply_env(&mut self) {
        if let Ok(path) = dotenvy::var("DECK_SEARCH_DB") {
            self.db_path = PathBuf::from(path);
        }

        if let Ok(base) = dotenvy::var("DECK_SEARCH_API_BASE") {
            self.api_base = base;
        }

        if let Ok(val) = dotenvy::var("DECK_SEARCH_HTTP_TIMEOUT_SECS")
            && let Ok(secs) = val.parse()
        {
            self.http_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = dotenvy::var("DECK_SEARCH_RESOLVER_DELAY_MS")
            && let Ok(ms) = val.parse()
        {
            self.resolver_delay = Duration::from_millis(ms);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "http_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.local_result_limit == 0 {
            return Err(ConfigError::Validation(
                "local_result_limit must be greater than zero".to_string(),
            ));
        }
        if self.resolver_queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "resolver_queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.api_base.trim().is_empty() {
            return Err(ConfigError::Validation(
                "api_base must be non-empty".to_string(),
            ));
        }
        self.crossover.validate()
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// `<platform config dir>/config.toml`
pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("com", "deck-search", "deck-search").map_or_else(
        || PathBuf::from("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}
