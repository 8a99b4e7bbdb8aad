//! `SQLite` card cache: schema, pragmas, migrations, and queries.
//!
//! One row per card name. The projected `type_line` column is derived on
//! every write so token exclusion can happen in SQL.
//!
//! Name matching folds case with the Unicode-aware `fold()` SQL function
//! registered on every connection; `NOCASE` and `LIKE` only fold ASCII.
//!
//! Writes go through a single connection guarded by a mutex. Reads open
//! their own read-only connection; with WAL journaling a reader only ever
//! sees committed transactions, so a bulk import appears all at once.

use crate::model::types::CardRecord;
use anyhow::{Context, Result, anyhow};
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction, params};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Progress is reported for every record whose index is a multiple of this.
pub const PROGRESS_EVERY: usize = 250;

/// Rows fetched per page by [`CardIter`].
const SCAN_PAGE_SIZE: i64 = 1000;

const SCHEMA_VERSION: i64 = 2;

const MIGRATION_V1: &str = r"
CREATE TABLE IF NOT EXISTS cards (
    name TEXT PRIMARY KEY,
    json_data TEXT NOT NULL
);
";

// V2 adds the projected type_line column; see `migrate_v2`.
const MIGRATION_V2_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_cards_name_nocase ON cards(name COLLATE NOCASE);
";

/// Failure while ingesting a batch. Nothing from the batch is committed.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("record {index} is invalid: {reason}")]
    InvalidRecord { index: usize, reason: String },

    #[error("failed to serialize record {index} ({name}): {source}")]
    Serialize {
        index: usize,
        name: String,
        source: serde_json::Error,
    },

    #[error("failed to write record {index} ({name}): {source}")]
    Write {
        index: usize,
        name: String,
        source: rusqlite::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub struct CardStore {
    path: PathBuf,
    writer: parking_lot::Mutex<Connection>,
}

impl CardStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating db directory {}", parent.display()))?;
        }

        let mut conn = Connection::open(path)
            .with_context(|| format!("opening sqlite db at {}", path.display()))?;

        apply_pragmas(&mut conn)?;
        init_meta(&mut conn)?;
        migrate(&mut conn)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: parking_lot::Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema_version(&self) -> Result<i64> {
        self.writer
            .lock()
            .query_row(
                "SELECT value FROM meta WHERE key='schema_version'",
                [],
                |row| row.get::<_, String>(0).map(|s| s.parse().unwrap_or(0)),
            )
            .optional()?
            .ok_or_else(|| anyhow!("schema_version missing"))
    }

    fn reader(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("opening sqlite db readonly at {}", self.path.display()))?;
        apply_common_pragmas(&conn)?;
        Ok(conn)
    }

    /// Insert or replace the record stored under `card.name`.
    pub fn upsert(&self, card: &CardRecord) -> Result<()> {
        if card.name.is_empty() {
            return Err(anyhow!("card record has no name"));
        }
        let json = serde_json::to_string(card)
            .with_context(|| format!("serializing card {}", card.name))?;
        self.writer.lock().execute(
            "INSERT OR REPLACE INTO cards (name, json_data, type_line) VALUES (?1, ?2, ?3)",
            params![card.name, json, card.projected_type_line()],
        )?;
        debug!(name = %card.name, "upserted card");
        Ok(())
    }

    /// Exact key lookup, falling back to the first case-insensitive match.
    pub fn get(&self, name: &str) -> Result<Option<CardRecord>> {
        let conn = self.reader()?;
        let mut payload: Option<Option<String>> = conn
            .query_row(
                "SELECT json_data FROM cards WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;

        if payload.is_none() {
            payload = conn
                .query_row(
                    "SELECT json_data FROM cards WHERE fold(name) = fold(?1) ORDER BY name LIMIT 1",
                    [name],
                    |row| row.get(0),
                )
                .optional()?;
        }

        Ok(payload.and_then(|json| decode_payload(name, json.as_deref().unwrap_or(""))))
    }

    /// Ranked name search.
    ///
    /// Case-insensitive substring match on the key, interior spaces act as
    /// wildcards. Tokens (projected type line containing `Token`) never
    /// appear. Ordered exact, then prefix, then other matches, then by name.
    /// `predicate` rejects candidates without consuming `limit`.
    pub fn search_by_name(
        &self,
        query: &str,
        limit: usize,
        predicate: Option<&dyn Fn(&CardRecord) -> bool>,
    ) -> Result<Vec<CardRecord>> {
        let start = Instant::now();
        let query = query.trim();
        let escaped = escape_like(query);
        let wildcarded = escaped.replace(' ', "%");
        let contains = format!("%{wildcarded}%");
        let prefix = format!("{wildcarded}%");

        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            r"SELECT name, json_data FROM cards
              WHERE fold(name) LIKE fold(?1) ESCAPE '\'
                AND (type_line IS NULL OR instr(type_line, 'Token') = 0)
              ORDER BY
                CASE
                    WHEN fold(name) LIKE fold(?2) ESCAPE '\' THEN 0
                    WHEN fold(name) LIKE fold(?3) ESCAPE '\' THEN 1
                    ELSE 2
                END,
                name",
        )?;
        let mut rows = stmt.query(params![contains, escaped, prefix])?;

        let mut results = Vec::new();
        let mut scanned = 0usize;
        while results.len() < limit {
            let Some(row) = rows.next()? else {
                break;
            };
            scanned += 1;
            let name: String = row.get(0)?;
            let json: Option<String> = row.get(1)?;
            let Some(card) = decode_payload(&name, json.as_deref().unwrap_or("")) else {
                continue;
            };
            if let Some(pred) = predicate
                && !pred(&card)
            {
                continue;
            }
            results.push(card);
        }

        debug!(
            query = query,
            limit = limit,
            scanned = scanned,
            returned = results.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "local name search"
        );
        Ok(results)
    }

    /// Ingest `cards` in one transaction.
    ///
    /// `progress(index, total, name)` fires for index 0, 250, 500, ... On any
    /// failure the transaction rolls back and the store is unchanged.
    pub fn bulk_upsert<F>(
        &self,
        cards: &[CardRecord],
        mut progress: F,
    ) -> Result<usize, ImportError>
    where
        F: FnMut(usize, usize, &str),
    {
        let start = Instant::now();
        let total = cards.len();
        let mut conn = self.writer.lock();
        let tx = conn.transaction()?;
        write_batch(&tx, cards, &mut progress)?;
        tx.commit()?;

        info!(
            total = total,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "bulk import committed"
        );
        Ok(total)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.reader()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cards", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Lazily scan every stored record in pages.
    ///
    /// Each call starts a fresh scan from the beginning. The scan holds one
    /// read transaction for its whole life, so every page comes from the
    /// snapshot taken here and a concurrent bulk import is either fully
    /// visible or not at all.
    pub fn iter_all(&self) -> Result<CardIter> {
        let conn = self.reader()?;
        conn.execute_batch("BEGIN")?;
        let mut iter = CardIter {
            conn,
            last_rowid: i64::MIN,
            page: VecDeque::new(),
            exhausted: false,
        };
        // The first read pins the WAL snapshot.
        iter.fill_page().context("reading first page of card scan")?;
        Ok(iter)
    }
}

fn write_batch<F>(
    tx: &Transaction<'_>,
    cards: &[CardRecord],
    progress: &mut F,
) -> Result<(), ImportError>
where
    F: FnMut(usize, usize, &str),
{
    let total = cards.len();
    let mut stmt = tx.prepare_cached(
        "INSERT OR REPLACE INTO cards (name, json_data, type_line) VALUES (?1, ?2, ?3)",
    )?;
    for (index, card) in cards.iter().enumerate() {
        if card.name.is_empty() {
            return Err(ImportError::InvalidRecord {
                index,
                reason: "missing name".to_string(),
            });
        }
        let json = serde_json::to_string(card).map_err(|source| ImportError::Serialize {
            index,
            name: card.name.clone(),
            source,
        })?;
        stmt.execute(params![card.name, json, card.projected_type_line()])
            .map_err(|source| ImportError::Write {
                index,
                name: card.name.clone(),
                source,
            })?;
        if index % PROGRESS_EVERY == 0 {
            progress(index, total, &card.name);
        }
    }
    Ok(())
}

/// Paged iterator over every stored card, keyed on rowid.
///
/// Corrupt payloads are skipped with a warning. A query failure ends the
/// scan early and is logged.
pub struct CardIter {
    conn: Connection,
    last_rowid: i64,
    page: VecDeque<CardRecord>,
    exhausted: bool,
}

impl CardIter {
    fn fill_page(&mut self) -> rusqlite::Result<()> {
        let mut fetched = 0;
        {
            let mut stmt = self.conn.prepare_cached(
                "SELECT rowid, name, json_data FROM cards WHERE rowid > ?1 ORDER BY rowid LIMIT ?2",
            )?;
            let mut rows = stmt.query(params![self.last_rowid, SCAN_PAGE_SIZE])?;
            while let Some(row) = rows.next()? {
                fetched += 1;
                self.last_rowid = row.get(0)?;
                let name: String = row.get(1)?;
                let json: Option<String> = row.get(2)?;
                if let Some(card) = decode_payload(&name, json.as_deref().unwrap_or("")) {
                    self.page.push_back(card);
                }
            }
        }
        if fetched < SCAN_PAGE_SIZE {
            self.finish();
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.exhausted = true;
        if !self.conn.is_autocommit()
            && let Err(e) = self.conn.execute_batch("COMMIT")
        {
            debug!(error = %e, "ending card scan transaction");
        }
    }
}

impl Iterator for CardIter {
    type Item = CardRecord;

    fn next(&mut self) -> Option<CardRecord> {
        loop {
            if let Some(card) = self.page.pop_front() {
                return Some(card);
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fill_page() {
                warn!(error = %e, "card scan aborted");
                self.finish();
            }
        }
    }
}

fn decode_payload(name: &str, json: &str) -> Option<CardRecord> {
    match serde_json::from_str(json) {
        Ok(card) => Some(card),
        Err(e) => {
            warn!(name = name, error = %e, "skipping malformed card payload");
            None
        }
    }
}

/// Escape `%`, `_` and the escape character itself for `LIKE ... ESCAPE '\'`.
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn apply_pragmas(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 1000;
        ",
    )?;
    apply_common_pragmas(conn)
}

fn apply_common_pragmas(conn: &Connection) -> Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    register_fold(conn)?;
    conn.execute_batch(
        r"
        PRAGMA temp_store = MEMORY;
        PRAGMA cache_size = -65536; -- 64MB
        ",
    )?;
    Ok(())
}

/// `fold(text)`: Unicode lowercase, so `Æther` and `æther` compare equal.
fn register_fold(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "fold",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| t.to_lowercase()))
        },
    )?;
    Ok(())
}

fn init_meta(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;

    let existing: Option<i64> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0).map(|s| s.parse().unwrap_or(0)),
        )
        .optional()?;

    if existing.is_none() {
        // Start at version 0 so migrate() applies the full schema. A legacy
        // cards table without meta also lands here.
        conn.execute(
            "INSERT INTO meta(key, value) VALUES('schema_version', 0)",
            [],
        )?;
    }

    Ok(())
}

fn migrate(conn: &mut Connection) -> Result<()> {
    let current: i64 = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0).map(|s| s.parse().unwrap_or(0)),
        )
        .optional()?
        .unwrap_or(0);

    if current == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;

    match current {
        0 => {
            tx.execute_batch(MIGRATION_V1)?;
            migrate_v2(&tx)?;
        }
        1 => {
            migrate_v2(&tx)?;
        }
        v => return Err(anyhow!("unsupported schema version {v}")),
    }

    tx.execute(
        "UPDATE meta SET value = ? WHERE key = 'schema_version'",
        params![SCHEMA_VERSION.to_string()],
    )?;

    tx.commit()?;
    info!(from = current, to = SCHEMA_VERSION, "migrated card store schema");
    Ok(())
}

/// Add the projected `type_line` column if absent and back-fill it.
fn migrate_v2(tx: &Transaction<'_>) -> Result<()> {
    if !has_column(tx, "cards", "type_line")? {
        tx.execute_batch("ALTER TABLE cards ADD COLUMN type_line TEXT")?;
    }
    tx.execute_batch(MIGRATION_V2_INDEX)?;

    let mut stmt = tx.prepare("SELECT name, json_data FROM cards WHERE type_line IS NULL")?;
    let pending = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);

    let mut update = tx.prepare("UPDATE cards SET type_line = ?1 WHERE name = ?2")?;
    let mut filled = 0usize;
    for (name, json) in &pending {
        if let Some(card) = decode_payload(name, json.as_deref().unwrap_or("")) {
            update.execute(params![card.projected_type_line(), name])?;
            filled += 1;
        }
    }
    if filled > 0 {
        info!(rows = filled, "back-filled projected type_line");
    }
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}
