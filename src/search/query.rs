use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::Receiver;
use serde_json::{Value, json};

use crate::config::CrossoverConfig;
use crate::model::types::CardRecord;
use crate::search::filter::{CardFilter, FilterSpec};
use crate::search::remote::{RemoteCatalog, decode_cards};
use crate::search::translate::QueryTranslator;
use crate::storage::sqlite::CardStore;

/// Local result cap when no limit is configured.
pub const DEFAULT_LOCAL_LIMIT: usize = 100;

/// Status plus JSON body, shaped like the remote API's search response.
///
/// Successful bodies carry the cards under `data`. Failures from the local
/// path and from transport errors are `(500, {})`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub status: u16,
    pub body: Value,
}

impl SearchResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(cards: &[CardRecord]) -> Self {
        Self::new(200, json!({ "data": cards }))
    }

    pub fn failure() -> Self {
        Self::new(500, json!({}))
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// Decoded cards from `data`. Malformed entries are skipped.
    pub fn cards(&self) -> Vec<CardRecord> {
        match self.body.get("data") {
            Some(Value::Array(items)) => decode_cards(items.clone()),
            _ => Vec::new(),
        }
    }

    /// Human-readable error detail the remote API puts on non-200 bodies.
    pub fn details(&self) -> Option<&str> {
        self.body.get("details").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Local,
    Remote,
}

impl Backend {
    fn as_str(self) -> &'static str {
        match self {
            Backend::Local => "local",
            Backend::Remote => "remote",
        }
    }
}

/// Routes a search to the local store or the remote API.
///
/// Plain name queries are answered locally whenever the store has data.
/// Anything using query syntax (a `:` anywhere) goes remote, with the
/// [`FilterSpec`] translated into query terms.
pub struct SearchCoordinator {
    store: Arc<CardStore>,
    remote: Arc<dyn RemoteCatalog>,
    filter: CardFilter,
    translator: QueryTranslator,
    local_limit: usize,
}

impl SearchCoordinator {
    pub fn new(
        store: Arc<CardStore>,
        remote: Arc<dyn RemoteCatalog>,
        crossover: Arc<CrossoverConfig>,
    ) -> Self {
        Self {
            store,
            remote,
            filter: CardFilter::new(crossover.clone()),
            translator: QueryTranslator::new(crossover),
            local_limit: DEFAULT_LOCAL_LIMIT,
        }
    }

    pub fn with_local_limit(mut self, limit: usize) -> Self {
        self.local_limit = limit;
        self
    }

    pub fn choose_backend(&self, query: &str) -> Backend {
        if query.contains(':') {
            return Backend::Remote;
        }
        match self.store.count() {
            Ok(n) if n > 0 => Backend::Local,
            Ok(_) => Backend::Remote,
            Err(e) => {
                tracing::warn!(error = %e, "store count failed; searching remotely");
                Backend::Remote
            }
        }
    }

    /// Run one search on the current thread.
    pub fn search_blocking(&self, query: &str, spec: &FilterSpec) -> SearchResponse {
        let start = Instant::now();
        let backend = self.choose_backend(query);
        let response = match backend {
            Backend::Local => {
                tracing::info!(
                    backend = "local",
                    query = query,
                    limit = self.local_limit,
                    "search_start"
                );
                self.search_local(query, spec)
            }
            Backend::Remote => {
                let translated = self.translator.translate(query, spec);
                self.remote.search(&translated)
            }
        };
        tracing::debug!(
            backend = backend.as_str(),
            status = response.status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "search_done"
        );
        response
    }

    fn search_local(&self, query: &str, spec: &FilterSpec) -> SearchResponse {
        let predicate: &dyn Fn(&CardRecord) -> bool = &|card| self.filter.matches(card, spec);
        match self
            .store
            .search_by_name(query, self.local_limit, Some(predicate))
        {
            Ok(cards) => SearchResponse::ok(&cards),
            Err(e) => {
                tracing::warn!(error = %e, query = query, "local search failed");
                SearchResponse::failure()
            }
        }
    }

    /// Dispatch onto a worker thread and hand the result to `callback`
    /// exactly once, from that thread.
    pub fn search<F>(self: &Arc<Self>, query: String, spec: FilterSpec, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(SearchResponse) + Send + 'static,
    {
        let this = Arc::clone(self);
        std::thread::spawn(move || {
            let response = this.search_blocking(&query, &spec);
            callback(response);
        })
    }

    /// Like [`Self::search`], delivering the response over a channel.
    pub fn spawn_search(self: &Arc<Self>, query: String, spec: FilterSpec) -> Receiver<SearchResponse> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.search(query, spec, move |response| {
            let _ = tx.send(response);
        });
        rx
    }
}
