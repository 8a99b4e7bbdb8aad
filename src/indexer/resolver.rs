//! Background resolution of placeholder card names.
//!
//! Deck lists often arrive as bare names. The resolver turns each into a full
//! record: local store first, then the remote exact lookup, then fuzzy.
//! Remote hits are written back to the store so the next lookup is local.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, TrySendError, bounded};
use thiserror::Error;

use crate::config::AppConfig;
use crate::model::types::CardRecord;
use crate::search::remote::{NamedLookup, RemoteCatalog};
use crate::storage::sqlite::CardStore;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("resolver queue is full")]
    QueueFull,
    #[error("resolver has shut down")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFrom {
    Local,
    RemoteExact,
    RemoteFuzzy,
    NotFound,
    /// A lookup errored; details were logged.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub name: String,
    pub card: Option<CardRecord>,
    pub source: ResolvedFrom,
}

/// Handle to the single consumer thread.
///
/// Dropping the handle closes the queue; names already queued are still
/// processed before the thread exits.
pub struct PlaceholderResolver {
    tx: Option<Sender<String>>,
    handle: Option<JoinHandle<()>>,
}

impl PlaceholderResolver {
    pub fn start<F>(
        store: Arc<CardStore>,
        remote: Arc<dyn RemoteCatalog>,
        config: &AppConfig,
        mut on_resolved: F,
    ) -> Self
    where
        F: FnMut(Resolved) + Send + 'static,
    {
        let (tx, rx) = bounded::<String>(config.resolver_queue_capacity);
        let delay = config.resolver_delay;

        let handle = thread::spawn(move || {
            // recv errors once every sender is gone and the queue is drained
            while let Ok(name) = rx.recv() {
                let (resolved, called_remote) = resolve_one(&store, remote.as_ref(), &name);
                tracing::debug!(
                    name = name.as_str(),
                    source = ?resolved.source,
                    "placeholder_resolved"
                );
                on_resolved(resolved);
                if called_remote && !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
            tracing::debug!("resolver_stopped");
        });

        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    /// Queue a name without blocking.
    pub fn enqueue(&self, name: impl Into<String>) -> Result<(), ResolveError> {
        let Some(tx) = &self.tx else {
            return Err(ResolveError::Closed);
        };
        match tx.try_send(name.into()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(name)) => {
                tracing::warn!(name = name.as_str(), "resolver queue full; dropping");
                Err(ResolveError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(ResolveError::Closed),
        }
    }

    /// Stop accepting names. Already queued names still resolve.
    pub fn shutdown(&mut self) {
        self.tx.take();
    }

    /// Close the queue and wait for the consumer to finish it.
    pub fn join(mut self) {
        self.shutdown();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("resolver thread panicked");
        }
    }
}

impl Drop for PlaceholderResolver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Resolve a single name. The flag reports whether the remote was consulted.
fn resolve_one(store: &CardStore, remote: &dyn RemoteCatalog, name: &str) -> (Resolved, bool) {
    let resolved = |card: Option<CardRecord>, source| Resolved {
        name: name.to_string(),
        card,
        source,
    };

    match store.get(name) {
        Ok(Some(card)) => return (resolved(Some(card), ResolvedFrom::Local), false),
        Ok(None) => {}
        Err(e) => tracing::warn!(name = name, error = %e, "local lookup failed"),
    }

    let lookup = remote
        .named(name, NamedLookup::Exact)
        .map(|hit| hit.map(|c| (c, ResolvedFrom::RemoteExact)))
        .and_then(|hit| match hit {
            Some(found) => Ok(Some(found)),
            None => remote
                .named(name, NamedLookup::Fuzzy)
                .map(|hit| hit.map(|c| (c, ResolvedFrom::RemoteFuzzy))),
        });

    match lookup {
        Ok(Some((card, source))) => {
            if let Err(e) = store.upsert(&card) {
                tracing::warn!(name = card.name.as_str(), error = %e, "caching resolved card failed");
            }
            (resolved(Some(card), source), true)
        }
        Ok(None) => (resolved(None, ResolvedFrom::NotFound), true),
        Err(e) => {
            tracing::warn!(name = name, error = %e, "remote lookup failed");
            (resolved(None, ResolvedFrom::Failed), true)
        }
    }
}
