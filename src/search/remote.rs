//! Remote card catalog client.
//!
//! Blocking HTTP against a Scryfall-compatible API. Interactive searches take
//! the first page only and never fail loudly: transport problems come back
//! as status 500 with an empty body. Enumeration follows `next_page` to the
//! end.

use std::io::Read;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::model::types::CardRecord;
use crate::search::query::SearchResponse;

/// Upper bound on the buffer reserved up front from `Content-Length`.
const MAX_PREALLOC: u64 = 512 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("building http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("decoding response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("bulk data kind '{0}' not offered")]
    MissingBulkData(String),

    #[error("reading download body: {0}")]
    Io(#[from] std::io::Error),
}

/// Exact or fuzzy `/cards/named` lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedLookup {
    Exact,
    Fuzzy,
}

impl NamedLookup {
    fn param(self) -> &'static str {
        match self {
            NamedLookup::Exact => "exact",
            NamedLookup::Fuzzy => "fuzzy",
        }
    }
}

/// The remote side of the search coordinator and resolver.
pub trait RemoteCatalog: Send + Sync {
    /// One page of results for an already-translated query.
    fn search(&self, query: &str) -> SearchResponse;

    /// A single card by name. `Ok(None)` when the service has no match.
    fn named(&self, name: &str, mode: NamedLookup) -> Result<Option<CardRecord>, RemoteError>;

    /// Every card matching `query`, following pagination to completion.
    fn search_all(&self, query: &str) -> Result<Vec<CardRecord>, RemoteError>;
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BulkDataList {
    data: Vec<BulkDataEntry>,
}

#[derive(Debug, Deserialize)]
struct BulkDataEntry {
    #[serde(rename = "type")]
    kind: String,
    download_uri: String,
}

pub struct ScryfallClient {
    http: reqwest::blocking::Client,
    base: String,
}

impl ScryfallClient {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("deck-search/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(RemoteError::Client)?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, RemoteError> {
        Self::new(&cfg.api_base, cfg.http_timeout)
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn search_url(&self, query: &str) -> String {
        format!("{}/cards/search?q={}", self.base, urlencoding::encode(query))
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response, RemoteError> {
        self.http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .map_err(|source| RemoteError::Transport {
                url: url.to_string(),
                source,
            })
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, RemoteError> {
        let response = self.get(url)?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.json::<T>().map_err(|e| RemoteError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Download URI for a bulk data kind such as `oracle_cards`.
    pub fn bulk_data_uri(&self, kind: &str) -> Result<String, RemoteError> {
        let url = format!("{}/bulk-data", self.base);
        let list: BulkDataList = self.get_json(&url)?;
        list.data
            .into_iter()
            .find(|entry| entry.kind == kind)
            .map(|entry| entry.download_uri)
            .ok_or_else(|| RemoteError::MissingBulkData(kind.to_string()))
    }

    /// Fetch `uri` into memory, reporting `(downloaded, content_length)`
    /// after every chunk.
    pub fn download<F>(&self, uri: &str, mut on_chunk: F) -> Result<Vec<u8>, RemoteError>
    where
        F: FnMut(u64, Option<u64>),
    {
        // bulk files are large; the per-request timeout would cut them off
        let mut response = self
            .http
            .get(uri)
            .timeout(Duration::from_secs(30 * 60))
            .send()
            .map_err(|source| RemoteError::Transport {
                url: uri.to_string(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(RemoteError::Status {
                url: uri.to_string(),
                status: response.status().as_u16(),
            });
        }

        let total = response.content_length().filter(|len| *len > 0);
        let reserve = total.unwrap_or(0).min(MAX_PREALLOC);
        let mut body = Vec::with_capacity(reserve as usize);
        let mut chunk = [0u8; 8192];
        loop {
            let n = response.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
            on_chunk(body.len() as u64, total);
        }
        Ok(body)
    }
}

impl RemoteCatalog for ScryfallClient {
    fn search(&self, query: &str) -> SearchResponse {
        let url = self.search_url(query);
        let start = Instant::now();
        info!(backend = "remote", query = query, "search_start");

        let response = match self.get(&url) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "remote search failed");
                return SearchResponse::failure();
            }
        };
        let status = response.status().as_u16();
        match response.json::<Value>() {
            Ok(body) => {
                debug!(
                    status = status,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "remote search complete"
                );
                SearchResponse::new(status, body)
            }
            Err(e) => {
                warn!(status = status, error = %e, "remote search body undecodable");
                SearchResponse::failure()
            }
        }
    }

    fn named(&self, name: &str, mode: NamedLookup) -> Result<Option<CardRecord>, RemoteError> {
        let url = format!(
            "{}/cards/named?{}={}",
            self.base,
            mode.param(),
            urlencoding::encode(name)
        );
        match self.get_json::<CardRecord>(&url) {
            Ok(card) => Ok(Some(card)),
            Err(RemoteError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn search_all(&self, query: &str) -> Result<Vec<CardRecord>, RemoteError> {
        let mut url = self.search_url(query);
        let mut cards = Vec::new();
        let mut pages = 0usize;

        loop {
            let page: SearchPage = match self.get_json(&url) {
                Ok(page) => page,
                // the service answers 404 when nothing matches
                Err(RemoteError::Status { status: 404, .. }) if pages == 0 => break,
                Err(e) => return Err(e),
            };
            pages += 1;
            cards.extend(decode_cards(page.data));

            match (page.has_more, page.next_page) {
                (true, Some(next)) => url = next,
                (true, None) => {
                    warn!(pages = pages, "has_more set without next_page; stopping");
                    break;
                }
                (false, _) => break,
            }
        }

        info!(query = query, pages = pages, cards = cards.len(), "enumeration complete");
        Ok(cards)
    }
}

/// Decode card objects, skipping (and logging) any that do not fit.
pub fn decode_cards(values: Vec<Value>) -> Vec<CardRecord> {
    values
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<CardRecord>(v) {
            Ok(card) => Some(card),
            Err(e) => {
                warn!(error = %e, "skipping malformed card in response");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    #[test]
    fn search_url_encodes_query() {
        let client = ScryfallClient::new("https://api.example.test/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base(), "https://api.example.test");
        assert_eq!(
            client.search_url("sol -type:token id<=wu"),
            "https://api.example.test/cards/search?q=sol%20-type%3Atoken%20id%3C%3Dwu"
        );
    }

    #[test]
    fn decode_cards_skips_bad_entries() {
        let cards = decode_cards(vec![
            json!({"name": "Sol Ring", "cmc": 1.0}),
            json!({"cmc": "not a number"}),
            json!(42),
        ]);
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].name, "Sol Ring");
    }

    #[test]
    fn unreachable_host_is_failure_status() {
        // nothing listens on port 9 of localhost in test environments
        let client = ScryfallClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let response = client.search("sol");
        assert_eq!(response, SearchResponse::failure());
    }

    /// Serve canned HTTP/1.1 responses on a loopback port.
    ///
    /// `route(path, base)` answers each request. Every response closes its
    /// connection, so the server handles one request per accept.
    fn serve<F>(route: F) -> String
    where
        F: Fn(&str, &str) -> (u16, Vec<u8>) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server_base = base.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let path = read_request_path(&mut stream);
                let (status, body) = route(&path, &server_base);
                let head = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&body);
            }
        });
        base
    }

    fn read_request_path(stream: &mut TcpStream) -> String {
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
        let text = String::from_utf8_lossy(&request);
        text.split_whitespace().nth(1).unwrap_or("").to_string()
    }

    fn page(names: &[&str], next: Option<String>) -> Vec<u8> {
        let data: Vec<Value> = names.iter().map(|n| json!({"name": n})).collect();
        let body = match next {
            Some(next) => json!({"object": "list", "has_more": true, "next_page": next, "data": data}),
            None => json!({"object": "list", "has_more": false, "data": data}),
        };
        serde_json::to_vec(&body).unwrap()
    }

    fn client(base: &str) -> ScryfallClient {
        ScryfallClient::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn search_all_follows_next_page_in_order() {
        let base = serve(|path, base| {
            if path.starts_with("/cards/search") {
                (200, page(&["Sol Ring", "Solemn Simulacrum"], Some(format!("{base}/page/2"))))
            } else if path == "/page/2" {
                (200, page(&["Soldevi Adnate"], Some(format!("{base}/page/3"))))
            } else if path == "/page/3" {
                (200, page(&["Sol Talisman"], None))
            } else {
                (404, b"{}".to_vec())
            }
        });
        let cards = client(&base).search_all("sol").unwrap();
        let names: Vec<_> = cards.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Sol Ring", "Solemn Simulacrum", "Soldevi Adnate", "Sol Talisman"]
        );
    }

    #[test]
    fn search_all_stops_when_next_page_missing() {
        let base = serve(|_, _| {
            let body = json!({"has_more": true, "data": [{"name": "Sol Ring"}]});
            (200, serde_json::to_vec(&body).unwrap())
        });
        let cards = client(&base).search_all("sol").unwrap();
        assert_eq!(cards.len(), 1);
    }

    #[test]
    fn search_all_first_page_404_is_empty() {
        let base = serve(|_, _| (404, br#"{"object":"error","code":"not_found"}"#.to_vec()));
        assert!(client(&base).search_all("zzzz").unwrap().is_empty());
    }

    #[test]
    fn search_all_later_page_error_propagates() {
        let base = serve(|path, base| {
            if path.starts_with("/cards/search") {
                (200, page(&["Sol Ring"], Some(format!("{base}/page/2"))))
            } else {
                (404, b"{}".to_vec())
            }
        });
        let err = client(&base).search_all("sol").unwrap_err();
        assert!(matches!(err, RemoteError::Status { status: 404, .. }), "{err}");
    }

    #[test]
    fn named_maps_404_to_none() {
        let base = serve(|path, _| {
            if path == "/cards/named?exact=Sol%20Ring" {
                (200, serde_json::to_vec(&json!({"name": "Sol Ring"})).unwrap())
            } else {
                (404, br#"{"object":"error"}"#.to_vec())
            }
        });
        let client = client(&base);
        let hit = client.named("Sol Ring", NamedLookup::Exact).unwrap();
        assert_eq!(hit.map(|c| c.name).as_deref(), Some("Sol Ring"));
        assert!(client.named("Sol Rign", NamedLookup::Exact).unwrap().is_none());
    }

    #[test]
    fn remote_search_forwards_status_and_body() {
        let base = serve(|_, _| {
            (400, serde_json::to_vec(&json!({"details": "bad query"})).unwrap())
        });
        let response = client(&base).search("frob:1");
        assert_eq!(response.status, 400);
        assert_eq!(response.details(), Some("bad query"));
    }

    #[test]
    fn download_reports_progress_to_content_length() {
        let payload = vec![b'x'; 20_000];
        let served = payload.clone();
        let base = serve(move |_, _| (200, served.clone()));
        let mut reports = Vec::new();
        let body = client(&base)
            .download(&format!("{base}/oracle.json"), |done, total| reports.push((done, total)))
            .unwrap();
        assert_eq!(body, payload);
        assert!(reports.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(reports.last(), Some(&(20_000, Some(20_000))));
    }

    #[test]
    fn oversized_content_length_is_an_error_not_an_abort() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                read_request_path(&mut stream);
                let _ = stream.write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Length: 1125899906842624\r\nConnection: close\r\n\r\nshort",
                );
            }
        });
        let result = client(&base).download(&format!("{base}/huge"), |_, _| {});
        assert!(result.is_err());
    }

    #[test]
    fn search_page_defaults() {
        let page: SearchPage = serde_json::from_value(json!({"data": []})).unwrap();
        assert!(!page.has_more);
        assert!(page.next_page.is_none());
    }
}
