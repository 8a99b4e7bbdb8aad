//! Search layer.
//!
//! - **[`filter`]**: local predicate engine over stored card records.
//! - **[`translate`]**: the same filter set rendered as remote query terms.
//! - **[`remote`]**: blocking HTTP client for the remote card API.
//! - **[`query`]**: coordinator that picks the local or remote path.

pub mod filter;
pub mod query;
pub mod remote;
pub mod translate;
