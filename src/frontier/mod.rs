//! Frontier module: every URL the system knows and its crawl state
//!
//! # Components
//!
//! - `UrlState`: Discovered → Queued → Leased → Done/Failed lifecycle
//! - `UrlRecord`: one record per canonical URL, addressed by `UrlId`
//! - `FrontierStore`: dedup set plus breadth-first eligible queue

mod record;
mod store;

pub use record::{UrlId, UrlRecord, UrlState};
pub use store::{AddOutcome, FrontierCounts, FrontierError, FrontierStore, UrlSnapshot};
