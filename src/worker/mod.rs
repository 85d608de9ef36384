//! Worker side: everything that runs in a crawler process
//!
//! A worker loops over request → fetch → report against a `CoordinatorApi`,
//! sending heartbeats in the background. Fetching, extraction, blob storage
//! and indexing sit behind traits so they can be swapped out.

mod backoff;
mod client;
mod fetcher;
mod parser;
mod sinks;
mod worker_loop;

pub use backoff::Backoff;
pub use client::{CoordinatorApi, HttpCoordinatorClient};
pub use fetcher::{
    build_http_client, build_robots_client, FetchPipeline, FetchedPage, HttpPipeline,
    StaticPipeline,
};
pub use parser::{parse_html, ParsedPage};
pub use sinks::{
    content_address, BlobStore, FsBlobStore, IndexedPage, Indexer, LogIndexer, MemoryBlobStore,
    MemoryIndexer,
};
pub use worker_loop::{Worker, WorkerSettings, WorkerStats};
