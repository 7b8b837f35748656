//! Core library modules for linkrelay
//!
//! Leaf modules first: sizes, links, job model, progress, then the stage
//! components (resolver, engine, splitter, relay) and the pipeline tying
//! them together.

use once_cell::sync::Lazy;
use reqwest::{Client, ClientBuilder};
use std::time::Duration;

pub mod engine;
pub mod error;
pub mod events;
pub mod job;
pub mod links;
pub mod pipeline;
pub mod progress;
pub mod relay;
pub mod resolver;
pub mod size;
pub mod splitter;
pub mod ticker;

/// Shared HTTP client for resolver, engine and relay traffic.
///
/// No overall request timeout: uploads can take an hour. Every call site
/// bounds its own request instead.
static GLOBAL_CLIENT: Lazy<Client> = Lazy::new(|| {
    ClientBuilder::new()
        .tcp_keepalive(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(8)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(format!("linkrelay/{}", env!("LINKRELAY_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
});

pub(crate) fn http_client() -> Client {
    GLOBAL_CLIENT.clone()
}

