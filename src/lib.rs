//! Superface OneSDK for Rust
//!
//! Invoke declarative use cases against third-party HTTP APIs. A use case
//! is defined by a *profile* (typed interface contract) and implemented by
//! a provider-specific *map*; the SDK binds them at runtime, executes the
//! map, validates input and output, and orchestrates resilient execution.
//!
//! # Features
//!
//! - **Declarative use cases**: profile + map artifacts, no generated code
//! - **Resilience**: per-provider retry with exponential backoff, circuit
//!   breaking, automatic failover and restore
//! - **Pluggable auth**: basic, bearer, API key (header/body/query/cookie),
//!   digest challenge/response
//! - **Caching**: parsed-AST file cache, bound-provider TTL cache
//! - **Observability**: structured tracing, debounced metric events

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod ast;
pub mod bind;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod failsafe;
pub mod http;
pub mod interpreter;
pub mod metrics;
pub mod profile_id;
pub mod provider;
pub mod sandbox;
pub mod super_json;
pub mod validation;
pub mod values;

pub use client::{OneClient, PerformOptions, Profile, Provider, UseCase};
pub use config::SdkConfig;
pub use error::{
    ErrorReport, NetworkErrorKind, RequestErrorKind, Result, SdkError, SdkError as Error,
};
pub use profile_id::{ProfileId, ProfileVersion};
pub use values::{Variable, Variables};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
