//! Caches
//!
//! Two caches with very different lifetimes: the parsed-AST file cache is
//! process-wide and content-addressed by source checksum, the
//! bound-provider cache is per-client and expires on a TTL.

mod ast_cache;
mod bound_cache;

pub use ast_cache::{AstCache, AstCacheKey, source_fingerprint};
pub use bound_cache::BoundProviderCache;
