//! Parsed-AST file cache
//!
//! Compiled profile and map documents are cached on disk under the
//! configured cache directory, keyed by `(scope?, name[, provider])`. Each
//! cached document is valid only while its `astMetadata.sourceChecksum`
//! matches the fingerprint of the current source text; stale files under
//! the same key prefix are removed before a new one is written.

use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::ast::{MapDocument, ProfileDocument};
use crate::{Error, ErrorReport, Result};

/// Length of the truncated fingerprint, in hex characters.
const FINGERPRINT_LEN: usize = 20;

/// Fingerprint of a source text: SHA-256 truncated to 20 hex characters.
pub fn source_fingerprint(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    hex::encode(digest)[..FINGERPRINT_LEN].to_string()
}

/// Cache key: optional scope, document name, optional provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstCacheKey {
    /// Profile scope
    pub scope: Option<String>,
    /// Profile name
    pub name: String,
    /// Provider name, present for map documents
    pub provider: Option<String>,
}

impl AstCacheKey {
    /// Key for a profile document.
    pub fn profile(scope: Option<&str>, name: &str) -> Self {
        Self {
            scope: scope.map(str::to_string),
            name: name.to_string(),
            provider: None,
        }
    }

    /// Key for a map document.
    pub fn map(scope: Option<&str>, name: &str, provider: &str) -> Self {
        Self {
            scope: scope.map(str::to_string),
            name: name.to_string(),
            provider: Some(provider.to_string()),
        }
    }

    /// File stem without extension: `[scope/]name[/provider]`.
    fn stem(&self) -> PathBuf {
        let mut path = PathBuf::new();
        if let Some(scope) = &self.scope {
            path.push(scope);
        }
        path.push(&self.name);
        if let Some(provider) = &self.provider {
            path.push(provider);
        }
        path
    }

    fn extension(&self) -> &'static str {
        if self.provider.is_some() {
            "suma.ast.json"
        } else {
            "supr.ast.json"
        }
    }
}

/// File cache for parsed documents.
pub struct AstCache {
    root: PathBuf,
}

impl AstCache {
    /// Create a cache rooted at the configured cache directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, key: &AstCacheKey) -> PathBuf {
        let mut path = self.root.join(key.stem());
        let file_name = format!(
            "{}.{}",
            path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            key.extension()
        );
        path.set_file_name(file_name);
        path
    }

    /// Load a cached profile document whose checksum matches `fingerprint`.
    ///
    /// Any mismatch or parse failure invalidates the entry.
    pub async fn load_profile(
        &self,
        key: &AstCacheKey,
        fingerprint: &str,
    ) -> Option<ProfileDocument> {
        let path = self.entry_path(key);
        let source = tokio::fs::read_to_string(&path).await.ok()?;

        match ProfileDocument::from_json_str(&source) {
            Ok(document) if document.ast_metadata.source_checksum == fingerprint => {
                debug!(path = %path.display(), "Parsed-AST cache hit");
                Some(document)
            }
            Ok(_) => {
                debug!(path = %path.display(), "Parsed-AST cache stale, invalidating");
                self.invalidate(key).await;
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt cache entry, invalidating");
                self.invalidate(key).await;
                None
            }
        }
    }

    /// Load a cached map document whose checksum matches `fingerprint`.
    pub async fn load_map(&self, key: &AstCacheKey, fingerprint: &str) -> Option<MapDocument> {
        let path = self.entry_path(key);
        let source = tokio::fs::read_to_string(&path).await.ok()?;

        match MapDocument::from_json_str(&source) {
            Ok(document) if document.ast_metadata.source_checksum == fingerprint => {
                debug!(path = %path.display(), "Parsed-AST cache hit");
                Some(document)
            }
            _ => {
                debug!(path = %path.display(), "Parsed-AST cache stale, invalidating");
                self.invalidate(key).await;
                None
            }
        }
    }

    /// Write a profile document, replacing stale entries under the key.
    pub async fn store_profile(&self, key: &AstCacheKey, document: &ProfileDocument) -> Result<()> {
        let rendered = serde_json::to_string(document)
            .map_err(|e| Error::unexpected(format!("Failed to serialize profile AST: {e}")))?;
        self.store(key, &rendered).await
    }

    /// Write a map document, replacing stale entries under the key.
    pub async fn store_map(&self, key: &AstCacheKey, document: &MapDocument) -> Result<()> {
        let rendered = serde_json::to_string(document)
            .map_err(|e| Error::unexpected(format!("Failed to serialize map AST: {e}")))?;
        self.store(key, &rendered).await
    }

    async fn store(&self, key: &AstCacheKey, rendered: &str) -> Result<()> {
        self.invalidate(key).await;

        let path = self.entry_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Unexpected(
                    ErrorReport::new(format!(
                        "Failed to create cache directory {}",
                        parent.display()
                    ))
                    .detail(e.to_string()),
                )
            })?;
        }
        tokio::fs::write(&path, rendered).await.map_err(|e| {
            Error::Unexpected(
                ErrorReport::new(format!("Failed to write cache entry {}", path.display()))
                    .detail(e.to_string()),
            )
        })?;
        debug!(path = %path.display(), "Parsed-AST cache entry written");
        Ok(())
    }

    /// Remove every file whose name matches the key prefix.
    async fn invalidate(&self, key: &AstCacheKey) {
        let path = self.entry_path(key);
        let Some(parent) = path.parent() else {
            return;
        };
        let Some(stem) = key.stem().file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return;
        };

        let Ok(mut entries) = tokio::fs::read_dir(parent).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&format!("{stem}.")) {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
    }
}
