//! Normalized super-document
//!
//! `super.json` is the local configuration installed under
//! `<cwd>/superface/super.json`. The SDK consumes it in normalized form: a
//! mapping from profile ids to version/file plus provider priority and
//! per-use-case defaults, and a mapping from provider names to security
//! values and integration parameters. String values prefixed with `$` are
//! environment-variable references resolved at normalization time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::provider::SecurityValues;
use crate::{Error, ErrorReport, Result};

/// Normalized super-document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SuperJson {
    /// Profile entries keyed by profile id (`scope/name`)
    pub profiles: BTreeMap<String, ProfileEntry>,
    /// Provider entries keyed by provider name
    pub providers: BTreeMap<String, ProviderEntry>,
}

/// One profile entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileEntry {
    /// Where the profile comes from
    #[serde(flatten)]
    pub source: ProfileSource,
    /// Provider priority, first entry is preferred
    #[serde(default)]
    pub priority: Vec<String>,
    /// Per-provider settings
    #[serde(default)]
    pub providers: BTreeMap<String, ProfileProviderEntry>,
}

impl ProfileEntry {
    /// Provider priority: the explicit list, or declaration order of the
    /// provider settings when no priority is configured.
    pub fn provider_priority(&self) -> Vec<String> {
        if self.priority.is_empty() {
            self.providers.keys().cloned().collect()
        } else {
            self.priority.clone()
        }
    }
}

/// Source of a profile: pinned registry version or local file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProfileSource {
    /// Resolve `grid/<id>@<version>.supr.ast.json` or the registry
    Version(String),
    /// Read a local file
    File(PathBuf),
}

/// Per-provider settings of a profile entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileProviderEntry {
    /// Where the map comes from
    #[serde(flatten)]
    pub source: MapSource,
    /// Per-use-case defaults
    #[serde(default)]
    pub defaults: BTreeMap<String, UseCaseDefaults>,
}

/// Source of a map: local file or registry variant/revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", untagged)]
pub enum MapSource {
    /// Read a local file
    File {
        /// Path to the map artifact
        file: PathBuf,
    },
    /// Ask the registry for a bind
    #[serde(rename_all = "camelCase")]
    Registry {
        /// Optional map variant
        #[serde(default, skip_serializing_if = "Option::is_none")]
        map_variant: Option<String>,
        /// Optional map revision
        #[serde(default, skip_serializing_if = "Option::is_none")]
        map_revision: Option<String>,
    },
}

impl Default for MapSource {
    fn default() -> Self {
        Self::Registry {
            map_variant: None,
            map_revision: None,
        }
    }
}

/// Per-use-case defaults configured in the super-document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UseCaseDefaults {
    /// Input defaults merged under the caller's input
    pub input: BTreeMap<String, serde_json::Value>,
    /// Retry policy for this use case on this provider
    pub retry_policy: RetryPolicyConfig,
    /// Whether failover to lower-priority providers is allowed
    pub provider_failover: bool,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum RetryPolicyConfig {
    /// No retries; failures abort immediately
    None,
    /// Circuit breaker with embedded retry
    #[serde(rename_all = "camelCase")]
    CircuitBreaker {
        /// Maximum contiguous retries before the circuit opens
        #[serde(default = "default_max_retries")]
        max_contiguous_retries: u32,
        /// Per-request timeout in milliseconds
        #[serde(default = "default_request_timeout_ms")]
        request_timeout: u64,
        /// How long the circuit stays open, in milliseconds
        #[serde(default = "default_open_time_ms")]
        open_time: u64,
        /// Backoff configuration
        #[serde(default)]
        backoff: BackoffConfig,
    },
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self::None
    }
}

fn default_max_retries() -> u32 {
    5
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_open_time_ms() -> u64 {
    30_000
}

/// Backoff configuration for retry policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    /// Initial backoff in milliseconds
    pub start: u64,
    /// Exponential factor
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            start: 500,
            factor: 2.0,
        }
    }
}

/// One provider entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderEntry {
    /// Optional local provider definition file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Security values, ordered by declaration
    pub security: Vec<SecurityValues>,
    /// Integration parameter values; ordered so the configuration hash is
    /// stable
    pub parameters: BTreeMap<String, String>,
}

impl SuperJson {
    /// Parse a super-document from JSON and resolve `$ENV` references.
    pub fn from_json_str(source: &str) -> Result<Self> {
        let mut document: Self = serde_json::from_str(source).map_err(|e| {
            Error::Bind(ErrorReport::new("Failed to parse super.json").detail(e.to_string()))
        })?;
        document.resolve_env_references();
        Ok(document)
    }

    /// Load and normalize a super-document from disk.
    pub async fn load(path: &Path) -> Result<Self> {
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Bind(
                ErrorReport::new(format!("Unable to read super.json at {}", path.display()))
                    .detail(e.to_string())
                    .hint("Install a profile or set SUPERFACE_PATH"),
            )
        })?;
        Self::from_json_str(&source)
    }

    /// Profile entry lookup by id.
    pub fn profile(&self, profile_id: &str) -> Option<&ProfileEntry> {
        self.profiles.get(profile_id)
    }

    /// Provider entry lookup by name.
    pub fn provider(&self, provider_name: &str) -> Option<&ProviderEntry> {
        self.providers.get(provider_name)
    }

    /// Stable identifier of this configuration: SHA-256 of the normalized
    /// document, hex encoded. Sent with metric batches instead of the
    /// document itself.
    pub fn configuration_hash(&self) -> String {
        #[allow(clippy::unwrap_used)]
        let canonical = serde_json::to_string(self).unwrap();
        let digest = Sha256::digest(canonical.as_bytes());
        hex::encode(digest)
    }

    /// Resolve `$ENV_VAR` references in security values and parameters.
    ///
    /// Unset variables leave the reference untouched with a warning so the
    /// scheme-matching error downstream names the offending id.
    fn resolve_env_references(&mut self) {
        for entry in self.providers.values_mut() {
            for value in &mut entry.security {
                value.secret = resolve_secret_env(value.secret.clone());
            }
            for value in entry.parameters.values_mut() {
                *value = resolve_env_str(value);
            }
        }
    }
}

fn resolve_secret_env(secret: crate::provider::SecretValues) -> crate::provider::SecretValues {
    use crate::provider::SecretValues;
    match secret {
        SecretValues::ApiKey { apikey } => SecretValues::ApiKey {
            apikey: resolve_env_str(&apikey),
        },
        SecretValues::Basic { username, password } => SecretValues::Basic {
            username: resolve_env_str(&username),
            password: resolve_env_str(&password),
        },
        SecretValues::Bearer { token } => SecretValues::Bearer {
            token: resolve_env_str(&token),
        },
    }
}

/// Resolve a single `$ENV_VAR` reference; non-references pass through.
fn resolve_env_str(value: &str) -> String {
    let Some(variable) = value.strip_prefix('$') else {
        return value.to_string();
    };
    match std::env::var(variable) {
        Ok(resolved) => resolved,
        Err(_) => {
            warn!(variable, "Environment variable referenced in super.json is not set");
            value.to_string()
        }
    }
}
