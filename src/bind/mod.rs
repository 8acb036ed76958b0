//! Binding
//!
//! Materializes a [`BoundProfileProvider`]: profile AST, provider
//! definition, and map AST resolved from local files or the registry,
//! cross-checked for consistency, with security values and integration
//! parameters overlaid and merged. Bound providers are immutable and owned
//! by the bound-provider cache.

mod registry;

pub use registry::{BindRequest, BindResult, RegistryClient};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::ast::{MapDocument, ProfileDocument};
use crate::cache::{AstCache, AstCacheKey, source_fingerprint};
use crate::http::{DigestCache, SecurityConfiguration, resolve_security};
use crate::interpreter::ProviderResources;
use crate::profile_id::ProfileId;
use crate::provider::{
    ProviderJson, SecurityValues, overlay_security_values, resolve_integration_parameters,
};
use crate::super_json::{MapSource, ProfileSource, SuperJson};
use crate::{Error, ErrorReport, Result};

/// Error message when the map header disagrees with the configuration.
const PROVIDER_NAME_MISMATCH: &str =
    "Provider name in map does not match provider name in configuration";

/// Caller-supplied bind overrides.
#[derive(Debug, Clone, Default)]
pub struct BindOptions {
    /// Security values overlaid over super.json values by id
    pub security: Vec<SecurityValues>,
    /// Integration parameters overlaid over super.json values
    pub parameters: HashMap<String, String>,
    /// Map variant override
    pub map_variant: Option<String>,
    /// Map revision override
    pub map_revision: Option<String>,
}

/// An immutable, executable binding of profile, provider, and map.
#[derive(Debug)]
pub struct BoundProfileProvider {
    /// Profile document
    pub profile: ProfileDocument,
    /// Map document
    pub map: MapDocument,
    /// Provider name
    pub provider_name: String,
    /// Service base URLs by service id
    pub services: HashMap<String, String>,
    /// Service used when a map does not pick one
    pub default_service_id: String,
    /// Resolved security configurations
    pub security: Vec<SecurityConfiguration>,
    /// Resolved integration parameters
    pub integration_parameters: HashMap<String, String>,
    /// Digest challenge cache; expires with this binding
    pub digest_cache: Arc<DigestCache>,
}

impl BoundProfileProvider {
    /// Resolve the base URL for a service.
    ///
    /// This is the single hook point for service-selection policy: every
    /// URL resolution in the SDK goes through here.
    pub fn base_url_for(&self, service_override: Option<&str>) -> Result<&str> {
        let service = service_override.unwrap_or(&self.default_service_id);
        self.services
            .get(service)
            .map(String::as_str)
            .ok_or_else(|| {
                Error::Bind(
                    ErrorReport::new(format!("Service not found: {service}")).detail(format!(
                        "Provider '{}' defines services: {}",
                        self.provider_name,
                        self.services.keys().cloned().collect::<Vec<_>>().join(", ")
                    )),
                )
            })
    }

    /// Provider-side resources handed to the interpreter.
    pub fn resources(&self) -> ProviderResources {
        ProviderResources {
            provider_name: self.provider_name.clone(),
            service_base_urls: self.services.clone(),
            default_service_id: self.default_service_id.clone(),
            security: self.security.clone(),
            integration_parameters: self.integration_parameters.clone(),
            digest_cache: Arc::clone(&self.digest_cache),
        }
    }
}

/// Resolves bound providers from the super-document, local files, and the
/// registry.
pub struct ProfileProviderBinder<'a> {
    /// Normalized super-document
    pub super_json: &'a SuperJson,
    /// Directory super.json paths are relative to
    pub base_dir: PathBuf,
    /// Registry client
    pub registry: &'a RegistryClient,
    /// Parsed-AST file cache
    pub ast_cache: &'a AstCache,
}

impl ProfileProviderBinder<'_> {
    /// Materialize a bound provider for a profile and provider.
    pub async fn bind(
        &self,
        profile_id: &ProfileId,
        provider_name: &str,
        options: &BindOptions,
    ) -> Result<BoundProfileProvider> {
        let profile = self.resolve_profile(profile_id).await?;

        let map_source = self.map_source(profile_id, provider_name, options);
        let (provider, map) = match map_source {
            MapSource::File { file } => {
                let map = self
                    .load_map_document(&file, profile_id, provider_name)
                    .await?;
                let provider = self.resolve_provider(provider_name).await?;
                (provider, map)
            }
            MapSource::Registry {
                map_variant,
                map_revision,
            } => {
                // A locally-provided provider definition cannot be paired
                // with a remotely-bound map
                if self
                    .super_json
                    .provider(provider_name)
                    .and_then(|entry| entry.file.as_ref())
                    .is_some()
                {
                    return Err(Error::Bind(
                        ErrorReport::new(format!(
                            "Provider '{provider_name}' is defined locally but its map would be bound remotely"
                        ))
                        .hint("Add a local map file, or remove the provider file from super.json"),
                    ));
                }

                let request = BindRequest {
                    profile_id: format!(
                        "{}@{}.{}.{}",
                        profile_id.without_version(),
                        profile.header.version.major,
                        profile.header.version.minor,
                        profile.header.version.patch
                    ),
                    provider: Some(provider_name.to_string()),
                    map_variant,
                    map_revision,
                };
                let result = self.registry.bind(&request).await?;
                (result.provider, result.map)
            }
        };

        // Name agreement across configuration, provider JSON, and map header
        if provider.name != provider_name || map.provider_name() != provider_name {
            return Err(Error::Bind(
                ErrorReport::new(PROVIDER_NAME_MISMATCH)
                    .detail(format!(
                        "Configuration: '{provider_name}', provider definition: '{}', map header: '{}'",
                        provider.name,
                        map.provider_name()
                    )),
            ));
        }
        if map.profile_id() != profile.profile_id() {
            return Err(Error::Bind(ErrorReport::new(format!(
                "Map implements profile '{}' but '{}' was requested",
                map.profile_id(),
                profile.profile_id()
            ))));
        }

        provider.check()?;

        let security = self.resolve_security_values(provider_name, &provider, &options.security)?;
        let empty = std::collections::BTreeMap::new();
        let super_json_parameters = self
            .super_json
            .provider(provider_name)
            .map_or(&empty, |entry| &entry.parameters);
        let integration_parameters =
            resolve_integration_parameters(&provider, super_json_parameters, &options.parameters);

        let services = provider
            .services
            .iter()
            .map(|service| (service.id.clone(), service.base_url.clone()))
            .collect();

        debug!(
            profile = %profile.profile_id(),
            provider = provider_name,
            "Bound profile provider"
        );

        Ok(BoundProfileProvider {
            profile,
            map,
            provider_name: provider_name.to_string(),
            services,
            default_service_id: provider.default_service.clone(),
            security,
            integration_parameters,
            digest_cache: Arc::new(DigestCache::new()),
        })
    }

    /// Where this profile-provider's map comes from.
    fn map_source(
        &self,
        profile_id: &ProfileId,
        provider_name: &str,
        options: &BindOptions,
    ) -> MapSource {
        if options.map_variant.is_some() || options.map_revision.is_some() {
            return MapSource::Registry {
                map_variant: options.map_variant.clone(),
                map_revision: options.map_revision.clone(),
            };
        }
        self.super_json
            .profile(&profile_id.without_version())
            .and_then(|entry| entry.providers.get(provider_name))
            .map(|entry| entry.source.clone())
            .unwrap_or_default()
    }

    /// Resolve the profile document per the super-document entry.
    async fn resolve_profile(&self, profile_id: &ProfileId) -> Result<ProfileDocument> {
        let entry = self
            .super_json
            .profile(&profile_id.without_version())
            .ok_or_else(|| {
                Error::Bind(
                    ErrorReport::new(format!(
                        "Profile '{}' is not installed in super.json",
                        profile_id.without_version()
                    ))
                    .hint("Install the profile or pass a file path"),
                )
            })?;

        let path = match &entry.source {
            ProfileSource::File(path) => self.base_dir.join(path),
            ProfileSource::Version(version) => {
                let pinned = profile_id
                    .version
                    .as_ref()
                    .map_or_else(|| version.clone(), ToString::to_string);
                self.base_dir
                    .join("grid")
                    .join(format!("{}@{pinned}.supr", profile_id.as_path()))
            }
        };

        let document = self
            .load_profile_document(&path, profile_id)
            .await?;

        if let Some(requested) = &profile_id.version {
            let header = &document.header.version;
            if (header.major, header.minor, header.patch)
                != (requested.major, requested.minor, requested.patch)
            {
                return Err(Error::Bind(ErrorReport::new(format!(
                    "Profile '{}' resolved to version {}.{}.{} but {requested} was requested",
                    profile_id.without_version(),
                    header.major,
                    header.minor,
                    header.patch
                ))));
            }
        }

        Ok(document)
    }

    /// Read a profile artifact, preferring the parsed `.ast.json` sibling;
    /// plain sources go through the parsed-AST cache by fingerprint.
    async fn load_profile_document(
        &self,
        path: &Path,
        profile_id: &ProfileId,
    ) -> Result<ProfileDocument> {
        let key = AstCacheKey::profile(profile_id.scope.as_deref(), &profile_id.name);

        if let Some(parsed) = read_preferring_parsed(path).await? {
            let document = ProfileDocument::from_json_str(&parsed)?;
            // Content-addressed write; recomputing yields the same entry
            let _ = self.ast_cache.store_profile(&key, &document).await;
            return Ok(document);
        }

        let source = read_source(path).await?;
        let fingerprint = source_fingerprint(&source);
        if let Some(document) = self.ast_cache.load_profile(&key, &fingerprint).await {
            return Ok(document);
        }

        Err(Error::Bind(
            ErrorReport::new(format!(
                "Profile source at {} has no compiled AST",
                path.display()
            ))
            .hint("Compile the profile with the Superface CLI to produce the .ast.json artifact"),
        ))
    }

    /// Read a map artifact the same way profiles are read.
    async fn load_map_document(
        &self,
        path: &Path,
        profile_id: &ProfileId,
        provider_name: &str,
    ) -> Result<MapDocument> {
        let path = self.base_dir.join(path);
        let key = AstCacheKey::map(
            profile_id.scope.as_deref(),
            &profile_id.name,
            provider_name,
        );

        if let Some(parsed) = read_preferring_parsed(&path).await? {
            let document = MapDocument::from_json_str(&parsed)?;
            let _ = self.ast_cache.store_map(&key, &document).await;
            return Ok(document);
        }

        let source = read_source(&path).await?;
        let fingerprint = source_fingerprint(&source);
        if let Some(document) = self.ast_cache.load_map(&key, &fingerprint).await {
            return Ok(document);
        }

        Err(Error::Bind(
            ErrorReport::new(format!(
                "Map source at {} has no compiled AST",
                path.display()
            ))
            .hint("Compile the map with the Superface CLI to produce the .ast.json artifact"),
        ))
    }

    /// Resolve the provider definition from a local file or the registry.
    async fn resolve_provider(&self, provider_name: &str) -> Result<ProviderJson> {
        if let Some(file) = self
            .super_json
            .provider(provider_name)
            .and_then(|entry| entry.file.clone())
        {
            let path = self.base_dir.join(file);
            let source = read_source(&path).await?;
            return ProviderJson::from_json_str(&source);
        }
        self.registry.get_provider(provider_name).await
    }

    /// Overlay caller security values over super.json values and merge
    /// against the provider's schemes.
    fn resolve_security_values(
        &self,
        provider_name: &str,
        provider: &ProviderJson,
        overlay: &[SecurityValues],
    ) -> Result<Vec<SecurityConfiguration>> {
        let base = self
            .super_json
            .provider(provider_name)
            .map(|entry| entry.security.as_slice())
            .unwrap_or_default();
        let values = overlay_security_values(base, overlay);
        resolve_security(provider, &values)
    }
}

/// Read `<path>.ast.json` (or `path` itself when it already carries the
/// parsed extension); `None` when no parsed artifact exists.
async fn read_preferring_parsed(path: &Path) -> Result<Option<String>> {
    if path.to_string_lossy().ends_with(".ast.json") {
        return read_source(path).await.map(Some);
    }

    let parsed_path = PathBuf::from(format!("{}.ast.json", path.display()));
    match tokio::fs::read_to_string(&parsed_path).await {
        Ok(source) => Ok(Some(source)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Bind(
            ErrorReport::new(format!("Unable to read {}", parsed_path.display()))
                .detail(e.to_string()),
        )),
    }
}

async fn read_source(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::Bind(
            ErrorReport::new(format!("Unable to read {}", path.display()))
                .detail(e.to_string()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile_ast(scope: &str, name: &str) -> String {
        json!({
            "kind": "ProfileDocument",
            "astMetadata": {
                "astVersion": {"major": 1, "minor": 0, "patch": 0},
                "sourceChecksum": "prof-fp"
            },
            "header": {"scope": scope, "name": name,
                       "version": {"major": 1, "minor": 0, "patch": 0}},
            "definitions": []
        })
        .to_string()
    }

    fn map_ast(scope: &str, name: &str, provider: &str) -> String {
        json!({
            "kind": "MapDocument",
            "astMetadata": {
                "astVersion": {"major": 1, "minor": 0, "patch": 0},
                "sourceChecksum": "map-fp"
            },
            "header": {
                "profile": {"scope": scope, "name": name,
                            "version": {"major": 1, "minor": 0, "patch": 0}},
                "provider": provider
            },
            "definitions": []
        })
        .to_string()
    }

    fn provider_json(name: &str) -> String {
        json!({
            "name": name,
            "services": [{"id": "default", "baseUrl": "https://api.example.com"}],
            "defaultService": "default"
        })
        .to_string()
    }

    async fn write_local_setup(dir: &Path, declared_map_provider: &str) -> SuperJson {
        tokio::fs::write(
            dir.join("profile.supr.ast.json"),
            profile_ast("starwars", "characters"),
        )
        .await
        .unwrap();
        tokio::fs::write(
            dir.join("map.suma.ast.json"),
            map_ast("starwars", "characters", declared_map_provider),
        )
        .await
        .unwrap();
        tokio::fs::write(dir.join("provider.json"), provider_json("swapi"))
            .await
            .unwrap();

        SuperJson::from_json_str(
            &json!({
                "profiles": {
                    "starwars/characters": {
                        "file": "profile.supr.ast.json",
                        "providers": {
                            "swapi": {"file": "map.suma.ast.json"}
                        }
                    }
                },
                "providers": {
                    "swapi": {"file": "provider.json"}
                }
            })
            .to_string(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn binds_fully_local_setup() {
        let dir = tempfile::tempdir().unwrap();
        let super_json = write_local_setup(dir.path(), "swapi").await;
        let registry = RegistryClient::new("https://registry.invalid", None).unwrap();
        let cache_dir = dir.path().join(".cache");
        let ast_cache = AstCache::new(&cache_dir);
        let binder = ProfileProviderBinder {
            super_json: &super_json,
            base_dir: dir.path().to_path_buf(),
            registry: &registry,
            ast_cache: &ast_cache,
        };

        let profile_id: ProfileId = "starwars/characters".parse().unwrap();
        let bound = binder
            .bind(&profile_id, "swapi", &BindOptions::default())
            .await
            .unwrap();

        assert_eq!(bound.provider_name, "swapi");
        assert_eq!(
            bound.base_url_for(None).unwrap(),
            "https://api.example.com"
        );
        assert!(bound.base_url_for(Some("missing")).is_err());
    }

    #[tokio::test]
    async fn provider_name_mismatch_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        // Map header declares provider Y while configuration says swapi
        let super_json = write_local_setup(dir.path(), "other-provider").await;
        let registry = RegistryClient::new("https://registry.invalid", None).unwrap();
        let ast_cache = AstCache::new(dir.path().join(".cache"));
        let binder = ProfileProviderBinder {
            super_json: &super_json,
            base_dir: dir.path().to_path_buf(),
            registry: &registry,
            ast_cache: &ast_cache,
        };

        let profile_id: ProfileId = "starwars/characters".parse().unwrap();
        let error = binder
            .bind(&profile_id, "swapi", &BindOptions::default())
            .await
            .unwrap_err();

        assert!(
            error
                .to_string()
                .contains("Provider name in map does not match provider name in configuration")
        );
    }

    #[tokio::test]
    async fn local_provider_with_remote_map_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("profile.supr.ast.json"),
            profile_ast("starwars", "characters"),
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("provider.json"), provider_json("swapi"))
            .await
            .unwrap();

        let super_json = SuperJson::from_json_str(
            &json!({
                "profiles": {
                    "starwars/characters": {
                        "file": "profile.supr.ast.json",
                        "providers": {"swapi": {}}
                    }
                },
                "providers": {"swapi": {"file": "provider.json"}}
            })
            .to_string(),
        )
        .unwrap();

        let registry = RegistryClient::new("https://registry.invalid", None).unwrap();
        let ast_cache = AstCache::new(dir.path().join(".cache"));
        let binder = ProfileProviderBinder {
            super_json: &super_json,
            base_dir: dir.path().to_path_buf(),
            registry: &registry,
            ast_cache: &ast_cache,
        };

        let profile_id: ProfileId = "starwars/characters".parse().unwrap();
        let error = binder
            .bind(&profile_id, "swapi", &BindOptions::default())
            .await
            .unwrap_err();

        assert!(error.to_string().contains("defined locally"));
    }

    #[tokio::test]
    async fn uninstalled_profile_is_a_descriptive_bind_error() {
        let super_json = SuperJson::default();
        let registry = RegistryClient::new("https://registry.invalid", None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ast_cache = AstCache::new(dir.path());
        let binder = ProfileProviderBinder {
            super_json: &super_json,
            base_dir: dir.path().to_path_buf(),
            registry: &registry,
            ast_cache: &ast_cache,
        };

        let profile_id: ProfileId = "missing".parse().unwrap();
        let error = binder
            .bind(&profile_id, "any", &BindOptions::default())
            .await
            .unwrap_err();

        assert!(error.is_bind_error());
        assert!(error.to_string().contains("not installed"));
    }

    #[tokio::test]
    async fn pinned_version_must_match_the_resolved_document() {
        let dir = tempfile::tempdir().unwrap();
        let super_json = write_local_setup(dir.path(), "swapi").await;
        let registry = RegistryClient::new("https://registry.invalid", None).unwrap();
        let ast_cache = AstCache::new(dir.path().join(".cache"));
        let binder = ProfileProviderBinder {
            super_json: &super_json,
            base_dir: dir.path().to_path_buf(),
            registry: &registry,
            ast_cache: &ast_cache,
        };

        let profile_id: ProfileId = "starwars/characters@2.0.0".parse().unwrap();
        let error = binder
            .bind(&profile_id, "swapi", &BindOptions::default())
            .await
            .unwrap_err();

        assert!(error.to_string().contains("2.0.0 was requested"));
    }
}
