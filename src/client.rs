//! Client API
//!
//! [`OneClient`] owns everything with per-client lifetime: configuration,
//! the event hub and hook contexts, the HTTP and registry clients, the
//! caches, and the metric reporter. Use cases are reached through
//! [`Profile::get_usecase`] and executed with [`UseCase::perform`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::bind::{BindOptions, BoundProfileProvider, ProfileProviderBinder, RegistryClient};
use crate::cache::{AstCache, BoundProviderCache};
use crate::config::SdkConfig;
use crate::events::{
    EventContext, EventHub, HookContextMap, PerformParams, SdkEvent, epoch_millis_now,
};
use crate::failsafe::{FailoverRouter, PolicyAdapter, UsecaseInfo, policy_from_config};
use crate::http::HttpClient;
use crate::interpreter::MapInterpreter;
use crate::metrics::MetricReporter;
use crate::profile_id::ProfileId;
use crate::provider::SecurityValues;
use crate::sandbox::Sandbox;
use crate::super_json::{RetryPolicyConfig, SuperJson};
use crate::validation::{validate_input, validate_result};
use crate::values::{Variable, Variables};
use crate::{Error, ErrorReport, Result};

/// Provider handle: a name plus caller-supplied security and parameters.
#[derive(Debug, Clone, Default)]
pub struct Provider {
    /// Provider name
    pub name: String,
    /// Security values overlaid at bind time
    pub security: Vec<SecurityValues>,
    /// Integration parameters overlaid at bind time
    pub parameters: HashMap<String, String>,
}

/// Options of one perform.
#[derive(Debug, Clone, Default)]
pub struct PerformOptions {
    /// Pin a provider instead of letting the router choose
    pub provider: Option<Provider>,
    /// Security values overlaid over super.json (and provider) values
    pub security: Vec<SecurityValues>,
    /// Integration parameters overlaid over super.json (and provider) values
    pub parameters: HashMap<String, String>,
    /// Map variant override
    pub map_variant: Option<String>,
    /// Map revision override
    pub map_revision: Option<String>,
}

impl From<Provider> for PerformOptions {
    fn from(provider: Provider) -> Self {
        Self {
            provider: Some(provider),
            ..Self::default()
        }
    }
}

struct LoadedState {
    super_json: SuperJson,
    base_dir: PathBuf,
    reporter: Option<Arc<MetricReporter>>,
}

/// The SDK client.
pub struct OneClient {
    config: SdkConfig,
    hub: Arc<EventHub>,
    contexts: Arc<HookContextMap>,
    http: HttpClient,
    registry: Arc<RegistryClient>,
    ast_cache: AstCache,
    bound_cache: BoundProviderCache<BoundProfileProvider>,
    state: OnceCell<LoadedState>,
}

impl OneClient {
    /// Create a client configured from `SUPERFACE_*` environment variables.
    pub fn new() -> Result<Self> {
        Self::with_config(SdkConfig::from_env()?)
    }

    /// Create a client with explicit configuration.
    pub fn with_config(config: SdkConfig) -> Result<Self> {
        let hub = Arc::new(EventHub::new());
        let contexts = Arc::new(HookContextMap::new());
        PolicyAdapter::register(Arc::clone(&contexts), &hub);

        let http = HttpClient::new(Arc::clone(&hub))?;
        let registry = Arc::new(RegistryClient::new(
            config.api_url.clone(),
            config.sdk_token.clone(),
        )?);
        let ast_cache = AstCache::new(config.cache_path.clone());
        let bound_cache = BoundProviderCache::new(config.cache_timeout());

        Ok(Self {
            config,
            hub,
            contexts,
            http,
            registry,
            ast_cache,
            bound_cache,
            state: OnceCell::new(),
        })
    }

    /// Subscribe to SDK events (`Success`, `Failure`, `ProviderSwitch`).
    pub fn on_event(&self, priority: usize, handler: impl Fn(&SdkEvent) + Send + Sync + 'static) {
        self.hub.on_event(priority, Box::new(handler));
    }

    /// Get a profile handle by id (`scope/name[@x.y.z]`).
    ///
    /// A version, when given, must be a full `major.minor.patch`.
    pub async fn get_profile(&self, id: &str) -> Result<Profile<'_>> {
        let profile_id: ProfileId = id.parse()?;
        let state = self.ensure_loaded().await?;

        if state.super_json.profile(&profile_id.without_version()).is_none() {
            return Err(Error::Bind(
                ErrorReport::new(format!(
                    "Profile '{}' is not installed in super.json",
                    profile_id.without_version()
                ))
                .hint("Install the profile with the Superface CLI"),
            ));
        }

        Ok(Profile {
            client: self,
            id: profile_id,
        })
    }

    /// Build a provider handle with caller-supplied security and parameters.
    pub fn get_provider(
        &self,
        name: &str,
        security: Vec<SecurityValues>,
        parameters: HashMap<String, String>,
    ) -> Provider {
        Provider {
            name: name.to_string(),
            security,
            parameters,
        }
    }

    /// The preferred provider for a profile: the first priority entry.
    pub async fn get_provider_for_profile(&self, profile_id: &str) -> Result<Provider> {
        let profile_id: ProfileId = profile_id.parse()?;
        let state = self.ensure_loaded().await?;

        let entry = state
            .super_json
            .profile(&profile_id.without_version())
            .ok_or_else(|| {
                Error::bind(format!(
                    "Profile '{}' is not installed in super.json",
                    profile_id.without_version()
                ))
            })?;

        let name = entry.provider_priority().into_iter().next().ok_or_else(|| {
            Error::bind(format!(
                "Profile '{}' has no providers configured",
                profile_id.without_version()
            ))
        })?;

        Ok(Provider {
            name,
            ..Provider::default()
        })
    }

    /// Flush metrics and drop cached bindings.
    pub async fn shutdown(&self) {
        if let Some(state) = self.state.get() {
            if let Some(reporter) = &state.reporter {
                reporter.shutdown().await;
            }
        }
        self.bound_cache.clear();
    }

    /// Load super.json and start the metric reporter, once per client.
    async fn ensure_loaded(&self) -> Result<&LoadedState> {
        self.state
            .get_or_try_init(|| async {
                let path = self.config.super_json_path();
                let base_dir = path
                    .parent()
                    .map_or_else(|| PathBuf::from("."), std::path::Path::to_path_buf);

                let super_json = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    SuperJson::load(&path).await?
                } else {
                    warn!(path = %path.display(), "No super.json found, starting empty");
                    SuperJson::default()
                };

                let reporter = if self.config.disable_metric_reporting {
                    None
                } else {
                    let reporter = MetricReporter::start(
                        Arc::clone(&self.registry),
                        super_json.configuration_hash(),
                        self.config.metric_debounce_min(),
                        self.config.metric_debounce_max(),
                    );
                    let observer = Arc::clone(&reporter);
                    self.hub
                        .on_event(100, Box::new(move |event| observer.observe(event)));
                    Some(reporter)
                };

                Ok(LoadedState {
                    super_json,
                    base_dir,
                    reporter,
                })
            })
            .await
    }

    /// Execute one use case through the perform boundary.
    async fn perform(
        &self,
        profile_id: &ProfileId,
        usecase_name: &str,
        input: Variables,
        options: &PerformOptions,
    ) -> Result<Variable> {
        let state = self.ensure_loaded().await?;
        let profile_key = profile_id.without_version();
        let entry = state.super_json.profile(&profile_key);

        let explicit_provider = options.provider.as_ref().map(|provider| provider.name.clone());

        // Provider priority: configuration order, or just the pinned one
        let mut priority = entry
            .map(crate::super_json::ProfileEntry::provider_priority)
            .unwrap_or_default();
        if priority.is_empty() {
            priority = explicit_provider.clone().map(|name| vec![name]).ok_or_else(|| {
                Error::bind(format!(
                    "Profile '{profile_key}' has no providers configured and none was given"
                ))
            })?;
        }

        // Per-provider policy configuration for this use case
        let policy_configs: HashMap<String, RetryPolicyConfig> = entry
            .map(|entry| {
                entry
                    .providers
                    .iter()
                    .map(|(name, provider_entry)| {
                        let config = provider_entry
                            .defaults
                            .get(usecase_name)
                            .map(|defaults| defaults.retry_policy.clone())
                            .unwrap_or_default();
                        (name.clone(), config)
                    })
                    .collect()
            })
            .unwrap_or_default();
        let allow_failover = entry.is_some_and(|entry| {
            entry.providers.values().any(|provider_entry| {
                provider_entry
                    .defaults
                    .get(usecase_name)
                    .is_some_and(|defaults| defaults.provider_failover)
            })
        });

        let context_key = format!("{profile_key}/{usecase_name}");
        let perform_context = self.contexts.get_or_create(&context_key, || {
            FailoverRouter::new(
                priority.clone(),
                allow_failover,
                Box::new(move |name| {
                    policy_from_config(
                        policy_configs.get(name).unwrap_or(&RetryPolicyConfig::None),
                    )
                }),
            )
        });

        let initial_provider = explicit_provider
            .clone()
            .unwrap_or_else(|| perform_context.lock().router.current_provider().to_string());

        let event_context = EventContext {
            profile: Some(profile_key.clone()),
            usecase: Some(usecase_name.to_string()),
            provider: Some(initial_provider.clone()),
            time_ms: epoch_millis_now(),
        };
        let params = PerformParams {
            provider: Some(initial_provider),
            provider_explicitly_set: explicit_provider.is_some(),
        };

        self.hub
            .dispatch_perform(&event_context, params, |params| {
                self.perform_once(
                    state,
                    profile_id,
                    usecase_name,
                    input.clone(),
                    options,
                    params,
                )
            })
            .await
    }

    /// One bind-and-perform attempt on a concrete provider.
    async fn perform_once(
        &self,
        state: &LoadedState,
        profile_id: &ProfileId,
        usecase_name: &str,
        input: Variables,
        options: &PerformOptions,
        params: PerformParams,
    ) -> Result<Variable> {
        let provider_name = params
            .provider
            .ok_or_else(|| Error::unexpected("Perform dispatched without a provider"))?;

        let bound = self
            .resolve_bound(state, profile_id, &provider_name, options)
            .await?;

        // Use case input defaults from super.json sit under the caller's
        // input; caller-supplied keys win
        let mut input = input;
        if let Some(defaults) = state
            .super_json
            .profile(&profile_id.without_version())
            .and_then(|entry| entry.providers.get(&provider_name))
            .and_then(|provider_entry| provider_entry.defaults.get(usecase_name))
        {
            let mut merged: Variables = defaults
                .input
                .iter()
                .map(|(key, value)| (key.clone(), Variable::from(value.clone())))
                .collect();
            crate::values::merge_variables(&mut merged, input);
            input = merged;
        }

        let info = UsecaseInfo {
            profile_id: profile_id.without_version(),
            usecase_name: usecase_name.to_string(),
            safety: bound
                .profile
                .use_case(usecase_name)
                .map(|use_case| format!("{:?}", use_case.safety).to_lowercase())
                .unwrap_or_else(|| "unsafe".to_string()),
        };
        debug!(
            profile = %info.profile_id,
            usecase = %info.usecase_name,
            safety = %info.safety,
            provider = %provider_name,
            "Performing use case"
        );

        validate_input(&bound.profile, usecase_name, &input)?;

        let context = EventContext {
            profile: Some(profile_id.without_version()),
            usecase: Some(usecase_name.to_string()),
            provider: Some(provider_name),
            time_ms: epoch_millis_now(),
        };
        let resources = bound.resources();
        let sandbox = Sandbox::new(self.config.sandbox_timeout());
        let interpreter = MapInterpreter::new(
            &bound.map,
            &resources,
            &self.http,
            &self.hub,
            sandbox,
            context,
        );

        let result = interpreter.perform(usecase_name, input).await?;
        validate_result(&bound.profile, usecase_name, &result)?;
        Ok(result)
    }

    /// Fetch or create the bound provider for one attempt.
    ///
    /// Binds carrying caller overlays (security, parameters, map variant)
    /// bypass the cache; security values never invalidate cached entries.
    async fn resolve_bound(
        &self,
        state: &LoadedState,
        profile_id: &ProfileId,
        provider_name: &str,
        options: &PerformOptions,
    ) -> Result<Arc<BoundProfileProvider>> {
        let provider_overlay = options.provider.as_ref();
        let cacheable = options.security.is_empty()
            && options.parameters.is_empty()
            && options.map_variant.is_none()
            && options.map_revision.is_none()
            && provider_overlay.is_none_or(|provider| {
                provider.security.is_empty() && provider.parameters.is_empty()
            });

        let cache_key = format!("{profile_id}+{provider_name}");
        if cacheable {
            if let Some(bound) = self.bound_cache.get(&cache_key) {
                return Ok(bound);
            }
        }

        let mut security = provider_overlay
            .map(|provider| provider.security.clone())
            .unwrap_or_default();
        security.extend(options.security.iter().cloned());

        let mut parameters = provider_overlay
            .map(|provider| provider.parameters.clone())
            .unwrap_or_default();
        parameters.extend(options.parameters.clone());

        let binder = ProfileProviderBinder {
            super_json: &state.super_json,
            base_dir: state.base_dir.clone(),
            registry: &self.registry,
            ast_cache: &self.ast_cache,
        };
        let bind_options = BindOptions {
            security,
            parameters,
            map_variant: options.map_variant.clone(),
            map_revision: options.map_revision.clone(),
        };

        let bound = Arc::new(binder.bind(profile_id, provider_name, &bind_options).await?);
        if cacheable {
            self.bound_cache.insert(&cache_key, Arc::clone(&bound));
        }
        Ok(bound)
    }
}

/// A profile handle.
pub struct Profile<'a> {
    client: &'a OneClient,
    id: ProfileId,
}

impl std::fmt::Debug for Profile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile").field("id", &self.id).finish()
    }
}

impl<'a> Profile<'a> {
    /// The parsed profile id.
    pub fn id(&self) -> &ProfileId {
        &self.id
    }

    /// Get a use case handle by name.
    pub fn get_usecase(&self, name: &str) -> UseCase<'a> {
        UseCase {
            client: self.client,
            profile_id: self.id.clone(),
            name: name.to_string(),
        }
    }
}

/// A use case handle.
pub struct UseCase<'a> {
    client: &'a OneClient,
    profile_id: ProfileId,
    name: String,
}

impl UseCase<'_> {
    /// Use case name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Perform the use case with the given input.
    ///
    /// Domain failures come back as the error side of the result; only
    /// programmer misuse (unknown use case, malformed ids) is unexpected.
    pub async fn perform(&self, input: Variables, options: PerformOptions) -> Result<Variable> {
        self.client
            .perform(&self.profile_id, &self.name, input, &options)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_for(dir: &std::path::Path) -> SdkConfig {
        SdkConfig {
            path: Some(dir.join("super.json")),
            cache_path: dir.join(".cache"),
            disable_metric_reporting: true,
            ..SdkConfig::default()
        }
    }

    async fn write_super_json(dir: &std::path::Path, content: serde_json::Value) {
        tokio::fs::write(dir.join("super.json"), content.to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_profile_rejects_uninstalled_profiles() {
        let dir = tempfile::tempdir().unwrap();
        write_super_json(dir.path(), json!({})).await;
        let client = OneClient::with_config(config_for(dir.path())).unwrap();

        let error = client.get_profile("missing/profile").await.unwrap_err();

        assert!(error.is_bind_error());
    }

    #[tokio::test]
    async fn get_profile_rejects_partial_versions() {
        let dir = tempfile::tempdir().unwrap();
        write_super_json(dir.path(), json!({})).await;
        let client = OneClient::with_config(config_for(dir.path())).unwrap();

        assert!(client.get_profile("scope/name@1").await.is_err());
        assert!(client.get_profile("scope/name@1.0").await.is_err());
    }

    #[tokio::test]
    async fn provider_for_profile_picks_the_first_priority_entry() {
        let dir = tempfile::tempdir().unwrap();
        write_super_json(
            dir.path(),
            json!({
                "profiles": {
                    "starwars/characters": {
                        "version": "1.0.0",
                        "priority": ["swapi", "backup"],
                        "providers": {"swapi": {}, "backup": {}}
                    }
                }
            }),
        )
        .await;
        let client = OneClient::with_config(config_for(dir.path())).unwrap();

        let provider = client
            .get_provider_for_profile("starwars/characters")
            .await
            .unwrap();

        assert_eq!(provider.name, "swapi");
    }

    #[tokio::test]
    async fn missing_super_json_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let client = OneClient::with_config(config_for(dir.path())).unwrap();

        let error = client.get_profile("any/profile").await.unwrap_err();

        assert!(error.to_string().contains("not installed"));
    }
}
