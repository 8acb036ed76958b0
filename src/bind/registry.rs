//! Registry protocol client
//!
//! Talks to the Superface services: `POST /registry/bind` to obtain a map
//! AST and provider definition, `GET /providers/{name}` for a provider
//! definition alone, raw map source fetch for diagnostics, and the metric
//! uplink. A configured SDK token is sent as
//! `Authorization: SUPERFACE-SDK-TOKEN <token>`.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ast::MapDocument;
use crate::provider::ProviderJson;
use crate::{Error, ErrorReport, Result};

/// Media type of raw map sources.
const MAP_SOURCE_ACCEPT: &str = "application/vnd.superface.map";

/// Parameters of a registry bind.
#[derive(Debug, Clone, Serialize)]
pub struct BindRequest {
    /// Full profile id including version (`scope/name@x.y.z`)
    pub profile_id: String,
    /// Provider to bind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Optional map variant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_variant: Option<String>,
    /// Optional map revision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_revision: Option<String>,
}

/// Successful bind: provider definition plus parsed map document.
#[derive(Debug, Clone)]
pub struct BindResult {
    /// Provider definition returned by the registry
    pub provider: ProviderJson,
    /// Parsed map document
    pub map: MapDocument,
}

#[derive(Debug, Deserialize)]
struct RawBindResponse {
    provider: serde_json::Value,
    map_ast: Option<String>,
    #[serde(default)]
    map_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProblemBody {
    title: String,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    definition: serde_json::Value,
}

/// HTTP client for the registry protocol.
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: String,
    sdk_token: Option<String>,
}

impl RegistryClient {
    /// Create a client against the configured API base URL.
    pub fn new(base_url: impl Into<String>, sdk_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::unexpected(format!("Failed to build registry client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            sdk_token,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.sdk_token {
            Some(token) => request.header("Authorization", format!("SUPERFACE-SDK-TOKEN {token}")),
            None => request,
        }
    }

    /// Register a bind and parse the returned map document.
    ///
    /// Non-200 responses with a problem body surface as bind errors; other
    /// failures as unknown bind errors.
    pub async fn bind(&self, request: &BindRequest) -> Result<BindResult> {
        debug!(profile = %request.profile_id, provider = ?request.provider, "Registry bind");

        let response = self
            .authorize(self.client.post(format!("{}/registry/bind", self.base_url)))
            .json(request)
            .send()
            .await
            .map_err(|e| transport_bind_error("bind", &e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_bind_error("bind", &e))?;

        if !status.is_success() {
            return Err(problem_to_error(status.as_u16(), &body));
        }

        let raw: RawBindResponse = serde_json::from_slice(&body).map_err(|e| {
            Error::UnknownBind(
                ErrorReport::new("Registry bind returned an unparsable response")
                    .detail(e.to_string()),
            )
        })?;

        let provider =
            ProviderJson::from_json_str(&raw.provider.to_string()).map_err(|e| {
                Error::Bind(
                    ErrorReport::new("Registry bind returned an invalid provider definition")
                        .detail(e.to_string()),
                )
            })?;

        // An absent or unparsable map AST fails the bind; the raw source is
        // fetched first so the error names what exists
        let map = match raw.map_ast.as_deref().map(MapDocument::from_json_str) {
            Some(Ok(map)) => map,
            Some(Err(_)) | None => {
                return Err(self
                    .map_source_diagnostic(raw.map_id.as_deref(), &request.profile_id)
                    .await);
            }
        };

        Ok(BindResult { provider, map })
    }

    /// Build the bind error for an unusable map AST, fetching the raw map
    /// source to tell the user whether the map exists at all.
    async fn map_source_diagnostic(&self, map_id: Option<&str>, profile_id: &str) -> Error {
        let mut report = ErrorReport::new(format!(
            "Registry bind for '{profile_id}' did not return a usable map AST"
        ));

        if let Some(map_id) = map_id {
            match self.fetch_map_source(map_id).await {
                Ok(_) => {
                    report = report
                        .detail(format!("Raw map source for '{map_id}' exists"))
                        .hint("The map likely needs recompilation; update the SDK or the map");
                }
                Err(e) => {
                    warn!(map_id, error = %e, "Raw map source fetch failed");
                    report = report.detail(format!("Raw map source fetch failed: {e}"));
                }
            }
        }

        Error::Bind(report)
    }

    /// Fetch a provider definition.
    pub async fn get_provider(&self, name: &str) -> Result<ProviderJson> {
        debug!(provider = name, "Fetching provider definition");

        let response = self
            .authorize(
                self.client
                    .get(format!("{}/providers/{name}", self.base_url)),
            )
            .send()
            .await
            .map_err(|e| transport_bind_error("provider fetch", &e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_bind_error("provider fetch", &e))?;

        if !status.is_success() {
            return Err(problem_to_error(status.as_u16(), &body));
        }

        let raw: ProviderResponse = serde_json::from_slice(&body).map_err(|e| {
            Error::UnknownBind(
                ErrorReport::new(format!("Provider response for '{name}' is unparsable"))
                    .detail(e.to_string()),
            )
        })?;
        ProviderJson::from_json_str(&raw.definition.to_string())
    }

    /// Fetch a raw map source (used only for diagnostics).
    pub async fn fetch_map_source(&self, map_id: &str) -> Result<String> {
        let response = self
            .authorize(self.client.get(format!("{}/{map_id}", self.base_url)))
            .header("Accept", MAP_SOURCE_ACCEPT)
            .send()
            .await
            .map_err(|e| transport_bind_error("map source fetch", &e))?;

        if !response.status().is_success() {
            return Err(Error::bind(format!(
                "Map source '{map_id}' not found (status {})",
                response.status().as_u16()
            )));
        }
        response
            .text()
            .await
            .map_err(|e| transport_bind_error("map source fetch", &e))
    }

    /// Upload a batch of metric events. Failures are reported, never fatal.
    pub async fn post_sdk_events(&self, batch: &serde_json::Value) -> Result<()> {
        let response = self
            .authorize(
                self.client
                    .post(format!("{}/insights/sdk_event", self.base_url)),
            )
            .json(batch)
            .send()
            .await
            .map_err(|e| Error::unexpected(format!("Metric uplink failed: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::unexpected(format!(
                "Metric uplink rejected with status {}",
                response.status().as_u16()
            )))
        }
    }
}

fn transport_bind_error(operation: &str, error: &reqwest::Error) -> Error {
    Error::UnknownBind(
        ErrorReport::new(format!("Registry {operation} request failed"))
            .detail(error.to_string())
            .hint("Check network connectivity and SUPERFACE_API_URL"),
    )
}

fn problem_to_error(status: u16, body: &[u8]) -> Error {
    match serde_json::from_slice::<ProblemBody>(body) {
        Ok(problem) => {
            let mut report = ErrorReport::new(problem.title);
            if let Some(detail) = problem.detail {
                report = report.detail(detail);
            }
            Error::Bind(report.detail(format!("Registry responded with status {status}")))
        }
        Err(_) => Error::UnknownBind(
            ErrorReport::new(format!("Registry request failed with status {status}"))
                .detail(String::from_utf8_lossy(body).into_owned()),
        ),
    }
}
