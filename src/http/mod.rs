//! HTTP client
//!
//! Issues the requests maps describe: resolves the service base URL,
//! substitutes path placeholders, encodes the body by declared content
//! type, applies security, and decodes the response. Every request is
//! routed through the event hub so the resilience layer can intercept the
//! fetch boundary.

mod digest;
mod security;

pub use digest::{DigestCache, DigestChallenge};
pub use security::{SecurityConfiguration, apply_security, resolve_security};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::events::{EventContext, EventHub};
use crate::values::{Variable, Variables};
use crate::{Error, ErrorReport, NetworkErrorKind, RequestErrorKind, Result};

/// Matches JSON content types (`application/json`, `application/hal+json`).
const JSON_CONTENT: &str = r"^application/(.*\+)?json";
/// Matches byte-oriented content types decoded as binary blobs.
const BINARY_CONTENT: &str = r"^(audio|image|video)/|^application/octet-stream";

/// Default timeout applied when no policy dictates one.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of an outgoing request, encoded at send time.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchBody {
    /// JSON-encoded value
    Json(serde_json::Value),
    /// URL-encoded form fields
    UrlEncoded(Vec<(String, String)>),
    /// Multipart form fields; the boundary lands in `Content-Type`
    Multipart(Vec<(String, String)>),
    /// Raw bytes passed through
    Binary(Bytes),
    /// Plain text fallback
    Text(String),
}

/// One fully resolved fetch, as seen by the event hooks.
#[derive(Debug, Clone)]
pub struct FetchParams {
    /// HTTP method
    pub method: String,
    /// Absolute URL
    pub url: String,
    /// Request headers
    pub headers: Vec<(String, String)>,
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// Request body
    pub body: Option<FetchBody>,
    /// Per-request timeout; hooks overwrite this from the active policy
    pub timeout: Duration,
}

impl FetchParams {
    /// Create parameters with default timeout and no headers or body.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// First value of a header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Set a header, replacing any existing values of the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }
}

/// A decoded HTTP response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Response status code
    pub status_code: u16,
    /// Response headers, names lowercased
    pub headers: HashMap<String, String>,
    /// Raw response body
    pub body: Bytes,
}

impl FetchResponse {
    /// Response content type, when present.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    /// Decode the body by content type: JSON for JSON types, binary blobs
    /// for byte-oriented types, text otherwise.
    pub fn body_variable(&self) -> Result<Variable> {
        let content_type = self.content_type().unwrap_or("");

        #[allow(clippy::unwrap_used)]
        let json_content = regex::Regex::new(JSON_CONTENT).unwrap();
        #[allow(clippy::unwrap_used)]
        let binary_content = regex::Regex::new(BINARY_CONTENT).unwrap();

        if json_content.is_match(content_type) {
            if self.body.is_empty() {
                return Ok(Variable::None);
            }
            let value: serde_json::Value = serde_json::from_slice(&self.body).map_err(|e| {
                Error::Http {
                    status_code: self.status_code,
                    report: ErrorReport::new("Failed to decode JSON response body")
                        .detail(e.to_string()),
                }
            })?;
            Ok(Variable::from(value))
        } else if binary_content.is_match(content_type) {
            Ok(Variable::Bytes(self.body.clone()))
        } else {
            Ok(Variable::String(
                String::from_utf8_lossy(&self.body).into_owned(),
            ))
        }
    }

    /// Headers as a variable map for response-handler scopes.
    pub fn headers_variable(&self) -> Variable {
        Variable::Map(
            self.headers
                .iter()
                .map(|(key, value)| (key.clone(), Variable::String(value.clone())))
                .collect(),
        )
    }

    #[cfg(test)]
    pub(crate) fn test_fixture(status_code: u16) -> Self {
        Self {
            status_code,
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }
}

/// Everything needed to issue one map-described request.
#[derive(Debug, Clone)]
pub struct HttpRequestOptions {
    /// HTTP method
    pub method: String,
    /// Header name/value pairs from the map
    pub headers: Vec<(String, String)>,
    /// Query name/value pairs from the map; `None`-valued entries were
    /// already omitted by the interpreter
    pub query: Vec<(String, String)>,
    /// Request body value
    pub body: Option<Variable>,
    /// Declared request content type; `None` defaults to JSON when a body
    /// is present
    pub content_type: Option<String>,
    /// Security configurations selected by the map's requirements
    pub security: Vec<SecurityConfiguration>,
    /// Values substituted into `{placeholders}` in the path
    pub path_parameters: Variables,
    /// Base URLs by service id
    pub service_base_urls: HashMap<String, String>,
    /// Service used when the map does not pick one
    pub default_service_id: String,
    /// Service picked by the map
    pub service_id: Option<String>,
    /// Digest challenge cache of the bound provider
    pub digest_cache: Option<Arc<DigestCache>>,
}

/// HTTP client shared by all performs of one SDK client.
pub struct HttpClient {
    client: reqwest::Client,
    hub: Arc<EventHub>,
}

impl HttpClient {
    /// Create a client routing fetches through the given hub.
    pub fn new(hub: Arc<EventHub>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::unexpected(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, hub })
    }

    /// Issue a map-described request against a service-relative URL.
    ///
    /// The URL must be service-relative (leading `/`); maps carrying
    /// absolute URLs are a contract violation.
    pub async fn request(
        &self,
        context: &EventContext,
        url: &str,
        options: HttpRequestOptions,
    ) -> Result<FetchResponse> {
        let resolved_url = resolve_url(
            url,
            &options.service_base_urls,
            options.service_id.as_deref(),
            &options.default_service_id,
            &options.path_parameters,
        )?;

        let mut params = FetchParams::new(options.method.clone(), resolved_url);
        params.headers = options.headers.clone();
        params.query = options.query.clone();
        params.body = options
            .body
            .as_ref()
            .map(|body| encode_body(body, options.content_type.as_deref()))
            .transpose()?;
        if let Some(content_type) = declared_content_type(options.content_type.as_deref(), &params)
        {
            params.set_header("Content-Type", content_type);
        }

        apply_security(&mut params, &options.security, options.digest_cache.as_deref())?;

        let response = self.dispatch(context, params.clone()).await?;

        // Digest handshake: a 401 with a challenge is answered once
        if response.status_code == 401 {
            if let Some(retry_params) = digest::answer_challenge(
                &params,
                &response,
                &options.security,
                options.digest_cache.as_deref(),
            )? {
                debug!("Answering digest challenge");
                return self.dispatch(context, retry_params).await;
            }
        }

        Ok(response)
    }

    /// Run one fetch through the event hub.
    async fn dispatch(
        &self,
        context: &EventContext,
        params: FetchParams,
    ) -> Result<FetchResponse> {
        let client = self.client.clone();
        self.hub
            .dispatch_fetch(context, params, move |params| {
                let client = client.clone();
                async move { execute_fetch(&client, params).await }
            })
            .await
    }
}

/// Issue the actual request with reqwest.
async fn execute_fetch(client: &reqwest::Client, params: FetchParams) -> Result<FetchResponse> {
    let method: reqwest::Method = params
        .method
        .parse()
        .map_err(|_| Error::map_ast(format!("Invalid HTTP method '{}'", params.method)))?;

    let mut request = client
        .request(method, params.url.as_str())
        .timeout(params.timeout);

    for (name, value) in &params.headers {
        request = request.header(name, value);
    }
    if !params.query.is_empty() {
        request = request.query(&params.query);
    }

    request = match params.body {
        // The declared Content-Type header stays authoritative, so the JSON
        // body is attached as raw bytes
        Some(FetchBody::Json(value)) => {
            let rendered = serde_json::to_vec(&value)
                .map_err(|e| Error::unexpected(format!("Failed to encode JSON body: {e}")))?;
            request.body(rendered)
        }
        Some(FetchBody::UrlEncoded(fields)) => request.form(&fields),
        Some(FetchBody::Multipart(fields)) => {
            let mut form = reqwest::multipart::Form::new();
            for (name, value) in fields {
                form = form.text(name, value);
            }
            request.multipart(form)
        }
        Some(FetchBody::Binary(bytes)) => request.body(bytes),
        Some(FetchBody::Text(text)) => request.body(text),
        None => request,
    };

    let response = request.send().await.map_err(classify_fetch_error)?;

    let status_code = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_lowercase(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let body = response.bytes().await.map_err(classify_fetch_error)?;

    Ok(FetchResponse {
        status_code,
        headers,
        body,
    })
}

/// Classify a reqwest error into the SDK's fetch-failure taxonomy.
fn classify_fetch_error(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        return Error::NetworkFetch {
            kind: NetworkErrorKind::Timeout,
        };
    }

    if error.is_connect() {
        // Walk the source chain for the underlying io error
        let mut source = std::error::Error::source(&error);
        while let Some(inner) = source {
            if let Some(io) = inner.downcast_ref::<std::io::Error>() {
                if io.kind() == std::io::ErrorKind::ConnectionRefused {
                    return Error::NetworkFetch {
                        kind: NetworkErrorKind::Reject,
                    };
                }
            }
            let rendered = inner.to_string();
            if rendered.contains("dns") || rendered.contains("failed to lookup") {
                return Error::NetworkFetch {
                    kind: NetworkErrorKind::Dns,
                };
            }
            if rendered.contains("certificate") {
                return Error::NetworkFetch {
                    kind: NetworkErrorKind::UnsignedSsl,
                };
            }
            source = std::error::Error::source(inner);
        }
        return Error::NetworkFetch {
            kind: NetworkErrorKind::Reject,
        };
    }

    Error::RequestFetch {
        kind: RequestErrorKind::Abort,
    }
}

/// Resolve a service-relative URL against the selected service base URL,
/// substituting `{placeholders}` from path parameters.
fn resolve_url(
    url: &str,
    service_base_urls: &HashMap<String, String>,
    service_id: Option<&str>,
    default_service_id: &str,
    path_parameters: &Variables,
) -> Result<String> {
    if url.starts_with("http://") || url.starts_with("https://") {
        return Err(Error::map_ast(format!(
            "Absolute URLs are not allowed in maps: '{url}'"
        )));
    }
    if !url.starts_with('/') {
        return Err(Error::map_ast(format!(
            "URL '{url}' must be relative to the service (leading '/')"
        )));
    }

    let service = service_id.unwrap_or(default_service_id);
    let base_url = service_base_urls.get(service).ok_or_else(|| {
        Error::Bind(
            ErrorReport::new(format!("Service not found: {service}")).detail(format!(
                "Provider defines services: {}",
                service_base_urls
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        )
    })?;

    let substituted = substitute_path_parameters(url, path_parameters)?;
    Ok(format!(
        "{}{}",
        base_url.trim_end_matches('/'),
        substituted
    ))
}

/// Substitute `{ param }` placeholders; whitespace inside braces is
/// stripped before lookup, and dotted paths reach into nested values.
fn substitute_path_parameters(url: &str, parameters: &Variables) -> Result<String> {
    #[allow(clippy::unwrap_used)]
    let placeholder = regex::Regex::new(r"\{([^}]*)\}").unwrap();

    let mut missing = Vec::new();
    let root = Variable::Map(parameters.clone());
    let substituted = placeholder.replace_all(url, |caps: &regex::Captures<'_>| {
        let key = caps[1].trim();
        match root.get_path(key) {
            Some(Variable::String(s)) => s.clone(),
            Some(Variable::Number(n)) => n.to_string(),
            Some(Variable::Bool(b)) => b.to_string(),
            _ => {
                missing.push(key.to_string());
                String::new()
            }
        }
    });

    if missing.is_empty() {
        Ok(substituted.into_owned())
    } else {
        Err(Error::map_ast(format!(
            "Missing values for URL path replacement: {}",
            missing.join(", ")
        )))
    }
}

/// Encode a body value under the declared content type.
fn encode_body(body: &Variable, content_type: Option<&str>) -> Result<FetchBody> {
    let content_type = content_type.unwrap_or("application/json");

    if content_type.contains("json") {
        return Ok(FetchBody::Json(serde_json::Value::from(body)));
    }
    if content_type.starts_with("application/x-www-form-urlencoded") {
        return Ok(FetchBody::UrlEncoded(flatten_form_fields(body)));
    }
    if content_type.starts_with("multipart/form-data") {
        return Ok(FetchBody::Multipart(flatten_form_fields(body)));
    }
    if content_type.starts_with("application/octet-stream") {
        return match body {
            Variable::Bytes(bytes) => Ok(FetchBody::Binary(bytes.clone())),
            Variable::String(text) => Ok(FetchBody::Binary(Bytes::from(text.clone().into_bytes()))),
            other => Err(Error::map_ast(format!(
                "Binary body requires bytes or string, got {other:?}"
            ))),
        };
    }

    match body {
        Variable::String(text) => Ok(FetchBody::Text(text.clone())),
        other => Ok(FetchBody::Text(serde_json::Value::from(other).to_string())),
    }
}

/// Content-Type header value to send, when one should be set.
///
/// Multipart is left to the HTTP stack so the boundary parameter is
/// included.
fn declared_content_type(content_type: Option<&str>, params: &FetchParams) -> Option<String> {
    match (&params.body, content_type) {
        (None, _) => None,
        (Some(FetchBody::Multipart(_)), _) => None,
        (Some(_), Some(declared)) => Some(declared.to_string()),
        (Some(FetchBody::Json(_)), None) => Some("application/json".to_string()),
        (Some(_), None) => None,
    }
}

/// Flatten a map body into form fields; scalars stringify, nested values
/// JSON-encode.
fn flatten_form_fields(body: &Variable) -> Vec<(String, String)> {
    let Some(map) = body.cast_to_non_primitive() else {
        return Vec::new();
    };
    map.iter()
        .filter(|(_, value)| !matches!(value, Variable::None))
        .map(|(key, value)| {
            let rendered = match value {
                Variable::String(s) => s.clone(),
                Variable::Number(n) => n.to_string(),
                Variable::Bool(b) => b.to_string(),
                other => serde_json::Value::from(other).to_string(),
            };
            (key.clone(), rendered)
        })
        .collect()
}
