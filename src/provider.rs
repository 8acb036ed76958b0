//! Provider definitions
//!
//! A provider JSON document describes a provider's services (base URLs),
//! security schemes, and integration parameters. Security *values* (the
//! secrets) never live in the provider document; they come from the
//! super-document or the caller and are merged against the schemes at bind
//! time.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{Error, ErrorReport, Result};

/// A provider definition document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderJson {
    /// Provider name (document-name grammar)
    pub name: String,
    /// Services exposed by the provider
    pub services: Vec<ProviderService>,
    /// Id of the service used when a map does not pick one
    pub default_service: String,
    /// Declared security schemes
    #[serde(default)]
    pub security_schemes: Vec<SecurityScheme>,
    /// Declared integration parameters
    #[serde(default)]
    pub parameters: Vec<IntegrationParameter>,
}

impl ProviderJson {
    /// Parse a provider definition, checking internal consistency.
    pub fn from_json_str(source: &str) -> Result<Self> {
        let provider: Self = serde_json::from_str(source).map_err(|e| {
            Error::Bind(
                ErrorReport::new("Failed to parse provider definition").detail(e.to_string()),
            )
        })?;
        provider.check()?;
        Ok(provider)
    }

    /// Validate that the default service is defined.
    pub fn check(&self) -> Result<()> {
        if self.service(&self.default_service).is_none() {
            return Err(Error::Bind(
                ErrorReport::new(format!(
                    "Provider '{}' default service '{}' is not defined",
                    self.name, self.default_service
                ))
                .detail(format!("Defined services: {}", self.service_ids().join(", "))),
            ));
        }
        Ok(())
    }

    /// Find a service by id.
    pub fn service(&self, id: &str) -> Option<&ProviderService> {
        self.services.iter().find(|service| service.id == id)
    }

    /// All defined service ids, in declaration order.
    pub fn service_ids(&self) -> Vec<String> {
        self.services.iter().map(|service| service.id.clone()).collect()
    }

    /// Find a security scheme by id.
    pub fn security_scheme(&self, id: &str) -> Option<&SecurityScheme> {
        self.security_schemes.iter().find(|scheme| scheme.id == id)
    }

    /// Default value of an integration parameter, when declared.
    pub fn parameter_default(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|parameter| parameter.name == name)
            .and_then(|parameter| parameter.default.as_deref())
    }
}

/// One service of a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderService {
    /// Service id referenced by maps
    pub id: String,
    /// Base URL requests against this service are resolved from
    pub base_url: String,
}

/// A declared security scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityScheme {
    /// Scheme id referenced by maps and security values
    pub id: String,
    /// Scheme shape
    #[serde(flatten)]
    pub kind: SecuritySchemeKind,
}

/// Security scheme variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SecuritySchemeKind {
    /// API key placed into the request
    #[serde(rename_all = "camelCase")]
    ApiKey {
        /// Where the key goes
        #[serde(rename = "in")]
        placement: ApiKeyPlacement,
        /// Header/query/cookie name or body JSON-pointer fragment
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Body media type for body placement
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body_type: Option<ApiKeyBodyType>,
    },
    /// HTTP authentication scheme
    #[serde(rename_all = "camelCase")]
    Http {
        /// Which HTTP scheme
        scheme: HttpSchemeKind,
        /// Optional bearer token format hint
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bearer_format: Option<String>,
    },
}

/// Placement of an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyPlacement {
    /// Request header
    Header,
    /// Request body (JSON only)
    Body,
    /// Query parameter
    Query,
    /// Cookie header
    Cookie,
}

/// Body media type for API keys placed into the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyBodyType {
    /// JSON body
    Json,
}

/// HTTP authentication scheme kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpSchemeKind {
    /// Basic authentication
    Basic,
    /// Bearer token
    Bearer,
    /// Digest challenge/response
    Digest,
}

/// A declared integration parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationParameter {
    /// Parameter name
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Default used when neither caller nor super-document supplies a value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Secrets for one security scheme, keyed by scheme id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityValues {
    /// Id of the scheme these values satisfy
    pub id: String,
    /// The secret material
    #[serde(flatten)]
    pub secret: SecretValues,
}

/// The secret material of a security value entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretValues {
    /// API key
    ApiKey {
        /// The key
        apikey: String,
    },
    /// Username and password (basic or digest)
    Basic {
        /// User name
        username: String,
        /// Password
        password: String,
    },
    /// Bearer token
    Bearer {
        /// The token
        token: String,
    },
}

/// Overlay caller-supplied security values over super-document values by id.
///
/// Removing the overlay (calling with an empty overlay) returns the base
/// list; entries keep base order, overlay-only entries append in overlay
/// order.
pub fn overlay_security_values(
    base: &[SecurityValues],
    overlay: &[SecurityValues],
) -> Vec<SecurityValues> {
    let mut merged: Vec<SecurityValues> = base
        .iter()
        .map(|value| {
            overlay
                .iter()
                .find(|candidate| candidate.id == value.id)
                .unwrap_or(value)
                .clone()
        })
        .collect();

    for value in overlay {
        if !merged.iter().any(|existing| existing.id == value.id) {
            merged.push(value.clone());
        }
    }

    merged
}

/// Resolve integration parameters: caller overlay over super-document
/// values, falling back to provider declaration defaults.
pub fn resolve_integration_parameters(
    provider: &ProviderJson,
    super_json_values: &BTreeMap<String, String>,
    overlay: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut resolved = HashMap::new();

    for parameter in &provider.parameters {
        let value = overlay
            .get(&parameter.name)
            .or_else(|| super_json_values.get(&parameter.name))
            .cloned()
            .or_else(|| parameter.default.clone());
        if let Some(value) = value {
            resolved.insert(parameter.name.clone(), value);
        }
    }

    // Values for undeclared parameters pass through untouched
    for (name, value) in super_json_values.iter().chain(overlay) {
        resolved
            .entry(name.clone())
            .or_insert_with(|| value.clone());
    }

    resolved
}
