//! Security configuration and application
//!
//! At bind time, security *values* from the super-document (or the caller)
//! are merged against the *schemes* the provider declares into
//! [`SecurityConfiguration`]s. At request time each configuration is
//! applied to the outgoing request in declaration order.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use super::digest::DigestCache;
use super::{FetchBody, FetchParams};
use crate::provider::{
    ApiKeyBodyType, ApiKeyPlacement, HttpSchemeKind, ProviderJson, SecretValues,
    SecuritySchemeKind, SecurityValues,
};
use crate::{Error, ErrorReport, Result};

/// A security scheme merged with its resolved secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityConfiguration {
    /// API key inserted into the request
    ApiKey {
        /// Scheme id
        id: String,
        /// Where the key goes
        placement: ApiKeyPlacement,
        /// Header/query/cookie name, or body JSON-pointer fragment
        name: String,
        /// Body media type for body placement
        body_type: Option<ApiKeyBodyType>,
        /// The key
        apikey: String,
    },
    /// Basic authentication
    Basic {
        /// Scheme id
        id: String,
        /// User name
        username: String,
        /// Password
        password: String,
    },
    /// Bearer token
    Bearer {
        /// Scheme id
        id: String,
        /// The token
        token: String,
    },
    /// Digest challenge/response
    Digest {
        /// Scheme id
        id: String,
        /// User name
        username: String,
        /// Password
        password: String,
    },
}

impl SecurityConfiguration {
    /// Scheme id this configuration satisfies.
    pub fn id(&self) -> &str {
        match self {
            Self::ApiKey { id, .. }
            | Self::Basic { id, .. }
            | Self::Bearer { id, .. }
            | Self::Digest { id, .. } => id,
        }
    }
}

/// Merge security values against the provider's schemes.
///
/// Every value must name a declared scheme and carry the keys that scheme
/// requires; violations are descriptive bind-time errors listing the
/// expected keys.
pub fn resolve_security(
    provider: &ProviderJson,
    values: &[SecurityValues],
) -> Result<Vec<SecurityConfiguration>> {
    values
        .iter()
        .map(|value| {
            let scheme = provider.security_scheme(&value.id).ok_or_else(|| {
                Error::Bind(
                    ErrorReport::new(format!(
                        "Provider '{}' does not define security scheme '{}'",
                        provider.name, value.id
                    ))
                    .detail(format!(
                        "Defined schemes: {}",
                        provider
                            .security_schemes
                            .iter()
                            .map(|scheme| scheme.id.clone())
                            .collect::<Vec<_>>()
                            .join(", ")
                    )),
                )
            })?;

            merge_scheme_and_values(&scheme.id, &scheme.kind, &value.secret)
        })
        .collect()
}

fn merge_scheme_and_values(
    id: &str,
    kind: &SecuritySchemeKind,
    secret: &SecretValues,
) -> Result<SecurityConfiguration> {
    match (kind, secret) {
        (
            SecuritySchemeKind::ApiKey {
                placement,
                name,
                body_type,
            },
            SecretValues::ApiKey { apikey },
        ) => Ok(SecurityConfiguration::ApiKey {
            id: id.to_string(),
            placement: *placement,
            name: name
                .clone()
                .unwrap_or_else(|| default_api_key_name(*placement, id)),
            body_type: *body_type,
            apikey: apikey.clone(),
        }),
        (
            SecuritySchemeKind::Http {
                scheme: HttpSchemeKind::Basic,
                ..
            },
            SecretValues::Basic { username, password },
        ) => Ok(SecurityConfiguration::Basic {
            id: id.to_string(),
            username: username.clone(),
            password: password.clone(),
        }),
        (
            SecuritySchemeKind::Http {
                scheme: HttpSchemeKind::Digest,
                ..
            },
            SecretValues::Basic { username, password },
        ) => Ok(SecurityConfiguration::Digest {
            id: id.to_string(),
            username: username.clone(),
            password: password.clone(),
        }),
        (
            SecuritySchemeKind::Http {
                scheme: HttpSchemeKind::Bearer,
                ..
            },
            SecretValues::Bearer { token },
        ) => Ok(SecurityConfiguration::Bearer {
            id: id.to_string(),
            token: token.clone(),
        }),
        (kind, _) => Err(Error::Bind(
            ErrorReport::new(format!(
                "Security values for scheme '{id}' do not match its shape"
            ))
            .detail(format!("Expected keys: {}", expected_keys(kind)))
            .hint("Check the security values in super.json or the perform options"),
        )),
    }
}

fn expected_keys(kind: &SecuritySchemeKind) -> &'static str {
    match kind {
        SecuritySchemeKind::ApiKey { .. } => "apikey",
        SecuritySchemeKind::Http {
            scheme: HttpSchemeKind::Basic | HttpSchemeKind::Digest,
            ..
        } => "username, password",
        SecuritySchemeKind::Http {
            scheme: HttpSchemeKind::Bearer,
            ..
        } => "token",
    }
}

fn default_api_key_name(placement: ApiKeyPlacement, id: &str) -> String {
    match placement {
        ApiKeyPlacement::Header => "Authorization".to_string(),
        _ => id.to_string(),
    }
}

/// Apply each configuration to the request in declaration order.
///
/// Digest schemes apply lazily: the first request goes out without
/// credentials unless a cached challenge exists for the target.
pub fn apply_security(
    params: &mut FetchParams,
    configurations: &[SecurityConfiguration],
    digest_cache: Option<&DigestCache>,
) -> Result<()> {
    for configuration in configurations {
        match configuration {
            SecurityConfiguration::ApiKey {
                placement,
                name,
                apikey,
                ..
            } => apply_api_key(params, *placement, name, apikey)?,
            SecurityConfiguration::Basic {
                username, password, ..
            } => {
                let credentials = BASE64.encode(format!("{username}:{password}"));
                params.set_header("Authorization", format!("Basic {credentials}"));
            }
            SecurityConfiguration::Bearer { token, .. } => {
                params.set_header("Authorization", format!("Bearer {token}"));
            }
            SecurityConfiguration::Digest {
                username, password, ..
            } => {
                if let Some(cache) = digest_cache {
                    if let Some(authorization) =
                        cache.cached_authorization(params, username, password)
                    {
                        params.set_header("Authorization", authorization);
                    }
                }
            }
        }
    }
    Ok(())
}

fn apply_api_key(
    params: &mut FetchParams,
    placement: ApiKeyPlacement,
    name: &str,
    apikey: &str,
) -> Result<()> {
    match placement {
        ApiKeyPlacement::Header => params.set_header(name, apikey),
        ApiKeyPlacement::Query => params.query.push((name.to_string(), apikey.to_string())),
        ApiKeyPlacement::Cookie => {
            let cookie = match params.header("Cookie") {
                Some(existing) => format!("{existing}; {name}={apikey}"),
                None => format!("{name}={apikey}"),
            };
            params.set_header("Cookie", cookie);
        }
        ApiKeyPlacement::Body => insert_into_body(params, name, apikey)?,
    }
    Ok(())
}

/// Insert the key into a JSON body at the JSON-pointer fragment `name`
/// (`/auth/key`), creating intermediate objects.
fn insert_into_body(params: &mut FetchParams, pointer: &str, apikey: &str) -> Result<()> {
    let Some(FetchBody::Json(body)) = params.body.as_mut() else {
        return Err(Error::Unexpected(
            ErrorReport::new("ApiKey in body requires a JSON object body").detail(format!(
                "Scheme placed the key at '{pointer}' but the request body is not an object"
            )),
        ));
    };

    let mut current = &mut *body;
    let segments: Vec<&str> = pointer.trim_start_matches('/').split('/').collect();
    let Some((leaf, path)) = segments.split_last() else {
        return Err(Error::unexpected("Empty ApiKey body pointer"));
    };

    for segment in path {
        if !current.is_object() {
            return Err(Error::Unexpected(
                ErrorReport::new("ApiKey in body requires a JSON object body")
                    .detail(format!("Path segment '{segment}' is not an object")),
            ));
        }
        current = current
            .as_object_mut()
            .map(|map| {
                map.entry((*segment).to_string())
                    .or_insert_with(|| serde_json::json!({}))
            })
            .ok_or_else(|| Error::unexpected("ApiKey body pointer walked into a non-object"))?;
    }

    match current.as_object_mut() {
        Some(map) => {
            map.insert((*leaf).to_string(), serde_json::Value::String(apikey.to_string()));
            Ok(())
        }
        None => Err(Error::Unexpected(
            ErrorReport::new("ApiKey in body requires a JSON object body")
                .detail(format!("Target of '{pointer}' is not an object")),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> ProviderJson {
        ProviderJson::from_json_str(
            &json!({
                "name": "p",
                "services": [{"id": "default", "baseUrl": "https://example.com"}],
                "defaultService": "default",
                "securitySchemes": [
                    {"id": "key_header", "type": "apiKey", "in": "header", "name": "X-Key"},
                    {"id": "key_body", "type": "apiKey", "in": "body", "name": "/auth/key", "bodyType": "json"},
                    {"id": "login", "type": "http", "scheme": "basic"},
                    {"id": "token", "type": "http", "scheme": "bearer"},
                    {"id": "dig", "type": "http", "scheme": "digest"}
                ]
            })
            .to_string(),
        )
        .unwrap()
    }

    fn api_key_values(id: &str) -> SecurityValues {
        SecurityValues {
            id: id.to_string(),
            secret: SecretValues::ApiKey {
                apikey: "secret".to_string(),
            },
        }
    }

    #[test]
    fn resolves_matching_scheme_and_values() {
        let configurations = resolve_security(&provider(), &[api_key_values("key_header")]).unwrap();

        assert_eq!(
            configurations,
            vec![SecurityConfiguration::ApiKey {
                id: "key_header".to_string(),
                placement: ApiKeyPlacement::Header,
                name: "X-Key".to_string(),
                body_type: None,
                apikey: "secret".to_string(),
            }]
        );
    }

    #[test]
    fn unknown_scheme_id_is_a_bind_error_listing_schemes() {
        let error = resolve_security(&provider(), &[api_key_values("nope")]).unwrap_err();

        let rendered = error.to_string();
        assert!(rendered.contains("does not define security scheme 'nope'"));
        assert!(rendered.contains("key_header"));
    }

    #[test]
    fn mismatched_value_shape_lists_expected_keys() {
        let error = resolve_security(&provider(), &[api_key_values("login")]).unwrap_err();

        assert!(error.to_string().contains("Expected keys: username, password"));
    }

    #[test]
    fn digest_scheme_accepts_username_password() {
        let values = SecurityValues {
            id: "dig".to_string(),
            secret: SecretValues::Basic {
                username: "u".to_string(),
                password: "p".to_string(),
            },
        };
        let configurations = resolve_security(&provider(), &[values]).unwrap();
        assert!(matches!(
            configurations[0],
            SecurityConfiguration::Digest { .. }
        ));
    }

    #[test]
    fn basic_auth_sets_encoded_authorization() {
        let mut params = FetchParams::new("GET", "https://example.com/x");
        let configuration = SecurityConfiguration::Basic {
            id: "login".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
        };

        apply_security(&mut params, &[configuration], None).unwrap();

        assert_eq!(params.header("Authorization"), Some("Basic dXNlcjpwYXNz"));
    }

    #[test]
    fn bearer_auth_sets_authorization() {
        let mut params = FetchParams::new("GET", "https://example.com/x");
        let configuration = SecurityConfiguration::Bearer {
            id: "token".to_string(),
            token: "t0ken".to_string(),
        };

        apply_security(&mut params, &[configuration], None).unwrap();

        assert_eq!(params.header("Authorization"), Some("Bearer t0ken"));
    }

    #[test]
    fn api_key_in_cookie_merges_with_existing_cookie() {
        let mut params = FetchParams::new("GET", "https://example.com/x");
        params.set_header("Cookie", "session=1");

        apply_api_key(&mut params, ApiKeyPlacement::Cookie, "key", "v").unwrap();

        assert_eq!(params.header("Cookie"), Some("session=1; key=v"));
    }

    #[test]
    fn api_key_in_body_creates_intermediate_objects() {
        let mut params = FetchParams::new("POST", "https://example.com/x");
        params.body = Some(FetchBody::Json(json!({"existing": true})));

        apply_api_key(&mut params, ApiKeyPlacement::Body, "/auth/key", "secret").unwrap();

        assert_eq!(
            params.body,
            Some(FetchBody::Json(json!({
                "existing": true,
                "auth": {"key": "secret"}
            })))
        );
    }

    #[test]
    fn api_key_in_non_object_body_fails() {
        let mut params = FetchParams::new("POST", "https://example.com/x");
        params.body = Some(FetchBody::Text("plain".to_string()));

        let error = apply_api_key(&mut params, ApiKeyPlacement::Body, "/key", "v").unwrap_err();

        assert!(error.to_string().contains("requires a JSON object body"));
    }
}
