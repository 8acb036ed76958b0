//! Shared fixtures: a temp superface directory with profile, maps, and
//! provider definitions pointing at wiremock servers.
#![allow(dead_code)]

use std::path::Path;

use serde_json::{Value, json};
use superface_sdk::SdkConfig;

/// Profile with one use case `Greet` returning `{message: string}`.
pub fn profile_ast() -> Value {
    json!({
        "kind": "ProfileDocument",
        "astMetadata": {
            "astVersion": {"major": 1, "minor": 0, "patch": 0},
            "sourceChecksum": "profile-fingerprint"
        },
        "header": {"scope": "demo", "name": "greeting",
                   "version": {"major": 1, "minor": 0, "patch": 0}},
        "definitions": [{
            "kind": "UseCaseDefinition",
            "useCaseName": "Greet",
            "safety": "safe",
            "result": {"value": {
                "kind": "ObjectDefinition",
                "fields": [{
                    "fieldName": "message",
                    "required": true,
                    "type": {"kind": "PrimitiveTypeName", "name": "string"}
                }]
            }}
        }]
    })
}

/// Map calling `GET /hello` and mapping the 200 body.
pub fn map_ast(provider: &str, security_ids: &[&str]) -> Value {
    let security: Vec<Value> = security_ids.iter().map(|id| json!({"id": id})).collect();
    json!({
        "kind": "MapDocument",
        "astMetadata": {
            "astVersion": {"major": 1, "minor": 0, "patch": 0},
            "sourceChecksum": format!("map-fingerprint-{provider}")
        },
        "header": {
            "profile": {"scope": "demo", "name": "greeting",
                        "version": {"major": 1, "minor": 0, "patch": 0}},
            "provider": provider
        },
        "definitions": [{
            "kind": "MapDefinition",
            "name": "Greet",
            "usecaseName": "Greet",
            "statements": [{
                "kind": "HttpCallStatement",
                "method": "GET",
                "url": "/hello",
                "request": {"security": security},
                "responseHandlers": [{
                    "statusCode": 200,
                    "contentType": "application/json",
                    "statements": [{
                        "kind": "OutcomeStatement",
                        "isError": false,
                        "terminateFlow": true,
                        "value": {
                            "kind": "ObjectLiteral",
                            "fields": [{
                                "key": ["message"],
                                "value": {"kind": "JessieExpression", "expression": "body.message"}
                            }]
                        }
                    }]
                }]
            }]
        }]
    })
}

/// Provider definition with one default service.
pub fn provider_json(name: &str, base_url: &str, security_schemes: Value) -> Value {
    json!({
        "name": name,
        "services": [{"id": "default", "baseUrl": base_url}],
        "defaultService": "default",
        "securitySchemes": security_schemes
    })
}

/// Write the fixture files and super.json into `dir`.
pub async fn write_setup(dir: &Path, super_json: Value, files: &[(&str, Value)]) {
    for (name, content) in files {
        tokio::fs::write(dir.join(name), content.to_string())
            .await
            .unwrap();
    }
    tokio::fs::write(dir.join("super.json"), super_json.to_string())
        .await
        .unwrap();
}

/// SDK configuration pointing at the fixture directory, metrics off.
pub fn sdk_config(dir: &Path) -> SdkConfig {
    SdkConfig {
        path: Some(dir.join("super.json")),
        cache_path: dir.join(".cache"),
        disable_metric_reporting: true,
        ..SdkConfig::default()
    }
}

/// Circuit-breaker retry policy with a fast backoff for tests.
pub fn circuit_breaker(max_retries: u32, open_time_ms: u64) -> Value {
    json!({
        "kind": "circuitBreaker",
        "maxContiguousRetries": max_retries,
        "requestTimeout": 1000,
        "openTime": open_time_ms,
        "backoff": {"start": 10, "factor": 2.0}
    })
}
