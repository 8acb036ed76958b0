//! Digest authentication handshake against a mock server
//!
//! The first request goes out without credentials; the 401 challenge is
//! answered exactly once with a computed `Authorization: Digest` header.

mod common;

use std::collections::BTreeMap;

use serde_json::json;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{profile_ast, provider_json, sdk_config, write_setup};
use superface_sdk::{OneClient, PerformOptions, Variable};

fn digest_map() -> serde_json::Value {
    json!({
        "kind": "MapDocument",
        "astMetadata": {
            "astVersion": {"major": 1, "minor": 0, "patch": 0},
            "sourceChecksum": "digest-map-fingerprint"
        },
        "header": {
            "profile": {"scope": "demo", "name": "greeting",
                        "version": {"major": 1, "minor": 0, "patch": 0}},
            "provider": "secured"
        },
        "definitions": [{
            "kind": "MapDefinition",
            "name": "Greet",
            "usecaseName": "Greet",
            "statements": [{
                "kind": "HttpCallStatement",
                "method": "GET",
                "url": "/x",
                "request": {"security": [{"id": "dig"}]},
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

#[tokio::test]
async fn challenge_is_answered_with_a_computed_digest_header() {
    let server = MockServer::start().await;

    // Authorized requests succeed; the bare first request gets a challenge
    Mock::given(method("GET"))
        .and(path("/x"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "secret"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", r#"Digest realm="r", nonce="n", qop=auth"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let super_json = json!({
        "profiles": {
            "demo/greeting": {
                "file": "profile.supr.ast.json",
                "providers": {"secured": {"file": "map.suma.ast.json"}}
            }
        },
        "providers": {
            "secured": {
                "file": "provider.json",
                "security": [{"id": "dig", "username": "u", "password": "p"}]
            }
        }
    });
    write_setup(
        dir.path(),
        super_json,
        &[
            ("profile.supr.ast.json", profile_ast()),
            ("map.suma.ast.json", digest_map()),
            (
                "provider.json",
                provider_json(
                    "secured",
                    &server.uri(),
                    json!([{"id": "dig", "type": "http", "scheme": "digest"}]),
                ),
            ),
        ],
    )
    .await;
    let client = OneClient::with_config(sdk_config(dir.path())).unwrap();

    let profile = client.get_profile("demo/greeting").await.unwrap();
    let result = profile
        .get_usecase("Greet")
        .perform(BTreeMap::new(), PerformOptions::default())
        .await
        .unwrap();

    assert_eq!(result.get("message"), Some(&Variable::from("secret")));
    server.verify().await;

    // Inspect the authorized request: RFC 7616 components must be present
    let requests = server.received_requests().await.unwrap();
    let authorization = requests
        .iter()
        .find_map(|request| {
            request
                .headers
                .get("authorization")
                .map(|value| value.to_str().unwrap_or_default().to_string())
        })
        .expect("one request must carry the digest answer");

    assert!(authorization.starts_with("Digest username=\"u\", realm=\"r\", nonce=\"n\", uri=\"/x\""));
    assert!(authorization.contains("qop=auth"));
    assert!(authorization.contains("nc=00000001"));
    assert!(authorization.contains("algorithm=MD5"));
    let response_field = authorization
        .split("response=\"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .expect("response field present");
    assert_eq!(response_field.len(), 32);
    assert!(response_field.chars().all(|c| c.is_ascii_hexdigit()));
}
