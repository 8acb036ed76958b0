//! Failover integration tests
//!
//! Two providers behind wiremock servers: `p` failing, `q` healthy. The
//! circuit breaker on `p` trips after its retries and the router either
//! fails over to `q` or surfaces the abort, depending on configuration.

mod common;

use std::collections::BTreeMap;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{circuit_breaker, map_ast, profile_ast, provider_json, sdk_config, write_setup};
use superface_sdk::{OneClient, PerformOptions, Variable};

async fn setup_two_providers(
    dir: &std::path::Path,
    p_url: &str,
    q_url: &str,
    provider_failover: bool,
) {
    let super_json = json!({
        "profiles": {
            "demo/greeting": {
                "file": "profile.supr.ast.json",
                "priority": ["p", "q"],
                "providers": {
                    "p": {
                        "file": "map-p.suma.ast.json",
                        "defaults": {
                            "Greet": {
                                "retryPolicy": circuit_breaker(2, 30_000),
                                "providerFailover": provider_failover
                            }
                        }
                    },
                    "q": {
                        "file": "map-q.suma.ast.json",
                        "defaults": {
                            "Greet": {
                                "retryPolicy": circuit_breaker(2, 30_000),
                                "providerFailover": provider_failover
                            }
                        }
                    }
                }
            }
        },
        "providers": {
            "p": {"file": "provider-p.json"},
            "q": {"file": "provider-q.json"}
        }
    });

    write_setup(
        dir,
        super_json,
        &[
            ("profile.supr.ast.json", profile_ast()),
            ("map-p.suma.ast.json", map_ast("p", &[])),
            ("map-q.suma.ast.json", map_ast("q", &[])),
            ("provider-p.json", provider_json("p", p_url, json!([]))),
            ("provider-q.json", provider_json("q", q_url, json!([]))),
        ],
    )
    .await;
}

fn greeting(message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"message": message}))
}

#[tokio::test]
async fn failing_provider_fails_over_to_backup() {
    let p = MockServer::start().await;
    let q = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/hello"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&p)
        .await;
    Mock::given(method("GET"))
        .and(path("/hello"))
        .respond_with(greeting("hello from q"))
        .expect(1)
        .mount(&q)
        .await;

    let dir = tempfile::tempdir().unwrap();
    setup_two_providers(dir.path(), &p.uri(), &q.uri(), true).await;
    let client = OneClient::with_config(sdk_config(dir.path())).unwrap();

    let profile = client.get_profile("demo/greeting").await.unwrap();
    let result = profile
        .get_usecase("Greet")
        .perform(BTreeMap::new(), PerformOptions::default())
        .await
        .unwrap();

    assert_eq!(
        result.get("message"),
        Some(&Variable::from("hello from q"))
    );
    p.verify().await;
    q.verify().await;
}

#[tokio::test]
async fn disabled_failover_surfaces_the_abort_reason() {
    let p = MockServer::start().await;
    let q = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/hello"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&p)
        .await;
    Mock::given(method("GET"))
        .and(path("/hello"))
        .respond_with(greeting("hello from q"))
        .expect(0)
        .mount(&q)
        .await;

    let dir = tempfile::tempdir().unwrap();
    setup_two_providers(dir.path(), &p.uri(), &q.uri(), false).await;
    let client = OneClient::with_config(sdk_config(dir.path())).unwrap();

    let profile = client.get_profile("demo/greeting").await.unwrap();
    let error = profile
        .get_usecase("Greet")
        .perform(BTreeMap::new(), PerformOptions::default())
        .await
        .unwrap_err();

    assert!(
        error.to_string().contains("No backup provider available"),
        "unexpected error: {error}"
    );
    p.verify().await;
    q.verify().await;
}

#[tokio::test]
async fn recovered_provider_is_restored_after_the_open_window() {
    let p = MockServer::start().await;
    let q = MockServer::start().await;

    // p: two failures trip the breaker, afterwards it is healthy again
    Mock::given(method("GET"))
        .and(path("/hello"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&p)
        .await;
    Mock::given(method("GET"))
        .and(path("/hello"))
        .respond_with(greeting("hello from p"))
        .mount(&p)
        .await;
    Mock::given(method("GET"))
        .and(path("/hello"))
        .respond_with(greeting("hello from q"))
        .mount(&q)
        .await;

    let dir = tempfile::tempdir().unwrap();
    // Short open window so the test can outwait it
    let super_json = json!({
        "profiles": {
            "demo/greeting": {
                "file": "profile.supr.ast.json",
                "priority": ["p", "q"],
                "providers": {
                    "p": {
                        "file": "map-p.suma.ast.json",
                        "defaults": {"Greet": {
                            "retryPolicy": circuit_breaker(2, 200),
                            "providerFailover": true
                        }}
                    },
                    "q": {
                        "file": "map-q.suma.ast.json",
                        "defaults": {"Greet": {
                            "retryPolicy": circuit_breaker(2, 200),
                            "providerFailover": true
                        }}
                    }
                }
            }
        },
        "providers": {
            "p": {"file": "provider-p.json"},
            "q": {"file": "provider-q.json"}
        }
    });
    write_setup(
        dir.path(),
        super_json,
        &[
            ("profile.supr.ast.json", profile_ast()),
            ("map-p.suma.ast.json", map_ast("p", &[])),
            ("map-q.suma.ast.json", map_ast("q", &[])),
            ("provider-p.json", provider_json("p", &p.uri(), json!([]))),
            ("provider-q.json", provider_json("q", &q.uri(), json!([]))),
        ],
    )
    .await;
    let client = OneClient::with_config(sdk_config(dir.path())).unwrap();
    let profile = client.get_profile("demo/greeting").await.unwrap();
    let usecase = profile.get_usecase("Greet");

    // First perform: p trips, q serves
    let first = usecase
        .perform(BTreeMap::new(), PerformOptions::default())
        .await
        .unwrap();
    assert_eq!(first.get("message"), Some(&Variable::from("hello from q")));

    // Within the open window the router stays on q
    let second = usecase
        .perform(BTreeMap::new(), PerformOptions::default())
        .await
        .unwrap();
    assert_eq!(second.get("message"), Some(&Variable::from("hello from q")));

    // After the window elapses, restore kicks in and p serves again
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let third = usecase
        .perform(BTreeMap::new(), PerformOptions::default())
        .await
        .unwrap();
    assert_eq!(third.get("message"), Some(&Variable::from("hello from p")));
}

#[tokio::test]
async fn provider_switch_emits_an_event() {
    let p = MockServer::start().await;
    let q = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/hello"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&p)
        .await;
    Mock::given(method("GET"))
        .and(path("/hello"))
        .respond_with(greeting("hello from q"))
        .mount(&q)
        .await;

    let dir = tempfile::tempdir().unwrap();
    setup_two_providers(dir.path(), &p.uri(), &q.uri(), true).await;
    let client = OneClient::with_config(sdk_config(dir.path())).unwrap();

    let switches = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let switches_clone = std::sync::Arc::clone(&switches);
    client.on_event(50, move |event| {
        if let superface_sdk::events::SdkEvent::ProviderSwitch {
            from_provider,
            to_provider,
            ..
        } = event
        {
            switches_clone
                .lock()
                .unwrap()
                .push((from_provider.clone(), to_provider.clone()));
        }
    });

    let profile = client.get_profile("demo/greeting").await.unwrap();
    let _ = profile
        .get_usecase("Greet")
        .perform(BTreeMap::new(), PerformOptions::default())
        .await
        .unwrap();

    assert_eq!(
        switches.lock().unwrap().first(),
        Some(&("p".to_string(), "q".to_string()))
    );
}
