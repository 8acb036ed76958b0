//! Policy adapter
//!
//! Registers interceptors on the fetch, unhandled-http, and
//! bind-and-perform boundaries and translates between event decisions and
//! policy resolutions. Fetch-boundary hooks never fail the perform
//! directly: they queue an action in the perform context and abort the
//! fetch with a placeholder, and the perform boundary consumes the queued
//! action (retrying with a new provider or failing with the policy's
//! reason).

use std::sync::{Arc, Weak};

use tracing::debug;

use crate::events::{
    EventContext, EventHub, FetchInterceptor, HookContextMap, PerformInterceptor, PerformParams,
    PostDecision, PreDecision, QueuedAction, SdkEvent, UnhandledHttpDecision,
    UnhandledHttpInterceptor, epoch_millis_now,
};
use crate::http::{FetchParams, FetchResponse};
use crate::values::Variable;
use crate::{Error, ErrorReport, Result, SdkError};

use super::policy::{ExecutionInfo, FailureInfo, FailureKind, SuccessInfo};
use super::router::{RouterBeforeResolution, RouterFailureResolution};

/// Hook priority of the resilience layer; runs outermost.
pub const POLICY_HOOK_PRIORITY: usize = 10;

/// Placeholder rejection used while an action is queued.
fn placeholder_rejection() -> SdkError {
    Error::unexpected("Fetch aborted by failure policy")
}

/// Final error for a policy abort, keeping the bind classification when the
/// underlying failure was one.
fn abort_error(reason: &str, was_bind: bool) -> SdkError {
    let report = ErrorReport::new(reason.to_string());
    if was_bind {
        Error::Bind(report)
    } else {
        Error::Unexpected(report)
    }
}

/// Classify an SDK error into a policy failure kind.
fn classify(error: &SdkError) -> FailureKind {
    match error {
        SdkError::NetworkFetch { .. } => FailureKind::Network,
        SdkError::RequestFetch { .. } => FailureKind::Request,
        SdkError::Http { .. } | SdkError::MappedHttp { .. } => FailureKind::Http,
        SdkError::Bind(_) | SdkError::UnknownBind(_) => FailureKind::Bind,
        _ => FailureKind::Unknown,
    }
}

fn kind_label(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::Network => "network",
        FailureKind::Request => "request",
        FailureKind::Http => "http",
        FailureKind::Bind => "bind",
        FailureKind::Unknown => "unknown",
    }
}

/// First line of an error rendering, used in abort reasons.
fn first_line(error: &SdkError) -> String {
    error.to_string().lines().next().unwrap_or_default().to_string()
}

/// Event interceptor driving the failover router.
pub struct PolicyAdapter {
    contexts: Arc<HookContextMap>,
    /// Weak back-reference: the adapter is owned by the hub it emits to.
    hub: Weak<EventHub>,
}

impl PolicyAdapter {
    /// Create an adapter over the client's hook-context map.
    pub fn new(contexts: Arc<HookContextMap>, hub: Weak<EventHub>) -> Self {
        Self { contexts, hub }
    }

    /// Register the adapter on all three boundaries of a hub.
    pub fn register(contexts: Arc<HookContextMap>, hub: &Arc<EventHub>) {
        let adapter = Arc::new(Self::new(contexts, Arc::downgrade(hub)));
        hub.register_fetch(
            POLICY_HOOK_PRIORITY,
            Arc::clone(&adapter) as Arc<dyn FetchInterceptor>,
        );
        hub.register_perform(
            POLICY_HOOK_PRIORITY,
            Arc::clone(&adapter) as Arc<dyn PerformInterceptor>,
        );
        hub.register_unhandled_http(
            POLICY_HOOK_PRIORITY,
            adapter as Arc<dyn UnhandledHttpInterceptor>,
        );
    }

    fn emit(&self, event: SdkEvent) {
        if let Some(hub) = self.hub.upgrade() {
            hub.emit(&event);
        }
    }

    fn emit_failure(&self, context: &EventContext, provider: String, kind: FailureKind) {
        self.emit(SdkEvent::Failure {
            profile: context.profile.clone().unwrap_or_default(),
            usecase: context.usecase.clone().unwrap_or_default(),
            provider,
            kind: kind_label(kind).to_string(),
        });
    }
}

#[async_trait::async_trait]
impl FetchInterceptor for PolicyAdapter {
    async fn pre_fetch(
        &self,
        context: &EventContext,
        params: &mut FetchParams,
    ) -> PreDecision<FetchResponse> {
        let Some(key) = context.context_key() else {
            return PreDecision::Continue;
        };
        let Some(perform_context) = self.contexts.get(&key) else {
            return PreDecision::Continue;
        };

        let info = ExecutionInfo {
            time_ms: epoch_millis_now(),
            check_failover_restore: false,
        };
        // Resolve under the lock, sleep outside it
        let resolution = perform_context.lock().router.before_execution(&info);

        match resolution {
            RouterBeforeResolution::Continue { timeout } => {
                params.timeout = timeout;
                PreDecision::Continue
            }
            RouterBeforeResolution::Backoff { sleep, timeout } => {
                params.timeout = timeout;
                debug!(sleep_ms = sleep.as_millis(), "Backing off before fetch");
                tokio::time::sleep(sleep).await;
                PreDecision::Continue
            }
            RouterBeforeResolution::SwitchProvider { provider, reason } => {
                perform_context.lock().queued_action =
                    Some(QueuedAction::SwitchProvider { provider, reason });
                PreDecision::Abort(Err(placeholder_rejection()))
            }
            RouterBeforeResolution::Abort { reason } => {
                perform_context.lock().queued_action = Some(QueuedAction::FullAbort { reason });
                PreDecision::Abort(Err(placeholder_rejection()))
            }
        }
    }

    async fn post_fetch(
        &self,
        context: &EventContext,
        _params: &mut FetchParams,
        result: &mut Result<FetchResponse>,
    ) -> PostDecision {
        let Some(key) = context.context_key() else {
            return PostDecision::Continue;
        };
        let Some(perform_context) = self.contexts.get(&key) else {
            return PostDecision::Continue;
        };
        if perform_context.lock().queued_action.is_some() {
            return PostDecision::Continue;
        }

        let Err(error) = result else {
            return PostDecision::Continue;
        };
        let kind = match classify(error) {
            // HTTP statuses are judged by the unhandled-http boundary
            FailureKind::Http => return PostDecision::Continue,
            FailureKind::Bind => FailureKind::Unknown,
            kind => kind,
        };

        let info = FailureInfo {
            time_ms: epoch_millis_now(),
            kind,
            description: first_line(error),
        };
        let resolution = perform_context.lock().router.after_failure(&info);

        match resolution {
            RouterFailureResolution::Retry => PostDecision::Retry,
            RouterFailureResolution::SwitchProvider { provider, reason } => {
                perform_context.lock().queued_action =
                    Some(QueuedAction::SwitchProvider { provider, reason });
                *result = Err(placeholder_rejection());
                PostDecision::Continue
            }
            RouterFailureResolution::Abort { reason } => {
                perform_context.lock().queued_action = Some(QueuedAction::FullAbort { reason });
                *result = Err(placeholder_rejection());
                PostDecision::Continue
            }
        }
    }
}

impl UnhandledHttpInterceptor for PolicyAdapter {
    fn unhandled_http(
        &self,
        context: &EventContext,
        status_code: u16,
    ) -> UnhandledHttpDecision {
        let Some(key) = context.context_key() else {
            return UnhandledHttpDecision::Continue;
        };
        let Some(perform_context) = self.contexts.get(&key) else {
            return UnhandledHttpDecision::Continue;
        };

        let info = FailureInfo {
            time_ms: epoch_millis_now(),
            kind: FailureKind::Http,
            description: format!("HTTP call failed with status {status_code}"),
        };
        let resolution = perform_context.lock().router.after_failure(&info);

        match resolution {
            RouterFailureResolution::Retry => UnhandledHttpDecision::Retry,
            RouterFailureResolution::SwitchProvider { provider, reason } => {
                perform_context.lock().queued_action =
                    Some(QueuedAction::SwitchProvider { provider, reason });
                UnhandledHttpDecision::Abort(placeholder_rejection())
            }
            RouterFailureResolution::Abort { reason } => {
                perform_context.lock().queued_action = Some(QueuedAction::FullAbort { reason });
                UnhandledHttpDecision::Abort(placeholder_rejection())
            }
        }
    }
}

#[async_trait::async_trait]
impl PerformInterceptor for PolicyAdapter {
    async fn pre_perform(
        &self,
        context: &EventContext,
        params: &mut PerformParams,
    ) -> PreDecision<Variable> {
        if params.provider_explicitly_set {
            return PreDecision::Continue;
        }
        let Some(key) = context.context_key() else {
            return PreDecision::Continue;
        };
        let Some(perform_context) = self.contexts.get(&key) else {
            return PreDecision::Continue;
        };

        let info = ExecutionInfo {
            time_ms: epoch_millis_now(),
            check_failover_restore: true,
        };
        let resolution = perform_context.lock().router.before_execution(&info);

        match resolution {
            RouterBeforeResolution::Continue { .. } => PreDecision::Continue,
            RouterBeforeResolution::Backoff { sleep, .. } => {
                tokio::time::sleep(sleep).await;
                PreDecision::Continue
            }
            RouterBeforeResolution::SwitchProvider { provider, reason } => {
                perform_context.lock().queued_action =
                    Some(QueuedAction::SwitchProvider { provider, reason });
                PreDecision::Abort(Err(placeholder_rejection()))
            }
            RouterBeforeResolution::Abort { reason } => {
                perform_context.lock().queued_action = Some(QueuedAction::FullAbort { reason });
                PreDecision::Abort(Err(placeholder_rejection()))
            }
        }
    }

    async fn post_perform(
        &self,
        context: &EventContext,
        params: &mut PerformParams,
        result: &mut Result<Variable>,
    ) -> PostDecision {
        let Some(key) = context.context_key() else {
            return PostDecision::Continue;
        };
        let Some(perform_context) = self.contexts.get(&key) else {
            return PostDecision::Continue;
        };

        let queued = perform_context.lock().take_action();
        if let Some(action) = queued {
            return match action {
                QueuedAction::SwitchProvider { provider, reason } => {
                    let from_provider = {
                        let mut locked = perform_context.lock();
                        let from = locked.router.current_provider().to_string();
                        locked.router.set_current_provider(&provider);
                        from
                    };
                    self.emit(SdkEvent::ProviderSwitch {
                        profile: context.profile.clone().unwrap_or_default(),
                        usecase: context.usecase.clone().unwrap_or_default(),
                        from_provider,
                        to_provider: provider.clone(),
                        reason,
                    });
                    params.provider = Some(provider);
                    PostDecision::Retry
                }
                QueuedAction::FullAbort { reason } => {
                    let was_bind = result
                        .as_ref()
                        .err()
                        .is_some_and(SdkError::is_bind_error);
                    *result = Err(abort_error(&reason, was_bind));
                    let provider = perform_context.lock().router.current_provider().to_string();
                    self.emit_failure(context, provider, FailureKind::Unknown);
                    PostDecision::Break
                }
                QueuedAction::Recache { reason } => {
                    *result = Err(Error::unexpected(format!(
                        "Recache is a reserved action with no consumer: {reason}"
                    )));
                    PostDecision::Break
                }
            };
        }

        match result {
            Ok(_) => {
                let info = SuccessInfo {
                    time_ms: epoch_millis_now(),
                };
                let provider = {
                    let mut locked = perform_context.lock();
                    locked.router.after_success(&info);
                    locked.router.current_provider().to_string()
                };
                self.emit(SdkEvent::Success {
                    profile: context.profile.clone().unwrap_or_default(),
                    usecase: context.usecase.clone().unwrap_or_default(),
                    provider,
                });
                PostDecision::Continue
            }
            Err(error) if error.is_bind_error() => {
                let info = FailureInfo {
                    time_ms: epoch_millis_now(),
                    kind: FailureKind::Bind,
                    description: first_line(error),
                };
                let resolution = perform_context.lock().router.after_failure(&info);
                match resolution {
                    RouterFailureResolution::Retry => PostDecision::Retry,
                    RouterFailureResolution::SwitchProvider { provider, reason } => {
                        perform_context.lock().queued_action =
                            Some(QueuedAction::SwitchProvider { provider, reason });
                        // Loop once more so the queued action is consumed
                        PostDecision::Retry
                    }
                    RouterFailureResolution::Abort { reason } => {
                        *result = Err(abort_error(&reason, true));
                        let provider =
                            perform_context.lock().router.current_provider().to_string();
                        self.emit_failure(context, provider, FailureKind::Bind);
                        PostDecision::Break
                    }
                }
            }
            Err(error) => {
                let kind = classify(error);
                let provider = perform_context.lock().router.current_provider().to_string();
                self.emit_failure(context, provider, kind);
                PostDecision::Continue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::events::PerformParams;
    use crate::failsafe::{Backoff, CircuitBreakerPolicy, FailoverRouter};

    fn setup(allow_failover: bool) -> (Arc<EventHub>, Arc<HookContextMap>, EventContext) {
        let hub = Arc::new(EventHub::new());
        let contexts = Arc::new(HookContextMap::new());
        PolicyAdapter::register(Arc::clone(&contexts), &hub);

        contexts.get_or_create("profile/usecase", || {
            FailoverRouter::new(
                vec!["p".to_string(), "q".to_string()],
                allow_failover,
                Box::new(|_| {
                    Box::new(CircuitBreakerPolicy::new(
                        2,
                        Duration::from_millis(30_000),
                        Duration::from_secs(1),
                        Backoff::default(),
                    ))
                }),
            )
        });

        let context = EventContext {
            profile: Some("profile".to_string()),
            usecase: Some("usecase".to_string()),
            provider: Some("p".to_string()),
            time_ms: 0,
        };
        (hub, contexts, context)
    }

    #[tokio::test(start_paused = true)]
    async fn failing_fetches_retry_then_queue_a_switch() {
        let (hub, contexts, context) = setup(true);

        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let result = hub
            .dispatch_fetch(
                &context,
                FetchParams::new("GET", "https://example.com/x"),
                move |_| {
                    let calls = Arc::clone(&calls_clone);
                    async move {
                        calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        Err(SdkError::NetworkFetch {
                            kind: crate::NetworkErrorKind::Reject,
                        })
                    }
                },
            )
            .await;

        // First failure retried once by the inner retry policy, second
        // opened the circuit and queued a provider switch
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(result.is_err());
        let queued = contexts.get("profile/usecase").unwrap().lock().queued_action.clone();
        assert!(matches!(queued, Some(QueuedAction::SwitchProvider { provider, .. }) if provider == "q"));
    }

    #[tokio::test]
    async fn perform_consumes_switch_by_retrying_with_new_provider() {
        let (hub, contexts, context) = setup(true);

        // Open p's circuit the way the fetch boundary would: two failures,
        // the second of which resolves to a provider switch that gets queued
        {
            let perform_context = contexts.get("profile/usecase").unwrap();
            let mut locked = perform_context.lock();
            let failure = crate::failsafe::FailureInfo {
                time_ms: epoch_millis_now(),
                kind: crate::failsafe::FailureKind::Http,
                description: "HTTP 500".to_string(),
            };
            let _ = locked.router.after_failure(&failure);
            if let crate::failsafe::RouterFailureResolution::SwitchProvider { provider, reason } =
                locked.router.after_failure(&failure)
            {
                locked.queued_action = Some(QueuedAction::SwitchProvider { provider, reason });
            } else {
                panic!("second failure must resolve to a switch");
            }
        }

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let result = hub
            .dispatch_perform(
                &context,
                PerformParams {
                    provider: Some("p".to_string()),
                    provider_explicitly_set: false,
                },
                move |params| {
                    let seen = Arc::clone(&seen_clone);
                    async move {
                        seen.lock().push(params.provider.clone());
                        Ok(Variable::from("hello from q"))
                    }
                },
            )
            .await;

        assert!(result.is_ok());
        // p never executed again: its circuit is open, so the first pass
        // aborted pre-perform and the retry carried the rewritten provider
        assert_eq!(*seen.lock(), vec![Some("q".to_string())]);
        assert_eq!(
            contexts
                .get("profile/usecase")
                .unwrap()
                .lock()
                .router
                .current_provider(),
            "q"
        );
    }

    #[tokio::test]
    async fn full_abort_surfaces_the_policy_reason() {
        let (hub, contexts, context) = setup(false);
        contexts.get("profile/usecase").unwrap().lock().queued_action =
            Some(QueuedAction::FullAbort {
                reason: "No backup provider available: Max (1) retries exceeded".to_string(),
            });

        let result = hub
            .dispatch_perform(
                &context,
                PerformParams {
                    provider: None,
                    provider_explicitly_set: false,
                },
                |_| async { Ok(Variable::None) },
            )
            .await;

        let error = result.unwrap_err();
        assert!(error.to_string().contains("No backup provider available"));
    }

    #[tokio::test]
    async fn explicitly_pinned_provider_skips_the_router() {
        let (hub, _contexts, context) = setup(true);

        let result = hub
            .dispatch_perform(
                &context,
                PerformParams {
                    provider: Some("pinned".to_string()),
                    provider_explicitly_set: true,
                },
                |params| async move {
                    assert_eq!(params.provider.as_deref(), Some("pinned"));
                    Ok(Variable::None)
                },
            )
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn success_emits_a_success_event() {
        let (hub, _contexts, context) = setup(true);
        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        hub.on_event(50, Box::new(move |event| events_clone.lock().push(event.clone())));

        let _ = hub
            .dispatch_perform(
                &context,
                PerformParams {
                    provider: None,
                    provider_explicitly_set: false,
                },
                |_| async { Ok(Variable::None) },
            )
            .await;

        assert!(matches!(
            events.lock().first(),
            Some(SdkEvent::Success { provider, .. }) if provider == "p"
        ));
    }
}
