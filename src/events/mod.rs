//! Event hub
//!
//! Named operations (`fetch`, `unhandled-http`, `bind-and-perform`) can be
//! intercepted by registered hooks. Hooks run in priority order (lower runs
//! outermost) and answer with a tagged decision; the dispatcher owns an
//! explicit loop and re-invokes the operation on `Retry` instead of relying
//! on call-stack unwinding. The resilience layer is wired in exactly this
//! way; metric events use a simpler observe-only channel.

mod context;

pub use context::{HookContextMap, PerformContext, QueuedAction};

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::http::{FetchParams, FetchResponse};
use crate::values::Variable;
use crate::{Result, SdkError};

/// Context handed to every hook invocation.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    /// Profile id (`scope/name`), when known
    pub profile: Option<String>,
    /// Use case name, when known
    pub usecase: Option<String>,
    /// Provider name, when known
    pub provider: Option<String>,
    /// Current time in epoch milliseconds
    pub time_ms: u64,
}

impl EventContext {
    /// Key into the hook-context map: `profileId/usecase`.
    pub fn context_key(&self) -> Option<String> {
        match (&self.profile, &self.usecase) {
            (Some(profile), Some(usecase)) => Some(format!("{profile}/{usecase}")),
            _ => None,
        }
    }
}

/// Decision of a `pre-*` hook. Argument changes happen in place.
#[derive(Debug)]
pub enum PreDecision<R> {
    /// Proceed to the next hook, then the operation
    Continue,
    /// Restart the whole interceptor chain with the (rewritten) arguments
    Retry,
    /// Skip the operation and remaining pre hooks, supplying the result
    Abort(Result<R>),
}

/// Decision of a `post-*` hook. Result changes happen in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostDecision {
    /// Proceed to the next hook
    Continue,
    /// Restart the whole operation with the (rewritten) arguments
    Retry,
    /// Short-circuit the remaining post hooks
    Break,
}

/// Decision about an HTTP response no map handler matched.
#[derive(Debug)]
pub enum UnhandledHttpDecision {
    /// Let the interpreter raise an HTTP error
    Continue,
    /// Restart the HTTP call
    Retry,
    /// Fail the perform with this error
    Abort(SdkError),
}

/// Interceptor around the HTTP fetch boundary.
#[async_trait::async_trait]
pub trait FetchInterceptor: Send + Sync {
    /// Runs before the fetch; may rewrite the parameters in place.
    async fn pre_fetch(
        &self,
        _context: &EventContext,
        _params: &mut FetchParams,
    ) -> PreDecision<FetchResponse> {
        PreDecision::Continue
    }

    /// Runs after the fetch; may rewrite the result in place.
    async fn post_fetch(
        &self,
        _context: &EventContext,
        _params: &mut FetchParams,
        _result: &mut Result<FetchResponse>,
    ) -> PostDecision {
        PostDecision::Continue
    }
}

/// Interceptor around one bind-and-perform invocation.
#[async_trait::async_trait]
pub trait PerformInterceptor: Send + Sync {
    /// Runs before bind and perform; may rewrite the parameters in place.
    async fn pre_perform(
        &self,
        _context: &EventContext,
        _params: &mut PerformParams,
    ) -> PreDecision<Variable> {
        PreDecision::Continue
    }

    /// Runs after the perform; may rewrite the result in place.
    async fn post_perform(
        &self,
        _context: &EventContext,
        _params: &mut PerformParams,
        _result: &mut Result<Variable>,
    ) -> PostDecision {
        PostDecision::Continue
    }
}

/// Interceptor for HTTP responses no map handler matched.
pub trait UnhandledHttpInterceptor: Send + Sync {
    /// Decide what to do with the unhandled response.
    fn unhandled_http(
        &self,
        context: &EventContext,
        status_code: u16,
    ) -> UnhandledHttpDecision;
}

/// Parameters of one bind-and-perform invocation, as visible to hooks.
#[derive(Debug, Clone)]
pub struct PerformParams {
    /// Provider the perform targets; hooks rewrite this on failover
    pub provider: Option<String>,
    /// True when the caller pinned the provider explicitly
    pub provider_explicitly_set: bool,
}

/// Metric events observed by user handlers and the metric reporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkEvent {
    /// A perform finished ok
    Success {
        /// Profile id
        profile: String,
        /// Use case name
        usecase: String,
        /// Provider that served the perform
        provider: String,
    },
    /// A perform failed
    Failure {
        /// Profile id
        profile: String,
        /// Use case name
        usecase: String,
        /// Provider that failed
        provider: String,
        /// Failure classification label
        kind: String,
    },
    /// The router switched providers
    ProviderSwitch {
        /// Profile id
        profile: String,
        /// Use case name
        usecase: String,
        /// Provider switched away from
        from_provider: String,
        /// Provider switched to
        to_provider: String,
        /// Why the switch happened
        reason: String,
    },
}

type MetricHandler = Box<dyn Fn(&SdkEvent) + Send + Sync>;

/// Registry and dispatcher for all hooks of one client.
#[derive(Default)]
pub struct EventHub {
    fetch_hooks: RwLock<Vec<(usize, Arc<dyn FetchInterceptor>)>>,
    perform_hooks: RwLock<Vec<(usize, Arc<dyn PerformInterceptor>)>>,
    unhandled_http_hooks: RwLock<Vec<(usize, Arc<dyn UnhandledHttpInterceptor>)>>,
    metric_handlers: RwLock<Vec<(usize, MetricHandler)>>,
}

impl EventHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fetch interceptor; lower priority runs outermost.
    pub fn register_fetch(&self, priority: usize, hook: Arc<dyn FetchInterceptor>) {
        let mut hooks = self.fetch_hooks.write();
        hooks.push((priority, hook));
        hooks.sort_by_key(|(priority, _)| *priority);
    }

    /// Register a perform interceptor; lower priority runs outermost.
    pub fn register_perform(&self, priority: usize, hook: Arc<dyn PerformInterceptor>) {
        let mut hooks = self.perform_hooks.write();
        hooks.push((priority, hook));
        hooks.sort_by_key(|(priority, _)| *priority);
    }

    /// Register an unhandled-http interceptor; lower priority runs first.
    pub fn register_unhandled_http(&self, priority: usize, hook: Arc<dyn UnhandledHttpInterceptor>) {
        let mut hooks = self.unhandled_http_hooks.write();
        hooks.push((priority, hook));
        hooks.sort_by_key(|(priority, _)| *priority);
    }

    /// Subscribe to metric events; lower priority runs first.
    pub fn on_event(&self, priority: usize, handler: MetricHandler) {
        let mut handlers = self.metric_handlers.write();
        handlers.push((priority, handler));
        handlers.sort_by_key(|(priority, _)| *priority);
    }

    /// Emit a metric event to every subscriber.
    pub fn emit(&self, event: &SdkEvent) {
        for (_, handler) in self.metric_handlers.read().iter() {
            handler(event);
        }
    }

    /// Run the fetch operation through its interceptor chain.
    pub async fn dispatch_fetch<F, Fut>(
        &self,
        context: &EventContext,
        mut params: FetchParams,
        operation: F,
    ) -> Result<FetchResponse>
    where
        F: Fn(FetchParams) -> Fut,
        Fut: Future<Output = Result<FetchResponse>>,
    {
        let hooks: Vec<Arc<dyn FetchInterceptor>> = self
            .fetch_hooks
            .read()
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();

        'restart: loop {
            let mut pending: Option<Result<FetchResponse>> = None;
            for hook in &hooks {
                match hook.pre_fetch(context, &mut params).await {
                    PreDecision::Continue => {}
                    PreDecision::Retry => continue 'restart,
                    PreDecision::Abort(result) => {
                        pending = Some(result);
                        break;
                    }
                }
            }

            let mut result = match pending {
                Some(result) => result,
                None => operation(params.clone()).await,
            };

            for hook in &hooks {
                match hook.post_fetch(context, &mut params, &mut result).await {
                    PostDecision::Continue => {}
                    PostDecision::Retry => continue 'restart,
                    PostDecision::Break => break,
                }
            }

            return result;
        }
    }

    /// Run one bind-and-perform through its interceptor chain.
    pub async fn dispatch_perform<F, Fut>(
        &self,
        context: &EventContext,
        mut params: PerformParams,
        operation: F,
    ) -> Result<Variable>
    where
        F: Fn(PerformParams) -> Fut,
        Fut: Future<Output = Result<Variable>>,
    {
        let hooks: Vec<Arc<dyn PerformInterceptor>> = self
            .perform_hooks
            .read()
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();

        'restart: loop {
            let mut pending: Option<Result<Variable>> = None;
            for hook in &hooks {
                match hook.pre_perform(context, &mut params).await {
                    PreDecision::Continue => {}
                    PreDecision::Retry => continue 'restart,
                    PreDecision::Abort(result) => {
                        pending = Some(result);
                        break;
                    }
                }
            }

            let mut result = match pending {
                Some(result) => result,
                None => operation(params.clone()).await,
            };

            for hook in &hooks {
                match hook.post_perform(context, &mut params, &mut result).await {
                    PostDecision::Continue => {}
                    PostDecision::Retry => continue 'restart,
                    PostDecision::Break => break,
                }
            }

            return result;
        }
    }

    /// Ask the interceptors about an unhandled HTTP response. The first
    /// non-continue decision wins.
    pub fn dispatch_unhandled_http(
        &self,
        context: &EventContext,
        status_code: u16,
    ) -> UnhandledHttpDecision {
        let hooks: Vec<Arc<dyn UnhandledHttpInterceptor>> = self
            .unhandled_http_hooks
            .read()
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();

        for hook in hooks {
            match hook.unhandled_http(context, status_code) {
                UnhandledHttpDecision::Continue => {}
                decision => return decision,
            }
        }
        UnhandledHttpDecision::Continue
    }
}

/// Current time in epoch milliseconds.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn epoch_millis_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
