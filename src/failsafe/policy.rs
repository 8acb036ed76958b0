//! Failure policies
//!
//! Every `(profile, usecase, provider)` triple owns one policy instance.
//! A policy is consulted before each request and after each outcome, and
//! answers with a resolution: proceed (with a timeout), back off first,
//! retry, or abort. The circuit breaker composes a retry policy by
//! delegation.

use std::time::Duration;

use tracing::{debug, warn};

use super::backoff::{Backoff, ExponentialBackoff};

/// Default per-request timeout dictated by policies.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Use case identity pinned at interpreter entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsecaseInfo {
    /// Profile id (`scope/name`)
    pub profile_id: String,
    /// Use case name
    pub usecase_name: String,
    /// Safety classification label (`safe`, `unsafe`, `idempotent`)
    pub safety: String,
}

/// Information available before a request is issued.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionInfo {
    /// Current time in epoch milliseconds
    pub time_ms: u64,
    /// Whether the router may attempt a failover restore
    pub check_failover_restore: bool,
}

/// Classification of a failure handed to a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Failure below the HTTP layer (timeout, dns, reject)
    Network,
    /// Failure issuing the request
    Request,
    /// HTTP response with an error status
    Http,
    /// Failure during bind
    Bind,
    /// Anything the adapter could not classify
    Unknown,
}

/// Information about a failed execution.
#[derive(Debug, Clone)]
pub struct FailureInfo {
    /// Current time in epoch milliseconds
    pub time_ms: u64,
    /// Failure classification
    pub kind: FailureKind,
    /// Rendered failure, threaded into abort reasons
    pub description: String,
}

/// Information about a successful execution.
#[derive(Debug, Clone, Copy)]
pub struct SuccessInfo {
    /// Current time in epoch milliseconds
    pub time_ms: u64,
}

/// Resolution of `before_execution`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResolution {
    /// Proceed, issuing the request with this timeout
    Continue {
        /// Per-request timeout
        timeout: Duration,
    },
    /// Sleep first, then proceed with this timeout
    Backoff {
        /// How long to sleep before the request
        sleep: Duration,
        /// Per-request timeout
        timeout: Duration,
    },
    /// Refuse to execute
    Abort {
        /// Why the execution was refused
        reason: String,
    },
}

/// Resolution of `after_failure`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureResolution {
    /// Retry the failed operation
    Retry,
    /// Give up on this provider
    Abort {
        /// Why the policy gave up, with the original failure threaded in
        reason: String,
    },
}

/// Resolution of `after_success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessResolution {
    /// Nothing to do
    Continue,
}

/// Per-provider failure handling capability.
pub trait FailurePolicy: Send + Sync {
    /// Consulted before each request.
    fn before_execution(&mut self, info: &ExecutionInfo) -> ExecutionResolution;

    /// Consulted after a failed request.
    fn after_failure(&mut self, info: &FailureInfo) -> FailureResolution;

    /// Consulted after a successful request.
    fn after_success(&mut self, info: &SuccessInfo) -> SuccessResolution;

    /// Forget all accumulated state.
    fn reset(&mut self);

    /// Whether the failover router may restore back to this provider.
    ///
    /// Abort-configured providers opt out so a restore cannot ping-pong
    /// between a dead primary and its backup.
    fn allows_restore(&self) -> bool {
        true
    }
}

/// Policy that never retries: any failure aborts immediately.
#[derive(Debug, Default)]
pub struct AbortPolicy;

impl FailurePolicy for AbortPolicy {
    fn before_execution(&mut self, _info: &ExecutionInfo) -> ExecutionResolution {
        ExecutionResolution::Continue {
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    fn after_failure(&mut self, info: &FailureInfo) -> FailureResolution {
        FailureResolution::Abort {
            reason: info.description.clone(),
        }
    }

    fn after_success(&mut self, _info: &SuccessInfo) -> SuccessResolution {
        SuccessResolution::Continue
    }

    fn reset(&mut self) {}

    fn allows_restore(&self) -> bool {
        false
    }
}

/// Retry policy with contiguous-failure accounting and backoff balance.
///
/// `streak` tracks the current run: negative values count contiguous
/// failures, positive values contiguous successes. `balance` is the net
/// number of `backoff.up()` calls not yet undone by `backoff.down()`.
#[derive(Debug)]
pub struct RetryPolicy {
    max_contiguous_retries: i32,
    request_timeout: Duration,
    backoff: Backoff,
    streak: i32,
    balance: i32,
    last_call_time_ms: u64,
}

impl RetryPolicy {
    /// Create a retry policy.
    pub fn new(max_contiguous_retries: u32, request_timeout: Duration, backoff: Backoff) -> Self {
        #[allow(clippy::cast_possible_wrap)]
        let max_contiguous_retries = max_contiguous_retries as i32;
        Self {
            max_contiguous_retries,
            request_timeout,
            backoff,
            streak: 0,
            balance: 0,
            last_call_time_ms: 0,
        }
    }

    /// Create a retry policy with the default timeout and backoff.
    pub fn with_defaults(max_contiguous_retries: u32) -> Self {
        Self::new(
            max_contiguous_retries,
            DEFAULT_REQUEST_TIMEOUT,
            Backoff::Exponential(ExponentialBackoff::default()),
        )
    }

    /// Current failure/success streak, for observability.
    pub fn streak(&self) -> i32 {
        self.streak
    }

    /// Current backoff balance, for observability.
    pub fn balance(&self) -> i32 {
        self.balance
    }
}

impl FailurePolicy for RetryPolicy {
    fn before_execution(&mut self, info: &ExecutionInfo) -> ExecutionResolution {
        let elapsed_ms = info.time_ms.saturating_sub(self.last_call_time_ms);
        self.last_call_time_ms = info.time_ms;

        if self.balance >= 0 {
            return ExecutionResolution::Continue {
                timeout: self.request_timeout,
            };
        }

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let sleep_ms = (self.backoff.current_ms() - elapsed_ms as f64).max(0.0) as u64;
        ExecutionResolution::Backoff {
            sleep: Duration::from_millis(sleep_ms),
            timeout: self.request_timeout,
        }
    }

    fn after_failure(&mut self, info: &FailureInfo) -> FailureResolution {
        let floor = -(self.max_contiguous_retries + 1);
        if info.kind == FailureKind::Bind {
            // A bind failure burns the whole retry budget at once; a repeat
            // exceeds it
            self.streak = (self.streak - 1)
                .min(-self.max_contiguous_retries)
                .max(floor);
        } else {
            self.streak = (self.streak - 1).min(-1).max(floor);
        }

        if self.streak.abs() > self.max_contiguous_retries {
            warn!(
                streak = self.streak,
                max = self.max_contiguous_retries,
                "Retry budget exhausted"
            );
            return FailureResolution::Abort {
                reason: format!(
                    "Max ({}) retries exceeded: {}",
                    self.max_contiguous_retries, info.description
                ),
            };
        }

        self.balance -= 1;
        self.backoff.up();
        debug!(
            streak = self.streak,
            backoff_ms = self.backoff.current_ms(),
            "Failure recorded, retrying"
        );
        FailureResolution::Retry
    }

    fn after_success(&mut self, _info: &SuccessInfo) -> SuccessResolution {
        self.streak = (self.streak + 1).max(1);
        if self.balance < 0 {
            self.balance += 1;
            self.backoff.down();
        }
        SuccessResolution::Continue
    }

    fn reset(&mut self) {
        while self.balance < 0 {
            self.backoff.down();
            self.balance += 1;
        }
        self.streak = 0;
        self.last_call_time_ms = 0;
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { opened_at_ms: u64 },
    HalfOpen,
}

/// Reason used when the breaker refuses or drops a request.
const CIRCUIT_OPEN_REASON: &str = "Circuit breaker is open";

/// Circuit breaker composing an inner [`RetryPolicy`] by delegation.
///
/// Closed requests flow through the inner policy; when the inner policy
/// exhausts its retries the circuit opens for `open_time`. The first probe
/// after that window half-opens the circuit: one success closes it, one
/// failure reopens it.
#[derive(Debug)]
pub struct CircuitBreakerPolicy {
    inner: RetryPolicy,
    open_time: Duration,
    request_timeout: Duration,
    state: CircuitState,
}

impl CircuitBreakerPolicy {
    /// Create a circuit breaker.
    ///
    /// `failure_threshold` is the number of contiguous failures that opens
    /// the circuit; the embedded retry policy gets one fewer retry.
    pub fn new(
        failure_threshold: u32,
        open_time: Duration,
        request_timeout: Duration,
        backoff: Backoff,
    ) -> Self {
        Self {
            inner: RetryPolicy::new(
                failure_threshold.saturating_sub(1),
                request_timeout,
                backoff,
            ),
            open_time,
            request_timeout,
            state: CircuitState::Closed,
        }
    }

    fn open(&mut self, now_ms: u64) {
        debug!(open_time_ms = self.open_time.as_millis(), "Circuit breaker opened");
        self.state = CircuitState::Open { opened_at_ms: now_ms };
        self.inner.reset();
    }

    /// Whether the circuit is currently open, for observability.
    pub fn is_open(&self) -> bool {
        matches!(self.state, CircuitState::Open { .. })
    }
}

impl FailurePolicy for CircuitBreakerPolicy {
    fn before_execution(&mut self, info: &ExecutionInfo) -> ExecutionResolution {
        match self.state {
            CircuitState::Closed => self.inner.before_execution(info),
            CircuitState::Open { opened_at_ms } => {
                #[allow(clippy::cast_possible_truncation)]
                let open_ms = self.open_time.as_millis() as u64;
                if info.time_ms >= opened_at_ms + open_ms {
                    debug!("Open window elapsed, transitioning to half-open");
                    self.state = CircuitState::HalfOpen;
                    ExecutionResolution::Continue {
                        timeout: self.request_timeout,
                    }
                } else {
                    ExecutionResolution::Abort {
                        reason: CIRCUIT_OPEN_REASON.to_string(),
                    }
                }
            }
            CircuitState::HalfOpen => ExecutionResolution::Continue {
                timeout: self.request_timeout,
            },
        }
    }

    fn after_failure(&mut self, info: &FailureInfo) -> FailureResolution {
        match self.state {
            CircuitState::Closed => match self.inner.after_failure(info) {
                FailureResolution::Abort { reason } => {
                    self.open(info.time_ms);
                    FailureResolution::Abort { reason }
                }
                resolution => resolution,
            },
            CircuitState::HalfOpen | CircuitState::Open { .. } => {
                self.open(info.time_ms);
                FailureResolution::Abort {
                    reason: CIRCUIT_OPEN_REASON.to_string(),
                }
            }
        }
    }

    fn after_success(&mut self, info: &SuccessInfo) -> SuccessResolution {
        match self.state {
            CircuitState::Closed => self.inner.after_success(info),
            CircuitState::HalfOpen => {
                debug!("Probe succeeded, closing circuit");
                self.state = CircuitState::Closed;
                self.inner.after_success(info)
            }
            CircuitState::Open { .. } => SuccessResolution::Continue,
        }
    }

    fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.inner.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(time_ms: u64) -> FailureInfo {
        FailureInfo {
            time_ms,
            kind: FailureKind::Http,
            description: "HTTP 500".to_string(),
        }
    }

    fn execution(time_ms: u64) -> ExecutionInfo {
        ExecutionInfo {
            time_ms,
            check_failover_restore: false,
        }
    }

    // ── AbortPolicy ───────────────────────────────────────────────────────

    #[test]
    fn abort_policy_aborts_on_first_failure() {
        let mut policy = AbortPolicy;

        assert!(matches!(
            policy.before_execution(&execution(0)),
            ExecutionResolution::Continue { timeout } if timeout == DEFAULT_REQUEST_TIMEOUT
        ));
        assert!(matches!(
            policy.after_failure(&failure(1)),
            FailureResolution::Abort { reason } if reason == "HTTP 500"
        ));
        assert!(!policy.allows_restore());
    }

    // ── RetryPolicy ───────────────────────────────────────────────────────

    #[test]
    fn retry_policy_retries_until_budget_exhausted() {
        let mut policy = RetryPolicy::with_defaults(2);

        assert_eq!(policy.after_failure(&failure(0)), FailureResolution::Retry);
        assert_eq!(policy.after_failure(&failure(1)), FailureResolution::Retry);
        assert!(matches!(
            policy.after_failure(&failure(2)),
            FailureResolution::Abort { reason }
                if reason == "Max (2) retries exceeded: HTTP 500"
        ));
    }

    #[test]
    fn retry_streak_never_exceeds_budget_plus_one() {
        let mut policy = RetryPolicy::with_defaults(2);
        for i in 0..5 {
            let _ = policy.after_failure(&failure(i));
            assert!(policy.streak().abs() <= 3);
        }
    }

    #[test]
    fn bind_failure_burns_the_whole_budget() {
        let mut policy = RetryPolicy::with_defaults(3);
        let bind_failure = FailureInfo {
            time_ms: 0,
            kind: FailureKind::Bind,
            description: "bind failed".to_string(),
        };

        // One more bind failure after the burn exceeds the budget
        assert_eq!(policy.after_failure(&bind_failure), FailureResolution::Retry);
        assert!(matches!(
            policy.after_failure(&bind_failure),
            FailureResolution::Abort { .. }
        ));
    }

    #[test]
    fn negative_balance_forces_backoff_before_execution() {
        let mut policy = RetryPolicy::with_defaults(5);
        let _ = policy.after_failure(&failure(0));

        match policy.before_execution(&execution(100)) {
            ExecutionResolution::Backoff { sleep, timeout } => {
                // backoff moved to 1000ms on the first up(); 100ms elapsed
                assert_eq!(sleep, Duration::from_millis(900));
                assert_eq!(timeout, DEFAULT_REQUEST_TIMEOUT);
            }
            other => panic!("expected backoff, got {other:?}"),
        }
    }

    #[test]
    fn success_unwinds_balance_and_reset_clears_state() {
        let mut policy = RetryPolicy::with_defaults(5);
        let _ = policy.after_failure(&failure(0));
        let _ = policy.after_failure(&failure(1));
        assert_eq!(policy.balance(), -2);

        let _ = policy.after_success(&SuccessInfo { time_ms: 2 });
        assert_eq!(policy.balance(), -1);
        assert_eq!(policy.streak(), 1);

        policy.reset();
        assert_eq!(policy.balance(), 0);
        assert_eq!(policy.streak(), 0);
        assert!(matches!(
            policy.before_execution(&execution(3)),
            ExecutionResolution::Continue { .. }
        ));
    }

    // ── CircuitBreakerPolicy ──────────────────────────────────────────────

    #[test]
    fn breaker_opens_after_threshold_and_refuses_until_open_time() {
        let mut policy = CircuitBreakerPolicy::new(
            2,
            Duration::from_millis(30_000),
            Duration::from_secs(1),
            Backoff::default(),
        );

        // threshold 2 -> inner retry budget 1: first failure retries,
        // second aborts and opens the circuit
        assert_eq!(policy.after_failure(&failure(0)), FailureResolution::Retry);
        assert!(matches!(
            policy.after_failure(&failure(10)),
            FailureResolution::Abort { .. }
        ));
        assert!(policy.is_open());

        // Refused while the open window lasts
        assert!(matches!(
            policy.before_execution(&execution(10_000)),
            ExecutionResolution::Abort { reason } if reason == "Circuit breaker is open"
        ));

        // First check past the window half-opens and allows a probe
        assert!(matches!(
            policy.before_execution(&execution(40_010)),
            ExecutionResolution::Continue { .. }
        ));
        assert!(!policy.is_open());
    }

    #[test]
    fn half_open_failure_reopens_and_success_closes() {
        let mut policy = CircuitBreakerPolicy::new(
            1,
            Duration::from_millis(100),
            Duration::from_secs(1),
            Backoff::default(),
        );

        let _ = policy.after_failure(&failure(0));
        assert!(policy.is_open());

        // Past the window: probe allowed
        let _ = policy.before_execution(&execution(200));
        // Probe fails: reopen
        let _ = policy.after_failure(&failure(210));
        assert!(policy.is_open());

        // Next window, probe succeeds: closed
        let _ = policy.before_execution(&execution(400));
        let _ = policy.after_success(&SuccessInfo { time_ms: 410 });
        assert!(!policy.is_open());
        assert!(matches!(
            policy.before_execution(&execution(420)),
            ExecutionResolution::Continue { .. }
        ));
    }
}
