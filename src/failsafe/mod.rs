//! Resilience layer: backoff, failure policies, failover routing
//!
//! One [`FailoverRouter`] exists per `(profile, usecase)` and owns a
//! [`FailurePolicy`] per provider. The [`PolicyAdapter`] wires the router
//! into the event hub around the fetch and perform boundaries.

mod adapter;
mod backoff;
mod policy;
mod router;

pub use adapter::{POLICY_HOOK_PRIORITY, PolicyAdapter};
pub use backoff::{
    Backoff, ConstantBackoff, DEFAULT_BASE, DEFAULT_INITIAL_MS, ExponentialBackoff, LinearBackoff,
};
pub use policy::{
    AbortPolicy, CircuitBreakerPolicy, DEFAULT_REQUEST_TIMEOUT, ExecutionInfo,
    ExecutionResolution, FailureInfo, FailureKind, FailurePolicy, FailureResolution, RetryPolicy,
    SuccessInfo, SuccessResolution, UsecaseInfo,
};
pub use router::{FailoverRouter, PolicyFactory, RouterBeforeResolution, RouterFailureResolution};

use std::time::Duration;

use crate::super_json::RetryPolicyConfig;

/// Instantiate the policy a use case configures for one provider.
///
/// No configuration means no retries: the abort policy fails fast and is
/// ineligible for failover restore.
pub fn policy_from_config(config: &RetryPolicyConfig) -> Box<dyn FailurePolicy> {
    match config {
        RetryPolicyConfig::None => Box::new(AbortPolicy),
        RetryPolicyConfig::CircuitBreaker {
            max_contiguous_retries,
            request_timeout,
            open_time,
            backoff,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let start = backoff.start as f64;
            Box::new(CircuitBreakerPolicy::new(
                *max_contiguous_retries,
                Duration::from_millis(*open_time),
                Duration::from_millis(*request_timeout),
                Backoff::Exponential(ExponentialBackoff::new(start, backoff.factor)),
            ))
        }
    }
}
