//! Failover router
//!
//! One router exists per `(profile, usecase)` and owns a failure policy per
//! known provider. It picks the current provider, fails over to providers
//! later in the priority list when the current one's policy aborts, and
//! restores back to earlier providers when asked to check.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info};

use super::policy::{
    ExecutionInfo, ExecutionResolution, FailureInfo, FailurePolicy, FailureResolution,
    SuccessInfo, SuccessResolution,
};

/// Reason attached to failover-restore switches.
const RESTORE_REASON: &str = "Provider failover restore";
/// Prefix attached when no backup provider accepts the request.
const NO_BACKUP_PREFIX: &str = "No backup provider available";

/// Factory producing a policy for a provider name.
pub type PolicyFactory = Box<dyn Fn(&str) -> Box<dyn FailurePolicy> + Send + Sync>;

/// Resolution of the router's pre-execution check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterBeforeResolution {
    /// Proceed on the current provider
    Continue {
        /// Per-request timeout
        timeout: Duration,
    },
    /// Sleep, then proceed on the current provider
    Backoff {
        /// How long to sleep first
        sleep: Duration,
        /// Per-request timeout
        timeout: Duration,
    },
    /// Switch to another provider before executing
    SwitchProvider {
        /// Target provider
        provider: String,
        /// Why the switch happened
        reason: String,
    },
    /// Refuse to execute on any provider
    Abort {
        /// Why, with the originating policy reason threaded in
        reason: String,
    },
}

/// Resolution of the router's failure handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterFailureResolution {
    /// Retry on the current provider
    Retry,
    /// Switch to another provider and retry there
    SwitchProvider {
        /// Target provider
        provider: String,
        /// Why the switch happened
        reason: String,
    },
    /// Give up
    Abort {
        /// Why, with the originating policy reason threaded in
        reason: String,
    },
}

/// Per-use-case provider router.
pub struct FailoverRouter {
    priority: Vec<String>,
    policies: HashMap<String, Box<dyn FailurePolicy>>,
    current_provider: String,
    allow_failover: bool,
    instantiate: PolicyFactory,
}

impl FailoverRouter {
    /// Create a router over a non-empty priority list.
    ///
    /// The current provider starts as the first priority entry; a policy is
    /// instantiated eagerly for every listed provider.
    pub fn new(priority: Vec<String>, allow_failover: bool, instantiate: PolicyFactory) -> Self {
        debug_assert!(!priority.is_empty(), "router requires at least one provider");
        let policies = priority
            .iter()
            .map(|name| (name.clone(), instantiate(name)))
            .collect();
        let current_provider = priority.first().cloned().unwrap_or_default();

        Self {
            priority,
            policies,
            current_provider,
            allow_failover,
            instantiate,
        }
    }

    /// Name of the provider requests currently go to.
    pub fn current_provider(&self) -> &str {
        &self.current_provider
    }

    /// Point the router at a provider, instantiating a policy on demand for
    /// names outside the priority list.
    pub fn set_current_provider(&mut self, name: &str) {
        if !self.policies.contains_key(name) {
            let policy = (self.instantiate)(name);
            self.policies.insert(name.to_string(), policy);
        }
        if self.current_provider != name {
            info!(from = %self.current_provider, to = name, "Switching current provider");
            self.current_provider = name.to_string();
        }
    }

    /// Enable or disable failover to backup providers.
    pub fn set_allow_failover(&mut self, allow: bool) {
        self.allow_failover = allow;
    }

    /// Position of the current provider in the priority list, when listed.
    fn current_priority_index(&self) -> Option<usize> {
        self.priority
            .iter()
            .position(|name| name == &self.current_provider)
    }

    /// Consult the current provider's policy, attempting restore first and
    /// failover on refusal.
    pub fn before_execution(&mut self, info: &ExecutionInfo) -> RouterBeforeResolution {
        if info.check_failover_restore {
            if let Some(provider) = self.find_restore_candidate(info) {
                return RouterBeforeResolution::SwitchProvider {
                    provider,
                    reason: RESTORE_REASON.to_string(),
                };
            }
        }

        let current = self.current_provider.clone();
        let resolution = self.policy_mut(&current).before_execution(info);

        match resolution {
            ExecutionResolution::Continue { timeout } => {
                RouterBeforeResolution::Continue { timeout }
            }
            ExecutionResolution::Backoff { sleep, timeout } => {
                RouterBeforeResolution::Backoff { sleep, timeout }
            }
            ExecutionResolution::Abort { reason } => self.fail_over(info, reason).map_or_else(
                |reason| RouterBeforeResolution::Abort { reason },
                |(provider, reason)| RouterBeforeResolution::SwitchProvider { provider, reason },
            ),
        }
    }

    /// Consult the current provider's policy about a failure, failing over
    /// on abort.
    pub fn after_failure(&mut self, info: &FailureInfo) -> RouterFailureResolution {
        let current = self.current_provider.clone();
        let resolution = self.policy_mut(&current).after_failure(info);

        match resolution {
            FailureResolution::Retry => RouterFailureResolution::Retry,
            FailureResolution::Abort { reason } => {
                let execution = ExecutionInfo {
                    time_ms: info.time_ms,
                    check_failover_restore: false,
                };
                self.fail_over(&execution, reason).map_or_else(
                    |reason| RouterFailureResolution::Abort { reason },
                    |(provider, reason)| RouterFailureResolution::SwitchProvider {
                        provider,
                        reason,
                    },
                )
            }
        }
    }

    /// Record a success on the current provider.
    pub fn after_success(&mut self, info: &SuccessInfo) -> SuccessResolution {
        let current = self.current_provider.clone();
        self.policy_mut(&current).after_success(info)
    }

    /// Reset every provider policy.
    pub fn reset(&mut self) {
        for policy in self.policies.values_mut() {
            policy.reset();
        }
    }

    /// Find the first provider later in priority willing to execute.
    ///
    /// Returns `Ok((provider, reason))` on success, `Err(prefixed reason)`
    /// when no backup accepts.
    fn fail_over(
        &mut self,
        info: &ExecutionInfo,
        reason: String,
    ) -> std::result::Result<(String, String), String> {
        if self.allow_failover {
            let start = self.current_priority_index().map_or(0, |index| index + 1);
            let candidates: Vec<String> = self.priority[start.min(self.priority.len())..].to_vec();

            for candidate in candidates {
                let accepts = matches!(
                    self.policy_mut(&candidate).before_execution(info),
                    ExecutionResolution::Continue { .. }
                );
                if accepts {
                    debug!(provider = %candidate, "Failing over to backup provider");
                    return Ok((candidate, reason));
                }
            }
        }

        Err(format!("{NO_BACKUP_PREFIX}: {reason}"))
    }

    /// Find the first provider earlier in priority eligible for restore.
    fn find_restore_candidate(&mut self, info: &ExecutionInfo) -> Option<String> {
        let end = self.current_priority_index().unwrap_or(self.priority.len());
        let candidates: Vec<String> = self.priority[..end].to_vec();

        for candidate in candidates {
            if !self.policy_mut(&candidate).allows_restore() {
                continue;
            }
            let accepts = matches!(
                self.policy_mut(&candidate).before_execution(info),
                ExecutionResolution::Continue { .. }
            );
            if accepts {
                debug!(provider = %candidate, "Restoring to preferred provider");
                return Some(candidate);
            }
        }
        None
    }

    fn policy_mut(&mut self, name: &str) -> &mut Box<dyn FailurePolicy> {
        self.policies
            .entry(name.to_string())
            .or_insert_with(|| (self.instantiate)(name))
    }
}
