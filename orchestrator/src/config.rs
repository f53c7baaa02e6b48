//! # Orchestrator Configuration & Constants
//!
//! Every timing knob the orchestrator uses lives here. The core never reads
//! the process environment: callers build an [`OrchestratorConfig`] (the CLI
//! loads one from TOML) and inject it.
//!
//! The defaults mirror what the hosted devnet actually needs. Proofs take
//! minutes, not seconds, and a block is roughly three minutes apart, so the
//! budgets below are generous on purpose.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Fee attached to every built transaction, in nanomina (0.1 MINA).
pub const DEFAULT_FEE: u64 = 100_000_000;

/// Wait between inclusion and the first confirmation probe. The status
/// endpoint lags the block by a few seconds; probing earlier mostly
/// returns stale data.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(30);

/// Total budget for a proof job. Complex mints have been seen to take
/// well over ten minutes on a busy prover.
pub const DEFAULT_PROOF_BUDGET: Duration = Duration::from_secs(30 * 60);

/// Total budget for block inclusion.
pub const DEFAULT_INCLUSION_BUDGET: Duration = Duration::from_secs(20 * 60);

/// Total budget for the post-inclusion confirmation phase.
pub const DEFAULT_CONFIRM_BUDGET: Duration = Duration::from_secs(10 * 60);

/// Hard cap on a single backoff step, whatever the policy says.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

// ---------------------------------------------------------------------------
// PollPolicy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff.
///
/// The n-th wait is `initial * multiplier^n`, clamped to `max_interval`.
/// Polling stops at whichever comes first: `max_attempts` probes or
/// `max_wait` total elapsed time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
    pub max_attempts: u32,
    pub max_wait_ms: u64,
}

impl PollPolicy {
    pub fn new(initial: Duration, max_interval: Duration, max_wait: Duration) -> Self {
        Self {
            initial_interval_ms: initial.as_millis() as u64,
            max_interval_ms: max_interval.as_millis() as u64,
            max_wait_ms: max_wait.as_millis() as u64,
            ..Self::default()
        }
    }

    /// Fixed-interval polling: the same wait between every probe.
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        let ms = interval.as_millis() as u64;
        Self {
            initial_interval_ms: ms,
            max_interval_ms: ms,
            multiplier: 1.0,
            max_attempts,
            max_wait_ms: ms.saturating_mul(max_attempts as u64),
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms).min(MAX_POLL_INTERVAL)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Wait before probe number `attempt + 1` (0-based).
    pub fn interval_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(64) as i32);
        let ms = (self.initial_interval_ms as f64 * factor).min(self.max_interval_ms as f64);
        Duration::from_millis(ms as u64).min(self.max_interval())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_interval_ms == 0 {
            return Err(ConfigError::Invalid("initial_interval_ms must be > 0"));
        }
        if self.max_interval_ms < self.initial_interval_ms {
            return Err(ConfigError::Invalid(
                "max_interval_ms must be >= initial_interval_ms",
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid("multiplier must be a finite value >= 1.0"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be > 0"));
        }
        if self.max_wait_ms == 0 {
            return Err(ConfigError::Invalid("max_wait_ms must be > 0"));
        }
        Ok(())
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 5_000,
            max_interval_ms: 60_000,
            multiplier: 1.5,
            max_attempts: 200,
            max_wait_ms: DEFAULT_PROOF_BUDGET.as_millis() as u64,
        }
    }
}

// ---------------------------------------------------------------------------
// OrchestratorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Injected configuration for the orchestrator and batch coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Backoff while waiting for the prover to produce a settlement hash.
    pub proof_poll: PollPolicy,
    /// Backoff while waiting for block inclusion.
    pub inclusion_poll: PollPolicy,
    /// Backoff while waiting for a terminal status after inclusion.
    pub confirm_poll: PollPolicy,
    /// Fixed pause between inclusion and the first confirmation probe.
    pub settle_delay_ms: u64,
    /// Query NFT capabilities before approve/sell/buy/transfer.
    pub check_capabilities: bool,
}

impl OrchestratorConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// A config that polls every `interval` with no settle delay. Used by
    /// the sandbox, where everything resolves within a probe or two.
    pub fn fast(interval: Duration) -> Self {
        Self {
            proof_poll: PollPolicy::fixed(interval, 50),
            inclusion_poll: PollPolicy::fixed(interval, 50),
            confirm_poll: PollPolicy::fixed(interval, 50),
            settle_delay_ms: 0,
            check_capabilities: true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.proof_poll.validate()?;
        self.inclusion_poll.validate()?;
        self.confirm_poll.validate()?;
        Ok(())
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            proof_poll: PollPolicy::new(
                Duration::from_secs(5),
                Duration::from_secs(60),
                DEFAULT_PROOF_BUDGET,
            ),
            inclusion_poll: PollPolicy::new(
                Duration::from_secs(10),
                Duration::from_secs(60),
                DEFAULT_INCLUSION_BUDGET,
            ),
            confirm_poll: PollPolicy::new(
                Duration::from_secs(5),
                Duration::from_secs(30),
                DEFAULT_CONFIRM_BUDGET,
            ),
            settle_delay_ms: DEFAULT_SETTLE_DELAY.as_millis() as u64,
            check_capabilities: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(OrchestratorConfig::default().validate().is_ok());
        assert!(OrchestratorConfig::fast(Duration::from_millis(10))
            .validate()
            .is_ok());
    }

    #[test]
    fn default_budgets_match_observed_timings() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.settle_delay(), Duration::from_secs(30));
        assert_eq!(cfg.proof_poll.max_wait(), Duration::from_secs(1800));
        assert_eq!(cfg.inclusion_poll.max_wait(), Duration::from_secs(1200));
    }

    #[test]
    fn backoff_grows_then_clamps() {
        let policy = PollPolicy {
            initial_interval_ms: 100,
            max_interval_ms: 1_000,
            multiplier: 2.0,
            max_attempts: 10,
            max_wait_ms: 10_000,
        };
        assert_eq!(policy.interval_for(0), Duration::from_millis(100));
        assert_eq!(policy.interval_for(1), Duration::from_millis(200));
        assert_eq!(policy.interval_for(3), Duration::from_millis(800));
        assert_eq!(policy.interval_for(4), Duration::from_millis(1_000));
        assert_eq!(policy.interval_for(40), Duration::from_millis(1_000));
    }

    #[test]
    fn invalid_policies_are_rejected() {
        let bad_multiplier = PollPolicy {
            multiplier: 0.5,
            ..PollPolicy::default()
        };
        assert!(bad_multiplier.validate().is_err());

        let inverted = PollPolicy {
            initial_interval_ms: 10_000,
            max_interval_ms: 1_000,
            ..PollPolicy::default()
        };
        assert!(inverted.validate().is_err());

        assert!(PollPolicy::default().with_max_attempts(0).validate().is_err());
    }

    #[test]
    fn partial_toml_style_input_fills_defaults() {
        let cfg: OrchestratorConfig =
            serde_json::from_str(r#"{"settle_delay_ms": 0, "check_capabilities": false}"#)
                .unwrap();
        assert_eq!(cfg.settle_delay_ms, 0);
        assert!(!cfg.check_capabilities);
        assert_eq!(cfg.proof_poll, OrchestratorConfig::default().proof_poll);
    }
}
