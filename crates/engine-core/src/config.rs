//! Closed engine configuration: every field has a documented default and an
//! `ENGINE_*` environment override.

use std::time::Duration;

use crate::scheduler::Algorithm;

const DEFAULT_MAX_CONCURRENT_TASKS: usize = 8;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_BREAKDOWN_THRESHOLD: f64 = 0.65;
const DEFAULT_MAX_BREAKDOWN_DEPTH: u32 = 3;
const DEFAULT_PERSISTENCE_INTERVAL_MS: u64 = 60_000;
const DEFAULT_MAX_STARVATION_TIME_SECS: i64 = 300;
const DEFAULT_RETENTION_DAYS: u32 = 30;
const DEFAULT_CANCEL_GRACE_PERIOD_SECS: u64 = 30;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 90;
const DEFAULT_MAX_SUBTASKS: usize = 15;

/// Exponential backoff curve for retries: `min(base_ms * 2^retries, cap_ms)`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffCurve {
    pub base_ms: u64,
    pub cap_ms: u64,
}

impl Default for BackoffCurve {
    fn default() -> Self {
        Self { base_ms: 1_000, cap_ms: 30_000 }
    }
}

impl BackoffCurve {
    pub fn delay_for_attempt(&self, retries: u32) -> Duration {
        let scaled = self.base_ms.saturating_mul(1u64 << retries.min(20));
        Duration::from_millis(scaled.min(self.cap_ms))
    }
}

/// Every field the engine recognizes. No dynamic/implicit keys.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_concurrent_tasks: usize,
    pub max_retries: u32,
    pub default_timeout_ms: u64,
    pub algorithm: Algorithm,
    pub breakdown_threshold: f64,
    pub max_breakdown_depth: u32,
    pub max_subtasks: usize,
    pub persistence_interval_ms: u64,
    pub max_starvation_time_secs: i64,
    pub retention_days: u32,
    pub backoff: BackoffCurve,
    pub cancel_grace_period_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            max_retries: DEFAULT_MAX_RETRIES,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            algorithm: Algorithm::default(),
            breakdown_threshold: DEFAULT_BREAKDOWN_THRESHOLD,
            max_breakdown_depth: DEFAULT_MAX_BREAKDOWN_DEPTH,
            max_subtasks: DEFAULT_MAX_SUBTASKS,
            persistence_interval_ms: DEFAULT_PERSISTENCE_INTERVAL_MS,
            max_starvation_time_secs: DEFAULT_MAX_STARVATION_TIME_SECS,
            retention_days: DEFAULT_RETENTION_DAYS,
            backoff: BackoffCurve::default(),
            cancel_grace_period_secs: DEFAULT_CANCEL_GRACE_PERIOD_SECS,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl EngineConfig {
    /// Reads `ENGINE_*` environment overrides on top of the defaults. Malformed values are
    /// ignored in favor of the default rather than panicking at startup.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("ENGINE_MAX_CONCURRENT_TASKS") {
            if let Ok(parsed) = v.parse() {
                config.max_concurrent_tasks = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_MAX_RETRIES") {
            if let Ok(parsed) = v.parse() {
                config.max_retries = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_PERSISTENCE_INTERVAL_MS") {
            if let Ok(parsed) = v.parse() {
                config.persistence_interval_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_MAX_STARVATION_TIME_SECS") {
            if let Ok(parsed) = v.parse() {
                config.max_starvation_time_secs = parsed;
            }
        }
        config
    }

    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder { config: Self::default() }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn max_concurrent_tasks(mut self, value: usize) -> Self {
        self.config.max_concurrent_tasks = value;
        self
    }

    pub fn algorithm(mut self, value: Algorithm) -> Self {
        self.config.algorithm = value;
        self
    }

    pub fn max_retries(mut self, value: u32) -> Self {
        self.config.max_retries = value;
        self
    }

    pub fn persistence_interval_ms(mut self, value: u64) -> Self {
        self.config.persistence_interval_ms = value;
        self
    }

    pub fn backoff(mut self, value: BackoffCurve) -> Self {
        self.config.backoff = value;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_tasks, 8);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.algorithm, Algorithm::HybridAdaptive);
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = EngineConfig::builder().max_concurrent_tasks(2).algorithm(Algorithm::Fifo).build();
        assert_eq!(config.max_concurrent_tasks, 2);
        assert_eq!(config.algorithm, Algorithm::Fifo);
    }

    #[test]
    fn backoff_curve_caps_at_30s() {
        let curve = BackoffCurve::default();
        assert_eq!(curve.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(curve.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(curve.delay_for_attempt(10), Duration::from_millis(30_000));
    }
}
