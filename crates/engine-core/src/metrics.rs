//! Metrics & health: sliding-window execution stats, rates, and the bottleneck
//! detector / health rollup that runs on a 30-60s cadence.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use engine_model::TaskId;

use crate::health::{BottleneckFinding, BottleneckKind, HealthStatus, Severity};
use crate::scheduler::Algorithm;

const WINDOW: usize = 1000;

#[derive(Debug, Clone, Copy)]
pub struct AlertThresholds {
    pub queue_size_warning: usize,
    pub queue_size_critical: usize,
    pub throughput_warning_per_min: f64,
    pub throughput_critical_per_min: f64,
    pub latency_warning_ms: u64,
    pub latency_critical_ms: u64,
    pub error_rate_warning: f64,
    pub error_rate_critical: f64,
    pub resource_usage_warning: f64,
    pub resource_usage_critical: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            queue_size_warning: 100,
            queue_size_critical: 500,
            throughput_warning_per_min: 5.0,
            throughput_critical_per_min: 1.0,
            latency_warning_ms: 5_000,
            latency_critical_ms: 15_000,
            error_rate_warning: 0.05,
            error_rate_critical: 0.15,
            resource_usage_warning: 0.80,
            resource_usage_critical: 0.95,
        }
    }
}

/// Continuously-updated counters and the sliding execution-time window.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    total_submitted: u64,
    total_completed: u64,
    total_failed: u64,
    total_cancelled: u64,
    total_retries: u64,
    starvation_count: u64,
    execution_times_ms: VecDeque<u64>,
    completions_by_hour: HashMap<i64, u64>,
    algorithm_confidence: HashMap<Algorithm, (f64, u64)>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&mut self) {
        self.total_submitted += 1;
    }

    pub fn record_completed(&mut self, duration_ms: u64, at: DateTime<Utc>) {
        self.total_completed += 1;
        self.push_duration(duration_ms);
        *self.completions_by_hour.entry(at.timestamp() / 3600).or_insert(0) += 1;
    }

    pub fn record_failed(&mut self) {
        self.total_failed += 1;
    }

    pub fn record_cancelled(&mut self) {
        self.total_cancelled += 1;
    }

    pub fn record_retry(&mut self) {
        self.total_retries += 1;
    }

    pub fn record_starvation(&mut self) {
        self.starvation_count += 1;
    }

    pub fn record_scheduling_decision(&mut self, algorithm: Algorithm, confidence: f64) {
        let entry = self.algorithm_confidence.entry(algorithm).or_insert((0.0, 0));
        entry.0 += confidence;
        entry.1 += 1;
    }

    fn push_duration(&mut self, duration_ms: u64) {
        self.execution_times_ms.push_back(duration_ms);
        if self.execution_times_ms.len() > WINDOW {
            self.execution_times_ms.pop_front();
        }
    }

    pub fn success_rate(&self) -> f64 {
        let finished = self.total_completed + self.total_failed;
        if finished == 0 {
            return 1.0;
        }
        self.total_completed as f64 / finished as f64
    }

    pub fn error_rate(&self) -> f64 {
        1.0 - self.success_rate()
    }

    pub fn throughput_per_hour(&self) -> f64 {
        if self.completions_by_hour.is_empty() {
            return 0.0;
        }
        let total: u64 = self.completions_by_hour.values().sum();
        total as f64 / self.completions_by_hour.len() as f64
    }

    fn percentile(&self, p: f64) -> u64 {
        if self.execution_times_ms.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = self.execution_times_ms.iter().copied().collect();
        sorted.sort_unstable();
        let index = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted[index]
    }

    pub fn average_duration_ms(&self) -> u64 {
        if self.execution_times_ms.is_empty() {
            return 0;
        }
        (self.execution_times_ms.iter().sum::<u64>() as f64 / self.execution_times_ms.len() as f64) as u64
    }

    pub fn median_duration_ms(&self) -> u64 {
        self.percentile(0.5)
    }

    pub fn p95_duration_ms(&self) -> u64 {
        self.percentile(0.95)
    }

    pub fn retry_rate(&self) -> f64 {
        if self.total_submitted == 0 {
            return 0.0;
        }
        self.total_retries as f64 / self.total_submitted as f64
    }

    pub fn starvation_count(&self) -> u64 {
        self.starvation_count
    }

    pub fn average_confidence(&self, algorithm: Algorithm) -> f64 {
        self.algorithm_confidence.get(&algorithm).map(|(sum, n)| sum / *n as f64).unwrap_or(0.0)
    }

    /// Health rollup derived from success rate, pool utilization, p95 latency, and starvation
    /// count, against the default alert thresholds.
    pub fn health(&self, pool_utilization: f64, thresholds: &AlertThresholds) -> HealthStatus {
        let p95 = self.p95_duration_ms();
        let critical = self.error_rate() >= thresholds.error_rate_critical
            || pool_utilization >= thresholds.resource_usage_critical
            || p95 >= thresholds.latency_critical_ms;
        if critical {
            return HealthStatus::Critical;
        }
        let unhealthy = self.error_rate() >= thresholds.error_rate_warning && self.starvation_count > 0;
        if unhealthy {
            return HealthStatus::Unhealthy;
        }
        let degraded = self.error_rate() >= thresholds.error_rate_warning
            || pool_utilization >= thresholds.resource_usage_warning
            || p95 >= thresholds.latency_warning_ms;
        if degraded {
            return HealthStatus::Degraded;
        }
        HealthStatus::Healthy
    }

    /// Bottleneck detector: tags findings by likely cause.
    pub fn detect_bottlenecks(
        &self,
        pool_utilization: f64,
        queue_depth: usize,
        longest_dependency_chain: &[TaskId],
        thresholds: &AlertThresholds,
    ) -> Vec<BottleneckFinding> {
        let mut findings = Vec::new();

        if pool_utilization >= thresholds.resource_usage_critical {
            findings.push(BottleneckFinding { kind: BottleneckKind::ResourceLimit, severity: Severity::High, impacted_tasks: vec![] });
        } else if pool_utilization >= thresholds.resource_usage_warning {
            findings.push(BottleneckFinding { kind: BottleneckKind::ResourceLimit, severity: Severity::Medium, impacted_tasks: vec![] });
        }

        if queue_depth >= thresholds.queue_size_critical {
            findings.push(BottleneckFinding { kind: BottleneckKind::SystemLoad, severity: Severity::High, impacted_tasks: vec![] });
        } else if queue_depth >= thresholds.queue_size_warning {
            findings.push(BottleneckFinding { kind: BottleneckKind::SystemLoad, severity: Severity::Medium, impacted_tasks: vec![] });
        }

        if longest_dependency_chain.len() >= 5 {
            findings.push(BottleneckFinding {
                kind: BottleneckKind::DependencyChain,
                severity: Severity::Medium,
                impacted_tasks: longest_dependency_chain.to_vec(),
            });
        }

        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_is_one_with_no_history() {
        let metrics = MetricsRegistry::new();
        assert_eq!(metrics.success_rate(), 1.0);
    }

    #[test]
    fn p95_duration_tracks_window() {
        let mut metrics = MetricsRegistry::new();
        for ms in 1..=100u64 {
            metrics.record_completed(ms, Utc::now());
        }
        assert_eq!(metrics.p95_duration_ms(), 95);
    }

    #[test]
    fn health_degrades_under_high_error_rate() {
        let mut metrics = MetricsRegistry::new();
        for _ in 0..10 {
            metrics.record_failed();
        }
        metrics.record_completed(10, Utc::now());
        let thresholds = AlertThresholds::default();
        assert_ne!(metrics.health(0.1, &thresholds), HealthStatus::Healthy);
    }

    #[test]
    fn health_critical_under_extreme_resource_usage() {
        let metrics = MetricsRegistry::new();
        let thresholds = AlertThresholds::default();
        assert_eq!(metrics.health(0.99, &thresholds), HealthStatus::Critical);
    }
}
