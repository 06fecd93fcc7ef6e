//! Health and bottleneck vocabulary shared between `metrics` and `events`.

use engine_model::TaskId;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckKind {
    ResourceLimit,
    TaskComplexity,
    DependencyChain,
    SystemLoad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct BottleneckFinding {
    pub kind: BottleneckKind,
    pub severity: Severity,
    pub impacted_tasks: Vec<TaskId>,
}
