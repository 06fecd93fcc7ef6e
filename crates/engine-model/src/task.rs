//! Core entities: [`Task`], its identity, and the closed enums that classify it.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque unique task identity. Caller-supplied or engine-generated (uuid v4 string form).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Error returned by the `FromStr` impls of the string-backed enums in this module.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $str:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "kebab-case")]
        pub enum $name {
            $($variant),+
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let s = match self {
                    $(Self::$variant => $str),+
                };
                write!(f, "{s}")
            }
        }

        impl FromStr for $name {
            type Err = EnumParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(EnumParseError { kind: $kind, value: s.to_string() }),
                }
            }
        }
    };
}

string_enum!(Category, "category", {
    Feature => "feature",
    BugFix => "bug-fix",
    Test => "test",
    Documentation => "documentation",
    Refactor => "refactor",
    Security => "security",
    Performance => "performance",
    Infrastructure => "infrastructure",
});

string_enum!(Complexity, "complexity", {
    Trivial => "trivial",
    Simple => "simple",
    Moderate => "moderate",
    Complex => "complex",
    Enterprise => "enterprise",
});

string_enum!(EdgeType, "edge type", {
    Blocks => "BLOCKS",
    Enables => "ENABLES",
    Conflicts => "CONFLICTS",
    Enhances => "ENHANCES",
});

impl EdgeType {
    /// Only BLOCKS and CONFLICTS gate dispatch eligibility; ENABLES/ENHANCES are advisory.
    pub fn gates_eligibility(self) -> bool {
        matches!(self, EdgeType::Blocks | EdgeType::Conflicts)
    }
}

/// Priority bucket. The numeric value is the starting `basePriority` weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Background,
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn weight(self) -> f64 {
        match self {
            Priority::Critical => 1000.0,
            Priority::High => 800.0,
            Priority::Medium => 500.0,
            Priority::Low => 200.0,
            Priority::Background => 50.0,
        }
    }

    /// One bucket up, saturating at CRITICAL. Used by starvation boosting.
    pub fn bump(self) -> Self {
        match self {
            Priority::Background => Priority::Low,
            Priority::Low => Priority::Medium,
            Priority::Medium => Priority::High,
            Priority::High | Priority::Critical => Priority::Critical,
        }
    }

    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
        Priority::Background,
    ];
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
            Priority::Background => "BACKGROUND",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Priority {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CRITICAL" => Ok(Priority::Critical),
            "HIGH" => Ok(Priority::High),
            "MEDIUM" => Ok(Priority::Medium),
            "LOW" => Ok(Priority::Low),
            "BACKGROUND" => Ok(Priority::Background),
            _ => Err(EnumParseError { kind: "priority", value: s.to_string() }),
        }
    }
}

/// Lifecycle state. See the directed transition graph in `engine_core::lifecycle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Created,
    Validated,
    Queued,
    Scheduled,
    Preparing,
    ResourceAllocated,
    Starting,
    Running,
    Completing,
    Completed,
    Paused,
    Resuming,
    Failed,
    Retrying,
    RollingBack,
    Cancelled,
    Archived,
    Blocked,
    Expired,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Archived
        )
    }

    pub fn occupies_worker_slot(self) -> bool {
        matches!(self, TaskStatus::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Created => "CREATED",
            TaskStatus::Validated => "VALIDATED",
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Scheduled => "SCHEDULED",
            TaskStatus::Preparing => "PREPARING",
            TaskStatus::ResourceAllocated => "RESOURCE_ALLOCATED",
            TaskStatus::Starting => "STARTING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completing => "COMPLETING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Paused => "PAUSED",
            TaskStatus::Resuming => "RESUMING",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Retrying => "RETRYING",
            TaskStatus::RollingBack => "ROLLING_BACK",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::Archived => "ARCHIVED",
            TaskStatus::Blocked => "BLOCKED",
            TaskStatus::Expired => "EXPIRED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TaskStatus {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CREATED" => TaskStatus::Created,
            "VALIDATED" => TaskStatus::Validated,
            "QUEUED" => TaskStatus::Queued,
            "SCHEDULED" => TaskStatus::Scheduled,
            "PREPARING" => TaskStatus::Preparing,
            "RESOURCE_ALLOCATED" => TaskStatus::ResourceAllocated,
            "STARTING" => TaskStatus::Starting,
            "RUNNING" => TaskStatus::Running,
            "COMPLETING" => TaskStatus::Completing,
            "COMPLETED" => TaskStatus::Completed,
            "PAUSED" => TaskStatus::Paused,
            "RESUMING" => TaskStatus::Resuming,
            "FAILED" => TaskStatus::Failed,
            "RETRYING" => TaskStatus::Retrying,
            "ROLLING_BACK" => TaskStatus::RollingBack,
            "CANCELLED" => TaskStatus::Cancelled,
            "ARCHIVED" => TaskStatus::Archived,
            "BLOCKED" => TaskStatus::Blocked,
            "EXPIRED" => TaskStatus::Expired,
            other => return Err(EnumParseError { kind: "task status", value: other.to_string() }),
        })
    }
}

/// The six multiplicative factors behind `dynamicPriority`. Each is clamped to [0.1, 2.0].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityFactors {
    pub age: f64,
    pub user_importance: f64,
    pub system_criticality: f64,
    pub dependency_weight: f64,
    pub resource_availability: f64,
    pub execution_history: f64,
}

impl Default for PriorityFactors {
    fn default() -> Self {
        Self {
            age: 1.0,
            user_importance: 1.0,
            system_criticality: 1.0,
            dependency_weight: 1.0,
            resource_availability: 1.0,
            execution_history: 1.0,
        }
    }
}

impl PriorityFactors {
    fn clamp_factor(value: f64) -> f64 {
        value.clamp(0.1, 2.0)
    }

    pub fn product(&self) -> f64 {
        Self::clamp_factor(self.age)
            * Self::clamp_factor(self.user_importance)
            * Self::clamp_factor(self.system_criticality)
            * Self::clamp_factor(self.dependency_weight)
            * Self::clamp_factor(self.resource_availability)
            * Self::clamp_factor(self.execution_history)
    }
}

/// A task as tracked by the engine. Owned exclusively by the coordinator once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub tags: BTreeSet<String>,

    pub priority: Priority,
    pub complexity: Complexity,
    pub base_priority: f64,
    pub dynamic_priority: f64,
    pub priority_factors: PriorityFactors,

    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub estimated_duration_ms: u64,
    pub max_execution_time_ms: u64,

    pub max_retries: u32,
    pub current_retries: u32,
    pub last_error: Option<String>,
    /// Set on requeue after a retry; the task is not dispatch-eligible before this instant.
    pub not_eligible_before: Option<DateTime<Utc>>,

    pub dependencies: BTreeSet<TaskId>,
    pub dependents: BTreeSet<TaskId>,
    pub parent_task_id: Option<TaskId>,
    pub subtask_ids: Vec<TaskId>,

    pub required_resources: BTreeSet<String>,
    pub resource_constraints: std::collections::BTreeMap<String, u64>,

    pub pre_conditions: Vec<String>,
    pub post_conditions: Vec<String>,

    pub batch_compatible: bool,
    pub batch_group: Option<String>,

    pub status: TaskStatus,

    pub duration_ms: Option<u64>,
    pub token_usage: Option<u64>,
    pub error_count: u32,
    pub retry_count: u32,
}

impl Task {
    /// Builds a freshly-created task with engine defaults; callers refine fields before queuing.
    pub fn new(id: TaskId, title: String, description: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title,
            description,
            category: Category::Feature,
            tags: BTreeSet::new(),
            priority: Priority::Medium,
            complexity: Complexity::Moderate,
            base_priority: Priority::Medium.weight(),
            dynamic_priority: Priority::Medium.weight(),
            priority_factors: PriorityFactors::default(),
            created_at: now,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            deadline: None,
            estimated_duration_ms: 60_000,
            max_execution_time_ms: 300_000,
            max_retries: 3,
            current_retries: 0,
            last_error: None,
            not_eligible_before: None,
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            parent_task_id: None,
            subtask_ids: Vec::new(),
            required_resources: BTreeSet::new(),
            resource_constraints: std::collections::BTreeMap::new(),
            pre_conditions: Vec::new(),
            post_conditions: Vec::new(),
            batch_compatible: false,
            batch_group: None,
            status: TaskStatus::Created,
            duration_ms: None,
            token_usage: None,
            error_count: 0,
            retry_count: 0,
        }
    }

    /// `dynamicPriority = clamp(basePriority * product(factors), 1, 2000)`.
    pub fn recompute_dynamic_priority(&mut self) {
        self.dynamic_priority = (self.base_priority * self.priority_factors.product()).clamp(1.0, 2000.0);
    }

    pub fn is_eligible_dependency_wise(&self) -> bool {
        self.dependencies.is_empty()
    }
}
