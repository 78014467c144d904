/// Domain records shared by the workflow components.
use crate::state_machine::WorkflowStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum
/// with snake_case wire names.
macro_rules! impl_str_enum {
    ($ty:ident, $label:literal { $($variant:ident => $name:literal $(| $alias:literal)*),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($name $(| $alias)* => Ok($ty::$variant),)+
                    _ => Err(format!("Invalid {}: {}", $label, s)),
                }
            }
        }
    };
}

pub(crate) use impl_str_enum;

/// Role a user holds on a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectRole {
    Client,
    Designer,
    Manager,
}

impl_str_enum!(ProjectRole, "project role" {
    Client => "client" | "customer",
    Designer => "designer" | "interior_designer",
    Manager => "manager" | "project_manager",
});

/// A client project. Owned by the excluded CRUD surface; the coordinator
/// only reads it and maintains `progress_percentage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub title: String,
    pub client_id: String,
    pub designer_id: Option<String>,
    pub manager_id: Option<String>,
    pub status: String,
    /// Derived from stage completion; never written by clients.
    pub progress_percentage: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(title: impl Into<String>, client_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Project {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            client_id: client_id.into(),
            designer_id: None,
            manager_id: None,
            status: "active".to_string(),
            progress_percentage: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_designer(mut self, user_id: impl Into<String>) -> Self {
        self.designer_id = Some(user_id.into());
        self
    }

    pub fn with_manager(mut self, user_id: impl Into<String>) -> Self {
        self.manager_id = Some(user_id.into());
        self
    }

    /// Staff assignments in resolution order: designer first, then manager.
    pub fn staff_assignments(&self) -> Vec<(ProjectRole, &str)> {
        let mut staff = Vec::with_capacity(2);
        if let Some(id) = self.designer_id.as_deref() {
            staff.push((ProjectRole::Designer, id));
        }
        if let Some(id) = self.manager_id.as_deref() {
            staff.push((ProjectRole::Manager, id));
        }
        staff
    }

    /// Whether the user is the assigned designer or manager
    pub fn is_staff(&self, user_id: &str) -> bool {
        self.staff_assignments().iter().any(|(_, id)| *id == user_id)
    }

    /// Whether the user is the client, designer or manager
    pub fn is_member(&self, user_id: &str) -> bool {
        self.client_id == user_id || self.is_staff(user_id)
    }
}

/// One stage of a project's delivery pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowInstance {
    pub id: String,
    pub project_id: String,
    pub stage_key: String,
    pub stage_name: String,
    pub status: WorkflowStatus,
    pub assigned_to: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub sort_order: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a dependent stage is scheduled relative to its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    #[default]
    FinishToStart,
    StartToStart,
    FinishToFinish,
    StartToFinish,
}

impl_str_enum!(DependencyType, "dependency type" {
    FinishToStart => "finish_to_start",
    StartToStart => "start_to_start",
    FinishToFinish => "finish_to_finish",
    StartToFinish => "start_to_finish",
});

/// Edge between two workflow instances of the same project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDependency {
    pub workflow_id: String,
    pub depends_on_workflow_id: String,
    pub dependency_type: DependencyType,
    pub lag_days: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    OnHold,
    Completed,
    Cancelled,
}

impl_str_enum!(TaskStatus, "task status" {
    Pending => "pending" | "todo",
    InProgress => "in_progress",
    OnHold => "on_hold" | "blocked",
    Completed => "completed" | "done",
    Cancelled => "cancelled",
});

impl TaskStatus {
    /// Completed and cancelled tasks no longer count against the schedule
    pub fn is_closed(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl_str_enum!(TaskPriority, "priority" {
    Low => "low",
    Medium => "medium",
    High => "high",
    Urgent => "urgent" | "critical",
});

/// A unit of work tracked alongside the stage pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectTask {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub assigned_to: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    /// Ids of tasks that must finish before this one
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ProjectTask {
    pub fn new(project_id: impl Into<String>, title: impl Into<String>) -> Self {
        ProjectTask {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            title: title.into(),
            assigned_to: None,
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            due_date: None,
            estimated_hours: None,
            actual_hours: None,
            dependencies: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_estimated_hours(mut self, hours: f64) -> Self {
        self.estimated_hours = Some(hours);
        self
    }

    pub fn with_due_date(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn with_assignee(mut self, user_id: impl Into<String>) -> Self {
        self.assigned_to = Some(user_id.into());
        self
    }

    pub fn with_dependency(mut self, task_id: impl Into<String>) -> Self {
        self.dependencies.push(task_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Completed,
}

impl_str_enum!(MilestoneStatus, "milestone status" {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Milestone {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub due_date: Option<DateTime<Utc>>,
    pub status: MilestoneStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Milestone {
    pub fn new(project_id: impl Into<String>, title: impl Into<String>) -> Self {
        Milestone {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            title: title.into(),
            due_date: None,
            status: MilestoneStatus::Pending,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrderStatus {
    Pending,
    Approved,
    Rejected,
}

impl_str_enum!(ChangeOrderStatus, "change order status" {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

/// A client-requested scope change with its cost and schedule impact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeOrder {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: Option<String>,
    pub cost_impact: f64,
    pub time_impact_days: i64,
    pub status: ChangeOrderStatus,
    pub created_at: DateTime<Utc>,
}

impl ChangeOrder {
    pub fn new(project_id: impl Into<String>, title: impl Into<String>) -> Self {
        ChangeOrder {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            title: title.into(),
            description: None,
            cost_impact: 0.0,
            time_impact_days: 0,
            status: ChangeOrderStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Append-only record of a mutation or report generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub actor_id: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor_id: impl Into<String>,
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            actor_id: actor_id.into(),
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            details,
            created_at: Utc::now(),
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}
