// Atelier: stage workflow coordination for interior-design projects
// Core library providing the catalog, stage lifecycle, persistence and schedule analytics

pub mod analyzer;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod graph;
pub mod instantiator;
pub mod notifications;
pub mod policy;
pub mod progress;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod timeline;
pub mod types;

// Re-export commonly used types
pub use errors::{
    ConfigError, ConfigResult, ErrorKind, GraphError, GraphResult, StoreError, StoreResult,
    WorkflowError, WorkflowResult,
};

pub use types::{
    AuditEntry, ChangeOrder, ChangeOrderStatus, DependencyType, Milestone, MilestoneStatus, Page,
    Project, ProjectRole, ProjectTask, TaskPriority, TaskStatus, WorkflowDependency,
    WorkflowInstance,
};

pub use catalog::{StageTemplate, TemplateCatalog, TemplateSet, DEFAULT_TEMPLATE_VERSION};

pub use config::{AnalyzerConfig, AtelierConfig, CatalogConfig, PaginationConfig, StorageConfig};

pub use policy::{capabilities, AccessPolicy, Actor, CapabilityPolicy};

pub use state_machine::{apply_update, StageChange, StageStateMachine, StageUpdate, WorkflowStatus};

pub use store::{NewWorkflowSet, SqliteWorkflowStore, StageCounts, WorkflowStore};

pub use notifications::{
    MemoryNotificationSink, NotificationError, NotificationEventType, NotificationPayload,
    NotificationPayloadBuilder, NotificationSink, Severity, TracingNotificationSink,
};

pub use instantiator::{plan_workflow, WorkflowInstantiator, WorkflowPlan};
pub use progress::{progress_percentage, ProgressAggregator};
pub use analyzer::{
    compute_cpm, stage_tasks, Bottleneck, CpmEntry, CpmSchedule, CriticalPathAnalyzer,
    CriticalPathReport, CriticalReason, CriticalTask,
};
pub use timeline::{TimelineAnalytics, TimelineAnalyticsView, TimelineReport, TimelineReporter};
pub use graph::DependencyGraph;
pub use service::WorkflowCoordinator;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
