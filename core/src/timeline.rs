/// Timeline analytics and the composed project report.
use crate::analyzer::{
    compute_cpm, is_overdue, stage_tasks, CpmSchedule, CriticalPathAnalyzer, CriticalPathReport,
};
use crate::catalog::{TemplateCatalog, TemplateSet};
use crate::config::AnalyzerConfig;
use crate::errors::{WorkflowError, WorkflowResult};
use crate::policy::{AccessPolicy, Actor};
use crate::progress::progress_percentage;
use crate::state_machine::WorkflowStatus;
use crate::store::WorkflowStore;
use crate::types::{
    AuditEntry, ChangeOrder, ChangeOrderStatus, Milestone, MilestoneStatus, Project, ProjectTask,
    TaskStatus, WorkflowInstance,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Aggregate schedule figures for one project
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineAnalytics {
    /// Stage count per status
    pub stage_counts: BTreeMap<String, u64>,
    /// Task count per status
    pub task_counts: BTreeMap<String, u64>,
    /// Completed tasks as a percentage of all tasks
    pub task_completion_rate: f64,
    pub estimated_hours: f64,
    pub actual_hours: f64,
    pub overdue_tasks: u64,
    pub milestones_total: u64,
    pub milestones_completed: u64,
    /// Schedule delay from approved change orders
    pub approved_change_order_days: i64,
    /// Mean start-to-completion time of completed stages
    pub average_stage_duration_days: Option<f64>,
    /// Now plus remaining stages' typical days plus approved delays
    pub projected_completion: Option<DateTime<Utc>>,
}

/// Inputs for [`compute_analytics`]
pub struct AnalyticsInput<'a> {
    pub stages: &'a [WorkflowInstance],
    pub tasks: &'a [ProjectTask],
    pub milestones: &'a [Milestone],
    pub change_orders: &'a [ChangeOrder],
    pub templates: &'a TemplateSet,
    pub default_estimated_hours: f64,
}

pub fn compute_analytics(input: &AnalyticsInput<'_>, now: DateTime<Utc>) -> TimelineAnalytics {
    let mut stage_counts = BTreeMap::new();
    for stage in input.stages {
        *stage_counts.entry(stage.status.to_string()).or_insert(0) += 1;
    }

    let mut task_counts = BTreeMap::new();
    for task in input.tasks {
        *task_counts.entry(task.status.to_string()).or_insert(0) += 1;
    }

    let completed_tasks = input
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .count();
    let task_completion_rate = if input.tasks.is_empty() {
        0.0
    } else {
        completed_tasks as f64 * 100.0 / input.tasks.len() as f64
    };

    let approved_change_order_days: i64 = input
        .change_orders
        .iter()
        .filter(|c| c.status == ChangeOrderStatus::Approved)
        .map(|c| c.time_impact_days)
        .sum();

    let durations: Vec<f64> = input
        .stages
        .iter()
        .filter(|s| s.status == WorkflowStatus::Completed)
        .filter_map(|s| Some((s.completed_at? - s.started_at?).num_seconds() as f64 / 86_400.0))
        .collect();
    let average_stage_duration_days = if durations.is_empty() {
        None
    } else {
        Some(durations.iter().sum::<f64>() / durations.len() as f64)
    };

    let projected_completion = if input.stages.is_empty() {
        None
    } else {
        let remaining_days: i64 = input
            .stages
            .iter()
            .filter(|s| !s.status.is_terminal())
            .filter_map(|s| input.templates.get(&s.stage_key))
            .map(|t| t.typical_duration_days as i64)
            .sum();
        Some(now + Duration::days((remaining_days + approved_change_order_days).max(0)))
    };

    TimelineAnalytics {
        stage_counts,
        task_counts,
        task_completion_rate,
        estimated_hours: input
            .tasks
            .iter()
            .map(|t| t.estimated_hours.unwrap_or(input.default_estimated_hours))
            .sum(),
        actual_hours: input.tasks.iter().filter_map(|t| t.actual_hours).sum(),
        overdue_tasks: input.tasks.iter().filter(|t| is_overdue(t, now)).count() as u64,
        milestones_total: input.milestones.len() as u64,
        milestones_completed: input
            .milestones
            .iter()
            .filter(|m| m.status == MilestoneStatus::Completed)
            .count() as u64,
        approved_change_order_days,
        average_stage_duration_days,
        projected_completion,
    }
}

/// Analytics plus the CPM schedule of the project's stages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineAnalyticsView {
    pub analytics: TimelineAnalytics,
    pub stage_schedule: CpmSchedule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub percentage: u8,
    pub completed_stages: u64,
    pub total_stages: u64,
    pub stages: Vec<WorkflowInstance>,
}

/// Point-in-time snapshot of a project's schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineReport {
    pub project_info: Project,
    pub progress: ProgressSummary,
    pub milestones: Vec<Milestone>,
    pub tasks: Vec<ProjectTask>,
    pub change_orders: Vec<ChangeOrder>,
    pub critical_path: CriticalPathReport,
    pub analytics: TimelineAnalytics,
    pub generated_at: DateTime<Utc>,
}

struct ProjectSnapshot {
    project: Project,
    stages: Vec<WorkflowInstance>,
    tasks: Vec<ProjectTask>,
    milestones: Vec<Milestone>,
    change_orders: Vec<ChangeOrder>,
    templates: TemplateSet,
}

/// Read-side composition of catalog, progress and analyzer output.
pub struct TimelineReporter {
    store: Arc<dyn WorkflowStore>,
    policy: Arc<dyn AccessPolicy>,
    catalog: Arc<TemplateCatalog>,
    analyzer: CriticalPathAnalyzer,
    default_estimated_hours: f64,
}

impl TimelineReporter {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        policy: Arc<dyn AccessPolicy>,
        catalog: Arc<TemplateCatalog>,
        config: &AnalyzerConfig,
    ) -> Self {
        Self {
            store,
            policy,
            catalog,
            analyzer: CriticalPathAnalyzer::new(config),
            default_estimated_hours: config.default_estimated_hours,
        }
    }

    async fn viewable_project(&self, project_id: &str, actor: &Actor) -> WorkflowResult<Project> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("project", project_id))?;

        if !self.policy.can_view(actor, &project) {
            warn!(project_id, actor = %actor.user_id, "project read rejected");
            return Err(WorkflowError::forbidden("not allowed to view this project"));
        }
        Ok(project)
    }

    /// Template set the project was instantiated from, falling back to the
    /// active set when that version is no longer loaded.
    async fn templates_for(&self, project_id: &str) -> WorkflowResult<TemplateSet> {
        let recorded = self.store.workflow_template_version(project_id).await?;
        let set = recorded
            .as_deref()
            .and_then(|version| self.catalog.version(version))
            .unwrap_or_else(|| self.catalog.active());
        Ok(set.clone())
    }

    async fn snapshot(&self, project_id: &str, actor: &Actor) -> WorkflowResult<ProjectSnapshot> {
        let project = self.viewable_project(project_id, actor).await?;
        Ok(ProjectSnapshot {
            stages: self.store.list_workflows(project_id).await?,
            tasks: self.store.list_tasks(project_id).await?,
            milestones: self.store.list_milestones(project_id).await?,
            change_orders: self.store.list_change_orders(project_id).await?,
            templates: self.templates_for(project_id).await?,
            project,
        })
    }

    /// Heuristic critical-path report over the project's tasks.
    pub async fn critical_path(
        &self,
        project_id: &str,
        actor: &Actor,
    ) -> WorkflowResult<CriticalPathReport> {
        self.viewable_project(project_id, actor).await?;
        let tasks = self.store.list_tasks(project_id).await?;
        self.analyzer.analyze(&tasks, Utc::now())
    }

    pub async fn analytics(
        &self,
        project_id: &str,
        actor: &Actor,
    ) -> WorkflowResult<TimelineAnalyticsView> {
        let snapshot = self.snapshot(project_id, actor).await?;
        let now = Utc::now();

        let analytics = compute_analytics(&self.input(&snapshot), now);

        let dependencies = self.store.list_workflow_dependencies(project_id).await?;
        let stage_schedule = compute_cpm(
            &stage_tasks(&snapshot.stages, &dependencies, &snapshot.templates),
            self.default_estimated_hours,
        )?;

        debug!(project_id, stages = snapshot.stages.len(), "timeline analytics computed");
        Ok(TimelineAnalyticsView {
            analytics,
            stage_schedule,
        })
    }

    /// Compose the full report and record that it was generated.
    pub async fn generate(&self, project_id: &str, actor: &Actor) -> WorkflowResult<TimelineReport> {
        let snapshot = self.snapshot(project_id, actor).await?;
        let now = Utc::now();

        let critical_path = self.analyzer.analyze(&snapshot.tasks, now)?;
        let analytics = compute_analytics(&self.input(&snapshot), now);

        let completed = snapshot
            .stages
            .iter()
            .filter(|s| s.status == WorkflowStatus::Completed)
            .count() as u64;
        let total = snapshot.stages.len() as u64;

        self.store
            .record_audit(&AuditEntry::new(
                &actor.user_id,
                "timeline_report.generated",
                "project",
                project_id,
                json!({
                    "stages": total,
                    "tasks": snapshot.tasks.len(),
                    "critical_tasks": critical_path.critical_tasks.len(),
                }),
            ))
            .await?;

        info!(project_id, actor = %actor.user_id, "timeline report generated");

        let ProjectSnapshot {
            project,
            stages,
            tasks,
            milestones,
            change_orders,
            ..
        } = snapshot;

        Ok(TimelineReport {
            project_info: project,
            progress: ProgressSummary {
                percentage: progress_percentage(completed, total),
                completed_stages: completed,
                total_stages: total,
                stages,
            },
            milestones,
            tasks,
            change_orders,
            critical_path,
            analytics,
            generated_at: now,
        })
    }

    fn input<'a>(&self, snapshot: &'a ProjectSnapshot) -> AnalyticsInput<'a> {
        AnalyticsInput {
            stages: &snapshot.stages,
            tasks: &snapshot.tasks,
            milestones: &snapshot.milestones,
            change_orders: &snapshot.change_orders,
            templates: &snapshot.templates,
            default_estimated_hours: self.default_estimated_hours,
        }
    }
}
