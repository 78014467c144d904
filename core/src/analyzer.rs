//! Schedule analysis over project tasks.
//!
//! Two separate capabilities live here:
//! - [`CriticalPathAnalyzer::analyze`], the fixed heuristic report downstream
//!   consumers rely on (priority / dependency / due-date flags, flat hour sum)
//! - [`compute_cpm`], a forward/backward pass schedule with slack and the
//!   zero-slack critical chain
//!
//! Both reject dependency cycles before producing output.

use crate::catalog::TemplateSet;
use crate::config::AnalyzerConfig;
use crate::errors::{WorkflowError, WorkflowResult};
use crate::graph::DependencyGraph;
use crate::state_machine::WorkflowStatus;
use crate::types::{ProjectTask, TaskPriority, TaskStatus, WorkflowDependency, WorkflowInstance};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Working hours in one scheduled day
pub const HOURS_PER_DAY: f64 = 8.0;

const SLACK_EPSILON: f64 = 1e-9;

/// Why a task was flagged as schedule-sensitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalReason {
    /// Priority is high or urgent
    Priority,
    /// At least one declared dependency
    Dependencies,
    /// Due within the configured window, or already past due
    DueSoon,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriticalTask {
    pub task_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_hours: f64,
    pub reasons: Vec<CriticalReason>,
}

/// An in-progress task past its due date
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bottleneck {
    pub task_id: String,
    pub title: String,
    pub assigned_to: Option<String>,
    pub due_date: DateTime<Utc>,
    pub days_overdue: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriticalPathReport {
    pub critical_tasks: Vec<CriticalTask>,
    /// Sum of estimated hours over all tasks
    pub total_duration: f64,
    pub bottlenecks: Vec<Bottleneck>,
    pub recommendations: Vec<String>,
}

/// Heuristic critical-path analyzer.
#[derive(Debug, Clone)]
pub struct CriticalPathAnalyzer {
    default_estimated_hours: f64,
    due_soon_window: Duration,
}

impl Default for CriticalPathAnalyzer {
    fn default() -> Self {
        Self::new(&AnalyzerConfig::default())
    }
}

impl CriticalPathAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            default_estimated_hours: config.default_estimated_hours,
            due_soon_window: Duration::days(config.due_soon_window_days),
        }
    }

    fn hours(&self, task: &ProjectTask) -> f64 {
        task.estimated_hours.unwrap_or(self.default_estimated_hours)
    }

    /// Analyze a project's tasks as of `now`.
    pub fn analyze(
        &self,
        tasks: &[ProjectTask],
        now: DateTime<Utc>,
    ) -> WorkflowResult<CriticalPathReport> {
        task_graph(tasks)?;

        let due_soon_cutoff = now + self.due_soon_window;

        let critical_tasks: Vec<CriticalTask> = tasks
            .iter()
            .filter_map(|task| {
                let mut reasons = Vec::new();
                if matches!(task.priority, TaskPriority::High | TaskPriority::Urgent) {
                    reasons.push(CriticalReason::Priority);
                }
                if !task.dependencies.is_empty() {
                    reasons.push(CriticalReason::Dependencies);
                }
                if task.due_date.is_some_and(|due| due <= due_soon_cutoff) {
                    reasons.push(CriticalReason::DueSoon);
                }
                if reasons.is_empty() {
                    return None;
                }
                Some(CriticalTask {
                    task_id: task.id.clone(),
                    title: task.title.clone(),
                    status: task.status,
                    priority: task.priority,
                    due_date: task.due_date,
                    estimated_hours: self.hours(task),
                    reasons,
                })
            })
            .collect();

        let total_duration = tasks.iter().map(|t| self.hours(t)).sum();

        let bottlenecks: Vec<Bottleneck> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::InProgress)
            .filter_map(|task| {
                let due = task.due_date.filter(|due| *due < now)?;
                Some(Bottleneck {
                    task_id: task.id.clone(),
                    title: task.title.clone(),
                    assigned_to: task.assigned_to.clone(),
                    due_date: due,
                    days_overdue: days_overdue(due, now),
                })
            })
            .collect();

        let recommendations = recommendations(tasks, now);

        debug!(
            tasks = tasks.len(),
            critical = critical_tasks.len(),
            bottlenecks = bottlenecks.len(),
            "critical path analyzed"
        );

        Ok(CriticalPathReport {
            critical_tasks,
            total_duration,
            bottlenecks,
            recommendations,
        })
    }
}

/// Whole days past due, rounded up.
pub fn days_overdue(due: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let seconds = (now - due).num_seconds();
    if seconds <= 0 {
        return 0;
    }
    (seconds + 86_399) / 86_400
}

/// Overdue: past due and neither completed nor cancelled.
pub fn is_overdue(task: &ProjectTask, now: DateTime<Utc>) -> bool {
    !task.status.is_closed() && task.due_date.is_some_and(|due| due < now)
}

fn recommendations(tasks: &[ProjectTask], now: DateTime<Utc>) -> Vec<String> {
    let mut out = Vec::new();

    let overdue = tasks.iter().filter(|t| is_overdue(t, now)).count();
    if overdue > 0 {
        out.push(format!(
            "{} task(s) are overdue. Consider reallocating resources or adjusting deadlines.",
            overdue
        ));
    }

    let urgent = tasks
        .iter()
        .filter(|t| t.priority == TaskPriority::Urgent && !t.status.is_closed())
        .count();
    if urgent > 0 {
        out.push(format!("{} urgent task(s) need immediate attention.", urgent));
    }

    let unassigned = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending && t.assigned_to.is_none())
        .count();
    if unassigned > 0 {
        out.push(format!(
            "{} pending task(s) have no assignee. Assign team members to keep work moving.",
            unassigned
        ));
    }

    if out.is_empty() {
        out.push("Project is on track. Continue monitoring progress.".to_string());
    }
    out
}

/// Build the task graph, dropping references to unknown tasks and failing on cycles.
fn task_graph(tasks: &[ProjectTask]) -> WorkflowResult<DependencyGraph> {
    let (graph, dangling) = DependencyGraph::from_edges(
        tasks
            .iter()
            .map(|t| (t.id.as_str(), t.dependencies.as_slice())),
    )?;

    for (task_id, missing) in &dangling {
        warn!(task_id = %task_id, missing = %missing, "ignoring dependency on unknown task");
    }

    if let Some(cycle) = graph.find_cycle() {
        return Err(WorkflowError::DependencyCycle(cycle.join(" -> ")));
    }
    Ok(graph)
}

// ============================================================================
// CPM SCHEDULE
// ============================================================================

/// One task's slot in a CPM schedule, in hours from project start
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CpmEntry {
    pub task_id: String,
    pub duration: f64,
    pub earliest_start: f64,
    pub earliest_finish: f64,
    pub latest_start: f64,
    pub latest_finish: f64,
    pub slack: f64,
}

impl CpmEntry {
    pub fn is_critical(&self) -> bool {
        self.slack.abs() < SLACK_EPSILON
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CpmSchedule {
    /// Entries in dependency order
    pub entries: Vec<CpmEntry>,
    pub project_duration: f64,
    /// Zero-slack tasks in dependency order
    pub critical_chain: Vec<String>,
}

impl CpmSchedule {
    pub fn entry(&self, task_id: &str) -> Option<&CpmEntry> {
        self.entries.iter().find(|e| e.task_id == task_id)
    }
}

/// Forward/backward pass over the task graph.
///
/// Durations are estimated hours, defaulting to `default_hours`. All edges are
/// treated as finish-to-start.
pub fn compute_cpm(tasks: &[ProjectTask], default_hours: f64) -> WorkflowResult<CpmSchedule> {
    let graph = task_graph(tasks)?;
    let order = graph.topological_sort()?;

    let duration: HashMap<&str, f64> = tasks
        .iter()
        .map(|t| (t.id.as_str(), t.estimated_hours.unwrap_or(default_hours).max(0.0)))
        .collect();
    let dur = |id: &str| duration.get(id).copied().unwrap_or(default_hours);

    let mut earliest_finish: HashMap<&str, f64> = HashMap::with_capacity(order.len());
    let mut earliest_start: HashMap<&str, f64> = HashMap::with_capacity(order.len());
    for id in &order {
        let start = graph
            .prerequisites(id)
            .iter()
            .filter_map(|p| earliest_finish.get(p.as_str()).copied())
            .fold(0.0_f64, f64::max);
        earliest_start.insert(id.as_str(), start);
        earliest_finish.insert(id.as_str(), start + dur(id));
    }

    let project_duration = earliest_finish.values().copied().fold(0.0_f64, f64::max);

    let mut latest_start: HashMap<&str, f64> = HashMap::with_capacity(order.len());
    let mut latest_finish: HashMap<&str, f64> = HashMap::with_capacity(order.len());
    for id in order.iter().rev() {
        let finish = graph
            .dependents(id)
            .iter()
            .filter_map(|d| latest_start.get(d.as_str()).copied())
            .fold(project_duration, f64::min);
        latest_finish.insert(id.as_str(), finish);
        latest_start.insert(id.as_str(), finish - dur(id));
    }

    let entries: Vec<CpmEntry> = order
        .iter()
        .map(|id| {
            let id = id.as_str();
            let es = earliest_start.get(id).copied().unwrap_or(0.0);
            let ls = latest_start.get(id).copied().unwrap_or(0.0);
            CpmEntry {
                task_id: id.to_string(),
                duration: dur(id),
                earliest_start: es,
                earliest_finish: earliest_finish.get(id).copied().unwrap_or(0.0),
                latest_start: ls,
                latest_finish: latest_finish.get(id).copied().unwrap_or(0.0),
                slack: ls - es,
            }
        })
        .collect();

    let critical_chain = entries
        .iter()
        .filter(|e| e.is_critical())
        .map(|e| e.task_id.clone())
        .collect();

    Ok(CpmSchedule {
        entries,
        project_duration,
        critical_chain,
    })
}

/// Project workflow stages onto tasks so they can be scheduled like tasks.
///
/// Each stage lasts its template's typical days at [`HOURS_PER_DAY`]; stages
/// whose template is missing from `templates` get no estimate.
pub fn stage_tasks(
    instances: &[WorkflowInstance],
    dependencies: &[WorkflowDependency],
    templates: &TemplateSet,
) -> Vec<ProjectTask> {
    instances
        .iter()
        .map(|instance| {
            let status = match instance.status {
                WorkflowStatus::Pending => TaskStatus::Pending,
                WorkflowStatus::InProgress => TaskStatus::InProgress,
                WorkflowStatus::OnHold => TaskStatus::OnHold,
                WorkflowStatus::Completed => TaskStatus::Completed,
                WorkflowStatus::Skipped | WorkflowStatus::Cancelled => TaskStatus::Cancelled,
            };

            ProjectTask {
                id: instance.id.clone(),
                project_id: instance.project_id.clone(),
                title: instance.stage_name.clone(),
                assigned_to: instance.assigned_to.clone(),
                status,
                priority: TaskPriority::Medium,
                due_date: None,
                estimated_hours: templates
                    .get(&instance.stage_key)
                    .map(|t| t.typical_duration_days as f64 * HOURS_PER_DAY),
                actual_hours: None,
                dependencies: dependencies
                    .iter()
                    .filter(|d| d.workflow_id == instance.id)
                    .map(|d| d.depends_on_workflow_id.clone())
                    .collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn task(id: &str) -> ProjectTask {
        let mut task = ProjectTask::new("p-1", id);
        task.id = id.to_string();
        task
    }

    #[test]
    fn test_urgent_vs_low_priority() {
        let tasks = vec![
            task("urgent")
                .with_priority(TaskPriority::Urgent)
                .with_estimated_hours(8.0),
            task("low")
                .with_priority(TaskPriority::Low)
                .with_estimated_hours(16.0)
                .with_due_date(now() + Duration::days(30)),
        ];

        let report = CriticalPathAnalyzer::default().analyze(&tasks, now()).unwrap();
        assert_eq!(report.total_duration, 24.0);
        assert_eq!(report.critical_tasks.len(), 1);
        assert_eq!(report.critical_tasks[0].task_id, "urgent");
        assert_eq!(report.critical_tasks[0].reasons, vec![CriticalReason::Priority]);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r == "1 urgent task(s) need immediate attention."));
        assert!(!report.recommendations.iter().any(|r| r.contains("overdue")));
    }

    #[test]
    fn test_default_hours_in_total() {
        let tasks = vec![task("a"), task("b").with_estimated_hours(4.0)];
        let report = CriticalPathAnalyzer::default().analyze(&tasks, now()).unwrap();
        assert_eq!(report.total_duration, 12.0);
    }

    #[test]
    fn test_due_soon_window_includes_past_due() {
        let tasks = vec![
            task("soon").with_due_date(now() + Duration::days(7)),
            task("late").with_due_date(now() - Duration::days(2)),
            task("far").with_due_date(now() + Duration::days(8)),
        ];
        let report = CriticalPathAnalyzer::default().analyze(&tasks, now()).unwrap();
        let ids: Vec<_> = report.critical_tasks.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["soon", "late"]);
    }

    #[test]
    fn test_dependency_flag_and_bottleneck() {
        let tasks = vec![
            task("a").with_assignee("u1"),
            task("b")
                .with_dependency("a")
                .with_status(TaskStatus::InProgress)
                .with_due_date(now() - Duration::hours(30)),
        ];
        let report = CriticalPathAnalyzer::default().analyze(&tasks, now()).unwrap();

        let b = report
            .critical_tasks
            .iter()
            .find(|t| t.task_id == "b")
            .unwrap();
        assert!(b.reasons.contains(&CriticalReason::Dependencies));
        assert!(b.reasons.contains(&CriticalReason::DueSoon));

        assert_eq!(report.bottlenecks.len(), 1);
        assert_eq!(report.bottlenecks[0].days_overdue, 2);
        assert_eq!(
            report.recommendations[0],
            "1 task(s) are overdue. Consider reallocating resources or adjusting deadlines."
        );
    }

    #[test]
    fn test_recommendation_order_and_on_track() {
        let tasks = vec![
            task("late")
                .with_priority(TaskPriority::Urgent)
                .with_due_date(now() - Duration::days(1)),
        ];
        let report = CriticalPathAnalyzer::default().analyze(&tasks, now()).unwrap();
        assert_eq!(report.recommendations.len(), 3);
        assert!(report.recommendations[0].contains("overdue"));
        assert!(report.recommendations[1].contains("urgent"));
        assert!(report.recommendations[2].contains("no assignee"));

        let done = vec![task("x").with_status(TaskStatus::Completed)];
        let report = CriticalPathAnalyzer::default().analyze(&done, now()).unwrap();
        assert_eq!(
            report.recommendations,
            vec!["Project is on track. Continue monitoring progress.".to_string()]
        );
    }

    #[test]
    fn test_completed_task_not_overdue() {
        let t = task("x")
            .with_status(TaskStatus::Completed)
            .with_due_date(now() - Duration::days(3));
        assert!(!is_overdue(&t, now()));
        assert_eq!(days_overdue(now() - Duration::days(3), now()), 3);
        assert_eq!(days_overdue(now() + Duration::days(1), now()), 0);
    }

    #[test]
    fn test_cycle_rejected() {
        let tasks = vec![task("a").with_dependency("b"), task("b").with_dependency("a")];
        let result = CriticalPathAnalyzer::default().analyze(&tasks, now());
        assert!(matches!(result, Err(WorkflowError::DependencyCycle(_))));
        assert!(compute_cpm(&tasks, 8.0).is_err());
    }

    #[test]
    fn test_unknown_dependency_ignored() {
        let tasks = vec![task("a").with_dependency("ghost")];
        let report = CriticalPathAnalyzer::default().analyze(&tasks, now()).unwrap();
        assert_eq!(report.critical_tasks.len(), 1);

        let schedule = compute_cpm(&tasks, 8.0).unwrap();
        assert_eq!(schedule.project_duration, 8.0);
    }

    #[test]
    fn test_cpm_diamond() {
        // a -> b (long) -> d, a -> c (short) -> d
        let tasks = vec![
            task("a").with_estimated_hours(4.0),
            task("b").with_estimated_hours(10.0).with_dependency("a"),
            task("c").with_estimated_hours(2.0).with_dependency("a"),
            task("d")
                .with_estimated_hours(6.0)
                .with_dependency("b")
                .with_dependency("c"),
        ];
        let schedule = compute_cpm(&tasks, 8.0).unwrap();

        assert_eq!(schedule.project_duration, 20.0);
        assert_eq!(schedule.critical_chain, vec!["a", "b", "d"]);

        let c = schedule.entry("c").unwrap();
        assert_eq!(c.earliest_start, 4.0);
        assert_eq!(c.latest_start, 12.0);
        assert_eq!(c.slack, 8.0);
        assert!(!c.is_critical());
    }
}
