//! Stage lifecycle for project workflows
//!
//! Provides:
//! - The stage status set and its transition table
//! - Timestamp side effects applied on each transition
//! - The [`StageStateMachine`] service: authorized, audited stage updates,
//!   reassignment with notification, and synchronous progress recompute on
//!   completion

use crate::errors::{WorkflowError, WorkflowResult};
use crate::notifications::{NotificationEventType, NotificationPayload, NotificationSink};
use crate::policy::{AccessPolicy, Actor};
use crate::progress::ProgressAggregator;
use crate::store::WorkflowStore;
use crate::types::{impl_str_enum, AuditEntry, Project, WorkflowInstance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// CORE TYPES
// ============================================================================

/// Status of one stage instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created, not started
    #[default]
    Pending,

    /// Work under way
    InProgress,

    /// Paused after starting
    OnHold,

    /// Finished
    Completed,

    /// Deliberately not performed
    Skipped,

    /// Abandoned
    Cancelled,
}

impl_str_enum!(WorkflowStatus, "workflow status" {
    Pending => "pending",
    InProgress => "in_progress",
    OnHold => "on_hold",
    Completed => "completed",
    Skipped => "skipped",
    Cancelled => "cancelled",
});

impl WorkflowStatus {
    /// Check if a transition to `target` is allowed.
    ///
    /// Same-status requests are not transitions and are handled by the caller.
    pub fn can_transition_to(&self, target: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        match (self, target) {
            (Pending, InProgress) | (Pending, Skipped) | (Pending, Cancelled) => true,

            (InProgress, Completed) | (InProgress, OnHold) | (InProgress, Cancelled) => true,

            (OnHold, InProgress) | (OnHold, Cancelled) => true,

            // Terminal states are never reopened
            (Completed, _) | (Skipped, _) | (Cancelled, _) => false,

            _ => false,
        }
    }

    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Skipped | WorkflowStatus::Cancelled
        )
    }

    pub fn all() -> [WorkflowStatus; 6] {
        use WorkflowStatus::*;
        [Pending, InProgress, OnHold, Completed, Skipped, Cancelled]
    }
}

/// Field changes requested for one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageUpdate {
    #[serde(default)]
    pub status: Option<WorkflowStatus>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Manual correction of the recorded start
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Manual correction of the recorded completion
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StageUpdate {
    pub fn status(status: WorkflowStatus) -> Self {
        StageUpdate {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.assigned_to.is_none()
            && self.notes.is_none()
            && self.started_at.is_none()
            && self.completed_at.is_none()
    }

    /// Whether the update overwrites recorded timestamps
    pub fn corrects_timestamps(&self) -> bool {
        self.started_at.is_some() || self.completed_at.is_some()
    }
}

/// Apply an update to a stage, enforcing the transition table.
///
/// Side effects: first entry into `in_progress` sets `started_at`; entry into
/// `completed` sets `completed_at`. Explicit timestamps in the update win.
pub fn apply_update(
    current: &WorkflowInstance,
    update: &StageUpdate,
    now: DateTime<Utc>,
) -> WorkflowResult<WorkflowInstance> {
    let mut next = current.clone();

    if let Some(target) = update.status {
        if target != current.status {
            if !current.status.can_transition_to(target) {
                return Err(WorkflowError::InvalidTransition {
                    from: current.status.to_string(),
                    to: target.to_string(),
                });
            }
            next.status = target;
            match target {
                WorkflowStatus::InProgress if next.started_at.is_none() => {
                    next.started_at = Some(now);
                }
                WorkflowStatus::Completed => {
                    next.completed_at = Some(now);
                }
                _ => {}
            }
        }
    }

    if let Some(assignee) = &update.assigned_to {
        next.assigned_to = Some(assignee.clone());
    }
    if let Some(notes) = &update.notes {
        next.notes = Some(notes.clone());
    }
    if let Some(started) = update.started_at {
        next.started_at = Some(started);
    }
    if let Some(completed) = update.completed_at {
        next.completed_at = Some(completed);
    }

    next.updated_at = now;
    Ok(next)
}

/// Result of a stage update
#[derive(Debug, Clone, Serialize)]
pub struct StageChange {
    pub workflow: WorkflowInstance,
    /// Project progress after the change, present when it was recomputed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percentage: Option<u8>,
}

// ============================================================================
// STAGE STATE MACHINE
// ============================================================================

/// Governs stage status changes and reassignment.
pub struct StageStateMachine {
    store: Arc<dyn WorkflowStore>,
    policy: Arc<dyn AccessPolicy>,
    notifier: Arc<dyn NotificationSink>,
    progress: ProgressAggregator,
}

impl StageStateMachine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        policy: Arc<dyn AccessPolicy>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let progress = ProgressAggregator::new(store.clone());
        Self {
            store,
            policy,
            notifier,
            progress,
        }
    }

    async fn load(&self, workflow_id: &str) -> WorkflowResult<(WorkflowInstance, Project)> {
        let instance = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("workflow", workflow_id))?;
        let project = self
            .store
            .get_project(&instance.project_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("project", &instance.project_id))?;
        Ok((instance, project))
    }

    /// Move a stage to `new_status`, applying any extra fields in the same write.
    pub async fn transition(
        &self,
        workflow_id: &str,
        new_status: WorkflowStatus,
        actor: &Actor,
        fields: StageUpdate,
    ) -> WorkflowResult<StageChange> {
        let update = StageUpdate {
            status: Some(new_status),
            ..fields
        };
        self.update(workflow_id, actor, update).await
    }

    /// Apply a partial update: status, notes, assignee and timestamp corrections.
    ///
    /// Changing the assignee needs the same capability as [`assign`](Self::assign)
    /// and notifies the new assignee.
    pub async fn update(
        &self,
        workflow_id: &str,
        actor: &Actor,
        update: StageUpdate,
    ) -> WorkflowResult<StageChange> {
        if update.is_empty() {
            return Err(WorkflowError::BadRequest("no fields to update".to_string()));
        }
        if matches!(&update.assigned_to, Some(a) if a.trim().is_empty()) {
            return Err(WorkflowError::BadRequest(
                "assigned_to must not be empty".to_string(),
            ));
        }

        let (current, project) = self.load(workflow_id).await?;

        if !self.policy.can_transition(actor, &project, &current) {
            warn!(workflow_id, actor = %actor.user_id, "stage update rejected");
            return Err(WorkflowError::forbidden(
                "not allowed to update this workflow stage",
            ));
        }
        let reassigns = matches!(
            &update.assigned_to,
            Some(assignee) if current.assigned_to.as_deref() != Some(assignee.as_str())
        );
        if reassigns && !self.policy.can_assign(actor, &project) {
            warn!(workflow_id, actor = %actor.user_id, "stage reassignment rejected");
            return Err(WorkflowError::forbidden("not allowed to reassign stages"));
        }
        if update.corrects_timestamps() && !self.policy.can_correct_timestamps(actor, &project) {
            warn!(workflow_id, actor = %actor.user_id, "timestamp correction rejected");
            return Err(WorkflowError::forbidden(
                "only managers may correct stage timestamps",
            ));
        }

        let next = apply_update(&current, &update, Utc::now())?;

        let audit = AuditEntry::new(
            &actor.user_id,
            "workflow.updated",
            "workflow",
            &next.id,
            json!({
                "project_id": next.project_id,
                "from": current.status,
                "to": next.status,
                "changes": update,
            }),
        );
        self.store
            .update_workflow(&next, current.status, &audit)
            .await?;

        info!(
            workflow_id,
            project_id = %next.project_id,
            from = %current.status,
            to = %next.status,
            actor = %actor.user_id,
            "workflow stage updated"
        );

        if reassigns {
            self.notify_assignee(&next, &project, actor).await;
        }

        // The stage write is committed; a failed recompute leaves the cached
        // percentage stale until the next completion.
        let entered_completed =
            next.status == WorkflowStatus::Completed && current.status != WorkflowStatus::Completed;
        let progress_percentage = if entered_completed {
            match self.progress.recompute(&next.project_id).await {
                Ok(percentage) => Some(percentage),
                Err(e) => {
                    warn!(
                        workflow_id,
                        project_id = %next.project_id,
                        error = %e,
                        "progress recompute failed"
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(StageChange {
            workflow: next,
            progress_percentage,
        })
    }

    /// Reassign a stage and notify the new assignee.
    ///
    /// Reassigning to the current assignee changes nothing and sends nothing.
    pub async fn assign(
        &self,
        workflow_id: &str,
        user_id: &str,
        actor: &Actor,
    ) -> WorkflowResult<WorkflowInstance> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(WorkflowError::BadRequest(
                "assigned_to must not be empty".to_string(),
            ));
        }

        let (current, project) = self.load(workflow_id).await?;

        if !self.policy.can_assign(actor, &project) {
            warn!(workflow_id, actor = %actor.user_id, "stage reassignment rejected");
            return Err(WorkflowError::forbidden("not allowed to reassign stages"));
        }

        if current.assigned_to.as_deref() == Some(user_id) {
            debug!(workflow_id, user_id, "stage already assigned");
            return Ok(current);
        }

        let mut next = current.clone();
        next.assigned_to = Some(user_id.to_string());
        next.updated_at = Utc::now();

        let audit = AuditEntry::new(
            &actor.user_id,
            "workflow.assigned",
            "workflow",
            &next.id,
            json!({
                "project_id": next.project_id,
                "previous": current.assigned_to,
                "assigned_to": user_id,
            }),
        );
        self.store
            .update_workflow(&next, current.status, &audit)
            .await?;

        info!(
            workflow_id,
            project_id = %next.project_id,
            assigned_to = user_id,
            actor = %actor.user_id,
            "workflow stage reassigned"
        );

        self.notify_assignee(&next, &project, actor).await;
        Ok(next)
    }

    async fn notify_assignee(&self, instance: &WorkflowInstance, project: &Project, actor: &Actor) {
        let Some(recipient) = instance.assigned_to.as_deref() else {
            return;
        };

        let payload = NotificationPayload::builder()
            .event_type(NotificationEventType::StageAssigned)
            .recipient(recipient)
            .title(format!("Stage assigned: {}", instance.stage_name))
            .message(format!(
                "You have been assigned the {} stage of project {}",
                instance.stage_name, project.title
            ))
            .data("workflow_id", instance.id.clone())
            .data("project_id", project.id.clone())
            .data("stage_key", instance.stage_key.clone())
            .data("assigned_by", actor.user_id.clone())
            .build();

        let result = match payload {
            Ok(payload) => self.notifier.send(&payload).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!(
                workflow_id = %instance.id,
                recipient,
                sink = self.notifier.sink_name(),
                error = %e,
                "assignment notification not delivered"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(status: WorkflowStatus) -> WorkflowInstance {
        let created = Utc::now() - chrono::Duration::days(3);
        WorkflowInstance {
            id: "wf-1".to_string(),
            project_id: "p-1".to_string(),
            stage_key: "design".to_string(),
            stage_name: "Design".to_string(),
            status,
            assigned_to: None,
            started_at: None,
            completed_at: None,
            notes: None,
            sort_order: 1,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn test_transition_table() {
        use WorkflowStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(Pending.can_transition_to(Skipped));
        assert!(InProgress.can_transition_to(OnHold));
        assert!(OnHold.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(OnHold));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Skipped.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(InProgress));
    }

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = WorkflowStatus::all()
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![
                WorkflowStatus::Completed,
                WorkflowStatus::Skipped,
                WorkflowStatus::Cancelled
            ]
        );
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("on_hold".parse::<WorkflowStatus>(), Ok(WorkflowStatus::OnHold));
        assert_eq!(" Completed ".parse::<WorkflowStatus>(), Ok(WorkflowStatus::Completed));
        assert!("done-ish".parse::<WorkflowStatus>().is_err());
    }

    #[test]
    fn test_start_sets_started_at_once() {
        let now = Utc::now();
        let started = apply_update(
            &stage(WorkflowStatus::Pending),
            &StageUpdate::status(WorkflowStatus::InProgress),
            now,
        )
        .unwrap();
        assert_eq!(started.started_at, Some(now));

        let held = apply_update(&started, &StageUpdate::status(WorkflowStatus::OnHold), now).unwrap();
        let later = now + chrono::Duration::hours(5);
        let resumed =
            apply_update(&held, &StageUpdate::status(WorkflowStatus::InProgress), later).unwrap();
        assert_eq!(resumed.started_at, Some(now));
        assert_eq!(resumed.updated_at, later);
    }

    #[test]
    fn test_completion_sets_completed_at() {
        let now = Utc::now();
        let done = apply_update(
            &stage(WorkflowStatus::InProgress),
            &StageUpdate::status(WorkflowStatus::Completed),
            now,
        )
        .unwrap();
        assert_eq!(done.completed_at, Some(now));
    }

    #[test]
    fn test_reopen_rejected() {
        let err = apply_update(
            &stage(WorkflowStatus::Completed),
            &StageUpdate::status(WorkflowStatus::InProgress),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidTransition { ref from, ref to }
                if from == "completed" && to == "in_progress"
        ));
    }

    #[test]
    fn test_same_status_keeps_side_effects_off() {
        let current = stage(WorkflowStatus::Completed);
        let update = StageUpdate::status(WorkflowStatus::Completed).with_notes("signed off");
        let next = apply_update(&current, &update, Utc::now()).unwrap();
        assert_eq!(next.status, WorkflowStatus::Completed);
        assert!(next.completed_at.is_none());
        assert_eq!(next.notes.as_deref(), Some("signed off"));
    }

    #[test]
    fn test_explicit_timestamps_win() {
        let start = Utc::now() - chrono::Duration::days(10);
        let update = StageUpdate {
            status: Some(WorkflowStatus::InProgress),
            started_at: Some(start),
            ..Default::default()
        };
        let next = apply_update(&stage(WorkflowStatus::Pending), &update, Utc::now()).unwrap();
        assert_eq!(next.started_at, Some(start));
        assert!(update.corrects_timestamps());
    }

    #[test]
    fn test_empty_update() {
        assert!(StageUpdate::default().is_empty());
        assert!(!StageUpdate::default().with_notes("x").is_empty());
    }
}
