/// Creates a project's stage workflow from the active template set.
use crate::catalog::{TemplateCatalog, TemplateSet};
use crate::errors::{WorkflowError, WorkflowResult};
use crate::policy::{AccessPolicy, Actor};
use crate::state_machine::WorkflowStatus;
use crate::store::{NewWorkflowSet, WorkflowStore};
use crate::types::{AuditEntry, DependencyType, Project, WorkflowDependency, WorkflowInstance};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Stage instances and dependency edges planned for one project
#[derive(Debug, Clone)]
pub struct WorkflowPlan {
    pub instances: Vec<WorkflowInstance>,
    pub dependencies: Vec<WorkflowDependency>,
}

/// Plan one pending instance per template stage, in sort order.
///
/// `assigned_to` is resolved by matching the stage's required role against the
/// project's staff; the first match wins and no match leaves it unset.
pub fn plan_workflow(project: &Project, templates: &TemplateSet, now: DateTime<Utc>) -> WorkflowPlan {
    let staff = project.staff_assignments();
    let mut ids_by_key: HashMap<&str, String> = HashMap::new();

    let instances: Vec<WorkflowInstance> = templates
        .stages
        .iter()
        .map(|stage| {
            let assigned_to = stage.required_role.and_then(|role| {
                staff
                    .iter()
                    .find(|(staff_role, _)| *staff_role == role)
                    .map(|(_, user_id)| user_id.to_string())
            });

            let id = Uuid::new_v4().to_string();
            ids_by_key.insert(stage.key.as_str(), id.clone());

            WorkflowInstance {
                id,
                project_id: project.id.clone(),
                stage_key: stage.key.clone(),
                stage_name: stage.stage_name.clone(),
                status: WorkflowStatus::Pending,
                assigned_to,
                started_at: None,
                completed_at: None,
                notes: None,
                sort_order: stage.sort_order,
                created_at: now,
                updated_at: now,
            }
        })
        .collect();

    let dependencies = templates
        .stages
        .iter()
        .filter_map(|stage| {
            let prerequisite = stage.depends_on.as_deref()?;
            Some(WorkflowDependency {
                workflow_id: ids_by_key.get(stage.key.as_str())?.clone(),
                depends_on_workflow_id: ids_by_key.get(prerequisite)?.clone(),
                dependency_type: DependencyType::FinishToStart,
                lag_days: 0,
            })
        })
        .collect();

    WorkflowPlan {
        instances,
        dependencies,
    }
}

pub struct WorkflowInstantiator {
    store: Arc<dyn WorkflowStore>,
    policy: Arc<dyn AccessPolicy>,
    catalog: Arc<TemplateCatalog>,
}

impl WorkflowInstantiator {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        policy: Arc<dyn AccessPolicy>,
        catalog: Arc<TemplateCatalog>,
    ) -> Self {
        Self {
            store,
            policy,
            catalog,
        }
    }

    /// Create the project's stage set.
    ///
    /// Fails with `AlreadyExists` when the project already has one. The check
    /// is the store's uniqueness constraint, so concurrent calls cannot both
    /// succeed.
    pub async fn instantiate(
        &self,
        project_id: &str,
        actor: &Actor,
    ) -> WorkflowResult<Vec<WorkflowInstance>> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("project", project_id))?;

        if !self.policy.can_instantiate(actor, &project) {
            warn!(project_id, actor = %actor.user_id, "workflow instantiation rejected");
            return Err(WorkflowError::forbidden(
                "not allowed to create workflows for this project",
            ));
        }

        let templates = self.catalog.active();
        let plan = plan_workflow(&project, templates, Utc::now());

        let audit = AuditEntry::new(
            &actor.user_id,
            "workflow.instantiated",
            "project",
            project_id,
            json!({
                "template_version": templates.version,
                "stages": plan.instances.len(),
            }),
        );

        self.store
            .create_workflow_set(NewWorkflowSet {
                project_id,
                template_version: &templates.version,
                created_by: &actor.user_id,
                instances: &plan.instances,
                dependencies: &plan.dependencies,
                audit: &audit,
            })
            .await
            .map_err(|e| match WorkflowError::from(e) {
                WorkflowError::AlreadyExists(_) => WorkflowError::AlreadyExists(format!(
                    "project {} already has a workflow",
                    project_id
                )),
                other => other,
            })?;

        info!(
            project_id,
            template_version = %templates.version,
            stages = plan.instances.len(),
            actor = %actor.user_id,
            "workflow instantiated"
        );
        Ok(plan.instances)
    }
}
