//! Coordinator facade over the workflow components.
//!
//! Owns the shared store, policy, catalog and notification sink, and exposes
//! every operation the daemon serves.

use crate::analyzer::CriticalPathReport;
use crate::catalog::{StageTemplate, TemplateCatalog, TemplateSet};
use crate::config::{AtelierConfig, PaginationConfig};
use crate::errors::{StoreError, WorkflowError, WorkflowResult};
use crate::instantiator::WorkflowInstantiator;
use crate::notifications::NotificationSink;
use crate::policy::{AccessPolicy, Actor, CapabilityPolicy};
use crate::state_machine::{StageChange, StageStateMachine, StageUpdate, WorkflowStatus};
use crate::store::{dedup_ids, SqliteWorkflowStore, WorkflowStore};
use crate::timeline::{TimelineAnalyticsView, TimelineReport, TimelineReporter};
use crate::types::{AuditEntry, DependencyType, Page, ProjectTask, WorkflowDependency, WorkflowInstance};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct WorkflowCoordinator {
    store: Arc<dyn WorkflowStore>,
    policy: Arc<dyn AccessPolicy>,
    catalog: Arc<TemplateCatalog>,
    pagination: PaginationConfig,
    instantiator: WorkflowInstantiator,
    stages: StageStateMachine,
    reporter: TimelineReporter,
}

impl WorkflowCoordinator {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        policy: Arc<dyn AccessPolicy>,
        notifier: Arc<dyn NotificationSink>,
        catalog: Arc<TemplateCatalog>,
        config: &AtelierConfig,
    ) -> Self {
        Self {
            instantiator: WorkflowInstantiator::new(store.clone(), policy.clone(), catalog.clone()),
            stages: StageStateMachine::new(store.clone(), policy.clone(), notifier),
            reporter: TimelineReporter::new(
                store.clone(),
                policy.clone(),
                catalog.clone(),
                &config.analyzer,
            ),
            pagination: config.pagination.clone(),
            store,
            policy,
            catalog,
        }
    }

    /// Connect storage, load the catalog and mirror its sets into the store.
    pub async fn from_config(
        config: &AtelierConfig,
        notifier: Arc<dyn NotificationSink>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let catalog = Arc::new(config.build_catalog()?);

        let store = SqliteWorkflowStore::connect(
            &config.storage.database_url,
            config.storage.max_connections,
        )
        .await?;
        for version in catalog.versions() {
            if let Some(set) = catalog.version(version) {
                store.sync_templates(set).await?;
            }
        }

        info!(
            database_url = %config.storage.database_url,
            active_templates = %catalog.active().version,
            "workflow coordinator ready"
        );

        Ok(Self::new(
            Arc::new(store),
            CapabilityPolicy::shared(),
            notifier,
            catalog,
            config,
        ))
    }

    /// Persistence handle, for seeding collaborator records
    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    /// Active template stages in sort order
    pub fn list_templates(&self) -> &[StageTemplate] {
        self.catalog.list_templates()
    }

    pub fn active_templates(&self) -> &TemplateSet {
        self.catalog.active()
    }

    pub async fn instantiate(
        &self,
        project_id: &str,
        actor: &Actor,
    ) -> WorkflowResult<Vec<WorkflowInstance>> {
        self.instantiator.instantiate(project_id, actor).await
    }

    /// Stages of a project in sort order.
    pub async fn list_workflows(
        &self,
        project_id: &str,
        actor: &Actor,
    ) -> WorkflowResult<Vec<WorkflowInstance>> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("project", project_id))?;

        if !self.policy.can_view(actor, &project) {
            warn!(project_id, actor = %actor.user_id, "workflow listing rejected");
            return Err(WorkflowError::forbidden("not allowed to view this project"));
        }

        let workflows = self.store.list_workflows(project_id).await?;
        debug!(project_id, count = workflows.len(), "workflows listed");
        Ok(workflows)
    }

    pub async fn transition(
        &self,
        workflow_id: &str,
        new_status: WorkflowStatus,
        actor: &Actor,
        fields: StageUpdate,
    ) -> WorkflowResult<StageChange> {
        self.stages
            .transition(workflow_id, new_status, actor, fields)
            .await
    }

    pub async fn update_workflow(
        &self,
        workflow_id: &str,
        actor: &Actor,
        update: StageUpdate,
    ) -> WorkflowResult<StageChange> {
        self.stages.update(workflow_id, actor, update).await
    }

    pub async fn assign(
        &self,
        workflow_id: &str,
        user_id: &str,
        actor: &Actor,
    ) -> WorkflowResult<WorkflowInstance> {
        self.stages.assign(workflow_id, user_id, actor).await
    }

    /// Stages assigned to the actor, one page at a time (pages start at 1).
    pub async fn list_assigned(
        &self,
        actor: &Actor,
        status: Option<WorkflowStatus>,
        page: Option<u32>,
        per_page: Option<u32>,
    ) -> WorkflowResult<Page<WorkflowInstance>> {
        let page = page.unwrap_or(1).max(1);
        let per_page = self.pagination.per_page(per_page);
        let offset = (page - 1).saturating_mul(per_page);

        let (items, total) = self
            .store
            .list_assigned(&actor.user_id, status, per_page, offset)
            .await?;

        Ok(Page {
            items,
            total,
            page,
            per_page,
        })
    }

    /// Add an edge between two stages of the same project.
    ///
    /// Self-loops and edges that would close a cycle are rejected inside the
    /// write transaction, so concurrent edits cannot combine into a cycle.
    pub async fn add_workflow_dependency(
        &self,
        workflow_id: &str,
        depends_on_id: &str,
        dependency_type: DependencyType,
        lag_days: i32,
        actor: &Actor,
    ) -> WorkflowResult<WorkflowDependency> {
        if lag_days < 0 {
            return Err(WorkflowError::BadRequest(
                "lag_days must not be negative".to_string(),
            ));
        }

        let dependent = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("workflow", workflow_id))?;
        let prerequisite = self
            .store
            .get_workflow(depends_on_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("workflow", depends_on_id))?;

        if dependent.project_id != prerequisite.project_id {
            return Err(WorkflowError::BadRequest(
                "workflow dependencies must stay within one project".to_string(),
            ));
        }

        let project = self
            .store
            .get_project(&dependent.project_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("project", &dependent.project_id))?;
        if !self.policy.can_instantiate(actor, &project) {
            return Err(WorkflowError::forbidden(
                "not allowed to change this project's workflow structure",
            ));
        }

        let dependency = WorkflowDependency {
            workflow_id: workflow_id.to_string(),
            depends_on_workflow_id: depends_on_id.to_string(),
            dependency_type,
            lag_days,
        };
        let audit = AuditEntry::new(
            &actor.user_id,
            "workflow_dependency.added",
            "workflow",
            workflow_id,
            json!({
                "depends_on": depends_on_id,
                "dependency_type": dependency_type,
                "lag_days": lag_days,
            }),
        );

        match self.store.add_workflow_dependency(&dependency, &audit).await {
            Ok(()) => {}
            Err(StoreError::Cycle(_)) => {
                warn!(workflow_id, depends_on_id, "dependency cycle rejected");
                return Err(WorkflowError::DependencyCycle(format!(
                    "{} cannot depend on {}",
                    dependent.stage_name, prerequisite.stage_name
                )));
            }
            Err(e) => return Err(e.into()),
        }

        info!(workflow_id, depends_on_id, %dependency_type, "workflow dependency added");
        Ok(dependency)
    }

    /// Record a new task. Its dependencies must already exist in the same
    /// project; repeated ids are dropped.
    pub async fn create_task(&self, task: ProjectTask, actor: &Actor) -> WorkflowResult<ProjectTask> {
        if task.title.trim().is_empty() {
            return Err(WorkflowError::BadRequest("task title is required".to_string()));
        }

        let project = self
            .store
            .get_project(&task.project_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("project", &task.project_id))?;
        if !self.policy.can_instantiate(actor, &project) {
            return Err(WorkflowError::forbidden(
                "not allowed to change this project's task structure",
            ));
        }

        let task = ProjectTask {
            dependencies: dedup_ids(&task.dependencies),
            ..task
        };
        let audit = AuditEntry::new(
            &actor.user_id,
            "task.created",
            "task",
            &task.id,
            json!({ "project_id": task.project_id, "dependencies": task.dependencies }),
        );

        self.store
            .create_task(&task, &audit)
            .await
            .map_err(|e| log_structure_rejection(&task.id, e))?;

        info!(task_id = %task.id, project_id = %task.project_id, "task created");
        Ok(task)
    }

    /// Replace a task's dependency list, rejecting unknown ids and cycles.
    pub async fn set_task_dependencies(
        &self,
        task_id: &str,
        dependencies: &[String],
        actor: &Actor,
    ) -> WorkflowResult<ProjectTask> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("task", task_id))?;
        let project = self
            .store
            .get_project(&task.project_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("project", &task.project_id))?;
        if !self.policy.can_instantiate(actor, &project) {
            return Err(WorkflowError::forbidden(
                "not allowed to change this project's task structure",
            ));
        }

        let dependencies = dedup_ids(dependencies);
        let audit = AuditEntry::new(
            &actor.user_id,
            "task_dependencies.replaced",
            "task",
            task_id,
            json!({ "dependencies": dependencies }),
        );

        self.store
            .replace_task_dependencies(task_id, &dependencies, &audit)
            .await
            .map_err(|e| log_structure_rejection(task_id, e))?;

        info!(task_id, count = dependencies.len(), "task dependencies replaced");
        Ok(ProjectTask {
            dependencies,
            ..task
        })
    }

    pub async fn critical_path(
        &self,
        project_id: &str,
        actor: &Actor,
    ) -> WorkflowResult<CriticalPathReport> {
        self.reporter.critical_path(project_id, actor).await
    }

    pub async fn timeline_analytics(
        &self,
        project_id: &str,
        actor: &Actor,
    ) -> WorkflowResult<TimelineAnalyticsView> {
        self.reporter.analytics(project_id, actor).await
    }

    pub async fn timeline_report(
        &self,
        project_id: &str,
        actor: &Actor,
    ) -> WorkflowResult<TimelineReport> {
        self.reporter.generate(project_id, actor).await
    }
}

fn log_structure_rejection(task_id: &str, e: StoreError) -> WorkflowError {
    if let StoreError::Cycle(path) = &e {
        warn!(task_id, cycle = %path, "task dependency cycle rejected");
    }
    e.into()
}
