/// Endpoint handlers over the workflow coordinator
use crate::errors::{DaemonError, DaemonResult};
use crate::types::*;
use atelier_core::{Actor, WorkflowCoordinator};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Endpoint handlers
pub struct ApiHandlers {
    coordinator: Arc<WorkflowCoordinator>,
}

fn to_value<T: Serialize + ?Sized>(value: &T) -> DaemonResult<Value> {
    serde_json::to_value(value).map_err(|e| DaemonError::ServerError(e.to_string()))
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> DaemonResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| DaemonError::InvalidRequest(format!("Invalid body: {}", e)))
}

impl ApiHandlers {
    pub fn new(coordinator: Arc<WorkflowCoordinator>) -> Self {
        ApiHandlers { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<WorkflowCoordinator> {
        &self.coordinator
    }

    /// GET /health
    pub fn handle_health(&self) -> DaemonResult<Value> {
        to_value(&HealthResponse {
            status: "healthy".to_string(),
            version: crate::VERSION.to_string(),
            timestamp: Utc::now(),
        })
    }

    /// GET /workflows/template
    pub fn handle_template(&self) -> DaemonResult<Value> {
        to_value(self.coordinator.list_templates())
    }

    /// POST /projects/:id/workflows
    pub async fn handle_instantiate(&self, project_id: &str, actor: &Actor) -> DaemonResult<Value> {
        let stages = self.coordinator.instantiate(project_id, actor).await?;
        info!(project_id, stages = stages.len(), actor = %actor.user_id, "workflow instantiated");
        to_value(&stages)
    }

    /// GET /projects/:id/workflows
    pub async fn handle_list_workflows(
        &self,
        project_id: &str,
        actor: &Actor,
    ) -> DaemonResult<Value> {
        to_value(&self.coordinator.list_workflows(project_id, actor).await?)
    }

    /// PUT /workflows/update
    pub async fn handle_update(&self, body: &[u8], actor: &Actor) -> DaemonResult<Value> {
        let request: UpdateWorkflowRequest = parse_body(body)?;
        let (workflow_id, update) = request.into_update()?;

        let change = self
            .coordinator
            .update_workflow(&workflow_id, actor, update)
            .await?;
        to_value(&UpdateWorkflowResponse::from(change))
    }

    /// POST /workflows/:id/assign
    pub async fn handle_assign(
        &self,
        workflow_id: &str,
        body: &[u8],
        actor: &Actor,
    ) -> DaemonResult<Value> {
        let request: AssignRequest = parse_body(body)?;
        let instance = self
            .coordinator
            .assign(workflow_id, &request.assigned_to, actor)
            .await?;
        to_value(&instance)
    }

    /// GET /workflows/assigned
    pub async fn handle_assigned(&self, query: Option<&str>, actor: &Actor) -> DaemonResult<Value> {
        let query = AssignedQuery::parse(query)?;
        let page = self
            .coordinator
            .list_assigned(actor, query.status, query.page, query.per_page)
            .await?;
        to_value(&page)
    }

    /// GET /projects/:id/critical-path
    pub async fn handle_critical_path(&self, project_id: &str, actor: &Actor) -> DaemonResult<Value> {
        to_value(&self.coordinator.critical_path(project_id, actor).await?)
    }

    /// GET /projects/:id/timeline-analytics
    pub async fn handle_timeline_analytics(
        &self,
        project_id: &str,
        actor: &Actor,
    ) -> DaemonResult<Value> {
        to_value(&self.coordinator.timeline_analytics(project_id, actor).await?)
    }

    /// GET /projects/:id/timeline-report
    pub async fn handle_timeline_report(
        &self,
        project_id: &str,
        actor: &Actor,
    ) -> DaemonResult<Value> {
        to_value(&self.coordinator.timeline_report(project_id, actor).await?)
    }
}
