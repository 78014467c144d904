/// Request and response bodies of the HTTP surface
use crate::errors::{DaemonError, DaemonResult};
use atelier_core::{StageChange, StageUpdate, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Body of `PUT /workflows/update`
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateWorkflowRequest {
    pub workflow_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl UpdateWorkflowRequest {
    /// Split into the target stage and the typed change set
    pub fn into_update(self) -> DaemonResult<(String, StageUpdate)> {
        let status = self
            .status
            .as_deref()
            .map(WorkflowStatus::from_str)
            .transpose()
            .map_err(DaemonError::InvalidRequest)?;

        Ok((
            self.workflow_id,
            StageUpdate {
                status,
                assigned_to: self.assigned_to,
                notes: self.notes,
                started_at: self.started_at,
                completed_at: self.completed_at,
            },
        ))
    }
}

/// Body of `POST /workflows/:id/assign`
#[derive(Debug, Clone, Deserialize)]
pub struct AssignRequest {
    pub assigned_to: String,
}

/// Query of `GET /workflows/assigned`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignedQuery {
    pub status: Option<WorkflowStatus>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl AssignedQuery {
    /// Parse `status=..&page=..&per_page=..`; unknown keys are ignored
    pub fn parse(query: Option<&str>) -> DaemonResult<Self> {
        let mut parsed = AssignedQuery::default();
        let Some(query) = query else {
            return Ok(parsed);
        };

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if value.is_empty() {
                continue;
            }
            match key {
                "status" => {
                    parsed.status =
                        Some(WorkflowStatus::from_str(value).map_err(DaemonError::InvalidRequest)?)
                }
                "page" => parsed.page = Some(parse_number(key, value)?),
                "per_page" => parsed.per_page = Some(parse_number(key, value)?),
                _ => {}
            }
        }

        Ok(parsed)
    }
}

fn parse_number(key: &str, value: &str) -> DaemonResult<u32> {
    value
        .parse()
        .map_err(|_| DaemonError::InvalidRequest(format!("{} must be a positive integer", key)))
}

/// Response of `PUT /workflows/update`
#[derive(Debug, Clone, Serialize)]
pub struct UpdateWorkflowResponse {
    #[serde(flatten)]
    pub workflow: atelier_core::WorkflowInstance,
    /// Project progress, present when the update completed the stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_progress: Option<u8>,
}

impl From<StageChange> for UpdateWorkflowResponse {
    fn from(change: StageChange) -> Self {
        UpdateWorkflowResponse {
            workflow: change.workflow,
            project_progress: change.progress_percentage,
        }
    }
}

/// Authentication token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub capabilities: Vec<String>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}
