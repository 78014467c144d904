/// Actor identity and capability-based access policy.
///
/// The identity itself is supplied by the surrounding platform; components
/// only consume it through an injected [`AccessPolicy`].
use crate::types::{Project, WorkflowInstance};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Named capability strings granted to actors.
pub mod capabilities {
    /// Wildcard, grants every capability
    pub const ALL: &str = "*";
    /// Create stage workflows for projects the actor belongs to
    pub const WORKFLOWS_CREATE: &str = "workflows:create";
    /// Blanket stage management on every project
    pub const WORKFLOWS_MANAGE: &str = "workflows:manage";
    /// Reassign stages
    pub const PROJECTS_MANAGE: &str = "projects:manage";
    /// Read every project's workflow and analytics
    pub const PROJECTS_VIEW: &str = "projects:view";
}

/// The caller of an operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Actor {
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>) -> Self {
        Actor {
            user_id: user_id.into(),
            roles: Vec::new(),
            capabilities: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Check if the actor holds a capability, directly or through `*`
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c == capability || c == capabilities::ALL)
    }
}

/// Authorization rules consumed by the workflow components.
pub trait AccessPolicy: Send + Sync {
    /// May the actor create the stage workflow of this project
    fn can_instantiate(&self, actor: &Actor, project: &Project) -> bool;

    /// May the actor change status, notes or assignee of this stage
    fn can_transition(&self, actor: &Actor, project: &Project, instance: &WorkflowInstance)
        -> bool;

    /// May the actor reassign stages
    fn can_assign(&self, actor: &Actor, project: &Project) -> bool;

    /// May the actor read this project's workflow, analytics and reports
    fn can_view(&self, actor: &Actor, project: &Project) -> bool;

    /// May the actor overwrite recorded start/completion timestamps
    fn can_correct_timestamps(&self, actor: &Actor, project: &Project) -> bool;
}

/// Default policy built on project relationships plus capability strings.
#[derive(Debug, Clone, Default)]
pub struct CapabilityPolicy;

impl CapabilityPolicy {
    pub fn shared() -> Arc<dyn AccessPolicy> {
        Arc::new(CapabilityPolicy)
    }
}

impl AccessPolicy for CapabilityPolicy {
    fn can_instantiate(&self, actor: &Actor, project: &Project) -> bool {
        if actor.has_capability(capabilities::WORKFLOWS_MANAGE) {
            return true;
        }
        actor.has_capability(capabilities::WORKFLOWS_CREATE) && project.is_member(&actor.user_id)
    }

    fn can_transition(
        &self,
        actor: &Actor,
        project: &Project,
        instance: &WorkflowInstance,
    ) -> bool {
        instance.assigned_to.as_deref() == Some(actor.user_id.as_str())
            || project.is_staff(&actor.user_id)
            || actor.has_capability(capabilities::WORKFLOWS_MANAGE)
    }

    fn can_assign(&self, actor: &Actor, _project: &Project) -> bool {
        actor.has_capability(capabilities::PROJECTS_MANAGE)
    }

    fn can_view(&self, actor: &Actor, project: &Project) -> bool {
        project.is_member(&actor.user_id)
            || actor.has_capability(capabilities::PROJECTS_VIEW)
            || actor.has_capability(capabilities::WORKFLOWS_MANAGE)
    }

    fn can_correct_timestamps(&self, actor: &Actor, _project: &Project) -> bool {
        actor.has_capability(capabilities::WORKFLOWS_MANAGE)
    }
}
