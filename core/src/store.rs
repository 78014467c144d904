//! Persistence for projects, stage workflows, tasks and their collaborators.
//!
//! [`WorkflowStore`] is the seam every component talks to; [`SqliteWorkflowStore`]
//! implements it on sqlx/SQLite with:
//! - one `workflow_instantiations` row per project (primary key on `project_id`),
//!   so duplicate instantiation surfaces as a unique-constraint conflict
//! - transactional multi-row writes
//! - compare-and-set stage updates keyed on the previously read status
//! - dependency edits validated against the project's graph inside the same
//!   transaction that writes them, after taking the write lock

use crate::catalog::TemplateSet;
use crate::errors::{StoreError, StoreResult};
use crate::graph::DependencyGraph;
use crate::state_machine::WorkflowStatus;
use crate::types::{
    AuditEntry, ChangeOrder, ChangeOrderStatus, DependencyType, Milestone, MilestoneStatus,
    Project, ProjectTask, TaskPriority, TaskStatus, WorkflowDependency, WorkflowInstance,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tracing::debug;

/// A project's freshly instantiated stage set, written atomically.
#[derive(Debug, Clone)]
pub struct NewWorkflowSet<'a> {
    pub project_id: &'a str,
    pub template_version: &'a str,
    pub created_by: &'a str,
    pub instances: &'a [WorkflowInstance],
    pub dependencies: &'a [WorkflowDependency],
    pub audit: &'a AuditEntry,
}

/// Stage completion counts for one project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageCounts {
    pub completed: u64,
    pub total: u64,
}

/// Persistence layer used by the workflow components.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Create the schema if it does not exist.
    async fn initialize(&self) -> StoreResult<()>;

    /// Mirror a template set into `workflow_template_stages`.
    async fn sync_templates(&self, set: &TemplateSet) -> StoreResult<()>;

    async fn create_project(&self, project: &Project) -> StoreResult<()>;

    async fn get_project(&self, project_id: &str) -> StoreResult<Option<Project>>;

    /// Persist the cached progress percentage of a project.
    async fn set_progress(&self, project_id: &str, percentage: u8) -> StoreResult<()>;

    /// Insert the instantiation marker, all stages and their dependencies in
    /// one transaction. Fails with `UniqueViolation` if the project already
    /// has a stage set.
    async fn create_workflow_set(&self, set: NewWorkflowSet<'_>) -> StoreResult<()>;

    /// Template version the project's stage set was created from.
    async fn workflow_template_version(&self, project_id: &str) -> StoreResult<Option<String>>;

    /// Stages of a project ordered by `sort_order`.
    async fn list_workflows(&self, project_id: &str) -> StoreResult<Vec<WorkflowInstance>>;

    async fn get_workflow(&self, workflow_id: &str) -> StoreResult<Option<WorkflowInstance>>;

    /// Write a stage if its stored status still equals `expected_status`,
    /// together with its audit entry. Fails with `Conflict` otherwise.
    async fn update_workflow(
        &self,
        instance: &WorkflowInstance,
        expected_status: WorkflowStatus,
        audit: &AuditEntry,
    ) -> StoreResult<()>;

    /// Stages assigned to a user, newest update first, with the total count.
    async fn list_assigned(
        &self,
        user_id: &str,
        status: Option<WorkflowStatus>,
        limit: u32,
        offset: u32,
    ) -> StoreResult<(Vec<WorkflowInstance>, u64)>;

    async fn count_stages(&self, project_id: &str) -> StoreResult<StageCounts>;

    async fn list_workflow_dependencies(
        &self,
        project_id: &str,
    ) -> StoreResult<Vec<WorkflowDependency>>;

    /// Add one stage edge and its audit entry. Fails with `Cycle` if the
    /// edge closes a cycle and `InvalidReference` if the prerequisite belongs
    /// to another project.
    async fn add_workflow_dependency(
        &self,
        dependency: &WorkflowDependency,
        audit: &AuditEntry,
    ) -> StoreResult<()>;

    /// Insert a task with its dependency list and audit entry. Dependencies
    /// must name tasks of the same project and keep the task graph acyclic.
    async fn create_task(&self, task: &ProjectTask, audit: &AuditEntry) -> StoreResult<()>;

    async fn get_task(&self, task_id: &str) -> StoreResult<Option<ProjectTask>>;

    async fn list_tasks(&self, project_id: &str) -> StoreResult<Vec<ProjectTask>>;

    /// Replace the dependency list of a task, validated like [`create_task`].
    ///
    /// [`create_task`]: WorkflowStore::create_task
    async fn replace_task_dependencies(
        &self,
        task_id: &str,
        dependencies: &[String],
        audit: &AuditEntry,
    ) -> StoreResult<()>;

    async fn create_milestone(&self, milestone: &Milestone) -> StoreResult<()>;

    async fn list_milestones(&self, project_id: &str) -> StoreResult<Vec<Milestone>>;

    async fn create_change_order(&self, change_order: &ChangeOrder) -> StoreResult<()>;

    async fn list_change_orders(&self, project_id: &str) -> StoreResult<Vec<ChangeOrder>>;

    async fn record_audit(&self, entry: &AuditEntry) -> StoreResult<()>;

    /// Audit entries for one entity, oldest first.
    async fn list_audit(&self, entity_id: &str) -> StoreResult<Vec<AuditEntry>>;
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        client_id TEXT NOT NULL,
        designer_id TEXT,
        manager_id TEXT,
        status TEXT NOT NULL,
        progress_percentage INTEGER NOT NULL DEFAULT 0
            CHECK (progress_percentage BETWEEN 0 AND 100),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workflow_template_stages (
        template_version TEXT NOT NULL,
        stage_key TEXT NOT NULL,
        stage_name TEXT NOT NULL,
        sort_order INTEGER NOT NULL,
        typical_duration_days INTEGER NOT NULL,
        required_role TEXT,
        depends_on TEXT,
        checklist TEXT NOT NULL DEFAULT '[]',
        PRIMARY KEY (template_version, stage_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workflow_instantiations (
        project_id TEXT PRIMARY KEY REFERENCES projects(id),
        template_version TEXT NOT NULL,
        created_by TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS project_workflows (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES workflow_instantiations(project_id),
        stage_key TEXT NOT NULL,
        stage_name TEXT NOT NULL,
        status TEXT NOT NULL,
        assigned_to TEXT,
        started_at TEXT,
        completed_at TEXT,
        notes TEXT,
        sort_order INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (project_id, sort_order)
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS idx_workflows_assigned ON project_workflows(assigned_to, status)"#,
    r#"
    CREATE TABLE IF NOT EXISTS workflow_dependencies (
        workflow_id TEXT NOT NULL REFERENCES project_workflows(id),
        depends_on_workflow_id TEXT NOT NULL REFERENCES project_workflows(id),
        dependency_type TEXT NOT NULL,
        lag_days INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (workflow_id, depends_on_workflow_id),
        CHECK (workflow_id <> depends_on_workflow_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS project_tasks (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id),
        title TEXT NOT NULL,
        assigned_to TEXT,
        status TEXT NOT NULL,
        priority TEXT NOT NULL,
        due_date TEXT,
        estimated_hours REAL,
        actual_hours REAL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS idx_tasks_project ON project_tasks(project_id)"#,
    r#"
    CREATE TABLE IF NOT EXISTS task_dependencies (
        task_id TEXT NOT NULL REFERENCES project_tasks(id),
        depends_on_task_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (task_id, depends_on_task_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS milestones (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id),
        title TEXT NOT NULL,
        due_date TEXT,
        status TEXT NOT NULL,
        completed_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS change_orders (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id),
        title TEXT NOT NULL,
        description TEXT,
        cost_impact REAL NOT NULL DEFAULT 0,
        time_impact_days INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_log (
        id TEXT PRIMARY KEY,
        actor_id TEXT NOT NULL,
        action TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        details TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_log(entity_id, created_at)"#,
];

const WORKFLOW_COLUMNS: &str = "id, project_id, stage_key, stage_name, status, assigned_to, \
     started_at, completed_at, notes, sort_order, created_at, updated_at";

/// SQLite-backed implementation of [`WorkflowStore`]
pub struct SqliteWorkflowStore {
    pool: SqlitePool,
}

impl SqliteWorkflowStore {
    /// Connect to `database_url` and create the schema.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await?;

        let store = SqliteWorkflowStore { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Private in-memory database on a single long-lived connection.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = SqliteWorkflowStore { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Wrap an existing pool. Call [`WorkflowStore::initialize`] before use.
    pub fn from_pool(pool: SqlitePool) -> Self {
        SqliteWorkflowStore { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn opt_ts(value: &Option<DateTime<Utc>>) -> Option<String> {
    value.as_ref().map(ts)
}

fn parse_ts(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("invalid timestamp {}: {}", value, e)))
}

fn parse_opt_ts(value: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

fn parse_enum<T: FromStr<Err = String>>(value: &str) -> StoreResult<T> {
    value.parse().map_err(StoreError::Serialization)
}

#[derive(FromRow)]
struct ProjectRow {
    id: String,
    title: String,
    client_id: String,
    designer_id: Option<String>,
    manager_id: Option<String>,
    status: String,
    progress_percentage: i64,
    created_at: String,
    updated_at: String,
}

impl ProjectRow {
    fn into_project(self) -> StoreResult<Project> {
        Ok(Project {
            id: self.id,
            title: self.title,
            client_id: self.client_id,
            designer_id: self.designer_id,
            manager_id: self.manager_id,
            status: self.status,
            progress_percentage: self.progress_percentage.clamp(0, 100) as u8,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    project_id: String,
    stage_key: String,
    stage_name: String,
    status: String,
    assigned_to: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    notes: Option<String>,
    sort_order: i64,
    created_at: String,
    updated_at: String,
}

impl WorkflowRow {
    fn into_instance(self) -> StoreResult<WorkflowInstance> {
        Ok(WorkflowInstance {
            id: self.id,
            project_id: self.project_id,
            stage_key: self.stage_key,
            stage_name: self.stage_name,
            status: parse_enum(&self.status)?,
            assigned_to: self.assigned_to,
            started_at: parse_opt_ts(self.started_at)?,
            completed_at: parse_opt_ts(self.completed_at)?,
            notes: self.notes,
            sort_order: self.sort_order as u32,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

#[derive(FromRow)]
struct DependencyRow {
    workflow_id: String,
    depends_on_workflow_id: String,
    dependency_type: String,
    lag_days: i64,
}

impl DependencyRow {
    fn into_dependency(self) -> StoreResult<WorkflowDependency> {
        Ok(WorkflowDependency {
            workflow_id: self.workflow_id,
            depends_on_workflow_id: self.depends_on_workflow_id,
            dependency_type: parse_enum::<DependencyType>(&self.dependency_type)?,
            lag_days: self.lag_days as i32,
        })
    }
}

#[derive(FromRow)]
struct TaskRow {
    id: String,
    project_id: String,
    title: String,
    assigned_to: Option<String>,
    status: String,
    priority: String,
    due_date: Option<String>,
    estimated_hours: Option<f64>,
    actual_hours: Option<f64>,
}

impl TaskRow {
    fn into_task(self, dependencies: Vec<String>) -> StoreResult<ProjectTask> {
        Ok(ProjectTask {
            id: self.id,
            project_id: self.project_id,
            title: self.title,
            assigned_to: self.assigned_to,
            status: parse_enum::<TaskStatus>(&self.status)?,
            priority: parse_enum::<TaskPriority>(&self.priority)?,
            due_date: parse_opt_ts(self.due_date)?,
            estimated_hours: self.estimated_hours,
            actual_hours: self.actual_hours,
            dependencies,
        })
    }
}

#[derive(FromRow)]
struct MilestoneRow {
    id: String,
    project_id: String,
    title: String,
    due_date: Option<String>,
    status: String,
    completed_at: Option<String>,
}

#[derive(FromRow)]
struct ChangeOrderRow {
    id: String,
    project_id: String,
    title: String,
    description: Option<String>,
    cost_impact: f64,
    time_impact_days: i64,
    status: String,
    created_at: String,
}

#[derive(FromRow)]
struct AuditRow {
    id: String,
    actor_id: String,
    action: String,
    entity_type: String,
    entity_id: String,
    details: String,
    created_at: String,
}

async fn insert_audit<'e, E>(executor: E, entry: &AuditEntry) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO audit_log (id, actor_id, action, entity_type, entity_id, details, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.actor_id)
    .bind(&entry.action)
    .bind(&entry.entity_type)
    .bind(&entry.entity_id)
    .bind(serde_json::to_string(&entry.details)?)
    .bind(ts(&entry.created_at))
    .execute(executor)
    .await?;
    Ok(())
}

/// Drop repeated ids, keeping first occurrences in order.
pub(crate) fn dedup_ids(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter().filter(|id| seen.insert(id.as_str())).cloned().collect()
}

/// First statement of every structural edit. The no-op write takes the
/// database write lock before anything is read, so concurrent edits of the
/// same graph run one after another.
async fn lock_project(conn: &mut SqliteConnection, project_id: &str) -> StoreResult<()> {
    let result = sqlx::query("UPDATE projects SET updated_at = updated_at WHERE id = ?")
        .bind(project_id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("project {}", project_id)));
    }
    Ok(())
}

/// Lock the project owning the `what` row `entity_id` of `table` and return its id.
async fn lock_owning_project(
    conn: &mut SqliteConnection,
    table: &'static str,
    what: &str,
    entity_id: &str,
) -> StoreResult<String> {
    let result = sqlx::query(&format!(
        "UPDATE projects SET updated_at = updated_at \
         WHERE id = (SELECT project_id FROM {} WHERE id = ?)",
        table
    ))
    .bind(entity_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("{} {}", what, entity_id)));
    }

    let (project_id,): (String,) =
        sqlx::query_as(&format!("SELECT project_id FROM {} WHERE id = ?", table))
            .bind(entity_id)
            .fetch_one(&mut *conn)
            .await?;
    Ok(project_id)
}

async fn load_workflow_graph(
    conn: &mut SqliteConnection,
    project_id: &str,
) -> StoreResult<DependencyGraph> {
    let stages: Vec<(String,)> =
        sqlx::query_as("SELECT id FROM project_workflows WHERE project_id = ? ORDER BY sort_order")
            .bind(project_id)
            .fetch_all(&mut *conn)
            .await?;

    let edges: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT d.workflow_id, d.depends_on_workflow_id
        FROM workflow_dependencies d
        JOIN project_workflows w ON w.id = d.workflow_id
        WHERE w.project_id = ?
        "#,
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut graph = DependencyGraph::new();
    for (id,) in &stages {
        graph.add_node(id)?;
    }
    for (node, prerequisite) in &edges {
        graph.add_dependency(node, prerequisite)?;
    }
    Ok(graph)
}

/// Task ids of a project in creation order, each with its dependency list.
async fn load_task_edges(
    conn: &mut SqliteConnection,
    project_id: &str,
) -> StoreResult<Vec<(String, Vec<String>)>> {
    let ids: Vec<(String,)> =
        sqlx::query_as("SELECT id FROM project_tasks WHERE project_id = ? ORDER BY rowid")
            .bind(project_id)
            .fetch_all(&mut *conn)
            .await?;

    let edges: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT d.task_id, d.depends_on_task_id
        FROM task_dependencies d
        JOIN project_tasks t ON t.id = d.task_id
        WHERE t.project_id = ?
        ORDER BY d.task_id, d.position
        "#,
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut deps: HashMap<String, Vec<String>> = HashMap::new();
    for (task_id, dep) in edges {
        deps.entry(task_id).or_default().push(dep);
    }

    Ok(ids
        .into_iter()
        .map(|(id,)| {
            let task_deps = deps.remove(&id).unwrap_or_default();
            (id, task_deps)
        })
        .collect())
}

/// Reject edges of `task_id` that leave the project, and any cycle.
fn check_task_graph(
    project_id: &str,
    task_id: &str,
    tasks: &[(String, Vec<String>)],
) -> StoreResult<()> {
    let (graph, dangling) = DependencyGraph::from_edges(
        tasks
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.as_slice())),
    )?;

    if let Some((_, missing)) = dangling.iter().find(|(id, _)| id == task_id) {
        return Err(StoreError::InvalidReference(format!(
            "task {} is not part of project {}",
            missing, project_id
        )));
    }
    graph.validate()?;
    Ok(())
}

async fn insert_task_dependencies(
    conn: &mut SqliteConnection,
    task_id: &str,
    dependencies: &[String],
) -> StoreResult<()> {
    for (position, dep) in dependencies.iter().enumerate() {
        sqlx::query(
            "INSERT INTO task_dependencies (task_id, depends_on_task_id, position) \
             VALUES (?, ?, ?)",
        )
        .bind(task_id)
        .bind(dep)
        .bind(position as i64)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl WorkflowStore for SqliteWorkflowStore {
    async fn initialize(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("workflow schema initialized");
        Ok(())
    }

    async fn sync_templates(&self, set: &TemplateSet) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM workflow_template_stages WHERE template_version = ?")
            .bind(&set.version)
            .execute(&mut *tx)
            .await?;

        for stage in &set.stages {
            sqlx::query(
                r#"
                INSERT INTO workflow_template_stages
                (template_version, stage_key, stage_name, sort_order, typical_duration_days,
                 required_role, depends_on, checklist)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&set.version)
            .bind(&stage.key)
            .bind(&stage.stage_name)
            .bind(stage.sort_order as i64)
            .bind(stage.typical_duration_days as i64)
            .bind(stage.required_role.map(|r| r.as_str()))
            .bind(&stage.depends_on)
            .bind(serde_json::to_string(&stage.checklist)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(version = %set.version, stages = set.stages.len(), "templates synced");
        Ok(())
    }

    async fn create_project(&self, project: &Project) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, title, client_id, designer_id, manager_id, status,
                                  progress_percentage, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&project.id)
        .bind(&project.title)
        .bind(&project.client_id)
        .bind(&project.designer_id)
        .bind(&project.manager_id)
        .bind(&project.status)
        .bind(project.progress_percentage as i64)
        .bind(ts(&project.created_at))
        .bind(ts(&project.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_project(&self, project_id: &str) -> StoreResult<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, title, client_id, designer_id, manager_id, status, progress_percentage, \
             created_at, updated_at FROM projects WHERE id = ?",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProjectRow::into_project).transpose()
    }

    async fn set_progress(&self, project_id: &str, percentage: u8) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE projects SET progress_percentage = ?, updated_at = ? WHERE id = ?",
        )
        .bind(percentage.min(100) as i64)
        .bind(ts(&Utc::now()))
        .bind(project_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("project {}", project_id)));
        }
        Ok(())
    }

    async fn create_workflow_set(&self, set: NewWorkflowSet<'_>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        // The primary key on project_id is the duplicate-instantiation guard.
        sqlx::query(
            r#"
            INSERT INTO workflow_instantiations (project_id, template_version, created_by, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(set.project_id)
        .bind(set.template_version)
        .bind(set.created_by)
        .bind(ts(&Utc::now()))
        .execute(&mut *tx)
        .await?;

        for instance in set.instances {
            sqlx::query(&format!(
                "INSERT INTO project_workflows ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                WORKFLOW_COLUMNS
            ))
            .bind(&instance.id)
            .bind(&instance.project_id)
            .bind(&instance.stage_key)
            .bind(&instance.stage_name)
            .bind(instance.status.as_str())
            .bind(&instance.assigned_to)
            .bind(opt_ts(&instance.started_at))
            .bind(opt_ts(&instance.completed_at))
            .bind(&instance.notes)
            .bind(instance.sort_order as i64)
            .bind(ts(&instance.created_at))
            .bind(ts(&instance.updated_at))
            .execute(&mut *tx)
            .await?;
        }

        for dependency in set.dependencies {
            sqlx::query(
                r#"
                INSERT INTO workflow_dependencies
                (workflow_id, depends_on_workflow_id, dependency_type, lag_days)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&dependency.workflow_id)
            .bind(&dependency.depends_on_workflow_id)
            .bind(dependency.dependency_type.as_str())
            .bind(dependency.lag_days as i64)
            .execute(&mut *tx)
            .await?;
        }

        insert_audit(&mut *tx, set.audit).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn workflow_template_version(&self, project_id: &str) -> StoreResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT template_version FROM workflow_instantiations WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(version,)| version))
    }

    async fn list_workflows(&self, project_id: &str) -> StoreResult<Vec<WorkflowInstance>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM project_workflows WHERE project_id = ? ORDER BY sort_order",
            WORKFLOW_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WorkflowRow::into_instance).collect()
    }

    async fn get_workflow(&self, workflow_id: &str) -> StoreResult<Option<WorkflowInstance>> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM project_workflows WHERE id = ?",
            WORKFLOW_COLUMNS
        ))
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WorkflowRow::into_instance).transpose()
    }

    async fn update_workflow(
        &self,
        instance: &WorkflowInstance,
        expected_status: WorkflowStatus,
        audit: &AuditEntry,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE project_workflows
            SET status = ?, assigned_to = ?, started_at = ?, completed_at = ?, notes = ?,
                updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(instance.status.as_str())
        .bind(&instance.assigned_to)
        .bind(opt_ts(&instance.started_at))
        .bind(opt_ts(&instance.completed_at))
        .bind(&instance.notes)
        .bind(ts(&instance.updated_at))
        .bind(&instance.id)
        .bind(expected_status.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<(String,)> =
                sqlx::query_as("SELECT id FROM project_workflows WHERE id = ?")
                    .bind(&instance.id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Err(match exists {
                Some(_) => StoreError::Conflict(format!(
                    "workflow {} changed since it was read",
                    instance.id
                )),
                None => StoreError::NotFound(format!("workflow {}", instance.id)),
            });
        }

        insert_audit(&mut *tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_assigned(
        &self,
        user_id: &str,
        status: Option<WorkflowStatus>,
        limit: u32,
        offset: u32,
    ) -> StoreResult<(Vec<WorkflowInstance>, u64)> {
        let status = status.map(|s| s.as_str());

        let (total,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM project_workflows \
             WHERE assigned_to = ? AND (? IS NULL OR status = ?)",
        )
        .bind(user_id)
        .bind(status)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM project_workflows \
             WHERE assigned_to = ? AND (? IS NULL OR status = ?) \
             ORDER BY updated_at DESC, sort_order LIMIT ? OFFSET ?",
            WORKFLOW_COLUMNS
        ))
        .bind(user_id)
        .bind(status)
        .bind(status)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(WorkflowRow::into_instance)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((items, total.max(0) as u64))
    }

    async fn count_stages(&self, project_id: &str) -> StoreResult<StageCounts> {
        let (completed, total): (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0), COUNT(*) \
             FROM project_workflows WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(StageCounts {
            completed: completed.max(0) as u64,
            total: total.max(0) as u64,
        })
    }

    async fn list_workflow_dependencies(
        &self,
        project_id: &str,
    ) -> StoreResult<Vec<WorkflowDependency>> {
        let rows = sqlx::query_as::<_, DependencyRow>(
            r#"
            SELECT d.workflow_id, d.depends_on_workflow_id, d.dependency_type, d.lag_days
            FROM workflow_dependencies d
            JOIN project_workflows w ON w.id = d.workflow_id
            WHERE w.project_id = ?
            ORDER BY w.sort_order, d.rowid
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DependencyRow::into_dependency).collect()
    }

    async fn add_workflow_dependency(
        &self,
        dependency: &WorkflowDependency,
        audit: &AuditEntry,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let project_id = lock_owning_project(
            &mut *tx,
            "project_workflows",
            "workflow",
            &dependency.workflow_id,
        )
        .await?;
        let graph = load_workflow_graph(&mut *tx, &project_id).await?;

        let prerequisite = dependency.depends_on_workflow_id.as_str();
        if !graph.contains(prerequisite) {
            return Err(StoreError::InvalidReference(format!(
                "workflow {} is not part of project {}",
                prerequisite, project_id
            )));
        }
        if graph.would_create_cycle(&dependency.workflow_id, prerequisite) {
            return Err(StoreError::Cycle(format!(
                "{} -> {}",
                dependency.workflow_id, prerequisite
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO workflow_dependencies
            (workflow_id, depends_on_workflow_id, dependency_type, lag_days)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&dependency.workflow_id)
        .bind(&dependency.depends_on_workflow_id)
        .bind(dependency.dependency_type.as_str())
        .bind(dependency.lag_days as i64)
        .execute(&mut *tx)
        .await?;

        insert_audit(&mut *tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_task(&self, task: &ProjectTask, audit: &AuditEntry) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        lock_project(&mut *tx, &task.project_id).await?;
        let mut tasks = load_task_edges(&mut *tx, &task.project_id).await?;
        if tasks.iter().any(|(id, _)| *id == task.id) {
            return Err(StoreError::UniqueViolation(format!("task {}", task.id)));
        }

        let dependencies = dedup_ids(&task.dependencies);
        tasks.push((task.id.clone(), dependencies.clone()));
        check_task_graph(&task.project_id, &task.id, &tasks)?;

        sqlx::query(
            r#"
            INSERT INTO project_tasks (id, project_id, title, assigned_to, status, priority,
                                       due_date, estimated_hours, actual_hours)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.project_id)
        .bind(&task.title)
        .bind(&task.assigned_to)
        .bind(task.status.as_str())
        .bind(task.priority.as_str())
        .bind(opt_ts(&task.due_date))
        .bind(task.estimated_hours)
        .bind(task.actual_hours)
        .execute(&mut *tx)
        .await?;

        insert_task_dependencies(&mut *tx, &task.id, &dependencies).await?;
        insert_audit(&mut *tx, audit).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> StoreResult<Option<ProjectTask>> {
        let row = sqlx::query_as::<_, TaskRow>(
            "SELECT id, project_id, title, assigned_to, status, priority, due_date, \
             estimated_hours, actual_hours FROM project_tasks WHERE id = ?",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let deps: Vec<(String,)> = sqlx::query_as(
            "SELECT depends_on_task_id FROM task_dependencies WHERE task_id = ? ORDER BY position",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        row.into_task(deps.into_iter().map(|(d,)| d).collect())
            .map(Some)
    }

    async fn list_tasks(&self, project_id: &str) -> StoreResult<Vec<ProjectTask>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT id, project_id, title, assigned_to, status, priority, due_date, \
             estimated_hours, actual_hours FROM project_tasks WHERE project_id = ? ORDER BY rowid",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let edges: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT d.task_id, d.depends_on_task_id
            FROM task_dependencies d
            JOIN project_tasks t ON t.id = d.task_id
            WHERE t.project_id = ?
            ORDER BY d.task_id, d.position
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let mut deps: HashMap<String, Vec<String>> = HashMap::new();
        for (task_id, dep) in edges {
            deps.entry(task_id).or_default().push(dep);
        }

        rows.into_iter()
            .map(|row| {
                let task_deps = deps.remove(&row.id).unwrap_or_default();
                row.into_task(task_deps)
            })
            .collect()
    }

    async fn replace_task_dependencies(
        &self,
        task_id: &str,
        dependencies: &[String],
        audit: &AuditEntry,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let project_id = lock_owning_project(&mut *tx, "project_tasks", "task", task_id).await?;
        let mut tasks = load_task_edges(&mut *tx, &project_id).await?;

        let dependencies = dedup_ids(dependencies);
        for (_, deps) in tasks.iter_mut().filter(|(id, _)| id == task_id) {
            *deps = dependencies.clone();
        }
        check_task_graph(&project_id, task_id, &tasks)?;

        sqlx::query("DELETE FROM task_dependencies WHERE task_id = ?")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
        insert_task_dependencies(&mut *tx, task_id, &dependencies).await?;
        insert_audit(&mut *tx, audit).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn create_milestone(&self, milestone: &Milestone) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO milestones (id, project_id, title, due_date, status, completed_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&milestone.id)
        .bind(&milestone.project_id)
        .bind(&milestone.title)
        .bind(opt_ts(&milestone.due_date))
        .bind(milestone.status.as_str())
        .bind(opt_ts(&milestone.completed_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_milestones(&self, project_id: &str) -> StoreResult<Vec<Milestone>> {
        let rows = sqlx::query_as::<_, MilestoneRow>(
            "SELECT id, project_id, title, due_date, status, completed_at FROM milestones \
             WHERE project_id = ? ORDER BY due_date IS NULL, due_date, rowid",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Milestone {
                    id: row.id,
                    project_id: row.project_id,
                    title: row.title,
                    due_date: parse_opt_ts(row.due_date)?,
                    status: parse_enum::<MilestoneStatus>(&row.status)?,
                    completed_at: parse_opt_ts(row.completed_at)?,
                })
            })
            .collect()
    }

    async fn create_change_order(&self, change_order: &ChangeOrder) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO change_orders (id, project_id, title, description, cost_impact,
                                       time_impact_days, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&change_order.id)
        .bind(&change_order.project_id)
        .bind(&change_order.title)
        .bind(&change_order.description)
        .bind(change_order.cost_impact)
        .bind(change_order.time_impact_days)
        .bind(change_order.status.as_str())
        .bind(ts(&change_order.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_change_orders(&self, project_id: &str) -> StoreResult<Vec<ChangeOrder>> {
        let rows = sqlx::query_as::<_, ChangeOrderRow>(
            "SELECT id, project_id, title, description, cost_impact, time_impact_days, status, \
             created_at FROM change_orders WHERE project_id = ? ORDER BY created_at, rowid",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ChangeOrder {
                    id: row.id,
                    project_id: row.project_id,
                    title: row.title,
                    description: row.description,
                    cost_impact: row.cost_impact,
                    time_impact_days: row.time_impact_days,
                    status: parse_enum::<ChangeOrderStatus>(&row.status)?,
                    created_at: parse_ts(&row.created_at)?,
                })
            })
            .collect()
    }

    async fn record_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        insert_audit(&self.pool, entry).await
    }

    async fn list_audit(&self, entity_id: &str) -> StoreResult<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT id, actor_id, action, entity_type, entity_id, details, created_at \
             FROM audit_log WHERE entity_id = ? ORDER BY created_at, rowid",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(AuditEntry {
                    id: row.id,
                    actor_id: row.actor_id,
                    action: row.action,
                    entity_type: row.entity_type,
                    entity_id: row.entity_id,
                    details: serde_json::from_str(&row.details)?,
                    created_at: parse_ts(&row.created_at)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store_with_project() -> (SqliteWorkflowStore, Project) {
        let store = SqliteWorkflowStore::in_memory().await.unwrap();
        let project = Project::new("Penthouse", "client-1").with_designer("designer-1");
        store.create_project(&project).await.unwrap();
        (store, project)
    }

    fn instance(project_id: &str, key: &str, order: u32) -> WorkflowInstance {
        let now = Utc::now();
        WorkflowInstance {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            stage_key: key.to_string(),
            stage_name: key.to_uppercase(),
            status: WorkflowStatus::Pending,
            assigned_to: Some("designer-1".to_string()),
            started_at: None,
            completed_at: None,
            notes: None,
            sort_order: order,
            created_at: now,
            updated_at: now,
        }
    }

    fn audit(entity: &str) -> AuditEntry {
        AuditEntry::new("tester", "test", "workflow", entity, json!({}))
    }

    #[tokio::test]
    async fn test_create_and_get_project() {
        let (store, project) = store_with_project().await;
        let loaded = store.get_project(&project.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Penthouse");
        assert_eq!(loaded.designer_id.as_deref(), Some("designer-1"));
        assert!(store.get_project("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_workflow_set_is_unique_violation() {
        let (store, project) = store_with_project().await;
        let first = vec![instance(&project.id, "a", 1)];
        let marker = audit(&project.id);
        let set = NewWorkflowSet {
            project_id: &project.id,
            template_version: "v1",
            created_by: "tester",
            instances: &first,
            dependencies: &[],
            audit: &marker,
        };
        store.create_workflow_set(set.clone()).await.unwrap();

        let second = vec![instance(&project.id, "b", 1)];
        let marker = audit(&project.id);
        let result = store
            .create_workflow_set(NewWorkflowSet {
                instances: &second,
                audit: &marker,
                ..set
            })
            .await;
        assert!(matches!(result, Err(StoreError::UniqueViolation(_))));
        assert_eq!(store.list_workflows(&project.id).await.unwrap().len(), 1);
        assert_eq!(
            store.workflow_template_version(&project.id).await.unwrap().as_deref(),
            Some("v1")
        );
    }

    #[tokio::test]
    async fn test_update_workflow_compare_and_set() {
        let (store, project) = store_with_project().await;
        let stages = vec![instance(&project.id, "a", 1)];
        let marker = audit(&project.id);
        store
            .create_workflow_set(NewWorkflowSet {
                project_id: &project.id,
                template_version: "v1",
                created_by: "tester",
                instances: &stages,
                dependencies: &[],
                audit: &marker,
            })
            .await
            .unwrap();

        let mut updated = stages[0].clone();
        updated.status = WorkflowStatus::InProgress;
        updated.started_at = Some(Utc::now());
        store
            .update_workflow(&updated, WorkflowStatus::Pending, &audit(&updated.id))
            .await
            .unwrap();

        // A second writer that read the old status loses
        let stale = store
            .update_workflow(&updated, WorkflowStatus::Pending, &audit(&updated.id))
            .await;
        assert!(matches!(stale, Err(StoreError::Conflict(_))));

        let loaded = store.get_workflow(&updated.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::InProgress);
        assert!(loaded.started_at.is_some());
        assert_eq!(store.list_audit(&updated.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_task_dependencies_round_trip() {
        let (store, project) = store_with_project().await;
        let a = ProjectTask::new(&project.id, "Order tiles");
        let b = ProjectTask::new(&project.id, "Lay tiles")
            .with_dependency(a.id.clone())
            .with_estimated_hours(16.0);
        store.create_task(&a, &audit(&a.id)).await.unwrap();
        store.create_task(&b, &audit(&b.id)).await.unwrap();

        let tasks = store.list_tasks(&project.id).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].dependencies, vec![a.id.clone()]);

        store
            .replace_task_dependencies(&b.id, &[], &audit(&b.id))
            .await
            .unwrap();
        let loaded = store.get_task(&b.id).await.unwrap().unwrap();
        assert!(loaded.dependencies.is_empty());
        assert_eq!(loaded.estimated_hours, Some(16.0));
        assert_eq!(store.list_audit(&b.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_task_writes_check_the_stored_graph() {
        let (store, project) = store_with_project().await;
        let a = ProjectTask::new(&project.id, "Strip wallpaper");
        let b = ProjectTask::new(&project.id, "Prime walls").with_dependency(a.id.clone());

        // a does not exist yet
        let early = store.create_task(&b, &audit(&b.id)).await;
        assert!(matches!(early, Err(StoreError::InvalidReference(_))));
        assert!(store.get_task(&b.id).await.unwrap().is_none());

        store.create_task(&a, &audit(&a.id)).await.unwrap();
        store.create_task(&b, &audit(&b.id)).await.unwrap();

        let cycle = store
            .replace_task_dependencies(&a.id, &[b.id.clone()], &audit(&a.id))
            .await;
        assert!(matches!(cycle, Err(StoreError::Cycle(_))));

        let mut selfish = ProjectTask::new(&project.id, "Sand floors");
        selfish.dependencies.push(selfish.id.clone());
        let result = store.create_task(&selfish, &audit(&selfish.id)).await;
        assert!(matches!(result, Err(StoreError::Cycle(_))));

        let missing = store
            .replace_task_dependencies("nope", &[], &audit("nope"))
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));

        // Rejected writes leave neither rows nor audit entries behind
        assert!(store.get_task(&a.id).await.unwrap().unwrap().dependencies.is_empty());
        assert_eq!(store.list_tasks(&project.id).await.unwrap().len(), 2);
        assert_eq!(store.list_audit(&a.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_set_progress_missing_project() {
        let store = SqliteWorkflowStore::in_memory().await.unwrap();
        let result = store.set_progress("nope", 50).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
