/// Integration tests for dependency management, the critical-path report and timeline analytics
use atelier_core::{
    capabilities, Actor, AtelierConfig, CapabilityPolicy, ChangeOrder, ChangeOrderStatus,
    DependencyType, ErrorKind, MemoryNotificationSink, Milestone, Project, ProjectTask,
    SqliteWorkflowStore, StageUpdate, TaskPriority, TemplateCatalog, WorkflowCoordinator,
    WorkflowStatus, WorkflowStore,
};
use chrono::{Duration, Utc};
use std::sync::Arc;

async fn setup() -> (WorkflowCoordinator, Arc<SqliteWorkflowStore>, Project) {
    let store = Arc::new(
        SqliteWorkflowStore::in_memory()
            .await
            .expect("Failed to create store"),
    );
    let project = Project::new("Lakeside villa", "client-1")
        .with_designer("designer-1")
        .with_manager("manager-1");
    store
        .create_project(&project)
        .await
        .expect("Failed to create project");

    let coordinator = WorkflowCoordinator::new(
        store.clone(),
        CapabilityPolicy::shared(),
        Arc::new(MemoryNotificationSink::new()),
        Arc::new(TemplateCatalog::default()),
        &AtelierConfig::default(),
    );
    (coordinator, store, project)
}

fn manager() -> Actor {
    Actor::new("manager-1").with_capability(capabilities::WORKFLOWS_MANAGE)
}

#[tokio::test]
async fn test_critical_path_report_from_stored_tasks() {
    let (coordinator, store, project) = setup().await;

    let urgent = ProjectTask::new(&project.id, "Approve fabric samples")
        .with_priority(TaskPriority::Urgent)
        .with_estimated_hours(8.0);
    let low = ProjectTask::new(&project.id, "Order spare handles")
        .with_priority(TaskPriority::Low)
        .with_estimated_hours(16.0)
        .with_due_date(Utc::now() + Duration::days(30));
    coordinator
        .create_task(urgent.clone(), &manager())
        .await
        .expect("Failed to create task");
    coordinator
        .create_task(low.clone(), &manager())
        .await
        .expect("Failed to create task");

    let report = coordinator
        .critical_path(&project.id, &Actor::new("client-1"))
        .await
        .expect("Failed to analyze");

    assert_eq!(report.total_duration, 24.0);
    assert_eq!(report.critical_tasks.len(), 1);
    assert_eq!(report.critical_tasks[0].task_id, urgent.id);
    assert!(report.recommendations.iter().any(|r| r.contains("urgent task(s)")));
    assert!(!report.recommendations.iter().any(|r| r.contains("overdue")));
    assert!(report.bottlenecks.is_empty());

    let err = coordinator
        .critical_path(&project.id, &Actor::new("stranger"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn test_task_dependency_cycle_rejected_at_write() {
    let (coordinator, store, project) = setup().await;

    let a = ProjectTask::new(&project.id, "Demolition");
    let b = ProjectTask::new(&project.id, "Plastering").with_dependency(a.id.clone());
    coordinator
        .create_task(a.clone(), &manager())
        .await
        .expect("Failed to create task");
    coordinator
        .create_task(b.clone(), &manager())
        .await
        .expect("Failed to create task");

    let err = coordinator
        .set_task_dependencies(&a.id, &[b.id.clone()], &manager())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = coordinator
        .set_task_dependencies(&a.id, &[a.id.clone()], &manager())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = coordinator
        .set_task_dependencies(&a.id, &["elsewhere".to_string()], &manager())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    // Unchanged after the rejected writes
    let stored = store
        .get_task(&a.id)
        .await
        .expect("Failed to load task")
        .expect("Task missing");
    assert!(stored.dependencies.is_empty());

    let c = ProjectTask::new(&project.id, "Painting");
    coordinator
        .create_task(c.clone(), &manager())
        .await
        .expect("Failed to create task");
    let updated = coordinator
        .set_task_dependencies(&c.id, &[b.id.clone(), a.id.clone(), b.id.clone()], &manager())
        .await
        .expect("Failed to set dependencies");
    assert_eq!(updated.dependencies, vec![b.id.clone(), a.id.clone()]);
}

#[tokio::test]
async fn test_task_creation_checks_dependencies() {
    let (coordinator, store, project) = setup().await;

    let a = ProjectTask::new(&project.id, "Install kitchen units");
    let b = ProjectTask::new(&project.id, "Fit worktops");

    // b has not been created yet
    let err = coordinator
        .create_task(a.clone().with_dependency(b.id.clone()), &manager())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert!(store.get_task(&a.id).await.expect("Failed to load task").is_none());

    coordinator
        .create_task(b.clone(), &manager())
        .await
        .expect("Failed to create task");
    let created = coordinator
        .create_task(a.clone().with_dependency(b.id.clone()), &manager())
        .await
        .expect("Failed to create task");
    assert_eq!(created.dependencies, vec![b.id.clone()]);

    // Closing the loop from the other side is refused
    let err = coordinator
        .set_task_dependencies(&b.id, &[a.id.clone()], &manager())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let mut looped = ProjectTask::new(&project.id, "Seal grout");
    looped.dependencies.push(looped.id.clone());
    let err = coordinator
        .create_task(looped, &manager())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = coordinator
        .create_task(ProjectTask::new(&project.id, "Hang doors"), &Actor::new("client-1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = coordinator
        .create_task(ProjectTask::new("missing", "Hang doors"), &manager())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // The stored graph is still analyzable
    let report = coordinator
        .critical_path(&project.id, &manager())
        .await
        .expect("Failed to analyze");
    assert_eq!(store.list_tasks(&project.id).await.expect("Failed to list").len(), 2);
    assert!(report.bottlenecks.is_empty());

    let audit = store.list_audit(&a.id).await.expect("Failed to read audit");
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, "task.created");
}

#[tokio::test]
async fn test_workflow_dependency_cycle_rejected_at_write() {
    let (coordinator, store, project) = setup().await;
    let stages = coordinator
        .instantiate(&project.id, &manager())
        .await
        .expect("Failed to instantiate");

    // design already follows consultation
    let err = coordinator
        .add_workflow_dependency(
            &stages[0].id,
            &stages[1].id,
            DependencyType::FinishToStart,
            0,
            &manager(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = coordinator
        .add_workflow_dependency(
            &stages[2].id,
            &stages[2].id,
            DependencyType::FinishToStart,
            0,
            &manager(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let added = coordinator
        .add_workflow_dependency(
            &stages[4].id,
            &stages[1].id,
            DependencyType::StartToStart,
            2,
            &manager(),
        )
        .await
        .expect("Failed to add dependency");
    assert_eq!(added.lag_days, 2);

    let err = coordinator
        .add_workflow_dependency(
            &stages[4].id,
            &stages[1].id,
            DependencyType::StartToStart,
            2,
            &manager(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let deps = store
        .list_workflow_dependencies(&project.id)
        .await
        .expect("Failed to list dependencies");
    assert_eq!(deps.len(), 5);
}

#[tokio::test]
async fn test_timeline_analytics_and_report() {
    let (coordinator, store, project) = setup().await;
    let stages = coordinator
        .instantiate(&project.id, &manager())
        .await
        .expect("Failed to instantiate");

    coordinator
        .transition(&stages[0].id, WorkflowStatus::InProgress, &manager(), StageUpdate::default())
        .await
        .expect("Failed to start");
    coordinator
        .transition(&stages[0].id, WorkflowStatus::Completed, &manager(), StageUpdate::default())
        .await
        .expect("Failed to complete");

    let mut milestone = Milestone::new(&project.id, "Design presentation");
    milestone.due_date = Some(Utc::now() + Duration::days(10));
    store
        .create_milestone(&milestone)
        .await
        .expect("Failed to create milestone");

    let mut change = ChangeOrder::new(&project.id, "Add walk-in closet");
    change.status = ChangeOrderStatus::Approved;
    change.time_impact_days = 4;
    change.cost_impact = 2500.0;
    store
        .create_change_order(&change)
        .await
        .expect("Failed to create change order");

    let view = coordinator
        .timeline_analytics(&project.id, &Actor::new("client-1"))
        .await
        .expect("Failed to compute analytics");

    assert_eq!(view.analytics.stage_counts["completed"], 1);
    assert_eq!(view.analytics.stage_counts["pending"], 4);
    assert_eq!(view.analytics.milestones_total, 1);
    assert_eq!(view.analytics.approved_change_order_days, 4);
    let projected = view
        .analytics
        .projected_completion
        .expect("No projection");
    // 14 + 10 + 30 + 2 remaining days plus 4 approved
    let expected = Utc::now() + Duration::days(60);
    assert!((projected - expected).num_seconds().abs() < 60);

    // Standard stages form one chain: 59 days of 8 hours
    assert_eq!(view.stage_schedule.project_duration, 59.0 * 8.0);
    assert_eq!(view.stage_schedule.critical_chain.len(), 5);

    let report = coordinator
        .timeline_report(&project.id, &Actor::new("designer-1"))
        .await
        .expect("Failed to generate report");
    assert_eq!(report.project_info.id, project.id);
    assert_eq!(report.progress.percentage, 20);
    assert_eq!(report.progress.total_stages, 5);
    assert_eq!(report.milestones.len(), 1);
    assert_eq!(report.change_orders.len(), 1);
    assert_eq!(
        report.critical_path.recommendations,
        vec!["Project is on track. Continue monitoring progress.".to_string()]
    );

    let audit = store.list_audit(&project.id).await.expect("Failed to read audit");
    assert!(audit
        .iter()
        .any(|e| e.action == "timeline_report.generated" && e.actor_id == "designer-1"));
}
