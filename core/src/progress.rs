/// Project progress derived from stage completion.
use crate::errors::{WorkflowError, WorkflowResult};
use crate::store::WorkflowStore;
use std::sync::Arc;
use tracing::debug;

/// `round(100 * completed / total)`, 0 when there are no stages.
pub fn progress_percentage(completed: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total);
    ((completed as f64 * 100.0) / total as f64).round() as u8
}

/// Recomputes and caches `Project.progress_percentage`.
///
/// Always recomputed from stored stages rather than adjusted by deltas, so
/// redundant or concurrent calls converge on the same value.
#[derive(Clone)]
pub struct ProgressAggregator {
    store: Arc<dyn WorkflowStore>,
}

impl ProgressAggregator {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    /// Percentage from current stored state, without persisting it.
    pub async fn current(&self, project_id: &str) -> WorkflowResult<u8> {
        let counts = self.store.count_stages(project_id).await?;
        Ok(progress_percentage(counts.completed, counts.total))
    }

    /// Recompute and persist the project's progress.
    pub async fn recompute(&self, project_id: &str) -> WorkflowResult<u8> {
        if self.store.get_project(project_id).await?.is_none() {
            return Err(WorkflowError::not_found("project", project_id));
        }

        let counts = self.store.count_stages(project_id).await?;
        let percentage = progress_percentage(counts.completed, counts.total);
        self.store.set_progress(project_id, percentage).await?;

        debug!(
            project_id,
            completed = counts.completed,
            total = counts.total,
            percentage,
            "progress recomputed"
        );
        Ok(percentage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteWorkflowStore;
    use crate::types::Project;

    #[test]
    fn test_rounding() {
        assert_eq!(progress_percentage(1, 3), 33);
        assert_eq!(progress_percentage(2, 3), 67);
        assert_eq!(progress_percentage(3, 3), 100);
        assert_eq!(progress_percentage(1, 8), 13);
    }

    #[test]
    fn test_no_stages_is_zero() {
        assert_eq!(progress_percentage(0, 0), 0);
    }

    #[test]
    fn test_bounded() {
        for total in 1..20u64 {
            for completed in 0..=total {
                assert!(progress_percentage(completed, total) <= 100);
            }
        }
        assert_eq!(progress_percentage(5, 2), 100);
    }

    #[tokio::test]
    async fn test_recompute_is_idempotent() {
        let store = Arc::new(SqliteWorkflowStore::in_memory().await.unwrap());
        let project = Project::new("Studio", "client-1");
        store.create_project(&project).await.unwrap();

        let aggregator = ProgressAggregator::new(store.clone());
        assert_eq!(aggregator.recompute(&project.id).await.unwrap(), 0);
        assert_eq!(aggregator.recompute(&project.id).await.unwrap(), 0);

        let loaded = store.get_project(&project.id).await.unwrap().unwrap();
        assert_eq!(loaded.progress_percentage, 0);
    }

    #[tokio::test]
    async fn test_recompute_missing_project() {
        let store = Arc::new(SqliteWorkflowStore::in_memory().await.unwrap());
        let aggregator = ProgressAggregator::new(store);
        assert!(matches!(
            aggregator.recompute("ghost").await,
            Err(WorkflowError::NotFound(_))
        ));
    }
}
