use super::{SubmitJob, TaskExecution, TaskGateway, TaskStatus};
use crate::clock::Clock;
use crate::model::TaskHandle;
use crate::storage::store::{Store, TaskRecord};
use async_trait::async_trait;
use std::sync::Arc;

const SCAN_LIMIT: usize = 10_000;

/// In-process task backend backed by the state store.
///
/// A job runs for the summed length of its wait stages, measured on the
/// injected clock, then ends TERMINAL if it carries a forced-failure stage and
/// SUCCEEDED otherwise. Nothing executes in the background: status is derived
/// from the stored job every time it is read.
#[derive(Clone)]
pub struct LocalTaskGateway {
    pub store: Store,
    pub clock: Arc<dyn Clock>,
}

impl LocalTaskGateway {
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn execution(&self, task: &TaskRecord) -> TaskExecution {
        let start = task.submitted_at;
        let run_for = task
            .stages
            .iter()
            .fold(0u64, |acc, s| acc.saturating_add(s.wait_seconds()));
        // None when the wait runs past the representable calendar: never finishes
        let finishes_at = i64::try_from(run_for)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|d| start.checked_add_signed(d));

        let (status, end) = match (task.canceled_at, finishes_at) {
            (Some(canceled), _) => (TaskStatus::Canceled, Some(canceled)),
            (None, Some(at)) if self.clock.now() >= at => {
                if task.stages.iter().any(|s| s.is_forced_failure()) {
                    (TaskStatus::Terminal, Some(at))
                } else {
                    (TaskStatus::Succeeded, Some(at))
                }
            }
            (None, _) => (TaskStatus::Running, None),
        };

        TaskExecution {
            id: task.id.clone(),
            name: task.description.clone(),
            status,
            start_time: Some(start.timestamp_millis()),
            end_time: end.map(|t| t.timestamp_millis()),
        }
    }
}

#[async_trait]
impl TaskGateway for LocalTaskGateway {
    async fn submit(&self, job: &SubmitJob) -> anyhow::Result<TaskHandle> {
        if let Some(cid) = &job.correlation_id {
            if self.any_running_with_correlation(cid).await? {
                anyhow::bail!("a job correlated with '{}' is already running", cid);
            }
        }

        let record = TaskRecord {
            id: String::new(),
            application: job.application.clone(),
            environment: job.environment.clone(),
            description: job.description.clone(),
            correlation_id: job.correlation_id.clone(),
            subject: job.subject.as_str().to_string(),
            stages: job.stages.clone(),
            submitted_by: job.user.clone(),
            submitted_at: self.clock.now(),
            canceled_at: None,
        };
        let id = self.store.insert_task(&record)?;
        tracing::debug!(task_id = %id, description = %job.description, "local task submitted");

        Ok(TaskHandle {
            id,
            name: job.description.clone(),
        })
    }

    async fn get_status(&self, task_id: &str) -> anyhow::Result<TaskExecution> {
        let task = self
            .store
            .get_task(task_id)?
            .ok_or_else(|| anyhow::anyhow!("task not found: {}", task_id))?;
        Ok(self.execution(&task))
    }

    async fn list_recent(
        &self,
        application: &str,
        limit: usize,
        status: Option<TaskStatus>,
    ) -> anyhow::Result<Vec<TaskExecution>> {
        let tasks = self.store.list_tasks(application, SCAN_LIMIT)?;
        Ok(tasks
            .iter()
            .map(|t| self.execution(t))
            .filter(|e| status.map_or(true, |s| e.status == s))
            .take(limit)
            .collect())
    }

    async fn any_running_with_correlation(&self, correlation_id: &str) -> anyhow::Result<bool> {
        let tasks = self.store.tasks_with_correlation(correlation_id)?;
        Ok(tasks
            .iter()
            .any(|t| !self.execution(t).status.is_complete()))
    }

    async fn cancel(&self, task_id: &str) -> anyhow::Result<()> {
        let task = self
            .store
            .get_task(task_id)?
            .ok_or_else(|| anyhow::anyhow!("task not found: {}", task_id))?;
        if self.execution(&task).status.is_complete() {
            return Ok(());
        }
        self.store.cancel_task(task_id, self.clock.now())?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
