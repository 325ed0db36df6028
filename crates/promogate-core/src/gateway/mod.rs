use crate::model::TaskHandle;
use crate::stages::StageDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod http;
pub mod local;

pub use http::HttpTaskGateway;
pub use local::LocalTaskGateway;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    NotStarted,
    Running,
    Paused,
    Suspended,
    Succeeded,
    Terminal,
    Canceled,
    Stopped,
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Succeeded)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TaskStatus::Terminal | TaskStatus::Canceled | TaskStatus::Stopped
        )
    }

    pub fn is_complete(&self) -> bool {
        self.is_success() || self.is_failure()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "NOT_STARTED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Paused => "PAUSED",
            TaskStatus::Suspended => "SUSPENDED",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Terminal => "TERMINAL",
            TaskStatus::Canceled => "CANCELED",
            TaskStatus::Stopped => "STOPPED",
            TaskStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecution {
    pub id: String,
    pub name: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubjectType {
    Verification,
    PostDeploy,
    Resource,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::Verification => "VERIFICATION",
            SubjectType::PostDeploy => "POST_DEPLOY",
            SubjectType::Resource => "RESOURCE",
        }
    }
}

/// A job to run on the task backend.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubmitJob {
    pub user: String,
    pub application: String,
    pub environment: String,
    pub description: String,
    /// Backends refuse to track two running jobs under one correlation id.
    pub correlation_id: Option<String>,
    pub stages: Vec<StageDescriptor>,
    pub subject: SubjectType,
}

/// Remote task execution backend: submit a job, poll it, list, cancel.
#[async_trait]
pub trait TaskGateway: Send + Sync {
    async fn submit(&self, job: &SubmitJob) -> anyhow::Result<TaskHandle>;

    async fn get_status(&self, task_id: &str) -> anyhow::Result<TaskExecution>;

    /// Most recent first.
    async fn list_recent(
        &self,
        application: &str,
        limit: usize,
        status: Option<TaskStatus>,
    ) -> anyhow::Result<Vec<TaskExecution>>;

    async fn any_running_with_correlation(&self, correlation_id: &str) -> anyhow::Result<bool>;

    async fn cancel(&self, task_id: &str) -> anyhow::Result<()>;

    fn backend_name(&self) -> &'static str;
}
