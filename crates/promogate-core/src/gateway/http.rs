use super::{SubmitJob, TaskExecution, TaskGateway, TaskStatus};
use crate::model::TaskHandle;
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

/// Task backend reached over its JSON HTTP API.
pub struct HttpTaskGateway {
    pub base_url: String,
    pub client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TaskRefResponse {
    #[serde(rename = "ref")]
    task_ref: String,
}

impl HttpTaskGateway {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Appends each segment percent-encoded, so ids and names cannot add path levels.
    fn url(&self, segments: &[&str]) -> anyhow::Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("invalid task api url: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("task api url cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn check(resp: reqwest::Response, what: &str) -> anyhow::Result<reqwest::Response> {
        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("task API {} failed ({}): {}", what, status, error_text);
        }
        Ok(resp)
    }
}

/// `/tasks/01HXYZ` -> `01HXYZ`
fn task_id_from_ref(task_ref: &str) -> Option<&str> {
    task_ref
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
}

#[async_trait]
impl TaskGateway for HttpTaskGateway {
    async fn submit(&self, job: &SubmitJob) -> anyhow::Result<TaskHandle> {
        let body = json!({
            "application": job.application,
            "description": job.description,
            "job": job.stages,
            "trigger": {
                "type": "promogate",
                "user": job.user,
                "environment": job.environment,
                "subject": job.subject.as_str(),
                "correlationId": job.correlation_id,
            },
        });

        let resp = self
            .client
            .post(self.url(&["ops"])?)
            .header("X-User", &job.user)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;
        let resp = Self::check(resp, "submit").await?;

        let r: TaskRefResponse = resp.json().await?;
        let id = task_id_from_ref(&r.task_ref)
            .ok_or_else(|| anyhow::anyhow!("task API returned unusable ref '{}'", r.task_ref))?;

        Ok(TaskHandle {
            id: id.to_string(),
            name: job.description.clone(),
        })
    }

    async fn get_status(&self, task_id: &str) -> anyhow::Result<TaskExecution> {
        let resp = self
            .client
            .get(self.url(&["tasks", task_id])?)
            .send()
            .await?;
        let resp = Self::check(resp, "get task").await?;
        Ok(resp.json().await?)
    }

    async fn list_recent(
        &self,
        application: &str,
        limit: usize,
        status: Option<TaskStatus>,
    ) -> anyhow::Result<Vec<TaskExecution>> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(s) = status {
            query.push(("statuses", s.as_str().to_string()));
        }
        let resp = self
            .client
            .get(self.url(&["applications", application, "tasks"])?)
            .query(&query)
            .send()
            .await?;
        let resp = Self::check(resp, "list tasks").await?;
        Ok(resp.json().await?)
    }

    async fn any_running_with_correlation(&self, correlation_id: &str) -> anyhow::Result<bool> {
        let resp = self
            .client
            .get(self.url(&["executions", "correlated", correlation_id])?)
            .send()
            .await?;
        let resp = Self::check(resp, "correlated executions").await?;
        let ids: Vec<String> = resp.json().await?;
        Ok(!ids.is_empty())
    }

    async fn cancel(&self, task_id: &str) -> anyhow::Result<()> {
        let resp = self
            .client
            .put(self.url(&["tasks", task_id, "cancel"])?)
            .send()
            .await?;
        Self::check(resp, "cancel").await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}
