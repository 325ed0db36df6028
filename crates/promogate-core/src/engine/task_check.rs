use crate::config::EngineConfig;
use crate::errors::CheckError;
use crate::gateway::{SubjectType, SubmitJob, TaskGateway};
use crate::model::{CheckContext, CheckRunState, CheckStatus, Metadata, RollbackBehavior};
use crate::rollback::RollbackCoordinator;
use crate::stages::StageDescriptor;
use crate::storage::Repository;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::time::timeout;

pub const META_ID: &str = "id";
pub const META_NAME: &str = "name";
pub const META_LINK: &str = "link";
pub const META_REMAINING_RETRIES: &str = "remainingRetries";
pub const META_ROLLBACK_ERROR: &str = "rollbackError";

/// Everything the engine needs to know about one check's remote work.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPlan {
    pub stages: Vec<StageDescriptor>,
    pub description: String,
    pub subject: SubjectType,
    pub max_retries: u32,
    pub rollback: RollbackBehavior,
}

/// Start/evaluate state machine shared by every check that runs as a remote
/// task.
///
/// All progress lives in the metadata returned from `start` and handed back
/// to `evaluate`; the engine holds no per-check state. A failed task is
/// retried by submitting a fresh one while the persisted retry budget lasts,
/// after which the rollback coordinator runs once and the check fails.
#[derive(Clone)]
pub struct TaskCheckEngine {
    gateway: Arc<dyn TaskGateway>,
    rollback: RollbackCoordinator,
    config: EngineConfig,
}

impl TaskCheckEngine {
    pub fn new(
        gateway: Arc<dyn TaskGateway>,
        repository: Arc<dyn Repository>,
        config: EngineConfig,
    ) -> Self {
        Self {
            gateway,
            rollback: RollbackCoordinator::new(repository, config.actor.clone()),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn start(&self, ctx: &CheckContext, plan: &TaskPlan) -> anyhow::Result<Metadata> {
        self.start_with_retries(ctx, plan, plan.max_retries).await
    }

    async fn start_with_retries(
        &self,
        ctx: &CheckContext,
        plan: &TaskPlan,
        remaining_retries: u32,
    ) -> anyhow::Result<Metadata> {
        if plan.stages.is_empty() {
            tracing::debug!(
                application = %ctx.application,
                environment = %ctx.environment,
                version = %ctx.version,
                "no remote work for check"
            );
            return Ok(Metadata::new());
        }

        // no correlation id: one evaluation per key at a time is the caller's job
        let job = SubmitJob {
            user: self.config.actor.clone(),
            application: ctx.application.clone(),
            environment: ctx.environment.clone(),
            description: plan.description.clone(),
            correlation_id: None,
            stages: plan.stages.clone(),
            subject: plan.subject,
        };
        let handle = self.call("submit", self.gateway.submit(&job)).await?;
        let link = self.config.task_link(&ctx.application, &handle.id);

        tracing::info!(
            application = %ctx.application,
            environment = %ctx.environment,
            version = %ctx.version,
            task_id = %handle.id,
            remaining_retries = remaining_retries,
            "submitted check task"
        );

        let mut metadata = Metadata::new();
        metadata.insert(META_ID.into(), Value::String(handle.id));
        metadata.insert(META_NAME.into(), Value::String(handle.name));
        metadata.insert(META_LINK.into(), Value::String(link));
        metadata.insert(META_REMAINING_RETRIES.into(), Value::from(remaining_retries));
        Ok(metadata)
    }

    pub async fn evaluate(
        &self,
        ctx: &CheckContext,
        plan: &TaskPlan,
        old: &CheckRunState,
    ) -> anyhow::Result<CheckRunState> {
        let Some(task_id) = metadata_str(&old.metadata, META_ID)? else {
            return Ok(CheckRunState {
                status: CheckStatus::Pass,
                ..old.clone()
            });
        };
        let link = metadata_str(&old.metadata, META_LINK)?
            .ok_or(CheckError::MissingMetadata { key: META_LINK })?;
        let remaining = remaining_retries(&old.metadata)?;

        let execution = self.call("poll", self.gateway.get_status(task_id)).await?;
        tracing::debug!(
            task_id = %task_id,
            status = %execution.status,
            "polled check task"
        );

        if !execution.status.is_complete() {
            return Ok(CheckRunState {
                status: CheckStatus::Pending,
                link: Some(link.to_string()),
                ..old.clone()
            });
        }

        if execution.status.is_success() {
            return Ok(CheckRunState {
                status: CheckStatus::Pass,
                link: Some(link.to_string()),
                ..old.clone()
            });
        }

        if remaining > 0 {
            tracing::info!(
                application = %ctx.application,
                environment = %ctx.environment,
                version = %ctx.version,
                task_id = %task_id,
                status = %execution.status,
                remaining_retries = remaining - 1,
                "check task failed, retrying"
            );
            let fresh = self.start_with_retries(ctx, plan, remaining - 1).await?;

            let mut metadata = old.metadata.clone();
            for key in [META_ID, META_NAME, META_LINK] {
                metadata.remove(key);
            }
            metadata.insert(META_REMAINING_RETRIES.into(), Value::from(remaining - 1));
            metadata.extend(fresh);

            return Ok(CheckRunState::started(old.started_at, metadata));
        }

        tracing::info!(
            application = %ctx.application,
            environment = %ctx.environment,
            version = %ctx.version,
            task_id = %task_id,
            status = %execution.status,
            rollback = %plan.rollback,
            "check failed with no retries left"
        );

        let mut metadata = old.metadata.clone();
        if let Err(e) = self.rollback.handle_failure(ctx, plan.rollback) {
            match e.downcast_ref::<CheckError>() {
                // the version stays vetoed; an operator has to pick what to pin
                Some(CheckError::NoRollbackCandidate { .. }) => {
                    tracing::error!(
                        application = %ctx.application,
                        environment = %ctx.environment,
                        version = %ctx.version,
                        error = %e,
                        "rollback incomplete"
                    );
                    metadata.insert(META_ROLLBACK_ERROR.into(), Value::String(e.to_string()));
                }
                _ => return Err(e),
            }
        }

        Ok(CheckRunState {
            status: CheckStatus::Fail,
            link: Some(link.to_string()),
            metadata,
            ..old.clone()
        })
    }

    async fn call<T, F>(&self, operation: &'static str, fut: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match timeout(self.config.task_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(CheckError::GatewayTimeout {
                operation,
                seconds: self.config.task_timeout.as_secs(),
            }
            .into()),
        }
    }
}

fn metadata_str<'a>(metadata: &'a Metadata, key: &'static str) -> anyhow::Result<Option<&'a str>> {
    match metadata.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(CheckError::MalformedMetadata {
            key,
            detail: format!("expected a string, got {}", other),
        }
        .into()),
    }
}

fn remaining_retries(metadata: &Metadata) -> anyhow::Result<u32> {
    let value = metadata
        .get(META_REMAINING_RETRIES)
        .ok_or(CheckError::MissingMetadata {
            key: META_REMAINING_RETRIES,
        })?;
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| {
            CheckError::MalformedMetadata {
                key: META_REMAINING_RETRIES,
                detail: format!("expected a non-negative integer, got {}", value),
            }
            .into()
        })
}
