use promogate_core::config::EngineConfig;
use promogate_core::errors::CheckError;
use promogate_core::gateway::{SubjectType, SubmitJob, TaskGateway, TaskStatus};
use promogate_core::model::{DeliveryConfig, DryRunResource, PromotionStatus, TaskHandle};
use promogate_core::stages::dry_run_stages;
use promogate_core::storage::Repository;
use std::future::Future;
use std::sync::Arc;

pub const CURRENT_UNKNOWN: &str = "N/A";
const STAGE_NAME: &str = "dryrun resource wait";
const RECENT_TASK_SCAN: usize = 100;

/// Where a resource lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceScope {
    pub delivery_config: String,
    pub application: String,
    pub environment: String,
}

impl ResourceScope {
    pub fn new(cfg: &DeliveryConfig, environment: &str) -> Self {
        Self {
            delivery_config: cfg.name.clone(),
            application: cfg.application.clone(),
            environment: environment.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A correlated job for the resource is still running.
    InProgress,
    /// Nothing has been approved for the environment yet.
    NothingApproved,
    UpToDate { version: String },
    /// A deploy job was submitted, or the deploy had no work and completed.
    Launched {
        version: String,
        task: Option<TaskHandle>,
    },
}

/// Moves a dry-run resource towards its pinned or latest approved version.
///
/// Deploys are remote jobs named after the resource and version; the version
/// of the last successful one is what the resource is running.
pub struct DryRunResourceHandler {
    gateway: Arc<dyn TaskGateway>,
    repository: Arc<dyn Repository>,
    config: EngineConfig,
}

impl DryRunResourceHandler {
    pub fn new(
        gateway: Arc<dyn TaskGateway>,
        repository: Arc<dyn Repository>,
        config: EngineConfig,
    ) -> Self {
        Self {
            gateway,
            repository,
            config,
        }
    }

    /// The pinned version when the environment is pinned, otherwise the
    /// latest approved version that has not been vetoed.
    pub fn desired(
        &self,
        scope: &ResourceScope,
        resource: &DryRunResource,
    ) -> anyhow::Result<Option<String>> {
        if let Some(pinned) = self.repository.get_pinned_version(
            &scope.delivery_config,
            &scope.environment,
            &resource.artifact_reference,
        )? {
            return Ok(Some(pinned));
        }
        self.repository.latest_approved_version(
            &scope.delivery_config,
            &scope.environment,
            &resource.artifact_reference,
        )
    }

    pub async fn current(
        &self,
        scope: &ResourceScope,
        resource: &DryRunResource,
    ) -> anyhow::Result<String> {
        let recent = self
            .call(
                "list",
                self.gateway.list_recent(
                    &scope.application,
                    RECENT_TASK_SCAN,
                    Some(TaskStatus::Succeeded),
                ),
            )
            .await?;

        Ok(recent
            .iter()
            .find_map(|t| deployed_version(&t.name, &resource.id))
            .unwrap_or(CURRENT_UNKNOWN)
            .to_string())
    }

    pub async fn actuation_in_progress(&self, resource: &DryRunResource) -> anyhow::Result<bool> {
        self.call(
            "correlation lookup",
            self.gateway.any_running_with_correlation(&resource.id),
        )
        .await
    }

    pub async fn upsert(
        &self,
        scope: &ResourceScope,
        resource: &DryRunResource,
        desired: &str,
        current: &str,
    ) -> anyhow::Result<Option<TaskHandle>> {
        if desired == current {
            return Ok(None);
        }

        self.repository.set_promotion_status(
            &scope.delivery_config,
            &scope.environment,
            &resource.artifact_reference,
            desired,
            PromotionStatus::Deploying,
        )?;

        let stages = dry_run_stages(STAGE_NAME, resource.wait_time, resource.fail);
        if stages.is_empty() {
            self.mark_current(scope, resource, desired)?;
            return Ok(None);
        }

        let job = SubmitJob {
            user: self.config.actor.clone(),
            application: scope.application.clone(),
            environment: scope.environment.clone(),
            description: deploy_description(&resource.id, desired),
            correlation_id: Some(resource.id.clone()),
            stages,
            subject: SubjectType::Resource,
        };
        let handle = self.call("submit", self.gateway.submit(&job)).await?;
        tracing::info!(
            resource = %resource.id,
            environment = %scope.environment,
            from = %current,
            to = %desired,
            task_id = %handle.id,
            "deploying resource"
        );
        Ok(Some(handle))
    }

    pub async fn reconcile(
        &self,
        scope: &ResourceScope,
        resource: &DryRunResource,
    ) -> anyhow::Result<ReconcileOutcome> {
        if self.actuation_in_progress(resource).await? {
            tracing::debug!(resource = %resource.id, "actuation in progress");
            return Ok(ReconcileOutcome::InProgress);
        }

        let Some(desired) = self.desired(scope, resource)? else {
            return Ok(ReconcileOutcome::NothingApproved);
        };
        let status = self.repository.get_promotion_status(
            &scope.delivery_config,
            &scope.environment,
            &resource.artifact_reference,
            &desired,
        )?;
        if status == Some(PromotionStatus::Current) {
            return Ok(ReconcileOutcome::UpToDate { version: desired });
        }

        let current = self.current(scope, resource).await?;
        if current == desired {
            self.mark_current(scope, resource, &desired)?;
            return Ok(ReconcileOutcome::UpToDate { version: desired });
        }

        let task = self.upsert(scope, resource, &desired, &current).await?;
        Ok(ReconcileOutcome::Launched {
            version: desired,
            task,
        })
    }

    /// Makes `version` CURRENT and demotes whatever was current before it.
    fn mark_current(
        &self,
        scope: &ResourceScope,
        resource: &DryRunResource,
        version: &str,
    ) -> anyhow::Result<()> {
        let reference = &resource.artifact_reference;
        if let Some(old) = self.repository.get_version_by_promotion_status(
            &scope.delivery_config,
            &scope.environment,
            reference,
            PromotionStatus::Current,
        )? {
            if old != version {
                self.repository.set_promotion_status(
                    &scope.delivery_config,
                    &scope.environment,
                    reference,
                    &old,
                    PromotionStatus::Previous,
                )?;
            }
        }
        self.repository.set_promotion_status(
            &scope.delivery_config,
            &scope.environment,
            reference,
            version,
            PromotionStatus::Current,
        )?;
        tracing::info!(
            resource = %resource.id,
            environment = %scope.environment,
            version = %version,
            "resource is current"
        );
        Ok(())
    }

    async fn call<T, F>(&self, operation: &'static str, fut: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.config.task_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(CheckError::GatewayTimeout {
                operation,
                seconds: self.config.task_timeout.as_secs(),
            }
            .into()),
        }
    }
}

fn deploy_description(resource_id: &str, version: &str) -> String {
    format!("deploy ({}) ({})", resource_id, version)
}

/// `deploy (svc) (1.2.0)` -> `1.2.0` when it names `resource_id`.
fn deployed_version<'a>(task_name: &'a str, resource_id: &str) -> Option<&'a str> {
    let rest = task_name.strip_prefix("deploy (")?;
    let rest = rest.strip_prefix(resource_id)?;
    let version = rest.strip_prefix(") (")?.strip_suffix(')')?;
    (!version.is_empty()).then_some(version)
}
