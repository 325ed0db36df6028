use async_trait::async_trait;
use promogate_core::checks_api::ConstraintEvaluator;
use promogate_core::clock::Clock;
use promogate_core::model::{
    CheckContext, CheckStatus, ConstraintSpec, ConstraintState, DRY_RUN_CONSTRAINT_V1,
};
use promogate_core::storage::Repository;
use promogate_core::window::window_status;
use std::sync::Arc;

/// Constraint whose outcome is a pure function of time since it was first
/// seen. Re-judged on every pass so alternating policies keep flipping.
pub struct DryRunConstraintEvaluator {
    repository: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    actor: String,
}

impl DryRunConstraintEvaluator {
    pub fn new(repository: Arc<dyn Repository>, clock: Arc<dyn Clock>, actor: impl Into<String>) -> Self {
        Self {
            repository,
            clock,
            actor: actor.into(),
        }
    }
}

#[async_trait]
impl ConstraintEvaluator for DryRunConstraintEvaluator {
    fn kind(&self) -> &'static str {
        DRY_RUN_CONSTRAINT_V1
    }

    fn always_reevaluate(&self) -> bool {
        true
    }

    async fn can_promote(
        &self,
        ctx: &CheckContext,
        constraint: &ConstraintSpec,
        state: &ConstraintState,
    ) -> anyhow::Result<bool> {
        let ConstraintSpec::DryRun(policy) = constraint;
        let now = self.clock.now();
        let status = window_status(state.created_at, now, &policy.window());

        let mut next = state.clone();
        if status != state.status {
            tracing::info!(
                application = %ctx.application,
                environment = %ctx.environment,
                version = %ctx.version,
                from = %state.status,
                to = %status,
                "constraint status changed"
            );
            next.status = status;
            next.attributes = Some(serde_json::to_value(policy.attributes())?);
        }
        next.judged_at = Some(now);
        next.judged_by = Some(self.actor.clone());
        self.repository.store_constraint_state(&next)?;

        Ok(status == CheckStatus::Pass)
    }
}
