use async_trait::async_trait;
use promogate_core::checks_api::CheckEvaluator;
use promogate_core::engine::{TaskCheckEngine, TaskPlan};
use promogate_core::errors::CheckError;
use promogate_core::gateway::SubjectType;
use promogate_core::model::{
    CheckContext, CheckRunState, CheckSpec, DryRunPostDeployAction, Metadata, RollbackBehavior,
    DRY_RUN_POST_DEPLOY_V1,
};
use promogate_core::stages::dry_run_stages;

const STAGE_NAME: &str = "dryrun post deploy action wait";

/// Post-deploy action: one remote task, no retries, never rolls back.
pub struct DryRunPostDeployEvaluator {
    engine: TaskCheckEngine,
}

impl DryRunPostDeployEvaluator {
    pub fn new(engine: TaskCheckEngine) -> Self {
        Self { engine }
    }
}

fn plan(ctx: &CheckContext, action: &DryRunPostDeployAction) -> TaskPlan {
    TaskPlan {
        stages: dry_run_stages(STAGE_NAME, action.wait_time, action.fail),
        description: format!("dryrun post deploy action ({})", ctx.version),
        subject: SubjectType::PostDeploy,
        max_retries: 0,
        rollback: RollbackBehavior::None,
    }
}

fn payload(check: &CheckSpec) -> Result<&DryRunPostDeployAction, CheckError> {
    let CheckSpec::DryRunPostDeploy(action) = check else {
        tracing::error!(
            expected = DRY_RUN_POST_DEPLOY_V1,
            actual = check.kind(),
            "check routed to the wrong evaluator"
        );
        return Err(CheckError::KindMismatch {
            expected: DRY_RUN_POST_DEPLOY_V1,
            actual: check.kind(),
        });
    };
    Ok(action)
}

#[async_trait]
impl CheckEvaluator for DryRunPostDeployEvaluator {
    fn kind(&self) -> &'static str {
        DRY_RUN_POST_DEPLOY_V1
    }

    async fn start(&self, ctx: &CheckContext, check: &CheckSpec) -> anyhow::Result<Metadata> {
        let action = payload(check)?;
        self.engine.start(ctx, &plan(ctx, action)).await
    }

    async fn evaluate(
        &self,
        ctx: &CheckContext,
        check: &CheckSpec,
        old: &CheckRunState,
    ) -> anyhow::Result<CheckRunState> {
        let action = payload(check)?;
        self.engine.evaluate(ctx, &plan(ctx, action), old).await
    }
}
