use async_trait::async_trait;
use promogate_core::checks_api::CheckEvaluator;
use promogate_core::engine::{TaskCheckEngine, TaskPlan};
use promogate_core::errors::CheckError;
use promogate_core::gateway::SubjectType;
use promogate_core::model::{
    CheckContext, CheckRunState, CheckSpec, DryRunVerification, Metadata, DRY_RUN_VERIFICATION_V1,
};
use promogate_core::stages::dry_run_stages;

const STAGE_NAME: &str = "dryrun verification wait";

/// Verification that waits, optionally fails, and retries through fresh
/// remote tasks before rolling back.
pub struct DryRunVerificationEvaluator {
    engine: TaskCheckEngine,
}

impl DryRunVerificationEvaluator {
    pub fn new(engine: TaskCheckEngine) -> Self {
        Self { engine }
    }

    fn plan(&self, ctx: &CheckContext, v: &DryRunVerification) -> TaskPlan {
        TaskPlan {
            stages: dry_run_stages(STAGE_NAME, v.wait_time, v.fail),
            description: format!("verify ({}) ({})", ctx.environment, ctx.version),
            subject: SubjectType::Verification,
            max_retries: v
                .max_retries
                .unwrap_or(self.engine.config().max_retries),
            rollback: v.rollback_behavior,
        }
    }
}

fn payload(check: &CheckSpec) -> Result<&DryRunVerification, CheckError> {
    let CheckSpec::DryRunVerification(v) = check else {
        tracing::error!(
            expected = DRY_RUN_VERIFICATION_V1,
            actual = check.kind(),
            "check routed to the wrong evaluator"
        );
        return Err(CheckError::KindMismatch {
            expected: DRY_RUN_VERIFICATION_V1,
            actual: check.kind(),
        });
    };
    Ok(v)
}

#[async_trait]
impl CheckEvaluator for DryRunVerificationEvaluator {
    fn kind(&self) -> &'static str {
        DRY_RUN_VERIFICATION_V1
    }

    async fn start(&self, ctx: &CheckContext, check: &CheckSpec) -> anyhow::Result<Metadata> {
        let v = payload(check)?;
        self.engine.start(ctx, &self.plan(ctx, v)).await
    }

    async fn evaluate(
        &self,
        ctx: &CheckContext,
        check: &CheckSpec,
        old: &CheckRunState,
    ) -> anyhow::Result<CheckRunState> {
        let v = payload(check)?;
        self.engine.evaluate(ctx, &self.plan(ctx, v), old).await
    }
}
