use crate::model::{CheckContext, CheckRunState, CheckSpec, ConstraintSpec, ConstraintState, Metadata};
use async_trait::async_trait;

/// A check that runs remote work after a version is deployed.
///
/// `start` kicks the work off and returns the metadata to persist; `evaluate`
/// is called on every tick afterwards with the last persisted state. Neither
/// keeps anything in memory between calls.
#[async_trait]
pub trait CheckEvaluator: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn start(&self, ctx: &CheckContext, check: &CheckSpec) -> anyhow::Result<Metadata>;

    async fn evaluate(
        &self,
        ctx: &CheckContext,
        check: &CheckSpec,
        old: &CheckRunState,
    ) -> anyhow::Result<CheckRunState>;
}

/// A gate evaluated before a version may be promoted into an environment.
#[async_trait]
pub trait ConstraintEvaluator: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Keep calling `can_promote` after a terminal status has been observed.
    fn always_reevaluate(&self) -> bool {
        false
    }

    async fn can_promote(
        &self,
        ctx: &CheckContext,
        constraint: &ConstraintSpec,
        state: &ConstraintState,
    ) -> anyhow::Result<bool>;
}
