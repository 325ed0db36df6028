use crate::clock::Clock;
use crate::engine::task_check::META_ID;
use crate::model::{CheckContext, CheckRunState, CheckSpec, ConstraintSpec, ConstraintState};
use crate::registry::CheckRegistry;
use crate::storage::Repository;
use std::sync::Arc;

/// Moves one (version, environment, check) key forward by one step.
///
/// The runner is not a scheduler: it never loops or sleeps. Callers must not
/// advance the same key concurrently.
#[derive(Clone)]
pub struct Runner {
    pub repository: Arc<dyn Repository>,
    pub registry: CheckRegistry,
    pub clock: Arc<dyn Clock>,
}

impl Runner {
    pub fn new(
        repository: Arc<dyn Repository>,
        registry: CheckRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            registry,
            clock,
        }
    }

    pub async fn advance_check(
        &self,
        ctx: &CheckContext,
        check: &CheckSpec,
    ) -> anyhow::Result<CheckRunState> {
        let evaluator = self.registry.check_evaluator(check)?;
        let key = ctx.key(check.id());

        let old = match self.repository.get_check_state(&key)? {
            Some(state) if state.status.is_terminal() => return Ok(state),
            Some(state) => state,
            None => {
                let metadata = evaluator.start(ctx, check).await?;
                let state = CheckRunState::started(self.clock.now(), metadata);
                self.repository.store_check_state(&key, &state)?;
                tracing::info!(
                    check = %key,
                    link = ?state.link,
                    "check started"
                );
                // nothing was submitted; settle it now
                if state.metadata.contains_key(META_ID) {
                    return Ok(state);
                }
                state
            }
        };

        let mut new = evaluator.evaluate(ctx, check, &old).await?;
        if new.status.is_terminal() {
            if new.ended_at.is_none() {
                new.ended_at = Some(self.clock.now());
            }
        } else {
            new.ended_at = None;
        }

        if new != old {
            self.repository.store_check_state(&key, &new)?;
        }
        if new.status != old.status {
            tracing::info!(
                check = %key,
                from = %old.status,
                to = %new.status,
                "check status changed"
            );
        }
        Ok(new)
    }

    pub async fn advance_constraint(
        &self,
        ctx: &CheckContext,
        constraint: &ConstraintSpec,
    ) -> anyhow::Result<ConstraintState> {
        let evaluator = self.registry.constraint_evaluator(constraint)?;
        let key = ctx.key(constraint.id());

        let state = match self.repository.get_constraint_state(&key)? {
            Some(state) => state,
            None => {
                let state = ConstraintState::new(key.clone(), self.clock.now());
                self.repository.store_constraint_state(&state)?;
                state
            }
        };

        if state.status.is_terminal() && !evaluator.always_reevaluate() {
            return Ok(state);
        }

        let allowed = evaluator.can_promote(ctx, constraint, &state).await?;
        tracing::debug!(constraint = %key, allowed = allowed, "constraint evaluated");

        Ok(self.repository.get_constraint_state(&key)?.unwrap_or(state))
    }
}
