use crate::errors::CheckError;
use crate::model::{CheckContext, Pin, PromotionStatus, RollbackBehavior, Veto};
use crate::storage::Repository;
use std::sync::Arc;

/// What a failed check did to its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Rollback behavior NONE.
    Disabled,
    /// An existing pin takes precedence; nothing was touched.
    SkippedPinned { pinned: String },
    Vetoed,
    VetoedAndPinned { pinned: String },
}

/// Vetoes a failed version and, when asked to, pins the environment back to
/// the previously promoted one.
///
/// Veto and pin are separate writes. A failed pin leaves the version vetoed,
/// which already keeps it out of the environment.
#[derive(Clone)]
pub struct RollbackCoordinator {
    repository: Arc<dyn Repository>,
    actor: String,
}

impl RollbackCoordinator {
    pub fn new(repository: Arc<dyn Repository>, actor: impl Into<String>) -> Self {
        Self {
            repository,
            actor: actor.into(),
        }
    }

    pub fn handle_failure(
        &self,
        ctx: &CheckContext,
        behavior: RollbackBehavior,
    ) -> anyhow::Result<RollbackOutcome> {
        if behavior == RollbackBehavior::None {
            return Ok(RollbackOutcome::Disabled);
        }

        if let Some(pinned) = self.repository.get_pinned_version(
            &ctx.delivery_config,
            &ctx.environment,
            &ctx.artifact_reference,
        )? {
            tracing::warn!(
                application = %ctx.application,
                environment = %ctx.environment,
                version = %ctx.version,
                pinned = %pinned,
                "environment is pinned, skipping rollback"
            );
            return Ok(RollbackOutcome::SkippedPinned { pinned });
        }

        self.repository.apply_veto(
            &ctx.delivery_config,
            &Veto {
                environment: ctx.environment.clone(),
                reference: ctx.artifact_reference.clone(),
                version: ctx.version.clone(),
                vetoed_by: self.actor.clone(),
                comment: format!("Failed verification ({})", ctx.version),
            },
        )?;
        tracing::info!(
            application = %ctx.application,
            environment = %ctx.environment,
            version = %ctx.version,
            "vetoed failed version"
        );

        if behavior != RollbackBehavior::LastSuccessful {
            return Ok(RollbackOutcome::Vetoed);
        }

        let previous = self
            .repository
            .get_version_by_promotion_status(
                &ctx.delivery_config,
                &ctx.environment,
                &ctx.artifact_reference,
                PromotionStatus::Previous,
            )?
            .ok_or_else(|| CheckError::NoRollbackCandidate {
                application: ctx.application.clone(),
                environment: ctx.environment.clone(),
            })?;

        self.repository.apply_pin(
            &ctx.delivery_config,
            &Pin {
                environment: ctx.environment.clone(),
                reference: ctx.artifact_reference.clone(),
                version: previous.clone(),
                comment: format!(
                    "Pin last successful ({}) due to failed verification ({})",
                    previous, ctx.version
                ),
                pinned_by: self.actor.clone(),
            },
        )?;
        tracing::info!(
            application = %ctx.application,
            environment = %ctx.environment,
            version = %ctx.version,
            pinned = %previous,
            "pinned environment to last successful version"
        );

        Ok(RollbackOutcome::VetoedAndPinned { pinned: previous })
    }
}
