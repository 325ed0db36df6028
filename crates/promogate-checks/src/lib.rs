use std::sync::Arc;

use promogate_core::clock::Clock;
use promogate_core::config::EngineConfig;
use promogate_core::engine::TaskCheckEngine;
use promogate_core::gateway::TaskGateway;
use promogate_core::registry::CheckRegistry;
use promogate_core::storage::Repository;

mod dry_run_constraint;
mod dry_run_post_deploy;
mod dry_run_verification;

pub mod resource;

pub use dry_run_constraint::DryRunConstraintEvaluator;
pub use dry_run_post_deploy::DryRunPostDeployEvaluator;
pub use dry_run_verification::DryRunVerificationEvaluator;
pub use resource::DryRunResourceHandler;

pub fn default_registry(
    gateway: Arc<dyn TaskGateway>,
    repository: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    config: &EngineConfig,
) -> CheckRegistry {
    let engine = TaskCheckEngine::new(gateway, repository.clone(), config.clone());

    let mut registry = CheckRegistry::new();
    registry.register_constraint(Arc::new(DryRunConstraintEvaluator::new(
        repository,
        clock,
        config.actor.clone(),
    )));
    registry.register_check(Arc::new(DryRunVerificationEvaluator::new(engine.clone())));
    registry.register_check(Arc::new(DryRunPostDeployEvaluator::new(engine)));
    registry
}
