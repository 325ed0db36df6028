use chrono::{TimeZone, Utc};
use promogate_checks::resource::{ReconcileOutcome, ResourceScope, CURRENT_UNKNOWN};
use promogate_checks::{default_registry, DryRunResourceHandler, DryRunVerificationEvaluator};
use promogate_core::checks_api::CheckEvaluator;
use promogate_core::clock::{Clock, ManualClock};
use promogate_core::config::EngineConfig;
use promogate_core::engine::{Runner, TaskCheckEngine};
use promogate_core::errors::CheckError;
use promogate_core::gateway::LocalTaskGateway;
use promogate_core::model::{
    CheckContext, CheckSpec, CheckStatus, ConstraintSpec, DryRunConstraint, DryRunPostDeployAction,
    DryRunResource, DryRunVerification, PromotionStatus, RollbackBehavior,
};
use promogate_core::rollback::{RollbackCoordinator, RollbackOutcome};
use promogate_core::storage::{Repository, Store};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    store: Arc<Store>,
    clock: Arc<ManualClock>,
    gateway: Arc<LocalTaskGateway>,
    runner: Runner,
}

fn harness() -> Harness {
    let store = Store::memory().unwrap();
    store.init_schema().unwrap();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    ));
    let gateway = Arc::new(LocalTaskGateway::new(store.clone(), clock.clone()));
    let store = Arc::new(store);
    let config = EngineConfig {
        actor: "release-bot".into(),
        ..Default::default()
    };
    let registry = default_registry(gateway.clone(), store.clone(), clock.clone(), &config);
    let runner = Runner::new(store.clone(), registry, clock.clone());
    Harness {
        store,
        clock,
        gateway,
        runner,
    }
}

fn ctx(version: &str) -> CheckContext {
    CheckContext {
        delivery_config: "demo-manifest".into(),
        application: "demo".into(),
        environment: "test".into(),
        artifact_reference: "demo-app".into(),
        version: version.into(),
    }
}

fn verification(wait: u64, fail: bool, max_retries: u32) -> CheckSpec {
    CheckSpec::DryRunVerification(DryRunVerification {
        wait_time: Duration::from_secs(wait),
        fail,
        rollback_behavior: RollbackBehavior::LastSuccessful,
        max_retries: Some(max_retries),
    })
}

#[tokio::test]
async fn test_constraint_waits_then_alternates() -> anyhow::Result<()> {
    let h = harness();
    let c = ConstraintSpec::DryRun(DryRunConstraint {
        wait_time: Duration::from_secs(30),
        fail: false,
        alternate: true,
        alternate_interval: Some(Duration::from_secs(60)),
    });

    let s = h.runner.advance_constraint(&ctx("v1"), &c).await?;
    assert_eq!(s.status, CheckStatus::Pending);
    assert_eq!(s.judged_by.as_deref(), Some("release-bot"));
    let created = s.created_at;

    h.clock.advance(Duration::from_secs(35));
    let s = h.runner.advance_constraint(&ctx("v1"), &c).await?;
    assert_eq!(s.status, CheckStatus::Pass);
    assert_eq!(s.created_at, created);
    assert_eq!(s.attributes.as_ref().unwrap()["alternate_interval"], "1m");

    h.clock.advance(Duration::from_secs(60));
    let s = h.runner.advance_constraint(&ctx("v1"), &c).await?;
    assert_eq!(s.status, CheckStatus::Fail);

    h.clock.advance(Duration::from_secs(60));
    let s = h.runner.advance_constraint(&ctx("v1"), &c).await?;
    assert_eq!(s.status, CheckStatus::Pass);
    assert_eq!(s.judged_at, Some(h.clock.now()));
    Ok(())
}

#[tokio::test]
async fn test_zero_work_verification_passes_immediately() -> anyhow::Result<()> {
    let h = harness();
    let s = h.runner.advance_check(&ctx("v1"), &verification(0, false, 0)).await?;
    assert_eq!(s.status, CheckStatus::Pass);
    assert!(s.metadata.is_empty());
    assert_eq!(s.ended_at, Some(h.clock.now()));
    assert_eq!(h.store.count_rows("tasks")?, 0);
    Ok(())
}

#[tokio::test]
async fn test_failing_verification_retries_then_rolls_back() -> anyhow::Result<()> {
    let h = harness();
    h.store
        .set_promotion_status("demo-manifest", "test", "demo-app", "v1", PromotionStatus::Previous)?;
    let check = verification(10, true, 1);

    let s = h.runner.advance_check(&ctx("v2"), &check).await?;
    assert_eq!(s.status, CheckStatus::Pending);
    let first = s.metadata["id"].as_str().unwrap().to_string();
    assert_eq!(
        s.link.as_deref(),
        Some(format!("/#/applications/demo/tasks/{}", first).as_str())
    );

    h.clock.advance(Duration::from_secs(5));
    let s = h.runner.advance_check(&ctx("v2"), &check).await?;
    assert_eq!(s.status, CheckStatus::Pending);
    assert_eq!(s.metadata["id"], first.as_str());

    h.clock.advance(Duration::from_secs(5));
    let s = h.runner.advance_check(&ctx("v2"), &check).await?;
    assert_eq!(s.status, CheckStatus::Pending);
    assert_ne!(s.metadata["id"], first.as_str());
    assert_eq!(s.metadata["remainingRetries"], 0);

    h.clock.advance(Duration::from_secs(10));
    let s = h.runner.advance_check(&ctx("v2"), &check).await?;
    assert_eq!(s.status, CheckStatus::Fail);
    assert_eq!(s.ended_at, Some(h.clock.now()));
    assert!(h.store.is_vetoed("demo-manifest", "test", "demo-app", "v2")?);
    assert_eq!(
        h.store
            .get_pinned_version("demo-manifest", "test", "demo-app")?
            .as_deref(),
        Some("v1")
    );

    // terminal checks are not evaluated again
    h.clock.advance(Duration::from_secs(60));
    let again = h.runner.advance_check(&ctx("v2"), &check).await?;
    assert_eq!(again, s);
    assert_eq!(h.store.count_rows("tasks")?, 2);
    Ok(())
}

#[tokio::test]
async fn test_post_deploy_action_passes_after_wait() -> anyhow::Result<()> {
    let h = harness();
    let check = CheckSpec::DryRunPostDeploy(DryRunPostDeployAction {
        wait_time: Duration::from_secs(3),
        fail: false,
    });

    let s = h.runner.advance_check(&ctx("v1"), &check).await?;
    assert_eq!(s.status, CheckStatus::Pending);
    assert_eq!(s.metadata["name"], "dryrun post deploy action (v1)");
    assert_eq!(s.metadata["remainingRetries"], 0);

    h.clock.advance(Duration::from_secs(3));
    let s = h.runner.advance_check(&ctx("v1"), &check).await?;
    assert_eq!(s.status, CheckStatus::Pass);
    Ok(())
}

#[tokio::test]
async fn test_failing_post_deploy_never_rolls_back() -> anyhow::Result<()> {
    let h = harness();
    h.store
        .set_promotion_status("demo-manifest", "test", "demo-app", "v1", PromotionStatus::Previous)?;
    let check = CheckSpec::DryRunPostDeploy(DryRunPostDeployAction {
        wait_time: Duration::ZERO,
        fail: true,
    });

    h.runner.advance_check(&ctx("v2"), &check).await?;
    let s = h.runner.advance_check(&ctx("v2"), &check).await?;
    assert_eq!(s.status, CheckStatus::Fail);
    assert_eq!(h.store.count_rows("vetoes")?, 0);
    assert_eq!(h.store.count_rows("pins")?, 0);
    Ok(())
}

#[tokio::test]
async fn test_wrong_payload_is_rejected() {
    let h = harness();
    let engine = TaskCheckEngine::new(h.gateway.clone(), h.store.clone(), EngineConfig::default());
    let evaluator = DryRunVerificationEvaluator::new(engine);
    let post_deploy = CheckSpec::DryRunPostDeploy(DryRunPostDeployAction {
        wait_time: Duration::ZERO,
        fail: false,
    });

    let err = evaluator.start(&ctx("v1"), &post_deploy).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CheckError>(),
        Some(CheckError::KindMismatch {
            expected: "promogate/dry-run-verification@v1",
            actual: "promogate/dry-run-post-deploy@v1",
        })
    ));
    assert_eq!(h.store.count_rows("tasks").unwrap(), 0);
}

#[tokio::test]
async fn test_resource_follows_approved_version() -> anyhow::Result<()> {
    let h = harness();
    let handler = DryRunResourceHandler::new(
        h.gateway.clone(),
        h.store.clone(),
        EngineConfig::default(),
    );
    let scope = ResourceScope {
        delivery_config: "demo-manifest".into(),
        application: "demo".into(),
        environment: "test".into(),
    };
    let resource = DryRunResource {
        id: "demo-service".into(),
        artifact_reference: "demo-app".into(),
        wait_time: Duration::from_secs(20),
        fail: false,
    };

    assert_eq!(
        handler.reconcile(&scope, &resource).await?,
        ReconcileOutcome::NothingApproved
    );
    assert_eq!(handler.current(&scope, &resource).await?, CURRENT_UNKNOWN);

    h.store
        .set_promotion_status("demo-manifest", "test", "demo-app", "v1", PromotionStatus::Current)?;
    h.store
        .set_promotion_status("demo-manifest", "test", "demo-app", "v2", PromotionStatus::Approved)?;

    let ReconcileOutcome::Launched { version, task } = handler.reconcile(&scope, &resource).await?
    else {
        panic!("expected a deploy");
    };
    assert_eq!(version, "v2");
    assert_eq!(task.unwrap().name, "deploy (demo-service) (v2)");
    assert!(handler.actuation_in_progress(&resource).await?);
    assert_eq!(
        handler.reconcile(&scope, &resource).await?,
        ReconcileOutcome::InProgress
    );

    h.clock.advance(Duration::from_secs(20));
    assert_eq!(handler.current(&scope, &resource).await?, "v2");
    assert_eq!(
        handler.reconcile(&scope, &resource).await?,
        ReconcileOutcome::UpToDate {
            version: "v2".into()
        }
    );
    assert_eq!(
        h.store
            .get_promotion_status("demo-manifest", "test", "demo-app", "v1")?,
        Some(PromotionStatus::Previous)
    );
    assert_eq!(
        h.store
            .get_promotion_status("demo-manifest", "test", "demo-app", "v2")?,
        Some(PromotionStatus::Current)
    );
    Ok(())
}

#[tokio::test]
async fn test_resource_follows_rollback_pin() -> anyhow::Result<()> {
    let h = harness();
    let handler = DryRunResourceHandler::new(
        h.gateway.clone(),
        h.store.clone(),
        EngineConfig::default(),
    );
    let scope = ResourceScope {
        delivery_config: "demo-manifest".into(),
        application: "demo".into(),
        environment: "test".into(),
    };
    let resource = DryRunResource {
        id: "demo-service".into(),
        artifact_reference: "demo-app".into(),
        wait_time: Duration::from_secs(20),
        fail: false,
    };

    for version in ["v1", "v2"] {
        h.store.set_promotion_status(
            "demo-manifest",
            "test",
            "demo-app",
            version,
            PromotionStatus::Approved,
        )?;
        handler.reconcile(&scope, &resource).await?;
        h.clock.advance(Duration::from_secs(20));
        assert_eq!(
            handler.reconcile(&scope, &resource).await?,
            ReconcileOutcome::UpToDate {
                version: version.into()
            }
        );
    }

    let rollback = RollbackCoordinator::new(h.store.clone(), "release-bot");
    assert_eq!(
        rollback.handle_failure(&ctx("v2"), RollbackBehavior::LastSuccessful)?,
        RollbackOutcome::VetoedAndPinned {
            pinned: "v1".into()
        }
    );

    let ReconcileOutcome::Launched { version, task } = handler.reconcile(&scope, &resource).await?
    else {
        panic!("expected a deploy back to the pinned version");
    };
    assert_eq!(version, "v1");
    assert_eq!(task.unwrap().name, "deploy (demo-service) (v1)");

    h.clock.advance(Duration::from_secs(20));
    assert_eq!(
        handler.reconcile(&scope, &resource).await?,
        ReconcileOutcome::UpToDate {
            version: "v1".into()
        }
    );
    assert_eq!(
        h.store
            .get_promotion_status("demo-manifest", "test", "demo-app", "v1")?,
        Some(PromotionStatus::Current)
    );
    assert_eq!(
        h.store
            .get_promotion_status("demo-manifest", "test", "demo-app", "v2")?,
        Some(PromotionStatus::Vetoed)
    );

    // newer approvals wait for the pin to be lifted
    h.store
        .set_promotion_status("demo-manifest", "test", "demo-app", "v3", PromotionStatus::Approved)?;
    assert_eq!(
        handler.reconcile(&scope, &resource).await?,
        ReconcileOutcome::UpToDate {
            version: "v1".into()
        }
    );
    Ok(())
}
