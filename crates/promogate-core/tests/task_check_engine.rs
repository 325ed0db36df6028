use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use promogate_core::config::EngineConfig;
use promogate_core::engine::task_check::{META_ID, META_REMAINING_RETRIES, META_ROLLBACK_ERROR};
use promogate_core::engine::{TaskCheckEngine, TaskPlan};
use promogate_core::errors::CheckError;
use promogate_core::gateway::{SubjectType, SubmitJob, TaskExecution, TaskGateway, TaskStatus};
use promogate_core::model::{
    CheckContext, CheckRunState, CheckStatus, Metadata, Pin, PromotionStatus, RollbackBehavior,
    TaskHandle,
};
use promogate_core::stages::dry_run_stages;
use promogate_core::storage::{Repository, Store};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Gateway that answers polls from a script and records submissions.
#[derive(Default)]
struct ScriptedGateway {
    polls: Mutex<VecDeque<TaskStatus>>,
    submitted: Mutex<Vec<SubmitJob>>,
    delay: Option<Duration>,
}

impl ScriptedGateway {
    fn with_polls(polls: &[TaskStatus]) -> Self {
        Self {
            polls: Mutex::new(polls.iter().copied().collect()),
            ..Default::default()
        }
    }

    fn submissions(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskGateway for ScriptedGateway {
    async fn submit(&self, job: &SubmitJob) -> anyhow::Result<TaskHandle> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(job.clone());
        Ok(TaskHandle {
            id: format!("t-{}", submitted.len()),
            name: job.description.clone(),
        })
    }

    async fn get_status(&self, task_id: &str) -> anyhow::Result<TaskExecution> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        let status = self
            .polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TaskStatus::Running);
        Ok(TaskExecution {
            id: task_id.to_string(),
            name: "scripted".into(),
            status,
            start_time: None,
            end_time: None,
        })
    }

    async fn list_recent(
        &self,
        _application: &str,
        _limit: usize,
        _status: Option<TaskStatus>,
    ) -> anyhow::Result<Vec<TaskExecution>> {
        Ok(vec![])
    }

    async fn any_running_with_correlation(&self, _correlation_id: &str) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn cancel(&self, _task_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

fn ctx() -> CheckContext {
    CheckContext {
        delivery_config: "dc".into(),
        application: "demo".into(),
        environment: "prod".into(),
        artifact_reference: "app".into(),
        version: "v3".into(),
    }
}

fn plan(max_retries: u32, rollback: RollbackBehavior) -> TaskPlan {
    TaskPlan {
        stages: dry_run_stages("dryrun verification wait", Duration::from_secs(5), true),
        description: "verify (prod) (v3)".into(),
        subject: SubjectType::Verification,
        max_retries,
        rollback,
    }
}

fn store() -> Arc<Store> {
    let s = Store::memory().unwrap();
    s.init_schema().unwrap();
    Arc::new(s)
}

fn engine(gateway: Arc<ScriptedGateway>, store: Arc<Store>) -> TaskCheckEngine {
    TaskCheckEngine::new(gateway, store, EngineConfig::default())
}

fn started(metadata: Metadata) -> CheckRunState {
    CheckRunState::started(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), metadata)
}

#[tokio::test]
async fn test_start_records_task_metadata() -> anyhow::Result<()> {
    let gw = Arc::new(ScriptedGateway::default());
    let e = engine(gw.clone(), store());

    let meta = e.start(&ctx(), &plan(2, RollbackBehavior::None)).await?;
    assert_eq!(meta[META_ID], "t-1");
    assert_eq!(meta["name"], "verify (prod) (v3)");
    assert_eq!(meta["link"], "/#/applications/demo/tasks/t-1");
    assert_eq!(meta[META_REMAINING_RETRIES], 2);

    let job = &gw.submitted.lock().unwrap()[0];
    assert_eq!(job.user, "promogate");
    assert_eq!(job.correlation_id, None);
    assert_eq!(job.stages.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_no_work_passes_without_polling() -> anyhow::Result<()> {
    let gw = Arc::new(ScriptedGateway::with_polls(&[TaskStatus::Terminal]));
    let e = engine(gw.clone(), store());
    let mut p = plan(0, RollbackBehavior::None);
    p.stages.clear();

    let meta = e.start(&ctx(), &p).await?;
    assert!(meta.is_empty());
    assert_eq!(gw.submissions(), 0);

    let state = e.evaluate(&ctx(), &p, &started(meta)).await?;
    assert_eq!(state.status, CheckStatus::Pass);
    assert_eq!(gw.polls.lock().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_running_stays_pending_and_success_passes() -> anyhow::Result<()> {
    let gw = Arc::new(ScriptedGateway::with_polls(&[
        TaskStatus::Running,
        TaskStatus::Suspended,
        TaskStatus::Succeeded,
    ]));
    let e = engine(gw.clone(), store());
    let p = plan(0, RollbackBehavior::None);
    let s0 = started(e.start(&ctx(), &p).await?);

    let s1 = e.evaluate(&ctx(), &p, &s0).await?;
    assert_eq!(s1.status, CheckStatus::Pending);
    assert_eq!(s1.link, s0.link);
    let s2 = e.evaluate(&ctx(), &p, &s1).await?;
    assert_eq!(s2.status, CheckStatus::Pending);
    let s3 = e.evaluate(&ctx(), &p, &s2).await?;
    assert_eq!(s3.status, CheckStatus::Pass);
    assert_eq!(s3.link.as_deref(), Some("/#/applications/demo/tasks/t-1"));
    assert_eq!(gw.submissions(), 1);
    Ok(())
}

#[tokio::test]
async fn test_retry_then_fail_rolls_back_once() -> anyhow::Result<()> {
    let gw = Arc::new(ScriptedGateway::with_polls(&[
        TaskStatus::Terminal,
        TaskStatus::Terminal,
    ]));
    let s = store();
    s.set_promotion_status("dc", "prod", "app", "v2", PromotionStatus::Previous)?;
    let e = engine(gw.clone(), s.clone());
    let p = plan(1, RollbackBehavior::LastSuccessful);

    let s0 = started(e.start(&ctx(), &p).await?);

    let s1 = e.evaluate(&ctx(), &p, &s0).await?;
    assert_eq!(s1.status, CheckStatus::Pending);
    assert_eq!(s1.metadata[META_ID], "t-2");
    assert_eq!(s1.metadata[META_REMAINING_RETRIES], 0);
    assert_eq!(s1.link.as_deref(), Some("/#/applications/demo/tasks/t-2"));
    assert_eq!(s1.started_at, s0.started_at);
    assert_eq!(s.count_rows("vetoes")?, 0);

    let s2 = e.evaluate(&ctx(), &p, &s1).await?;
    assert_eq!(s2.status, CheckStatus::Fail);
    assert_eq!(s2.link.as_deref(), Some("/#/applications/demo/tasks/t-2"));
    assert_eq!(gw.submissions(), 2);
    assert!(s.is_vetoed("dc", "prod", "app", "v3")?);
    assert_eq!(s.get_pinned_version("dc", "prod", "app")?.as_deref(), Some("v2"));
    Ok(())
}

#[tokio::test]
async fn test_retry_budget_counts_down() -> anyhow::Result<()> {
    let gw = Arc::new(ScriptedGateway::with_polls(&[TaskStatus::Terminal; 4]));
    let s = store();
    let e = engine(gw.clone(), s.clone());
    let p = plan(3, RollbackBehavior::None);

    let mut state = started(e.start(&ctx(), &p).await?);
    for expected in [2, 1, 0] {
        state = e.evaluate(&ctx(), &p, &state).await?;
        assert_eq!(state.status, CheckStatus::Pending);
        assert_eq!(state.metadata[META_REMAINING_RETRIES], expected);
    }
    state = e.evaluate(&ctx(), &p, &state).await?;
    assert_eq!(state.status, CheckStatus::Fail);
    assert_eq!(gw.submissions(), 4);
    Ok(())
}

#[tokio::test]
async fn test_pinned_environment_is_left_alone() -> anyhow::Result<()> {
    let gw = Arc::new(ScriptedGateway::with_polls(&[TaskStatus::Canceled]));
    let s = store();
    s.set_promotion_status("dc", "prod", "app", "v2", PromotionStatus::Previous)?;
    s.apply_pin(
        "dc",
        &Pin {
            environment: "prod".into(),
            reference: "app".into(),
            version: "v1".into(),
            comment: "freeze".into(),
            pinned_by: "ops".into(),
        },
    )?;
    let e = engine(gw, s.clone());
    let p = plan(0, RollbackBehavior::LastSuccessful);

    let s0 = started(e.start(&ctx(), &p).await?);
    let s1 = e.evaluate(&ctx(), &p, &s0).await?;
    assert_eq!(s1.status, CheckStatus::Fail);
    assert_eq!(s.count_rows("vetoes")?, 0);
    assert_eq!(s.get_pinned_version("dc", "prod", "app")?.as_deref(), Some("v1"));
    Ok(())
}

#[tokio::test]
async fn test_missing_rollback_candidate_still_fails_check() -> anyhow::Result<()> {
    let gw = Arc::new(ScriptedGateway::with_polls(&[TaskStatus::Terminal]));
    let s = store();
    let e = engine(gw, s.clone());
    let p = plan(0, RollbackBehavior::LastSuccessful);

    let s0 = started(e.start(&ctx(), &p).await?);
    let s1 = e.evaluate(&ctx(), &p, &s0).await?;
    assert_eq!(s1.status, CheckStatus::Fail);
    assert_eq!(
        s1.metadata[META_ROLLBACK_ERROR],
        "no successful rollback version for env demo/prod"
    );
    assert!(s.is_vetoed("dc", "prod", "app", "v3")?);
    assert_eq!(s.count_rows("pins")?, 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_retry_counter_is_an_error() {
    let gw = Arc::new(ScriptedGateway::with_polls(&[TaskStatus::Succeeded]));
    let e = engine(gw, store());
    let mut meta = Metadata::new();
    meta.insert(META_ID.into(), serde_json::json!("t-9"));
    meta.insert("link".into(), serde_json::json!("/l"));

    let err = e
        .evaluate(&ctx(), &plan(0, RollbackBehavior::None), &started(meta))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CheckError>(),
        Some(CheckError::MissingMetadata {
            key: "remainingRetries"
        })
    ));
}

#[tokio::test]
async fn test_slow_poll_times_out() {
    let gw = Arc::new(ScriptedGateway {
        delay: Some(Duration::from_millis(200)),
        ..Default::default()
    });
    let config = EngineConfig {
        task_timeout: Duration::from_millis(10),
        ..Default::default()
    };
    let e = TaskCheckEngine::new(gw, store(), config);
    let p = plan(0, RollbackBehavior::None);
    let s0 = started(e.start(&ctx(), &p).await.unwrap());

    let err = e.evaluate(&ctx(), &p, &s0).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CheckError>(),
        Some(CheckError::GatewayTimeout {
            operation: "poll",
            ..
        })
    ));
}
