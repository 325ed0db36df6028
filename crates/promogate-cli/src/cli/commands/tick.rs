use super::{exit_codes, open_store};
use crate::cli::args::{Backend, TickArgs};
use promogate_checks::resource::{ReconcileOutcome, ResourceScope};
use promogate_checks::{default_registry, DryRunResourceHandler};
use promogate_core::clock::{Clock, SystemClock};
use promogate_core::config::{load_config, EngineConfig};
use promogate_core::engine::Runner;
use promogate_core::gateway::{HttpTaskGateway, LocalTaskGateway, TaskGateway};
use promogate_core::model::{CheckContext, CheckStatus, EnvironmentSpec, PromotionStatus};
use promogate_core::storage::{Repository, Store};
use std::sync::Arc;

pub async fn run(args: TickArgs) -> anyhow::Result<i32> {
    let cfg = match load_config(&args.config, args.strict) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    if !cfg.has_artifact(&args.artifact) {
        eprintln!("config error: unknown artifact '{}'", args.artifact);
        return Ok(exit_codes::CONFIG_ERROR);
    }
    let environments: Vec<&EnvironmentSpec> = match &args.environment {
        Some(name) => match cfg.environment(name) {
            Some(env) => vec![env],
            None => {
                eprintln!("config error: unknown environment '{}'", name);
                return Ok(exit_codes::CONFIG_ERROR);
            }
        },
        None => cfg.environments.iter().collect(),
    };

    let store = open_store(&args.db)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let config = EngineConfig::from_settings(&cfg.settings).with_env();

    let gateway: Arc<dyn TaskGateway> = match args.backend {
        Backend::Local => Arc::new(LocalTaskGateway::new(store.clone(), clock.clone())),
        Backend::Http => {
            let Some(url) = args.task_api_url.as_deref() else {
                eprintln!("config error: --backend http needs --task-api-url");
                return Ok(exit_codes::CONFIG_ERROR);
            };
            Arc::new(HttpTaskGateway::new(url))
        }
    };
    let repository: Arc<dyn Repository> = Arc::new(store.clone());

    let registry = default_registry(gateway.clone(), repository.clone(), clock.clone(), &config);
    let runner = Runner::new(repository.clone(), registry, clock);
    let resources = DryRunResourceHandler::new(gateway.clone(), repository, config);

    tracing::info!(
        delivery_config = %cfg.name,
        artifact = %args.artifact,
        version = %args.version,
        backend = gateway.backend_name(),
        "tick"
    );

    let mut failed = false;
    for env in environments {
        let ctx = CheckContext::new(&cfg, &env.name, &args.artifact, &args.version);

        if store.is_vetoed(&cfg.name, &env.name, &args.artifact, &args.version)? {
            print_line(&env.name, "veto", &args.version, "VETOED", None);
            continue;
        }

        let mut constraints_pass = true;
        for constraint in &env.constraints {
            let state = runner.advance_constraint(&ctx, constraint).await?;
            print_line(&env.name, "constraint", constraint.kind(), state.status.as_str(), None);
            constraints_pass &= state.status == CheckStatus::Pass;
            failed |= state.status == CheckStatus::Fail;
        }
        if constraints_pass {
            approve(&store, &ctx)?;
        }

        for resource in env
            .resources
            .iter()
            .filter(|r| r.artifact_reference == args.artifact)
        {
            let scope = ResourceScope::new(&cfg, &env.name);
            let outcome = resources.reconcile(&scope, resource).await?;
            let summary = match &outcome {
                ReconcileOutcome::InProgress => "IN_PROGRESS".to_string(),
                ReconcileOutcome::NothingApproved => "IDLE".to_string(),
                ReconcileOutcome::UpToDate { version } => format!("UP_TO_DATE {}", version),
                ReconcileOutcome::Launched { version, .. } => format!("DEPLOYING {}", version),
            };
            print_line(&env.name, "resource", &resource.id, &summary, None);
        }

        for check in env.verify_with.iter().chain(env.post_deploy.iter()) {
            let state = runner.advance_check(&ctx, check).await?;
            print_line(
                &env.name,
                &check.family().to_string(),
                check.kind(),
                state.status.as_str(),
                state.link.as_deref(),
            );
            failed |= state.status == CheckStatus::Fail;
        }
    }

    if failed {
        Ok(exit_codes::CHECK_FAILED)
    } else {
        Ok(exit_codes::OK)
    }
}

/// Marks a version approved once every constraint passes, unless it has
/// already moved further along.
fn approve(store: &Store, ctx: &CheckContext) -> anyhow::Result<()> {
    let status = store.get_promotion_status(
        &ctx.delivery_config,
        &ctx.environment,
        &ctx.artifact_reference,
        &ctx.version,
    )?;
    if matches!(status, None | Some(PromotionStatus::Pending)) {
        store.set_promotion_status(
            &ctx.delivery_config,
            &ctx.environment,
            &ctx.artifact_reference,
            &ctx.version,
            PromotionStatus::Approved,
        )?;
        tracing::info!(
            environment = %ctx.environment,
            version = %ctx.version,
            "version approved"
        );
    }
    Ok(())
}

fn print_line(environment: &str, what: &str, name: &str, status: &str, link: Option<&str>) {
    match link {
        Some(link) => println!(
            "{:<8} {:<18} {:<36} {}  {}",
            environment, what, name, status, link
        ),
        None => println!("{:<8} {:<18} {:<36} {}", environment, what, name, status),
    }
}
