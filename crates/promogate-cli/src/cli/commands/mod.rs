use super::args::*;
use promogate_core::config::{load_config, write_sample_config, EngineConfig};
use promogate_core::model::{DeliveryConfig, Pin, PromotionStatus, Veto};
use promogate_core::storage::{Repository, Store};
use std::path::Path;

pub mod status;
pub mod tick;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const CHECK_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Init(args) => cmd_init(args),
        Command::Validate(args) => cmd_validate(args),
        Command::Tick(args) => tick::run(args).await,
        Command::Status(args) => status::run(args),
        Command::Pin(args) => cmd_pin(args),
        Command::Unpin(args) => cmd_unpin(args),
        Command::Veto(args) => cmd_veto(args),
        Command::Promote(args) => cmd_promote(args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(args: InitArgs) -> anyhow::Result<i32> {
    if args.config.exists() {
        eprintln!("note: {} already exists", args.config.display());
        return Ok(exit_codes::OK);
    }
    ensure_parent_dir(&args.config)?;
    write_sample_config(&args.config)?;
    eprintln!("created {}", args.config.display());
    Ok(exit_codes::OK)
}

fn cmd_validate(args: ValidateArgs) -> anyhow::Result<i32> {
    match load_config(&args.config, args.strict) {
        Ok(cfg) => {
            println!(
                "ok: {} ({}), {} environment(s)",
                cfg.name,
                cfg.application,
                cfg.environments.len()
            );
            Ok(exit_codes::OK)
        }
        Err(e) => {
            eprintln!("{}", e);
            Ok(exit_codes::CONFIG_ERROR)
        }
    }
}

fn cmd_pin(args: PinArgs) -> anyhow::Result<i32> {
    let Some((cfg, store)) = open_target(&args.config, &args.db, &args.environment, &args.artifact)?
    else {
        return Ok(exit_codes::CONFIG_ERROR);
    };
    let pinned_by = args.by.unwrap_or_else(|| actor(&cfg));
    store.apply_pin(
        &cfg.name,
        &Pin {
            environment: args.environment.clone(),
            reference: args.artifact.clone(),
            version: args.version.clone(),
            comment: args.comment,
            pinned_by,
        },
    )?;
    println!(
        "pinned {} {} to {}",
        args.environment, args.artifact, args.version
    );
    Ok(exit_codes::OK)
}

fn cmd_unpin(args: UnpinArgs) -> anyhow::Result<i32> {
    let Some((cfg, store)) = open_target(&args.config, &args.db, &args.environment, &args.artifact)?
    else {
        return Ok(exit_codes::CONFIG_ERROR);
    };
    if store.remove_pin(&cfg.name, &args.environment, &args.artifact)? {
        println!("unpinned {} {}", args.environment, args.artifact);
    } else {
        println!("{} {} was not pinned", args.environment, args.artifact);
    }
    Ok(exit_codes::OK)
}

fn cmd_veto(args: VetoArgs) -> anyhow::Result<i32> {
    let Some((cfg, store)) = open_target(&args.config, &args.db, &args.environment, &args.artifact)?
    else {
        return Ok(exit_codes::CONFIG_ERROR);
    };
    let vetoed_by = args.by.unwrap_or_else(|| actor(&cfg));
    store.apply_veto(
        &cfg.name,
        &Veto {
            environment: args.environment.clone(),
            reference: args.artifact.clone(),
            version: args.version.clone(),
            vetoed_by,
            comment: args.comment,
        },
    )?;
    println!(
        "vetoed {} {} in {}",
        args.artifact, args.version, args.environment
    );
    Ok(exit_codes::OK)
}

fn cmd_promote(args: PromoteArgs) -> anyhow::Result<i32> {
    let Some(status) = PromotionStatus::parse(&args.status) else {
        eprintln!("config error: unknown promotion status '{}'", args.status);
        return Ok(exit_codes::CONFIG_ERROR);
    };
    let Some((cfg, store)) = open_target(&args.config, &args.db, &args.environment, &args.artifact)?
    else {
        return Ok(exit_codes::CONFIG_ERROR);
    };
    store.set_promotion_status(
        &cfg.name,
        &args.environment,
        &args.artifact,
        &args.version,
        status,
    )?;
    println!(
        "{} {} in {} is {}",
        args.artifact, args.version, args.environment, status
    );
    Ok(exit_codes::OK)
}

/// Loads the config and store for an operator mutation, or prints why the
/// target is invalid and returns `None`.
fn open_target(
    config: &Path,
    db: &Path,
    environment: &str,
    artifact: &str,
) -> anyhow::Result<Option<(DeliveryConfig, Store)>> {
    let cfg = match load_config(config, false) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(None);
        }
    };
    if cfg.environment(environment).is_none() {
        eprintln!("config error: unknown environment '{}'", environment);
        return Ok(None);
    }
    if !cfg.has_artifact(artifact) {
        eprintln!("config error: unknown artifact '{}'", artifact);
        return Ok(None);
    }
    Ok(Some((cfg, open_store(db)?)))
}

pub(crate) fn open_store(db: &Path) -> anyhow::Result<Store> {
    ensure_parent_dir(db)?;
    let store = Store::open(db)?;
    store.init_schema()?;
    Ok(store)
}

fn actor(cfg: &DeliveryConfig) -> String {
    EngineConfig::from_settings(&cfg.settings).with_env().actor
}

fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
