use super::{exit_codes, open_store};
use crate::cli::args::StatusArgs;
use promogate_core::config::load_config;
use serde_json::json;

pub fn run(args: StatusArgs) -> anyhow::Result<i32> {
    let cfg = match load_config(&args.config, false) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    let store = open_store(&args.db)?;

    let constraints = store.list_constraint_states(&cfg.name)?;
    let checks = store.list_check_states(&cfg.name)?;
    let vetoes = store.list_vetoes(&cfg.name)?;

    let mut pins = Vec::new();
    for env in &cfg.environments {
        for artifact in &cfg.artifacts {
            if let Some(p) = store.get_pin(&cfg.name, &env.name, &artifact.reference)? {
                pins.push(p);
            }
        }
    }

    if args.format == "json" {
        let output = json!({
            "delivery_config": cfg.name,
            "constraints": constraints,
            "checks": checks
                .iter()
                .map(|(key, state)| json!({ "key": key, "state": state }))
                .collect::<Vec<_>>(),
            "pins": pins
                .iter()
                .map(|p| json!({ "pin": p.pin, "pinned_at": p.pinned_at }))
                .collect::<Vec<_>>(),
            "vetoes": vetoes
                .iter()
                .map(|v| json!({ "veto": v.veto, "vetoed_at": v.vetoed_at }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(exit_codes::OK);
    }

    println!("{} ({})", cfg.name, cfg.application);
    for c in &constraints {
        println!(
            "  constraint {:<8} {:<12} {:<34} {}",
            c.key.environment, c.key.version, c.key.check_id, c.status
        );
    }
    for (key, state) in &checks {
        println!(
            "  check      {:<8} {:<12} {:<34} {}{}",
            key.environment,
            key.version,
            key.check_id,
            state.status,
            state
                .link
                .as_deref()
                .map(|l| format!("  {}", l))
                .unwrap_or_default()
        );
    }
    for p in &pins {
        println!(
            "  pinned     {:<8} {} -> {} by {} ({})",
            p.pin.environment, p.pin.reference, p.pin.version, p.pin.pinned_by, p.pin.comment
        );
    }
    for v in &vetoes {
        println!(
            "  vetoed     {:<8} {} {} by {} ({})",
            v.veto.environment, v.veto.reference, v.veto.version, v.veto.vetoed_by, v.veto.comment
        );
    }
    Ok(exit_codes::OK)
}
