use crate::errors::ConfigError;
use crate::model::{CheckFamily, DeliveryConfig, EnvironmentSpec};
use std::collections::HashSet;
use std::path::Path;

pub mod engine;

pub use engine::EngineConfig;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

pub fn load_config(path: &Path, strict: bool) -> Result<DeliveryConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;
    parse_config(&raw, strict).map_err(|ConfigError(msg)| {
        ConfigError(format!("{} (file: {})", msg, path.display()))
    })
}

pub fn parse_config(raw: &str, strict: bool) -> Result<DeliveryConfig, ConfigError> {
    let mut ignored_keys = HashSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(raw);

    // serde_ignored wrapper to capture unknown fields
    let cfg: DeliveryConfig = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    // anchors and extension keys are allowed anywhere
    let mut meaningful_unknowns: Vec<_> = ignored_keys
        .iter()
        .filter(|k| {
            let leaf = k.rsplit('.').next().unwrap_or(k);
            *k != "definitions" && !leaf.starts_with('_') && !leaf.starts_with("x-")
        })
        .cloned()
        .collect();
    meaningful_unknowns.sort();

    if !meaningful_unknowns.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "Unknown fields detected in strict mode: {:?}",
                meaningful_unknowns
            )));
        }
        tracing::warn!(
            event = "promogate.config.ignored_fields",
            fields = ?meaningful_unknowns,
            "Ignored unknown config fields"
        );
    }

    if cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError(format!(
            "unsupported config version {} (supported: {})",
            cfg.version, SUPPORTED_CONFIG_VERSION
        )));
    }

    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &DeliveryConfig) -> Result<(), ConfigError> {
    if cfg.application.trim().is_empty() {
        return Err(ConfigError("config has no application".into()));
    }
    if cfg.environments.is_empty() {
        return Err(ConfigError("config has no environments".into()));
    }

    let mut seen = HashSet::new();
    for env in &cfg.environments {
        if !seen.insert(env.name.as_str()) {
            return Err(ConfigError(format!(
                "duplicate environment name '{}'",
                env.name
            )));
        }
        validate_environment(cfg, env)?;
    }
    Ok(())
}

fn validate_environment(cfg: &DeliveryConfig, env: &EnvironmentSpec) -> Result<(), ConfigError> {
    let mut ids = HashSet::new();
    for c in &env.constraints {
        if !ids.insert(c.id()) {
            return Err(ConfigError(format!(
                "environment '{}' declares constraint {} more than once",
                env.name,
                c.id()
            )));
        }
    }

    for (list, family) in [
        (&env.verify_with, CheckFamily::Verification),
        (&env.post_deploy, CheckFamily::PostDeploy),
    ] {
        let mut ids = HashSet::new();
        for check in list {
            if check.family() != family {
                return Err(ConfigError(format!(
                    "environment '{}': {} is not a {}",
                    env.name,
                    check.kind(),
                    family
                )));
            }
            if !ids.insert(check.id()) {
                return Err(ConfigError(format!(
                    "environment '{}' declares {} more than once",
                    env.name,
                    check.id()
                )));
            }
        }
    }

    let mut resource_ids = HashSet::new();
    for r in &env.resources {
        if !resource_ids.insert(r.id.as_str()) {
            return Err(ConfigError(format!(
                "environment '{}' declares resource '{}' more than once",
                env.name, r.id
            )));
        }
        if !cfg.has_artifact(&r.artifact_reference) {
            return Err(ConfigError(format!(
                "resource '{}' references unknown artifact '{}'",
                r.id, r.artifact_reference
            )));
        }
    }
    Ok(())
}

pub const SAMPLE_CONFIG: &str = r#"configVersion: 1
name: demo-manifest
application: demo
settings:
  actor: promogate
  task_timeout_seconds: 30
  verification:
    max_retries: 1
artifacts:
  - reference: demo-app
environments:
  - name: test
    constraints:
      - type: promogate/dry-run-constraint@v1
        wait_time: 0s
    verify_with:
      - type: promogate/dry-run-verification@v1
        wait_time: 0s
        rollback_behavior: LAST_SUCCESSFUL
    post_deploy:
      - type: promogate/dry-run-post-deploy@v1
        wait_time: 0s
    resources:
      - id: demo-service
        artifact_reference: demo-app
        wait_time: 0s
  - name: prod
    constraints:
      - type: promogate/dry-run-constraint@v1
        wait_time: 5m
        alternate: true
        alternate_interval: 10m
"#;

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(path, SAMPLE_CONFIG)
        .map_err(|e| ConfigError(format!("failed to write sample config: {}", e)))?;
    Ok(())
}
