use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::window::WindowPolicy;

pub const DRY_RUN_CONSTRAINT_V1: &str = "promogate/dry-run-constraint@v1";
pub const DRY_RUN_VERIFICATION_V1: &str = "promogate/dry-run-verification@v1";
pub const DRY_RUN_POST_DEPLOY_V1: &str = "promogate/dry-run-post-deploy@v1";

/// Opaque progress data persisted between evaluations of one check.
pub type Metadata = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default, rename = "configVersion", alias = "version")]
    pub version: u32,
    pub name: String,
    pub application: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    #[serde(default, skip_serializing_if = "is_default_settings")]
    pub settings: Settings,
    #[serde(default)]
    pub artifacts: Vec<ArtifactSpec>,
    pub environments: Vec<EnvironmentSpec>,
}

impl DeliveryConfig {
    pub fn environment(&self, name: &str) -> Option<&EnvironmentSpec> {
        self.environments.iter().find(|e| e.name == name)
    }

    pub fn has_artifact(&self, reference: &str) -> bool {
        self.artifacts.iter().any(|a| a.reference == reference)
    }
}

fn is_default_settings(s: &Settings) -> bool {
    s == &Settings::default()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Identity written to judged-by / vetoed-by / pinned-by audit fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VerificationSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactSpec {
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<ConstraintSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verify_with: Vec<CheckSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_deploy: Vec<CheckSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<DryRunResource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ConstraintSpec {
    #[serde(rename = "promogate/dry-run-constraint@v1")]
    DryRun(DryRunConstraint),
}

impl ConstraintSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            ConstraintSpec::DryRun(_) => DRY_RUN_CONSTRAINT_V1,
        }
    }

    /// Constraints are keyed by their kind; one of each kind per environment.
    pub fn id(&self) -> &'static str {
        self.kind()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DryRunConstraint {
    /// Time to wait before leaving PENDING.
    #[serde(with = "humantime_serde")]
    pub wait_time: Duration,
    /// Settle on FAIL instead of PASS once the wait is over.
    #[serde(default)]
    pub fail: bool,
    /// Flip between PASS and FAIL every `alternate_interval` after the wait.
    #[serde(default)]
    pub alternate: bool,
    /// Defaults to `wait_time`.
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub alternate_interval: Option<Duration>,
}

impl DryRunConstraint {
    pub fn window(&self) -> WindowPolicy {
        WindowPolicy {
            wait_time: self.wait_time,
            fail_at_end: self.fail,
            alternate: self.alternate,
            alternate_interval: self.alternate_interval,
        }
    }

    pub fn attributes(&self) -> DryRunConstraintAttributes {
        DryRunConstraintAttributes {
            kind: DRY_RUN_CONSTRAINT_V1.to_string(),
            wait_time: self.wait_time,
            fail: self.fail,
            alternate: self.alternate,
            alternate_interval: self.window().interval(),
        }
    }
}

/// Policy snapshot stored alongside a judged constraint state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DryRunConstraintAttributes {
    #[serde(rename = "type", default = "dry_run_constraint_type")]
    pub kind: String,
    #[serde(with = "humantime_serde")]
    pub wait_time: Duration,
    pub fail: bool,
    pub alternate: bool,
    #[serde(with = "humantime_serde")]
    pub alternate_interval: Duration,
}

fn dry_run_constraint_type() -> String {
    DRY_RUN_CONSTRAINT_V1.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum CheckSpec {
    #[serde(rename = "promogate/dry-run-verification@v1")]
    DryRunVerification(DryRunVerification),
    #[serde(rename = "promogate/dry-run-post-deploy@v1")]
    DryRunPostDeploy(DryRunPostDeployAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckFamily {
    Verification,
    PostDeploy,
}

impl fmt::Display for CheckFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckFamily::Verification => write!(f, "verification"),
            CheckFamily::PostDeploy => write!(f, "post deploy action"),
        }
    }
}

impl CheckSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            CheckSpec::DryRunVerification(_) => DRY_RUN_VERIFICATION_V1,
            CheckSpec::DryRunPostDeploy(_) => DRY_RUN_POST_DEPLOY_V1,
        }
    }

    pub fn id(&self) -> &'static str {
        self.kind()
    }

    pub fn family(&self) -> CheckFamily {
        match self {
            CheckSpec::DryRunVerification(_) => CheckFamily::Verification,
            CheckSpec::DryRunPostDeploy(_) => CheckFamily::PostDeploy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DryRunVerification {
    #[serde(with = "humantime_serde")]
    pub wait_time: Duration,
    #[serde(default)]
    pub fail: bool,
    #[serde(default)]
    pub rollback_behavior: RollbackBehavior,
    /// Overrides the engine-wide retry budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DryRunPostDeployAction {
    #[serde(with = "humantime_serde")]
    pub wait_time: Duration,
    #[serde(default)]
    pub fail: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DryRunResource {
    pub id: String,
    pub artifact_reference: String,
    #[serde(with = "humantime_serde")]
    pub wait_time: Duration,
    #[serde(default)]
    pub fail: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollbackBehavior {
    #[default]
    #[serde(alias = "none")]
    None,
    #[serde(alias = "last_successful")]
    LastSuccessful,
}

impl fmt::Display for RollbackBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackBehavior::None => write!(f, "NONE"),
            RollbackBehavior::LastSuccessful => write!(f, "LAST_SUCCESSFUL"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    Pending,
    Pass,
    Fail,
}

impl CheckStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckStatus::Pass | CheckStatus::Fail)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pending => "PENDING",
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(CheckStatus::Pending),
            "PASS" => Some(CheckStatus::Pass),
            "FAIL" => Some(CheckStatus::Fail),
            _ => None,
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromotionStatus {
    Pending,
    Approved,
    Deploying,
    Current,
    Previous,
    Vetoed,
    Skipped,
}

impl PromotionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionStatus::Pending => "PENDING",
            PromotionStatus::Approved => "APPROVED",
            PromotionStatus::Deploying => "DEPLOYING",
            PromotionStatus::Current => "CURRENT",
            PromotionStatus::Previous => "PREVIOUS",
            PromotionStatus::Vetoed => "VETOED",
            PromotionStatus::Skipped => "SKIPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Some(PromotionStatus::Pending),
            "APPROVED" => Some(PromotionStatus::Approved),
            "DEPLOYING" => Some(PromotionStatus::Deploying),
            "CURRENT" => Some(PromotionStatus::Current),
            "PREVIOUS" => Some(PromotionStatus::Previous),
            "VETOED" => Some(PromotionStatus::Vetoed),
            "SKIPPED" => Some(PromotionStatus::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for PromotionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One version of one artifact being checked in one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckContext {
    pub delivery_config: String,
    pub application: String,
    pub environment: String,
    pub artifact_reference: String,
    pub version: String,
}

impl CheckContext {
    pub fn new(
        cfg: &DeliveryConfig,
        environment: &str,
        artifact_reference: &str,
        version: &str,
    ) -> Self {
        Self {
            delivery_config: cfg.name.clone(),
            application: cfg.application.clone(),
            environment: environment.to_string(),
            artifact_reference: artifact_reference.to_string(),
            version: version.to_string(),
        }
    }

    pub fn key(&self, check_id: &str) -> CheckKey {
        CheckKey {
            delivery_config: self.delivery_config.clone(),
            environment: self.environment.clone(),
            artifact_reference: self.artifact_reference.clone(),
            version: self.version.clone(),
            check_id: check_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CheckKey {
    pub delivery_config: String,
    pub environment: String,
    pub artifact_reference: String,
    pub version: String,
    pub check_id: String,
}

impl fmt::Display for CheckKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.delivery_config,
            self.environment,
            self.artifact_reference,
            self.version,
            self.check_id
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckRunState {
    pub status: CheckStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl CheckRunState {
    /// Fresh PENDING record for metadata returned by `start`.
    pub fn started(started_at: DateTime<Utc>, metadata: Metadata) -> Self {
        let link = metadata
            .get("link")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Self {
            status: CheckStatus::Pending,
            started_at,
            ended_at: None,
            link,
            metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConstraintState {
    pub key: CheckKey,
    pub status: CheckStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judged_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Value>,
}

impl ConstraintState {
    pub fn new(key: CheckKey, created_at: DateTime<Utc>) -> Self {
        Self {
            key,
            status: CheckStatus::Pending,
            created_at,
            judged_at: None,
            judged_by: None,
            comment: None,
            attributes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Veto {
    pub environment: String,
    pub reference: String,
    pub version: String,
    pub vetoed_by: String,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pin {
    pub environment: String,
    pub reference: String,
    pub version: String,
    pub comment: String,
    pub pinned_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_tags_match_kinds() {
        let v = CheckSpec::DryRunVerification(DryRunVerification {
            wait_time: Duration::from_secs(5),
            fail: false,
            rollback_behavior: RollbackBehavior::LastSuccessful,
            max_retries: None,
        });
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["type"], v.kind());
        assert_eq!(json["wait_time"], "5s");
        assert_eq!(json["rollback_behavior"], "LAST_SUCCESSFUL");

        let p = CheckSpec::DryRunPostDeploy(DryRunPostDeployAction {
            wait_time: Duration::ZERO,
            fail: true,
        });
        assert_eq!(serde_json::to_value(&p).unwrap()["type"], p.kind());

        let c = ConstraintSpec::DryRun(DryRunConstraint {
            wait_time: Duration::from_secs(30),
            fail: false,
            alternate: true,
            alternate_interval: None,
        });
        assert_eq!(serde_json::to_value(&c).unwrap()["type"], c.kind());
    }

    #[test]
    fn test_constraint_yaml_with_humantime() {
        let c: ConstraintSpec = serde_yaml::from_str(
            r#"
type: promogate/dry-run-constraint@v1
wait_time: 30s
alternate: true
alternate_interval: 1m
"#,
        )
        .unwrap();
        let ConstraintSpec::DryRun(dry) = c;
        assert_eq!(dry.wait_time, Duration::from_secs(30));
        assert!(!dry.fail);
        assert_eq!(dry.alternate_interval, Some(Duration::from_secs(60)));
        assert_eq!(dry.attributes().alternate_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_rollback_behavior_accepts_snake_case() {
        let b: RollbackBehavior = serde_yaml::from_str("last_successful").unwrap();
        assert_eq!(b, RollbackBehavior::LastSuccessful);
        let b: RollbackBehavior = serde_yaml::from_str("NONE").unwrap();
        assert_eq!(b, RollbackBehavior::None);
    }

    #[test]
    fn test_started_state_takes_link_from_metadata() {
        let mut meta = Metadata::new();
        meta.insert("id".into(), serde_json::json!("t-1"));
        meta.insert("link".into(), serde_json::json!("/#/applications/app/tasks/t-1"));
        let state = CheckRunState::started(Utc::now(), meta);
        assert_eq!(state.status, CheckStatus::Pending);
        assert_eq!(state.link.as_deref(), Some("/#/applications/app/tasks/t-1"));
        assert!(state.ended_at.is_none());
    }
}
