use crate::model::{CheckKey, CheckRunState, ConstraintState, Pin, PromotionStatus, Veto};

pub mod schema;
pub mod store;

pub use store::Store;

/// Environment/version state the engine reads and mutates.
///
/// Implementations are the single source of truth: the engine keeps nothing
/// between calls and re-reads whatever it needs.
pub trait Repository: Send + Sync {
    fn get_pinned_version(
        &self,
        delivery_config: &str,
        environment: &str,
        reference: &str,
    ) -> anyhow::Result<Option<String>>;

    /// Most recently recorded version holding `status`.
    fn get_version_by_promotion_status(
        &self,
        delivery_config: &str,
        environment: &str,
        reference: &str,
        status: PromotionStatus,
    ) -> anyhow::Result<Option<String>>;

    /// Records `status` for a version; the write also makes it the most
    /// recent record for ordering purposes.
    fn set_promotion_status(
        &self,
        delivery_config: &str,
        environment: &str,
        reference: &str,
        version: &str,
        status: PromotionStatus,
    ) -> anyhow::Result<()>;

    fn get_promotion_status(
        &self,
        delivery_config: &str,
        environment: &str,
        reference: &str,
        version: &str,
    ) -> anyhow::Result<Option<PromotionStatus>>;

    /// Most recent version that was approved for the environment, including
    /// ones already deploying or deployed.
    fn latest_approved_version(
        &self,
        delivery_config: &str,
        environment: &str,
        reference: &str,
    ) -> anyhow::Result<Option<String>>;

    /// Idempotent: vetoing an already vetoed version refreshes the record.
    fn apply_veto(&self, delivery_config: &str, veto: &Veto) -> anyhow::Result<()>;

    fn apply_pin(&self, delivery_config: &str, pin: &Pin) -> anyhow::Result<()>;

    fn get_constraint_state(&self, key: &CheckKey) -> anyhow::Result<Option<ConstraintState>>;

    fn store_constraint_state(&self, state: &ConstraintState) -> anyhow::Result<()>;

    fn get_check_state(&self, key: &CheckKey) -> anyhow::Result<Option<CheckRunState>>;

    fn store_check_state(&self, key: &CheckKey, state: &CheckRunState) -> anyhow::Result<()>;
}
