use chrono::{TimeZone, Utc};
use promogate_core::model::{CheckKey, CheckRunState, CheckStatus, Metadata, PromotionStatus};
use promogate_core::storage::{Repository, Store};
use tempfile::tempdir;

#[test]
fn test_state_survives_reopen() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("promogate.db");

    let key = CheckKey {
        delivery_config: "demo-manifest".into(),
        environment: "test".into(),
        artifact_reference: "demo-app".into(),
        version: "1.2.0".into(),
        check_id: "promogate/dry-run-verification@v1".into(),
    };
    let mut metadata = Metadata::new();
    metadata.insert("id".into(), serde_json::json!("local-00000001"));
    metadata.insert("link".into(), serde_json::json!("/#/applications/demo/tasks/local-00000001"));
    metadata.insert("remainingRetries".into(), serde_json::json!(1));
    metadata.insert("custom".into(), serde_json::json!({"nested": [1, 2, 3]}));
    let state = CheckRunState::started(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(), metadata);

    {
        let store = Store::open(&db_path)?;
        store.init_schema()?;
        store.store_check_state(&key, &state)?;
        store.set_promotion_status("demo-manifest", "test", "demo-app", "1.1.0", PromotionStatus::Previous)?;
    }

    let store = Store::open(&db_path)?;
    // init is idempotent
    store.init_schema()?;
    let got = store.get_check_state(&key)?.expect("state persisted");
    assert_eq!(got, state);
    assert_eq!(got.status, CheckStatus::Pending);

    let listed = store.list_check_states("demo-manifest")?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].0, key);

    assert_eq!(
        store
            .get_version_by_promotion_status("demo-manifest", "test", "demo-app", PromotionStatus::Previous)?
            .as_deref(),
        Some("1.1.0")
    );
    Ok(())
}
