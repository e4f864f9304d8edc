use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rtc_client::Value;
use rtc_config::{
    AuditAction, AuditFilter, ConfigErrorKind, ConfigFacade, ConfigMetadata, ConfigService,
    ConfigView, MemoryValuesStore, NewConfig, PgMetadataStore, ProjectFilter, Scope, ValueType,
};
use rtc_test_support::postgres::start_postgres;

fn timeout_config(writable: bool) -> NewConfig {
    NewConfig {
        key: "timeout".to_string(),
        value_type: ValueType::Int,
        metadata: ConfigMetadata {
            group: "network".to_string(),
            usage: "request timeout in seconds".to_string(),
            writable,
            view: ConfigView {
                enum_values: vec!["30".to_string(), "45".to_string()],
            },
        },
        value: Value::from("30"),
    }
}

#[tokio::test]
async fn postgres_engine_round_trips_values_and_audits() -> anyhow::Result<()> {
    let postgres = match start_postgres() {
        Ok(db) => db,
        Err(err) => {
            eprintln!("skipping postgres_engine_round_trips_values_and_audits: {err}");
            return Ok(());
        }
    };
    let metadata =
        PgMetadataStore::connect(postgres.connection_string(), 4, Duration::from_secs(10)).await?;
    let values = Arc::new(MemoryValuesStore::new("rtc"));
    let service = ConfigService::new(Arc::new(metadata), values);
    let scope = Scope::new("billing", "prod", "v1");

    service
        .create_project("admin", "billing", "billing service")
        .await?;
    let duplicate = service
        .create_project("admin", "billing", "again")
        .await
        .unwrap_err();
    assert_eq!(duplicate.kind(), ConfigErrorKind::AlreadyExists);

    service
        .upsert_configs("admin", &scope, vec![timeout_config(true)])
        .await?;
    service
        .set_config_values(
            "alice",
            &scope,
            BTreeMap::from([("timeout".to_string(), Value::from("45"))]),
        )
        .await?;

    let listed = service.list_configs(&scope).await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].value.int(), 45);
    assert_eq!(listed[0].config.metadata, timeout_config(true).metadata);
    assert!(listed[0].config.updated_at.is_some());

    let rejected = service
        .set_config_values(
            "alice",
            &scope,
            BTreeMap::from([("timeout".to_string(), Value::from("soon"))]),
        )
        .await
        .unwrap_err();
    assert_eq!(rejected.kind(), ConfigErrorKind::NotValid);

    let updates = service
        .search_audits(&AuditFilter {
            action: Some(AuditAction::ConfigUpdated),
            ..AuditFilter::default()
        })
        .await?;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].payload["items"][0]["old_value"], "30");
    assert_eq!(updates[0].payload["items"][0]["new_value"], "45");

    let page = service.list_projects(&ProjectFilter::default()).await?;
    assert_eq!(page.total, 1);
    assert_eq!(service.list_environments("billing").await?.len(), 1);

    service.delete_release("admin", &scope).await?;
    assert!(service.list_configs(&scope).await?.is_empty());
    service.delete_project("admin", "billing").await?;
    assert_eq!(
        service.list_projects(&ProjectFilter::default()).await?.total,
        0
    );
    Ok(())
}

#[tokio::test]
async fn postgres_upsert_rolls_back_on_failure() -> anyhow::Result<()> {
    let postgres = match start_postgres() {
        Ok(db) => db,
        Err(err) => {
            eprintln!("skipping postgres_upsert_rolls_back_on_failure: {err}");
            return Ok(());
        }
    };
    let metadata =
        PgMetadataStore::connect(postgres.connection_string(), 4, Duration::from_secs(10)).await?;
    let values = Arc::new(MemoryValuesStore::new("rtc"));
    let service = ConfigService::new(Arc::new(metadata), values.clone());
    let scope = Scope::new("absent", "prod", "v1");

    let err = service
        .upsert_configs("admin", &scope, vec![timeout_config(true)])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ConfigErrorKind::NotFound);
    assert!(values.backend().is_empty().await);
    assert!(service.list_releases("absent", "prod").await.is_err());
    Ok(())
}
