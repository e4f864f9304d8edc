use anyhow::Result;
use rtc_data::metadata::{
    self, AuditQuery, NewAuditRow, NewConfigRow, ProjectQuery, run_migrations,
};
use rtc_test_support::postgres::start_postgres;
use serde_json::json;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new().max_connections(4).connect(url).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

fn config(key: &str, value_type: &str, writable: bool) -> NewConfigRow {
    NewConfigRow {
        key: key.to_string(),
        value_type: value_type.to_string(),
        metadata: json!({ "version": "v1", "writable": writable }),
    }
}

#[tokio::test]
async fn hierarchy_round_trips_through_postgres() -> Result<()> {
    let postgres = match start_postgres() {
        Ok(db) => db,
        Err(err) => {
            eprintln!("skipping hierarchy_round_trips_through_postgres: {err}");
            return Ok(());
        }
    };
    let pool = connect(postgres.connection_string()).await?;

    let project = metadata::insert_project(&pool, "billing", "invoices").await?;
    let duplicate = metadata::insert_project(&pool, "billing", "again").await;
    assert!(duplicate.is_err_and(|err| err.is_unique_violation()));

    let environment = metadata::insert_environment(&pool, project.id, "prod").await?;
    let release = metadata::insert_release(&pool, environment.id, "v1").await?;
    assert_eq!(
        metadata::fetch_release(&pool, environment.id, "v1")
            .await?
            .map(|row| row.id),
        Some(release.id)
    );

    let mut tx = pool.begin().await?;
    metadata::upsert_config(&mut *tx, release.id, &config("timeout", "int", true)).await?;
    metadata::upsert_config(&mut *tx, release.id, &config("name", "string", false)).await?;
    tx.commit().await?;

    let configs = metadata::fetch_configs(&pool, "billing", "prod", "v1").await?;
    let keys: Vec<&str> = configs.iter().map(|row| row.key.as_str()).collect();
    assert_eq!(keys, ["name", "timeout"]);
    assert!(configs.iter().all(|row| row.updated_at.is_none()));

    metadata::upsert_config(&pool, release.id, &config("timeout", "uint", false)).await?;
    let by_key = metadata::fetch_configs_by_keys(
        &pool,
        "billing",
        "prod",
        "v1",
        &["timeout".to_string()],
    )
    .await?;
    assert_eq!(by_key.len(), 1);
    assert_eq!(by_key[0].value_type, "uint");
    assert!(by_key[0].updated_at.is_none());

    metadata::mark_configs_updated(&pool, &[by_key[0].id]).await?;
    let stamped = metadata::fetch_configs_by_keys(
        &pool,
        "billing",
        "prod",
        "v1",
        &["timeout".to_string()],
    )
    .await?;
    assert!(stamped[0].updated_at.is_some());

    metadata::delete_configs(&pool, &[stamped[0].id]).await?;
    assert_eq!(
        metadata::fetch_configs(&pool, "billing", "prod", "v1")
            .await?
            .len(),
        1
    );

    assert_eq!(metadata::delete_release(&pool, environment.id, "v1").await?, 1);
    assert_eq!(metadata::delete_release(&pool, environment.id, "v1").await?, 0);
    assert!(
        metadata::fetch_configs(&pool, "billing", "prod", "v1")
            .await?
            .is_empty()
    );

    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn project_listing_pages_and_filters() -> Result<()> {
    let postgres = match start_postgres() {
        Ok(db) => db,
        Err(err) => {
            eprintln!("skipping project_listing_pages_and_filters: {err}");
            return Ok(());
        }
    };
    let pool = connect(postgres.connection_string()).await?;

    for name in ["alpha", "beta", "alphabet"] {
        metadata::insert_project(&pool, name, "").await?;
    }

    let page = metadata::fetch_projects(
        &pool,
        &ProjectQuery {
            search: Some("alpha".to_string()),
            limit: 1,
            offset: 0,
        },
    )
    .await?;
    assert_eq!(page.total, 2);
    assert_eq!(page.projects.len(), 1);
    assert_eq!(page.projects[0].name, "alphabet");

    let past_end = metadata::fetch_projects(
        &pool,
        &ProjectQuery {
            search: None,
            limit: 10,
            offset: 5,
        },
    )
    .await?;
    assert!(past_end.projects.is_empty());
    assert_eq!(past_end.total, 3);

    let project = metadata::fetch_project_by_name(&pool, "beta")
        .await?
        .ok_or_else(|| anyhow::anyhow!("beta missing"))?;
    metadata::update_project_description(&pool, project.id, "second").await?;
    let refreshed = metadata::fetch_project_by_name(&pool, "beta").await?;
    assert_eq!(
        refreshed.map(|row| row.description),
        Some("second".to_string())
    );

    assert_eq!(metadata::delete_project(&pool, project.id).await?, 1);
    assert!(metadata::fetch_project_by_name(&pool, "beta").await?.is_none());

    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn audit_rows_filter_by_action_and_actor() -> Result<()> {
    let postgres = match start_postgres() {
        Ok(db) => db,
        Err(err) => {
            eprintln!("skipping audit_rows_filter_by_action_and_actor: {err}");
            return Ok(());
        }
    };
    let pool = connect(postgres.connection_string()).await?;

    for (action, actor) in [
        ("project_created", "alice"),
        ("config_updated", "bob"),
        ("config_updated", "alice"),
    ] {
        metadata::insert_audit(
            &pool,
            &NewAuditRow {
                action: action.to_string(),
                actor: actor.to_string(),
                payload: json!({ "version": "v1" }),
            },
        )
        .await?;
    }

    let updates = metadata::fetch_audits(
        &pool,
        &AuditQuery {
            action: Some("config_updated".to_string()),
            limit: 10,
            ..AuditQuery::default()
        },
    )
    .await?;
    assert_eq!(updates.len(), 2);
    assert!(updates[0].id > updates[1].id);

    let alice = metadata::fetch_audits(
        &pool,
        &AuditQuery {
            actor: Some("alice".to_string()),
            limit: 1,
            ..AuditQuery::default()
        },
    )
    .await?;
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].action, "config_updated");

    pool.close().await;
    Ok(())
}
