use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use rtc_client::env::EnvSource;
use rtc_client::loader::{self, Loader};
use rtc_client::{ChainSource, MemoryBackend, RemoteSource, RemoteSourceConfig, Value, ValueSource};
use serial_test::serial;
use tokio_util::sync::CancellationToken;

fn env_source(vars: &[(&str, &str)]) -> Arc<dyn ValueSource> {
    let table: HashMap<String, String> = vars
        .iter()
        .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
        .collect();
    Arc::new(EnvSource::with_lookup(
        "billing",
        Arc::new(move |name| table.get(name).cloned()),
    ))
}

#[tokio::test]
async fn get_downgrades_errors_to_empty_values() -> Result<()> {
    let backend = MemoryBackend::new();
    let remote = RemoteSource::new(
        Arc::new(backend),
        &RemoteSourceConfig::new("billing", "prod", "v1"),
    );
    let loader = Loader::new(Arc::new(remote));

    assert!(loader.value("timeout").await.is_err());
    assert!(loader.get("timeout").await.is_empty());
    assert_eq!(loader.get("timeout").await.int(), 0);
    Ok(())
}

#[tokio::test]
async fn chain_prefers_remote_and_falls_back_to_environment() -> Result<()> {
    let backend = MemoryBackend::new();
    backend
        .put("rtc/billing/prod/v1/timeout", Value::from("45"))
        .await;
    let remote: Arc<dyn ValueSource> = Arc::new(RemoteSource::new(
        Arc::new(backend),
        &RemoteSourceConfig::new("billing", "prod", "v1"),
    ));
    let chain = ChainSource::new(vec![
        remote,
        env_source(&[("BILLING_TIMEOUT", "30"), ("BILLING_RETRIES", "3")]),
    ]);
    let loader = Loader::new(Arc::new(chain));

    assert_eq!(loader.get("timeout").await.int(), 45);
    assert_eq!(loader.get("retries").await.int(), 3);

    // The environment source cannot watch, so the chain reports it.
    let err = loader
        .watch_value("timeout", Arc::new(|_, _| {}), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_not_implemented());
    Ok(())
}

#[tokio::test]
#[serial]
async fn default_loader_can_be_swapped() -> Result<()> {
    let previous = loader::default_loader();

    loader::set_default(Loader::new(env_source(&[("BILLING_MODE", "fast")])));
    assert_eq!(loader::get("mode").await.string(), "fast");
    assert!(loader::value("absent").await?.is_empty());
    assert!(
        loader::watch_value("mode", Arc::new(|_, _| {}), CancellationToken::new())
            .await
            .is_err()
    );

    loader::set_default(previous);
    Ok(())
}

#[tokio::test]
#[serial]
async fn default_loader_reads_environment_without_error() -> Result<()> {
    let value = loader::value("rtc_loader_test_unset_key").await?;
    assert!(value.is_empty());
    Ok(())
}
