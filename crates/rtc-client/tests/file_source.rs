use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rtc_client::{FileSource, Value, ValueSource, WatchOptions, yaml_reader};
use rtc_test_support::fixtures::{scratch_dir, write_atomic, write_file};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

async fn wait_for(source: &FileSource, key: &str, expected: &str) -> Result<()> {
    timeout(EVENT_TIMEOUT, async {
        loop {
            if let Ok(value) = source.value(key).await {
                if value.string() == expected {
                    return;
                }
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn watched_key_change_fires_once_and_unwatched_keys_stay_silent() -> Result<()> {
    let dir = scratch_dir()?;
    let path = write_file(dir.path(), "values.yaml", "amount: \"10\"\n")?;
    let source = FileSource::open(path.clone(), yaml_reader(), WatchOptions::default()).await?;
    assert_eq!(source.value("amount").await?.string(), "10");
    assert!(source.value("other").await.unwrap_err().is_not_present());

    let (tx, mut rx) = mpsc::unbounded_channel();
    source
        .watch_value(
            "amount",
            Arc::new(move |previous: Value, current: Value| {
                let _ = tx.send((previous.string(), current.string()));
            }),
            CancellationToken::new(),
        )
        .await?;

    write_atomic(dir.path(), "values.yaml", "amount: \"20\"\n")?;
    let change = timeout(EVENT_TIMEOUT, rx.recv()).await?;
    assert_eq!(change, Some(("10".to_string(), "20".to_string())));

    write_atomic(dir.path(), "values.yaml", "amount: \"20\"\nother: z\n")?;
    wait_for(&source, "other", "z").await?;
    assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());

    source.close().await?;
    Ok(())
}

#[tokio::test]
async fn in_place_writes_are_observed() -> Result<()> {
    let dir = scratch_dir()?;
    let path = write_file(dir.path(), "app.yaml", "mode: a\n")?;
    let source = FileSource::open(path, yaml_reader(), WatchOptions::default()).await?;

    write_file(dir.path(), "app.yaml", "mode: b\n")?;
    wait_for(&source, "mode", "b").await?;
    Ok(())
}

#[tokio::test]
async fn malformed_rewrite_keeps_previous_snapshot() -> Result<()> {
    let dir = scratch_dir()?;
    let path = write_file(dir.path(), "app.yaml", "mode: a\n")?;
    let source = FileSource::open(path, yaml_reader(), WatchOptions::default()).await?;

    write_atomic(dir.path(), "app.yaml", "mode:\n  nested: true\n")?;
    sleep(Duration::from_millis(300)).await;
    assert_eq!(source.value("mode").await?.string(), "a");

    write_atomic(dir.path(), "app.yaml", "mode: c\n")?;
    wait_for(&source, "mode", "c").await?;
    Ok(())
}

#[tokio::test]
async fn opening_missing_file_fails() -> Result<()> {
    let dir = scratch_dir()?;
    let result = FileSource::open(
        dir.path().join("absent.yaml"),
        yaml_reader(),
        WatchOptions::default(),
    )
    .await;
    assert!(result.is_err());
    Ok(())
}
