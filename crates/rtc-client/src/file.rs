//! File backend with OS change notification.
//!
//! The parent directory is watched rather than the file itself so both
//! in-place writes and atomic renames are observed. Every relevant event
//! re-reads the whole file; changed values of watched keys are queued to
//! their callbacks before the snapshot is swapped.

use std::collections::HashMap;
use std::error::Error;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{SourceError, SourceResult};
use crate::source::{ValueChangeCallback, ValueSource};
use crate::value::Value;
use crate::watch::{WatchOptions, WatchQueue};

const EVENT_BUFFER: usize = 64;

/// Decodes raw file contents into a flat key/value table.
pub trait FileReader: Send + Sync + 'static {
    /// Decode `contents`.
    ///
    /// # Errors
    ///
    /// Returns an error when the contents are not a flat mapping.
    fn read(&self, contents: &[u8]) -> Result<HashMap<String, Value>, Box<dyn Error + Send + Sync>>;
}

/// Reader for flat YAML mappings of key to scalar.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlReader;

impl FileReader for YamlReader {
    fn read(&self, contents: &[u8]) -> Result<HashMap<String, Value>, Box<dyn Error + Send + Sync>> {
        if contents.iter().all(u8::is_ascii_whitespace) {
            return Ok(HashMap::new());
        }
        let document: HashMap<String, serde_yaml::Value> = serde_yaml::from_slice(contents)?;
        document
            .into_iter()
            .map(|(key, value)| {
                let text = match value {
                    serde_yaml::Value::Null => String::new(),
                    serde_yaml::Value::Bool(flag) => flag.to_string(),
                    serde_yaml::Value::Number(number) => number.to_string(),
                    serde_yaml::Value::String(text) => text,
                    _ => {
                        let error: Box<dyn Error + Send + Sync> =
                            format!("value of `{key}` is not a scalar").into();
                        return Err(error);
                    }
                };
                Ok((key, Value::from(text)))
            })
            .collect()
    }
}

/// Shorthand for the built-in flat YAML reader.
#[must_use]
pub fn yaml_reader() -> Arc<dyn FileReader> {
    Arc::new(YamlReader)
}

type Registrations = HashMap<String, Vec<WatchQueue>>;

struct FileState {
    path: PathBuf,
    reader: Arc<dyn FileReader>,
    values: RwLock<HashMap<String, Value>>,
    callbacks: RwLock<Registrations>,
}

impl FileState {
    async fn read_table(&self) -> SourceResult<Option<HashMap<String, Value>>> {
        let contents = tokio::fs::read(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: self.path.clone(),
                source,
            })?;
        if contents.is_empty() {
            return Ok(None);
        }
        self.reader
            .read(&contents)
            .map(Some)
            .map_err(|source| SourceError::Decode {
                path: self.path.clone(),
                source,
            })
    }

    async fn reload(&self) -> SourceResult<()> {
        let Some(table) = self.read_table().await? else {
            debug!(path = %self.path.display(), "skipping empty file read");
            return Ok(());
        };

        let callbacks = self.callbacks.read().await;
        let mut values = self.values.write().await;
        if !callbacks.is_empty() {
            for (key, queues) in callbacks.iter() {
                let Some(current) = table.get(key) else {
                    continue;
                };
                let previous = values.get(key).cloned().unwrap_or_default();
                if previous == *current {
                    continue;
                }
                for queue in queues {
                    queue.push(previous.clone(), current.clone());
                }
            }
        }
        *values = table;
        Ok(())
    }
}

/// Value source backed by a local file.
pub struct FileSource {
    state: Arc<FileState>,
    options: WatchOptions,
    watcher: Mutex<Option<RecommendedWatcher>>,
    shutdown: CancellationToken,
}

impl FileSource {
    /// Watch `path`, read it eagerly and keep it in sync.
    ///
    /// # Errors
    ///
    /// Returns an error when the watch cannot be registered or the initial
    /// read fails.
    pub async fn open(
        path: impl Into<PathBuf>,
        reader: Arc<dyn FileReader>,
        options: WatchOptions,
    ) -> SourceResult<Self> {
        let path = path.into();
        let file_name = path.file_name().map(ToOwned::to_owned).ok_or_else(|| {
            SourceError::Io {
                path: path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
            }
        })?;
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            // A full queue already holds a pending reload.
            let _ = events_tx.try_send(result);
        })
        .map_err(|source| SourceError::Watch {
            path: path.clone(),
            source,
        })?;
        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(|source| SourceError::Watch {
                path: directory.clone(),
                source,
            })?;

        let state = Arc::new(FileState {
            path,
            reader,
            values: RwLock::new(HashMap::new()),
            callbacks: RwLock::new(HashMap::new()),
        });
        let initial = state.read_table().await?.unwrap_or_default();
        *state.values.write().await = initial;

        let shutdown = CancellationToken::new();
        tokio::spawn(run_reloads(
            Arc::clone(&state),
            file_name,
            events_rx,
            shutdown.clone(),
        ));

        Ok(Self {
            state,
            options,
            watcher: Mutex::new(Some(watcher)),
            shutdown,
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.state.path
    }
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSource")
            .field("path", &self.state.path)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn touches(event: &Event, file_name: &OsString) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
    ) && event
        .paths
        .iter()
        .any(|path| path.file_name() == Some(file_name.as_os_str()))
}

async fn run_reloads(
    state: Arc<FileState>,
    file_name: OsString,
    mut events: mpsc::Receiver<notify::Result<Event>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            received = events.recv() => match received {
                Some(Ok(event)) if touches(&event, &file_name) => {
                    if let Err(err) = state.reload().await {
                        error!(path = %state.path.display(), error = %err, "file reload failed; keeping previous snapshot");
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => warn!(path = %state.path.display(), error = %err, "file watch error"),
                None => break,
            },
        }
    }
    debug!(path = %state.path.display(), "file watch stopped");
}

#[async_trait]
impl ValueSource for FileSource {
    async fn value(&self, key: &str) -> SourceResult<Value> {
        self.state
            .values
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| SourceError::not_present(key))
    }

    async fn watch_value(
        &self,
        key: &str,
        callback: ValueChangeCallback,
        cancel: CancellationToken,
    ) -> SourceResult<()> {
        let queue = WatchQueue::spawn(key, callback, self.options, cancel);
        let mut callbacks = self.state.callbacks.write().await;
        let queues = callbacks.entry(key.to_string()).or_default();
        queues.retain(|existing| !existing.is_closed());
        queues.push(queue);
        Ok(())
    }

    async fn close(&self) -> SourceResult<()> {
        self.shutdown.cancel();
        self.watcher.lock().await.take();
        for queue in self.state.callbacks.write().await.drain().flat_map(|(_, queues)| queues) {
            queue.cancellation().cancel();
        }
        Ok(())
    }
}
