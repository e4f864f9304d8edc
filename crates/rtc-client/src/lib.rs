#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, unreachable_pub)]

//! Client-side resolution of runtime configuration values.
//!
//! Layout: `value.rs` (typed [`Value`]), `source.rs` (the [`ValueSource`]
//! contract), `env.rs`/`file.rs`/`remote.rs`/`chain.rs` (backends),
//! `memory.rs` and `etcd.rs` (remote backends), `watch.rs` (bounded callback
//! dispatch), `loader.rs` (process-wide [`Loader`]).

pub mod chain;
pub mod env;
pub mod error;
#[cfg(feature = "etcd")]
pub mod etcd;
pub mod file;
pub mod loader;
pub mod memory;
pub mod remote;
pub mod source;
pub mod value;
pub mod watch;

pub use chain::ChainSource;
pub use env::EnvSource;
pub use error::{SourceError, SourceResult};
#[cfg(feature = "etcd")]
pub use etcd::{EtcdBackend, EtcdBackendConfig};
pub use file::{FileReader, FileSource, YamlReader, yaml_reader};
pub use loader::Loader;
pub use memory::MemoryBackend;
pub use remote::{RemoteBackend, RemoteChange, RemoteSource, RemoteSourceConfig};
pub use source::{ValueChangeCallback, ValueSource};
pub use value::{Value, ValueError, ValueResult};
pub use watch::{WatchOptions, WatchQueue};
