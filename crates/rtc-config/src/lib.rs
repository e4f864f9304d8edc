#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, unreachable_pub)]

//! Configuration engine keeping the metadata store and the values store
//! coherent.
//!
//! Layout: `model.rs` (domain types), `validate.rs` (value and batch rules),
//! `encode.rs` (versioned JSON payloads), `store.rs` (store contracts and key
//! paths), `journal.rs` (values-store undo log), `postgres.rs`/`memory.rs`/
//! `etcd.rs` (adapters), `service.rs` (`ConfigService` + `ConfigFacade`).

pub mod defaults;
pub mod encode;
pub mod error;
#[cfg(feature = "etcd")]
pub mod etcd;
pub mod journal;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod service;
pub mod store;
pub mod validate;

pub use error::{ConfigError, ConfigErrorKind, ConfigResult};
#[cfg(feature = "etcd")]
pub use etcd::{EtcdValuesConfig, EtcdValuesStore};
pub use journal::ValuesJournal;
pub use memory::{MemoryMetadataStore, MemoryValuesStore};
pub use model::{
    Audit, AuditAction, AuditFilter, Config, ConfigMetadata, ConfigValue, ConfigView, Environment,
    NewConfig, Project, ProjectFilter, ProjectPage, Release, Scope, ValueType,
};
pub use postgres::PgMetadataStore;
pub use service::{ConfigFacade, ConfigService, ServiceOptions};
pub use store::{MetadataStore, MetadataTx, ValuesError, ValuesKv, ValuesResult, ValuesStore};
