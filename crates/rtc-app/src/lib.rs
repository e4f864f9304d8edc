#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, unreachable_pub)]

//! RTC server bootstrap wiring.
//!
//! Layout: `settings.rs` (YAML + environment settings), `bootstrap.rs`
//! (store connections and engine wiring), `error.rs` (`AppError`).

/// Application bootstrap.
pub mod bootstrap;
/// Application error types.
pub mod error;
/// Server settings.
pub mod settings;

pub use bootstrap::{BootstrapDependencies, run_app, run_app_with};
pub use error::{AppError, AppResult};
pub use settings::AppSettings;
