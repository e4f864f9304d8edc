#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, unreachable_pub)]

//! Logging primitives shared across the RTC workspace.
//!
//! Binaries call [`init_logging`] once at startup; libraries only emit
//! `tracing` events and never install a subscriber themselves.

pub mod error;
pub mod init;

pub use error::{Result as TelemetryResult, TelemetryError};
pub use init::{
    AppSpanGuard, DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging,
};
