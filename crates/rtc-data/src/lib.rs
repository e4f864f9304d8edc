#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, unreachable_pub)]

//! Shared data access layer for the metadata store: migrations, row
//! projections, and query helpers that run against a pool or an open
//! transaction.

pub mod error;
pub mod metadata;

pub use error::{DataError, Result as DataResult};
