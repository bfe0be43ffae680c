//! `conduit-import`: copies a source dataset into a workspace sandbox table.
//!
//! # Overview
//!
//! An [`Import`](types::Import) is created once and run once. The
//! [`ImportExecutor`](executor::ImportExecutor) validates it, picks a
//! [`CopyStrategy`](strategy::CopyStrategy), drives the copy and records the
//! outcome exactly once: the `success` column is written with a conditional
//! update, so a concurrent [`cancel`](executor::ImportExecutor::cancel) and
//! the run's own completion can race safely.
//!
//! # Copy strategies
//!
//! | Strategy        | Chosen when                                    | Transfer               |
//! |-----------------|------------------------------------------------|------------------------|
//! | `SameDatabase`  | source and sandbox share a physical database   | single SQL statement   |
//! | `CrossDatabase` | different databases, same vendor family        | named pipe, COPY out/in |
//! | `Vendor`        | source lives on a foreign vendor (Oracle)      | named pipe, dialect + type mapping |

pub mod backend;
pub mod db;
pub mod error;
pub mod executor;
pub mod pipe;
pub mod postgres;
pub mod store;
pub mod strategy;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::{BackendError, ImportError, Result};
pub use executor::{CancelReport, ImportExecutor, InterruptOutcome};
pub use store::ImportStore;
pub use types::{Dataset, DataSource, Import, ImportOutcome, NewImport, SchemaRef, Vendor, Workspace};
