//! `conduit-core`: identifiers, configuration and the domain event
//! vocabulary shared by the scheduler and the import pipeline.

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use error::{CoreError, Result};
