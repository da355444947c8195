//! Core domain types and traits for the dockyard submission builder.
//!
//! This crate contains:
//! - Submission records, identifiers and the status state machine
//! - The closed set of supported submission languages
//! - The container engine, image registry and submission store seams

pub mod engine;
pub mod error;
pub mod id;
pub mod language;
pub mod registry;
pub mod store;
pub mod submission;

pub use error::{Error, Result};
pub use id::SubmissionId;
pub use language::Language;
pub use submission::{Submission, SubmissionStatus, TeamId};
