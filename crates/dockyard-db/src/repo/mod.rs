//! PostgreSQL repositories.

pub mod submission;

pub use submission::{PgSubmissionStore, SubmissionRow};
