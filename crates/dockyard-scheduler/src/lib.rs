//! Submission scheduling for dockyard.
//!
//! Keeps one FIFO queue per team, caps the number of submissions building
//! at once and drives each dispatched submission through build, push and
//! verify while streaming engine output into a compressed log.

pub mod log;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use log::LogSink;
pub use pipeline::{BuildPipeline, PipelineOptions};
pub use queue::{QueueEntry, TeamQueues};
pub use scheduler::Scheduler;
