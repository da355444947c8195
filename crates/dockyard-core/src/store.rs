//! Persistence contract for submissions.

use async_trait::async_trait;

use crate::{Result, Submission, TeamId};

/// Store owning the submission schema. The builder only needs these calls.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Create a queued submission with the team's next version.
    async fn create_submission(&self, team_id: TeamId) -> Result<Submission>;

    /// Persist only the status of a submission.
    async fn update_status(&self, submission: &Submission) -> Result<()>;

    /// Persist status, image name and log url.
    async fn update_submission(&self, submission: &Submission) -> Result<()>;

    async fn team_exists(&self, team_id: TeamId) -> Result<bool>;
}
