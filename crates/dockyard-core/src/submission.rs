//! Submission records and the build status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result, SubmissionId};

/// Identifier of a competing team.
pub type TeamId = i64;

/// Progress of a submission through the builder.
///
/// Transitions are strictly `Queued -> Building -> {Finished | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Queued,
    Building,
    Finished,
    Failed,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Finished | SubmissionStatus::Failed)
    }

    /// Whether moving from `self` to `next` respects the state machine.
    pub fn can_advance_to(&self, next: SubmissionStatus) -> bool {
        matches!(
            (self, next),
            (SubmissionStatus::Queued, SubmissionStatus::Building)
                | (SubmissionStatus::Queued, SubmissionStatus::Failed)
                | (SubmissionStatus::Building, SubmissionStatus::Finished)
                | (SubmissionStatus::Building, SubmissionStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Queued => "queued",
            SubmissionStatus::Building => "building",
            SubmissionStatus::Finished => "finished",
            SubmissionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(SubmissionStatus::Queued),
            "building" => Ok(SubmissionStatus::Building),
            "finished" => Ok(SubmissionStatus::Finished),
            "failed" => Ok(SubmissionStatus::Failed),
            other => Err(Error::Persistence(format!(
                "unknown submission status '{}'",
                other
            ))),
        }
    }
}

/// One team's one build attempt at a given version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub team_id: TeamId,
    /// Latest existing version for the team plus one; never reassigned.
    pub version: i32,
    pub status: SubmissionStatus,
    /// Set only once the image has been pushed and verified.
    pub image_name: Option<String>,
    pub log_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    /// A freshly created, queued submission.
    pub fn new(team_id: TeamId, version: i32) -> Self {
        Self {
            id: SubmissionId::new(),
            team_id,
            version,
            status: SubmissionStatus::Queued,
            image_name: None,
            log_url: None,
            created_at: Utc::now(),
        }
    }

    /// Move to `next`, rejecting any transition outside the state machine.
    pub fn advance(&mut self, next: SubmissionStatus) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Repository name of a team's images in the registry.
    pub fn repository(team_id: TeamId) -> String {
        format!("team_{}", team_id)
    }

    /// Fully qualified image reference this submission is built and pushed as.
    pub fn target_image(&self, registry: &str) -> String {
        format!(
            "{}/{}:{}",
            registry,
            Self::repository(self.team_id),
            self.version
        )
    }

    /// File name of the compressed build log.
    pub fn log_file_name(&self) -> String {
        format!("team_{}_{}.log.gz", self.team_id, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal() {
        assert!(!SubmissionStatus::Queued.is_terminal());
        assert!(!SubmissionStatus::Building.is_terminal());
        assert!(SubmissionStatus::Finished.is_terminal());
        assert!(SubmissionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        use SubmissionStatus::*;
        assert!(Queued.can_advance_to(Building));
        assert!(Building.can_advance_to(Finished));
        assert!(Building.can_advance_to(Failed));
        assert!(Queued.can_advance_to(Failed));

        assert!(!Queued.can_advance_to(Finished));
        assert!(!Building.can_advance_to(Queued));
        assert!(!Building.can_advance_to(Building));
        assert!(!Finished.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Building));
    }

    #[test]
    fn test_advance_rejects_regression() {
        let mut submission = Submission::new(7, 0);
        submission.advance(SubmissionStatus::Building).unwrap();
        submission.advance(SubmissionStatus::Finished).unwrap();

        let err = submission.advance(SubmissionStatus::Building).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(submission.status, SubmissionStatus::Finished);
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            SubmissionStatus::Queued,
            SubmissionStatus::Building,
            SubmissionStatus::Finished,
            SubmissionStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<SubmissionStatus>().unwrap(), status);
        }
        assert!("succeeded".parse::<SubmissionStatus>().is_err());
    }

    #[test]
    fn test_target_image_and_log_name() {
        let submission = Submission::new(7, 3);
        assert_eq!(
            submission.target_image("localhost:5000"),
            "localhost:5000/team_7:3"
        );
        assert_eq!(submission.log_file_name(), "team_7_3.log.gz");
    }

    #[test]
    fn test_new_submission_is_queued_without_image() {
        let submission = Submission::new(1, 0);
        assert_eq!(submission.status, SubmissionStatus::Queued);
        assert!(submission.image_name.is_none());
        assert!(submission.log_url.is_none());
    }
}
