//! In-memory submission store for development and tests.

use async_trait::async_trait;
use dockyard_core::store::SubmissionStore;
use dockyard_core::{Error, Result, Submission, SubmissionId, SubmissionStatus, TeamId};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    teams: HashSet<TeamId>,
    submissions: HashMap<SubmissionId, Submission>,
    /// Every status written for a submission, in write order.
    history: HashMap<SubmissionId, Vec<SubmissionStatus>>,
    failing_creates: u32,
    failing_status_updates: bool,
}

/// Process-local store. Keeps a write history per submission for auditing.
#[derive(Default)]
pub struct MemorySubmissionStore {
    state: Mutex<MemoryState>,
}

impl MemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store where the given teams exist.
    pub fn with_teams(teams: impl IntoIterator<Item = TeamId>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                teams: teams.into_iter().collect(),
                ..Default::default()
            }),
        }
    }

    pub async fn get(&self, id: SubmissionId) -> Option<Submission> {
        self.state.lock().await.submissions.get(&id).cloned()
    }

    /// Statuses written for a submission, starting with its creation.
    pub async fn history(&self, id: SubmissionId) -> Vec<SubmissionStatus> {
        self.state
            .lock()
            .await
            .history
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Make the next `count` creations fail with a persistence error.
    pub async fn fail_next_creates(&self, count: u32) {
        self.state.lock().await.failing_creates = count;
    }

    /// Make every status-only update fail with a persistence error.
    pub async fn fail_status_updates(&self, failing: bool) {
        self.state.lock().await.failing_status_updates = failing;
    }

    fn write(state: &mut MemoryState, submission: &Submission, full: bool) -> Result<()> {
        let stored = state
            .submissions
            .get_mut(&submission.id)
            .ok_or_else(|| Error::NotFound(format!("submission {}", submission.id)))?;
        stored.status = submission.status;
        if full {
            stored.image_name = submission.image_name.clone();
            stored.log_url = submission.log_url.clone();
        }
        state
            .history
            .entry(submission.id)
            .or_default()
            .push(submission.status);
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissionStore {
    async fn create_submission(&self, team_id: TeamId) -> Result<Submission> {
        let mut state = self.state.lock().await;
        if state.failing_creates > 0 {
            state.failing_creates -= 1;
            return Err(Error::Persistence("connection reset".to_string()));
        }

        let version = state
            .submissions
            .values()
            .filter(|s| s.team_id == team_id)
            .map(|s| s.version + 1)
            .max()
            .unwrap_or(0);

        let submission = Submission::new(team_id, version);
        state
            .history
            .insert(submission.id, vec![submission.status]);
        state.submissions.insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn update_status(&self, submission: &Submission) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.failing_status_updates {
            return Err(Error::Persistence("status update rejected".to_string()));
        }
        Self::write(&mut state, submission, false)
    }

    async fn update_submission(&self, submission: &Submission) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::write(&mut state, submission, true)
    }

    async fn team_exists(&self, team_id: TeamId) -> Result<bool> {
        Ok(self.state.lock().await.teams.contains(&team_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_versions_start_at_zero_and_increment_per_team() {
        let store = MemorySubmissionStore::with_teams([1, 2]);
        assert_eq!(store.create_submission(1).await.unwrap().version, 0);
        assert_eq!(store.create_submission(1).await.unwrap().version, 1);
        assert_eq!(store.create_submission(2).await.unwrap().version, 0);
        assert_eq!(store.create_submission(1).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_updates_are_recorded_in_history() {
        let store = MemorySubmissionStore::with_teams([1]);
        let mut submission = store.create_submission(1).await.unwrap();

        submission.advance(SubmissionStatus::Building).unwrap();
        store.update_status(&submission).await.unwrap();
        submission.advance(SubmissionStatus::Finished).unwrap();
        submission.image_name = Some("localhost:5000/team_1:0".to_string());
        store.update_submission(&submission).await.unwrap();

        assert_eq!(
            store.history(submission.id).await,
            vec![
                SubmissionStatus::Queued,
                SubmissionStatus::Building,
                SubmissionStatus::Finished
            ]
        );
        let stored = store.get(submission.id).await.unwrap();
        assert_eq!(stored.image_name, submission.image_name);
    }

    #[tokio::test]
    async fn test_status_update_does_not_touch_image_name() {
        let store = MemorySubmissionStore::with_teams([1]);
        let mut submission = store.create_submission(1).await.unwrap();
        submission.image_name = Some("ignored".to_string());
        submission.advance(SubmissionStatus::Building).unwrap();
        store.update_status(&submission).await.unwrap();

        assert!(store.get(submission.id).await.unwrap().image_name.is_none());
    }

    #[tokio::test]
    async fn test_unknown_submission_is_not_found() {
        let store = MemorySubmissionStore::new();
        let submission = Submission::new(1, 0);
        assert!(matches!(
            store.update_status(&submission).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_injected_create_failures() {
        let store = MemorySubmissionStore::with_teams([1]);
        store.fail_next_creates(2).await;
        assert!(store.create_submission(1).await.is_err());
        assert!(store.create_submission(1).await.is_err());
        assert_eq!(store.create_submission(1).await.unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_team_exists() {
        assert!(!MemorySubmissionStore::new().team_exists(3).await.unwrap());
        let store = MemorySubmissionStore::with_teams([3]);
        assert!(store.team_exists(3).await.unwrap());
        assert!(!store.team_exists(4).await.unwrap());
    }
}
