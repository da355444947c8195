//! Per-team FIFO queues.

use bytes::Bytes;
use dockyard_core::{Submission, SubmissionStatus, TeamId};
use std::collections::{HashMap, VecDeque};

/// A submission waiting in (or at the head of) its team's queue.
#[derive(Debug)]
pub struct QueueEntry {
    pub submission: Submission,
    /// Prepared build context, taken when the submission is dispatched.
    pub context: Option<Bytes>,
}

/// One FIFO queue per team plus the last resolved submission of each team.
///
/// Only the head of a queue may be building. A head stays in place until it
/// is finished or failed and is then dropped by [`TeamQueues::prune`].
#[derive(Debug, Default)]
pub struct TeamQueues {
    queues: HashMap<TeamId, VecDeque<QueueEntry>>,
    latest: HashMap<TeamId, Submission>,
}

impl TeamQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, submission: Submission, context: Bytes) {
        self.queues
            .entry(submission.team_id)
            .or_default()
            .push_back(QueueEntry {
                submission,
                context: Some(context),
            });
    }

    pub fn head(&self, team_id: TeamId) -> Option<&Submission> {
        self.queues
            .get(&team_id)
            .and_then(|queue| queue.front())
            .map(|entry| &entry.submission)
    }

    /// The team's active submission, or its last resolved one.
    pub fn current(&self, team_id: TeamId) -> Option<&Submission> {
        self.head(team_id).or_else(|| self.latest.get(&team_id))
    }

    /// Number of submissions still waiting to be dispatched.
    pub fn pending(&self) -> usize {
        self.queues
            .values()
            .flat_map(|queue| queue.iter())
            .filter(|entry| entry.submission.status == SubmissionStatus::Queued)
            .count()
    }

    /// Drop resolved heads, remembering each as its team's latest submission.
    pub fn prune(&mut self) {
        for (team_id, queue) in self.queues.iter_mut() {
            while queue
                .front()
                .is_some_and(|entry| entry.submission.status.is_terminal())
            {
                if let Some(entry) = queue.pop_front() {
                    self.latest.insert(*team_id, entry.submission);
                }
            }
        }
        self.queues.retain(|_, queue| !queue.is_empty());
    }

    /// Teams whose head is queued, oldest head first.
    pub fn eligible(&self) -> Vec<TeamId> {
        let mut heads: Vec<&Submission> = self
            .queues
            .values()
            .filter_map(|queue| queue.front())
            .map(|entry| &entry.submission)
            .filter(|submission| submission.status == SubmissionStatus::Queued)
            .collect();
        heads.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_uuid().cmp(b.id.as_uuid()))
        });
        heads.into_iter().map(|submission| submission.team_id).collect()
    }

    /// Mark the team's head as building and hand out its context.
    ///
    /// Returns `None` when the head is not queued.
    pub fn begin(&mut self, team_id: TeamId) -> Option<(Submission, Option<Bytes>)> {
        let entry = self.queues.get_mut(&team_id)?.front_mut()?;
        entry.submission.advance(SubmissionStatus::Building).ok()?;
        Some((entry.submission.clone(), entry.context.take()))
    }

    /// Store the latest state of a submission reported by a build task.
    pub fn record(&mut self, submission: Submission) {
        let slot = self
            .queues
            .get_mut(&submission.team_id)
            .and_then(|queue| queue.iter_mut().find(|entry| entry.submission.id == submission.id));

        match slot {
            Some(entry) => entry.submission = submission,
            None => {
                self.latest.insert(submission.team_id, submission);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use dockyard_core::SubmissionId;

    impl TeamQueues {
        fn find(&self, id: SubmissionId) -> Option<&Submission> {
            self.queues
                .values()
                .flat_map(|queue| queue.iter())
                .map(|entry| &entry.submission)
                .find(|submission| submission.id == id)
        }
    }

    fn submission(team_id: TeamId, version: i32, age_secs: i64) -> Submission {
        let mut submission = Submission::new(team_id, version);
        submission.created_at -= Duration::seconds(age_secs);
        submission
    }

    #[test]
    fn test_only_head_begins() {
        let mut queues = TeamQueues::new();
        queues.push(submission(1, 0, 0), Bytes::from_static(b"a"));
        queues.push(submission(1, 1, 0), Bytes::from_static(b"b"));

        let (started, context) = queues.begin(1).unwrap();
        assert_eq!(started.version, 0);
        assert_eq!(started.status, SubmissionStatus::Building);
        assert_eq!(context, Some(Bytes::from_static(b"a")));

        // head is building, so nothing else from team 1 is eligible
        assert!(queues.eligible().is_empty());
        assert!(queues.begin(1).is_none());
    }

    #[test]
    fn test_eligible_orders_by_age() {
        let mut queues = TeamQueues::new();
        queues.push(submission(1, 0, 5), Bytes::new());
        queues.push(submission(2, 0, 30), Bytes::new());
        queues.push(submission(3, 0, 10), Bytes::new());

        assert_eq!(queues.eligible(), vec![2, 3, 1]);
    }

    #[test]
    fn test_prune_advances_queue_and_keeps_latest() {
        let mut queues = TeamQueues::new();
        queues.push(submission(1, 0, 0), Bytes::new());
        queues.push(submission(1, 1, 0), Bytes::new());

        let (mut first, _) = queues.begin(1).unwrap();
        first.advance(SubmissionStatus::Finished).unwrap();
        queues.record(first.clone());
        queues.prune();

        assert_eq!(queues.head(1).unwrap().version, 1);
        assert_eq!(queues.pending(), 1);

        let (mut second, _) = queues.begin(1).unwrap();
        second.advance(SubmissionStatus::Failed).unwrap();
        queues.record(second);
        queues.prune();

        assert!(queues.head(1).is_none());
        let current = queues.current(1).unwrap();
        assert_eq!(current.version, 1);
        assert_eq!(current.status, SubmissionStatus::Failed);
        assert!(queues.find(first.id).is_none());
    }

    #[test]
    fn test_context_is_taken_once() {
        let mut queues = TeamQueues::new();
        let entry = submission(4, 0, 0);
        let id = entry.id;
        queues.push(entry, Bytes::from_static(b"ctx"));

        let (_, context) = queues.begin(4).unwrap();
        assert!(context.is_some());
        assert_eq!(queues.find(id).unwrap().status, SubmissionStatus::Building);
        assert!(queues.queues[&4][0].context.is_none());
    }
}
