//! The submission scheduler.
//!
//! A single pull loop runs scheduling passes. Each pass drops resolved queue
//! heads, then dispatches queued heads oldest first while build permits are
//! available. The loop sleeps until an enqueue or a finished build wakes it,
//! the poll interval elapses, or shutdown is requested.

use bytes::Bytes;
use dockyard_config::{BuilderConfig, RetryConfig};
use dockyard_context::{ArchiveKind, ContextPreparer};
use dockyard_core::engine::ContainerEngine;
use dockyard_core::registry::ImageRegistry;
use dockyard_core::store::SubmissionStore;
use dockyard_core::{Error, Language, Result, Submission, SubmissionId, SubmissionStatus, TeamId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pipeline::{BuildPipeline, PipelineOptions};
use crate::queue::TeamQueues;
use crate::retry::with_retry;

/// Owns the team queues and the build permits.
pub struct Scheduler {
    inner: Arc<Inner>,
    runner: Mutex<Option<Runner>>,
}

struct Runner {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    queues: Mutex<TeamQueues>,
    /// Held from version assignment until the submission is queued, so each
    /// team's queue stays in version order.
    enqueue_lock: Mutex<()>,
    permits: Arc<Semaphore>,
    build_limit: usize,
    poll_interval: Duration,
    /// Wakes the pull loop.
    wake: Notify,
    /// Signalled whenever a build resolves.
    resolved: Notify,
    log_url_prefix: String,
    create_retry: RetryConfig,
    store: Arc<dyn SubmissionStore>,
    preparer: ContextPreparer,
    pipeline: BuildPipeline,
}

impl Scheduler {
    pub fn new(
        config: &BuilderConfig,
        engine: Arc<dyn ContainerEngine>,
        registry: Arc<dyn ImageRegistry>,
        store: Arc<dyn SubmissionStore>,
    ) -> Self {
        let pipeline = BuildPipeline::new(
            engine,
            registry,
            store.clone(),
            PipelineOptions::from(config),
        );
        let build_limit = config.build_limit.max(1);

        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(TeamQueues::new()),
                enqueue_lock: Mutex::new(()),
                permits: Arc::new(Semaphore::new(build_limit)),
                build_limit,
                poll_interval: config.poll_interval,
                wake: Notify::new(),
                resolved: Notify::new(),
                log_url_prefix: config.log_url_prefix(),
                create_retry: config.create_retry,
                store,
                preparer: ContextPreparer::new(config.recipe_dir.clone()),
                pipeline,
            }),
            runner: Mutex::new(None),
        }
    }

    /// Validate an upload, prepare its build context and queue it for the team.
    ///
    /// Input problems are reported before any submission record exists.
    pub async fn enqueue(
        &self,
        team_id: TeamId,
        language: Language,
        archive: Bytes,
    ) -> Result<SubmissionId> {
        if archive.is_empty() {
            return Err(Error::BadInput("submission archive is empty".to_string()));
        }
        let kind = ArchiveKind::sniff(&archive)?;
        if !self.inner.store.team_exists(team_id).await? {
            return Err(Error::BadInput(format!("no team exists with id {}", team_id)));
        }

        let context = self.inner.preparer.prepare(language, &archive).await?;

        let _ordered = self.inner.enqueue_lock.lock().await;
        let store = &self.inner.store;
        let mut submission = with_retry(self.inner.create_retry, "create submission", || {
            store.create_submission(team_id)
        })
        .await?;
        submission.log_url = Some(format!(
            "{}/{}",
            self.inner.log_url_prefix,
            submission.log_file_name()
        ));

        let id = submission.id;
        info!(
            submission_id = %id,
            team_id,
            version = submission.version,
            language = %language,
            archive = ?kind,
            "Submission queued"
        );
        self.inner.queues.lock().await.push(submission, context);
        self.inner.wake.notify_one();
        Ok(id)
    }

    /// Start the pull loop. Does nothing if it is already running.
    pub async fn start(&self) {
        let mut runner = self.runner.lock().await;
        if runner.is_some() {
            debug!("Scheduler already running");
            return;
        }

        let (shutdown, signal) = watch::channel(false);
        let handle = tokio::spawn(run_loop(self.inner.clone(), signal));
        *runner = Some(Runner { shutdown, handle });
        info!(build_limit = self.inner.build_limit, "Scheduler started");
    }

    /// Stop dispatching. Builds already in flight keep running.
    pub async fn stop(&self) {
        let Some(runner) = self.runner.lock().await.take() else {
            debug!("Scheduler already stopped");
            return;
        };

        let _ = runner.shutdown.send(true);
        if let Err(e) = runner.handle.await {
            error!(error = %e, "Scheduler loop ended abnormally");
        }
        info!("Scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.runner.lock().await.is_some()
    }

    /// Submissions currently holding a build permit.
    pub fn building_count(&self) -> usize {
        self.inner.build_limit - self.inner.permits.available_permits()
    }

    /// Current submission of a team: the head of its queue, or the last one resolved.
    pub async fn status_of(&self, team_id: TeamId) -> Result<Submission> {
        self.inner
            .queues
            .lock()
            .await
            .current(team_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no submission for team {}", team_id)))
    }

    pub async fn statuses_of(&self, team_ids: &[TeamId]) -> Vec<(TeamId, Option<Submission>)> {
        let queues = self.inner.queues.lock().await;
        team_ids
            .iter()
            .map(|team_id| (*team_id, queues.current(*team_id).cloned()))
            .collect()
    }

    /// Wait until no build is in flight and, while running, nothing is left queued.
    pub async fn drain(&self) {
        loop {
            let resolved = self.inner.resolved.notified();
            if self.is_idle().await {
                return;
            }
            tokio::select! {
                _ = resolved => {}
                _ = tokio::time::sleep(self.inner.poll_interval) => {}
            }
        }
    }

    async fn is_idle(&self) -> bool {
        if self.building_count() > 0 {
            return false;
        }
        !self.is_running().await || self.inner.queues.lock().await.pending() == 0
    }

    /// Run one scheduling pass immediately.
    pub async fn dispatch(&self) {
        dispatch_pass(&self.inner).await;
    }
}

async fn run_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        dispatch_pass(&inner).await;

        tokio::select! {
            _ = inner.wake.notified() => {}
            _ = tokio::time::sleep(inner.poll_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Scheduler loop exited");
}

async fn dispatch_pass(inner: &Arc<Inner>) {
    let launches = {
        let mut queues = inner.queues.lock().await;
        queues.prune();

        let mut launches = Vec::new();
        for team_id in queues.eligible() {
            let Ok(permit) = inner.permits.clone().try_acquire_owned() else {
                break;
            };
            if let Some((submission, context)) = queues.begin(team_id) {
                launches.push((submission, context, permit));
            }
        }
        launches
    };

    for (submission, context, permit) in launches {
        launch(inner.clone(), submission, context, permit).await;
    }
}

async fn launch(
    inner: Arc<Inner>,
    submission: Submission,
    context: Option<Bytes>,
    permit: OwnedSemaphorePermit,
) {
    if let Err(e) = inner.store.update_status(&submission).await {
        error!(submission_id = %submission.id, error = %e, "Failed to persist building status");
        inner.abandon(submission, permit).await;
        return;
    }
    let Some(context) = context else {
        error!(submission_id = %submission.id, "Build context missing at dispatch");
        inner.abandon(submission, permit).await;
        return;
    };

    debug!(
        submission_id = %submission.id,
        building = inner.build_limit - inner.permits.available_permits(),
        "Dispatching build"
    );

    tokio::spawn(async move {
        let fallback = submission.clone();
        let runner = inner.clone();
        let result = tokio::spawn(async move { runner.pipeline.run(submission, context).await }).await;

        let resolved = match result {
            Ok(done) if done.status.is_terminal() => done,
            Ok(done) => inner.fail(done).await,
            Err(e) => {
                error!(submission_id = %fallback.id, error = %e, "Build task panicked");
                inner.fail(fallback).await
            }
        };
        inner.finish(resolved, permit).await;
    });
}

impl Inner {
    /// Mark a submission failed and persist it on a best-effort basis.
    async fn fail(&self, mut submission: Submission) -> Submission {
        if let Err(e) = submission.advance(SubmissionStatus::Failed) {
            warn!(submission_id = %submission.id, error = %e, "Cannot mark submission failed");
            return submission;
        }
        submission.image_name = None;
        if let Err(e) = self.store.update_submission(&submission).await {
            error!(submission_id = %submission.id, error = %e, "Failed to persist failed status");
        }
        submission
    }

    async fn abandon(&self, submission: Submission, permit: OwnedSemaphorePermit) {
        let failed = self.fail(submission).await;
        self.finish(failed, permit).await;
    }

    /// Record the resolved submission, release its permit and wake the loop.
    async fn finish(&self, submission: Submission, permit: OwnedSemaphorePermit) {
        self.queues.lock().await.record(submission);
        drop(permit);
        self.wake.notify_one();
        self.resolved.notify_waiters();
    }
}
