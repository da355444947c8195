//! Build, push and verify a single submission.

use bytes::Bytes;
use dockyard_config::BuilderConfig;
use dockyard_core::engine::{ContainerEngine, EventStream};
use dockyard_core::registry::{ImageRegistry, RegistryAuth};
use dockyard_core::store::SubmissionStore;
use dockyard_core::{Error, Result, Submission, SubmissionStatus, TeamId};
use futures::StreamExt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::log::LogSink;

/// Pipeline knobs taken from the builder configuration.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Bound on each stage; `None` waits forever.
    pub stage_timeout: Option<Duration>,
    /// Remove the local image once the submission is resolved.
    pub remove_local_image: bool,
    /// Directory build logs are written to.
    pub output_dir: PathBuf,
}

impl From<&BuilderConfig> for PipelineOptions {
    fn from(config: &BuilderConfig) -> Self {
        Self {
            stage_timeout: config.stage_timeout,
            remove_local_image: config.remove_local_images,
            output_dir: config.output_dir.clone(),
        }
    }
}

/// Drives a submission through build, push and verify.
pub struct BuildPipeline {
    engine: Arc<dyn ContainerEngine>,
    registry: Arc<dyn ImageRegistry>,
    store: Arc<dyn SubmissionStore>,
    options: PipelineOptions,
}

impl BuildPipeline {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        registry: Arc<dyn ImageRegistry>,
        store: Arc<dyn SubmissionStore>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            engine,
            registry,
            store,
            options,
        }
    }

    pub fn log_path(&self, submission: &Submission) -> PathBuf {
        self.options.output_dir.join(submission.log_file_name())
    }

    /// Build `image` from `context`, streaming engine output into `log`.
    pub async fn build(&self, context: Bytes, image: &str, log: &mut LogSink) -> Result<()> {
        let events = self.engine.build_image(context, image);
        let result = self.consume("build", events, log).await;
        if let Err(e) = &result {
            log.failure_banner("build", e);
        }
        result
    }

    pub async fn push(&self, image: &str, auth: &RegistryAuth, log: &mut LogSink) -> Result<()> {
        let events = self.engine.push_image(image, auth);
        let result = self.consume("push", events, log).await;
        if let Err(e) = &result {
            log.failure_banner("push", e);
        }
        result
    }

    /// Confirm the registry lists `version` for the team.
    pub async fn verify(&self, team_id: TeamId, version: i32, log: &mut LogSink) -> Result<()> {
        let result = self
            .bounded("verify", self.registry.verify_push(team_id, version))
            .await;
        match &result {
            Ok(()) => log.write_line("push successful"),
            Err(e) => log.failure_banner("verify", e),
        }
        result
    }

    /// Run all stages for a building submission and persist the outcome.
    ///
    /// The returned submission is finished with its image name set, or
    /// failed without one.
    pub async fn run(&self, mut submission: Submission, context: Bytes) -> Submission {
        let image = submission.target_image(self.registry.address());
        info!(
            submission_id = %submission.id,
            team_id = submission.team_id,
            version = submission.version,
            image = %image,
            "Starting build"
        );

        let outcome = match LogSink::create(self.log_path(&submission)).await {
            Ok(mut log) => {
                let outcome = self.stages(&submission, context, &image, &mut log).await;
                if let Err(e) = log.close().await {
                    warn!(submission_id = %submission.id, error = %e, "Failed to close build log");
                }
                outcome
            }
            Err(e) => Err(e),
        };

        if self.options.remove_local_image {
            if let Err(e) = self.engine.remove_image(&image).await {
                debug!(image = %image, error = %e, "Local image not removed");
            }
        }

        let next = match &outcome {
            Ok(()) => SubmissionStatus::Finished,
            Err(e) => {
                warn!(submission_id = %submission.id, error = %e, "Build failed");
                SubmissionStatus::Failed
            }
        };
        if let Err(e) = submission.advance(next) {
            error!(submission_id = %submission.id, error = %e, "Cannot resolve submission");
            return submission;
        }
        if next == SubmissionStatus::Finished {
            submission.image_name = Some(image);
        }

        if let Err(e) = self.store.update_submission(&submission).await {
            error!(submission_id = %submission.id, error = %e, "Failed to persist build result");
        }
        info!(submission_id = %submission.id, status = %submission.status, "Build resolved");
        submission
    }

    async fn stages(
        &self,
        submission: &Submission,
        context: Bytes,
        image: &str,
        log: &mut LogSink,
    ) -> Result<()> {
        self.build(context, image, log).await?;
        self.push(image, &self.registry.auth_header(), log).await?;
        self.verify(submission.team_id, submission.version, log).await
    }

    async fn consume(&self, stage: &str, mut events: EventStream<'_>, log: &mut LogSink) -> Result<()> {
        let drain = async {
            while let Some(event) = events.next().await {
                log.write_event(&event?);
            }
            Ok::<(), Error>(())
        };
        self.bounded(stage, drain).await
    }

    async fn bounded<F>(&self, stage: &str, future: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        match self.options.stage_timeout {
            Some(limit) => tokio::time::timeout(limit, future).await.map_err(|_| {
                Error::Timeout(format!("{} did not complete within {:?}", stage, limit))
            })?,
            None => future.await,
        }
    }
}
