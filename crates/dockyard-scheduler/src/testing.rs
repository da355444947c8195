//! Test doubles for the engine and registry seams.

use async_trait::async_trait;
use bytes::Bytes;
use dockyard_core::engine::{ContainerEngine, EngineEvent, EventStream};
use dockyard_core::registry::{ImageRegistry, RegistryAuth, TagList};
use dockyard_core::{Error, Result, Submission, TeamId};
use futures::StreamExt;
use futures::stream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const REGISTRY: &str = "localhost:5000";

/// Image references pushed so far, shared between engine and registry.
pub type Pushed = Arc<Mutex<Vec<String>>>;

/// Engine that records what it is asked to do.
pub struct MockEngine {
    pushed: Pushed,
    built: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    build_delay: Duration,
    gate: Option<Arc<Semaphore>>,
    fail_build: bool,
    fail_push: bool,
    panic_build: bool,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MockEngine {
    pub fn new(pushed: Pushed) -> Self {
        Self {
            pushed,
            built: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            build_delay: Duration::from_millis(1),
            gate: None,
            fail_build: false,
            fail_push: false,
            panic_build: false,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = delay;
        self
    }

    /// Builds wait for a permit of `gate` before completing.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn failing_build(mut self) -> Self {
        self.fail_build = true;
        self
    }

    pub fn failing_push(mut self) -> Self {
        self.fail_push = true;
        self
    }

    pub fn panicking_build(mut self) -> Self {
        self.panic_build = true;
        self
    }

    /// Tags in the order their builds started.
    pub fn built(&self) -> Vec<String> {
        self.built.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    /// Highest number of builds observed running at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn build_image(&self, _context: Bytes, tag: &str) -> EventStream<'_> {
        let tag = tag.to_string();
        let step = stream::iter([Ok(EngineEvent::output("Step 1/2 : FROM scratch\n"))]);
        let finish = stream::once(async move {
            let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            self.built.lock().unwrap().push(tag.clone());

            if self.panic_build {
                panic!("engine crashed");
            }
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            tokio::time::sleep(self.build_delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail_build {
                Err(Error::Engine("The command returned a non-zero code: 1".to_string()))
            } else {
                Ok(EngineEvent::output(format!("Successfully tagged {}\n", tag)))
            }
        });
        step.chain(finish).boxed()
    }

    fn push_image(&self, tag: &str, _auth: &RegistryAuth) -> EventStream<'_> {
        let result = if self.fail_push {
            Err(Error::Engine("connection refused".to_string()))
        } else {
            self.pushed.lock().unwrap().push(tag.to_string());
            Ok(EngineEvent::status("Pushed"))
        };
        stream::iter([result]).boxed()
    }

    async fn remove_image(&self, tag: &str) -> Result<()> {
        self.removed.lock().unwrap().push(tag.to_string());
        Ok(())
    }
}

/// Registry listing whatever the engine pushed.
pub struct MockRegistry {
    pushed: Pushed,
    errors: Option<serde_json::Value>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self {
            pushed: Arc::new(Mutex::new(Vec::new())),
            errors: None,
        }
    }

    pub fn with_errors(mut self, errors: serde_json::Value) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn pushed(&self) -> Pushed {
        self.pushed.clone()
    }
}

#[async_trait]
impl ImageRegistry for MockRegistry {
    fn address(&self) -> &str {
        REGISTRY
    }

    fn auth_header(&self) -> RegistryAuth {
        RegistryAuth {
            server_address: REGISTRY.to_string(),
            username: None,
            password: None,
        }
    }

    async fn list_tags(&self, team_id: TeamId) -> Result<TagList> {
        let prefix = format!("{}/{}:", REGISTRY, Submission::repository(team_id));
        let tags = self
            .pushed
            .lock()
            .unwrap()
            .iter()
            .filter_map(|image| image.strip_prefix(&prefix).map(str::to_string))
            .collect();
        Ok(TagList {
            name: Some(Submission::repository(team_id)),
            tags: Some(tags),
            errors: self.errors.clone(),
        })
    }
}
