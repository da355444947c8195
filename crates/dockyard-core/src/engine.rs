//! Container engine seam.
//!
//! The engine builds images from a tar context, pushes them to a registry
//! and removes local copies. Output is streamed as it is produced.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::registry::RegistryAuth;

/// One progress event reported by the engine during a build or push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Raw build output, usually ending with a newline.
    pub stream: Option<String>,
    /// Layer or step id the status refers to.
    pub id: Option<String>,
    pub status: Option<String>,
    pub progress: Option<String>,
}

impl EngineEvent {
    /// An event carrying raw build output.
    pub fn output(text: impl Into<String>) -> Self {
        Self {
            stream: Some(text.into()),
            ..Default::default()
        }
    }

    /// An event carrying a status message.
    pub fn status(text: impl Into<String>) -> Self {
        Self {
            status: Some(text.into()),
            ..Default::default()
        }
    }

    /// Render the event as it should appear in a build log.
    pub fn render(&self) -> String {
        if let Some(stream) = &self.stream {
            return stream.clone();
        }

        let mut line = String::new();
        if let Some(id) = &self.id {
            line.push_str(id);
            line.push_str(": ");
        }
        if let Some(status) = &self.status {
            line.push_str(status);
        }
        if let Some(progress) = &self.progress {
            line.push(' ');
            line.push_str(progress);
        }
        line.push('\n');
        line
    }
}

/// Stream of engine events; an `Err` item terminates the operation.
pub type EventStream<'a> = BoxStream<'a, Result<EngineEvent>>;

/// Trait for container engines.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Name of this engine.
    fn name(&self) -> &'static str;

    /// Build an image tagged `tag` from a gzip-compressed tar context.
    fn build_image(&self, context: Bytes, tag: &str) -> EventStream<'_>;

    /// Push a previously built image.
    fn push_image(&self, tag: &str, auth: &RegistryAuth) -> EventStream<'_>;

    /// Remove a local image.
    async fn remove_image(&self, tag: &str) -> Result<()>;
}
