//! Docker Engine implementation.

use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::image::{BuildImageOptions, PushImageOptions, RemoveImageOptions};
use bollard::models::{BuildInfo, PushImageInfo};
use bytes::Bytes;
use dockyard_core::engine::{ContainerEngine, EngineEvent, EventStream};
use dockyard_core::registry::RegistryAuth;
use dockyard_core::{Error, Result};
use futures::StreamExt;
use tracing::{debug, info};

/// Builds and pushes images through a Docker daemon.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Engine(format!("failed to connect to Docker: {}", e)))?;
        Ok(Self { docker })
    }

    /// Connect to a daemon listening on `host:port` over plain HTTP.
    pub fn connect_http(host: &str, port: u16, timeout_secs: u64) -> Result<Self> {
        let addr = format!("http://{}:{}", host, port);
        info!(addr = %addr, "Connecting to Docker engine");
        let docker = Docker::connect_with_http(&addr, timeout_secs, bollard::API_DEFAULT_VERSION)
            .map_err(|e| Error::Engine(format!("failed to connect to Docker at {}: {}", addr, e)))?;
        Ok(Self { docker })
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

/// Split `registry:5000/team_7:3` into `("registry:5000/team_7", Some("3"))`.
fn split_reference(image: &str) -> (&str, Option<&str>) {
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let colon = name_start + i;
            (&image[..colon], Some(&image[colon + 1..]))
        }
        None => (image, None),
    }
}

fn build_event(info: BuildInfo) -> Result<EngineEvent> {
    if let Some(error) = info.error {
        return Err(Error::Engine(error));
    }
    Ok(EngineEvent {
        stream: info.stream,
        id: info.id,
        status: info.status,
        progress: info.progress,
    })
}

fn push_event(info: PushImageInfo) -> Result<EngineEvent> {
    if let Some(error) = info.error {
        return Err(Error::Engine(error));
    }
    Ok(EngineEvent {
        stream: None,
        id: None,
        status: info.status,
        progress: info.progress,
    })
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn build_image(&self, context: Bytes, tag: &str) -> EventStream<'_> {
        info!(image = %tag, bytes = context.len(), "Building image");
        let options = BuildImageOptions {
            t: tag.to_string(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let stream = self.docker.build_image(options, None, Some(context));
        Box::pin(stream.map(|result| match result {
            Ok(info) => build_event(info),
            Err(e) => Err(Error::Engine(format!("build failed: {}", e))),
        }))
    }

    fn push_image(&self, tag: &str, auth: &RegistryAuth) -> EventStream<'_> {
        info!(image = %tag, registry = %auth.server_address, "Pushing image");
        let (name, version) = split_reference(tag);
        let options = version.map(|v| PushImageOptions { tag: v.to_string() });
        let credentials = DockerCredentials {
            username: auth.username.clone(),
            password: auth.password.clone(),
            serveraddress: Some(auth.server_address.clone()),
            ..Default::default()
        };

        let stream = self.docker.push_image(name, options, Some(credentials));
        Box::pin(stream.map(|result| match result {
            Ok(info) => push_event(info),
            Err(e) => Err(Error::Engine(format!("push failed: {}", e))),
        }))
    }

    async fn remove_image(&self, tag: &str) -> Result<()> {
        let options = RemoveImageOptions {
            force: true,
            ..Default::default()
        };
        let removed = self
            .docker
            .remove_image(tag, Some(options), None)
            .await
            .map_err(|e| Error::Engine(format!("failed to remove image {}: {}", tag, e)))?;
        debug!(image = %tag, layers = removed.len(), "Removed local image");
        Ok(())
    }
}
