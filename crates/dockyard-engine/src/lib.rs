//! Container engine backends for the dockyard submission builder.
//!
//! Provides the Docker Engine implementation of
//! [`dockyard_core::engine::ContainerEngine`].

pub mod docker;

pub use docker::DockerEngine;
pub use dockyard_core::engine::{ContainerEngine, EngineEvent, EventStream};
