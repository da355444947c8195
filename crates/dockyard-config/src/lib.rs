//! KDL configuration parsing for the dockyard submission builder.
//!
//! A single `dockyard.kdl` file configures the scheduler, the container
//! engine connection, the registry and the on-disk layout. Every key is
//! optional and falls back to a default.

pub mod builder;
pub mod error;

pub use builder::{
    BuilderConfig, DockerConfig, RegistryConfig, RetryConfig, load_builder_config,
    parse_builder_config,
};
pub use error::{ConfigError, ConfigResult};
