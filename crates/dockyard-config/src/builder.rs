//! Builder configuration parsing.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything the scheduler, pipeline and clients need at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Maximum number of submissions building at once, across all teams.
    pub build_limit: usize,
    /// Upper bound between two scheduling passes when nothing wakes the loop.
    pub poll_interval: Duration,
    /// Directory compressed build logs are written to.
    pub output_dir: PathBuf,
    /// Public mount point log urls are relative to.
    pub log_mount: String,
    /// Root holding one `<language>/Dockerfile` recipe per language.
    pub recipe_dir: PathBuf,
    pub registry: RegistryConfig,
    pub docker: DockerConfig,
    /// Bound on a single build or push stream; `None` waits forever.
    pub stage_timeout: Option<Duration>,
    /// Remove the local image once a submission reaches a terminal state.
    pub remove_local_images: bool,
    /// Retry policy for creating submission records.
    pub create_retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub host: String,
    pub port: u16,
    pub scheme: String,
    /// Basic auth for the tag-list endpoint; both or neither.
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RegistryConfig {
    /// `host:port`, the prefix of every image name.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        Some((self.username.as_deref()?, self.password.as_deref()?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Remote engine host; the local socket is used when unset.
    pub host: Option<String>,
    pub port: u16,
    /// Client-side request timeout in seconds.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            build_limit: 4,
            poll_interval: Duration::from_millis(100),
            output_dir: PathBuf::from("output"),
            log_mount: "/builder".to_string(),
            recipe_dir: PathBuf::from("recipes"),
            registry: RegistryConfig {
                host: "localhost".to_string(),
                port: 5000,
                scheme: "http".to_string(),
                username: None,
                password: None,
            },
            docker: DockerConfig {
                host: None,
                port: 2375,
                timeout_secs: 120,
            },
            stage_timeout: Some(Duration::from_secs(30 * 60)),
            remove_local_images: true,
            create_retry: RetryConfig {
                attempts: 3,
                delay: Duration::from_millis(500),
            },
        }
    }
}

impl BuilderConfig {
    /// Url prefix log files are served under, e.g. `/builder/output`.
    pub fn log_url_prefix(&self) -> String {
        let dir = self
            .output_dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        format!("{}/{}", self.log_mount.trim_end_matches('/'), dir)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.build_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "build-limit".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "poll-interval-ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.create_retry.attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "create-retry".to_string(),
                message: "attempts must be at least 1".to_string(),
            });
        }
        if self.registry.host.is_empty() {
            return Err(ConfigError::MissingField("registry host".to_string()));
        }
        if self.registry.username.is_some() != self.registry.password.is_some() {
            return Err(ConfigError::InvalidValue {
                field: "registry".to_string(),
                message: "user and password must be given together".to_string(),
            });
        }
        Ok(())
    }
}

/// Read and parse a configuration file.
pub fn load_builder_config(path: &Path) -> ConfigResult<BuilderConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_builder_config(&text)
}

/// Parse builder configuration from KDL text.
pub fn parse_builder_config(kdl: &str) -> ConfigResult<BuilderConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = BuilderConfig::default();

    for node in doc.nodes() {
        let field = node.name().value();
        match field {
            "build-limit" => {
                config.build_limit = to_unsigned(field, require_integer_arg(node)?)? as usize;
            }
            "poll-interval-ms" => {
                config.poll_interval =
                    Duration::from_millis(to_unsigned(field, require_integer_arg(node)?)?);
            }
            "output-dir" => {
                config.output_dir = PathBuf::from(require_string_arg(node)?);
            }
            "log-mount" => {
                config.log_mount = require_string_arg(node)?;
            }
            "recipe-dir" => {
                config.recipe_dir = PathBuf::from(require_string_arg(node)?);
            }
            "registry" => {
                if let Some(host) = get_string_prop(node, "host") {
                    config.registry.host = host;
                }
                if let Some(port) = get_integer_prop(node, "port") {
                    config.registry.port = to_port("registry port", port)?;
                }
                if let Some(scheme) = get_string_prop(node, "scheme") {
                    config.registry.scheme = scheme;
                }
                if let Some(user) = get_string_prop(node, "user") {
                    config.registry.username = Some(user);
                }
                if let Some(password) = get_string_prop(node, "password") {
                    config.registry.password = Some(password);
                }
            }
            "docker" => {
                if let Some(host) = get_string_prop(node, "host") {
                    config.docker.host = Some(host);
                }
                if let Some(port) = get_integer_prop(node, "port") {
                    config.docker.port = to_port("docker port", port)?;
                }
                if let Some(timeout) = get_integer_prop(node, "timeout-secs") {
                    config.docker.timeout_secs = to_unsigned("docker timeout-secs", timeout)?;
                }
            }
            "stage-timeout-secs" => {
                let secs = to_unsigned(field, require_integer_arg(node)?)?;
                // 0 disables the timeout
                config.stage_timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
            "remove-local-images" => {
                config.remove_local_images = require_bool_arg(node)?;
            }
            "create-retry" => {
                if let Some(attempts) = get_integer_prop(node, "attempts") {
                    config.create_retry.attempts =
                        to_unsigned("create-retry attempts", attempts)? as u32;
                }
                if let Some(delay) = get_integer_prop(node, "delay-ms") {
                    config.create_retry.delay =
                        Duration::from_millis(to_unsigned("create-retry delay-ms", delay)?);
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    config.validate()?;
    Ok(config)
}

fn first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

fn require_string_arg(node: &KdlNode) -> ConfigResult<String> {
    first_arg(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
        .ok_or_else(|| ConfigError::MissingField(format!("{} value", node.name().value())))
}

fn require_integer_arg(node: &KdlNode) -> ConfigResult<i128> {
    first_arg(node)
        .and_then(|v| v.as_integer())
        .ok_or_else(|| ConfigError::MissingField(format!("{} value", node.name().value())))
}

fn require_bool_arg(node: &KdlNode) -> ConfigResult<bool> {
    first_arg(node)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| ConfigError::MissingField(format!("{} value", node.name().value())))
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_integer_prop(node: &KdlNode, name: &str) -> Option<i128> {
    node.get(name).and_then(|v| v.as_integer())
}

fn to_unsigned(field: &str, value: i128) -> ConfigResult<u64> {
    u64::try_from(value).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("{} is not a non-negative integer", value),
    })
}

fn to_port(field: &str, value: i128) -> ConfigResult<u16> {
    u16::try_from(value).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("{} is not a valid port", value),
    })
}
