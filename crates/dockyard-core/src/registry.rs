//! Image registry seam and tag-list verification.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, Submission, TeamId};

/// Credentials handed to the engine when pushing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAuth {
    #[serde(rename = "serveraddress")]
    pub server_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Body of a `GET /v2/<name>/tags/list` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagList {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub errors: Option<serde_json::Value>,
}

impl TagList {
    /// Confirm that `version` is listed for the team.
    pub fn verify_version(&self, team_id: TeamId, version: i32) -> Result<()> {
        if let Some(errors) = &self.errors {
            return Err(Error::Registry(format!(
                "tag list for {} reported errors: {}",
                Submission::repository(team_id),
                errors
            )));
        }

        let expected = version.to_string();
        let found = self
            .tags
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|tag| *tag == expected);

        if found {
            Ok(())
        } else {
            Err(Error::NotFound(format!(
                "tag {} not listed for {}",
                expected,
                Submission::repository(team_id)
            )))
        }
    }
}

/// Trait for registries that can confirm a push landed.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// `host:port` images are tagged with.
    fn address(&self) -> &str;

    /// Credentials to push with.
    fn auth_header(&self) -> RegistryAuth;

    /// List the tags of a team's repository.
    async fn list_tags(&self, team_id: TeamId) -> Result<TagList>;

    /// Succeed only when `version` is listed for the team.
    async fn verify_push(&self, team_id: TeamId, version: i32) -> Result<()> {
        self.list_tags(team_id)
            .await?
            .verify_version(team_id, version)
    }
}
