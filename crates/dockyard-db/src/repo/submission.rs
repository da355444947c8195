//! Submission repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dockyard_core::store::SubmissionStore;
use dockyard_core::{Submission, SubmissionId, TeamId};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{DbError, DbResult};

const COLUMNS: &str = "id, team_id, version, status, image_name, log_url, created_at";

/// A submission as stored in PostgreSQL.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubmissionRow {
    pub id: uuid::Uuid,
    pub team_id: i64,
    pub version: i32,
    pub status: String,
    pub image_name: Option<String>,
    pub log_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<SubmissionRow> for Submission {
    type Error = DbError;

    fn try_from(row: SubmissionRow) -> DbResult<Self> {
        let status = row
            .status
            .parse()
            .map_err(|e: dockyard_core::Error| DbError::InvalidRow(e.to_string()))?;
        Ok(Submission {
            id: SubmissionId::from(row.id),
            team_id: row.team_id,
            version: row.version,
            status,
            image_name: row.image_name,
            log_url: row.log_url,
            created_at: row.created_at,
        })
    }
}

/// PostgreSQL implementation of SubmissionStore.
pub struct PgSubmissionStore {
    pool: PgPool,
}

impl PgSubmissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_next_version(&self, team_id: TeamId) -> DbResult<Submission> {
        let row = sqlx::query_as::<_, SubmissionRow>(&format!(
            r#"
            INSERT INTO submissions (id, team_id, version, status, created_at, updated_at)
            VALUES (
                $1,
                $2,
                COALESCE((SELECT MAX(version) + 1 FROM submissions WHERE team_id = $2), 0),
                'queued',
                NOW(),
                NOW()
            )
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(uuid::Uuid::now_v7())
        .bind(team_id)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn set_status(&self, submission: &Submission) -> DbResult<()> {
        let result = sqlx::query("UPDATE submissions SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(submission.id.as_uuid())
            .bind(submission.status.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("submission {}", submission.id)));
        }
        Ok(())
    }

    async fn set_submission(&self, submission: &Submission) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE submissions
            SET status = $2, image_name = $3, log_url = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(submission.id.as_uuid())
        .bind(submission.status.as_str())
        .bind(submission.image_name.as_deref())
        .bind(submission.log_url.as_deref())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("submission {}", submission.id)));
        }
        Ok(())
    }

    async fn has_team(&self, team_id: TeamId) -> DbResult<bool> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM teams WHERE id = $1)")
                .bind(team_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

#[cfg(test)]
impl PgSubmissionStore {
    async fn get(&self, id: SubmissionId) -> DbResult<Submission> {
        let row = sqlx::query_as::<_, SubmissionRow>(&format!(
            "SELECT {} FROM submissions WHERE id = $1",
            COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("submission {}", id)))?;
        row.try_into()
    }

    /// Most recent submission of a team, if it ever submitted.
    async fn latest_for_team(&self, team_id: TeamId) -> DbResult<Option<Submission>> {
        let row = sqlx::query_as::<_, SubmissionRow>(&format!(
            "SELECT {} FROM submissions WHERE team_id = $1 ORDER BY version DESC LIMIT 1",
            COLUMNS
        ))
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Submission::try_from).transpose()
    }
}

#[async_trait]
impl SubmissionStore for PgSubmissionStore {
    async fn create_submission(&self, team_id: TeamId) -> dockyard_core::Result<Submission> {
        Ok(self.insert_next_version(team_id).await?)
    }

    async fn update_status(&self, submission: &Submission) -> dockyard_core::Result<()> {
        Ok(self.set_status(submission).await?)
    }

    async fn update_submission(&self, submission: &Submission) -> dockyard_core::Result<()> {
        Ok(self.set_submission(submission).await?)
    }

    async fn team_exists(&self, team_id: TeamId) -> dockyard_core::Result<bool> {
        Ok(self.has_team(team_id).await?)
    }
}
