//! Tenant records. Identity is immutable once created.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{Result, ViewError};
use crate::models::Environment;
use crate::storage::Storage;

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewEnvironment {
    pub env_name: String,
    pub slug: String,
    pub description: Option<String>,
    pub created_by: String,
}

impl NewEnvironment {
    fn validate(&self) -> Result<()> {
        if self.env_name.trim().is_empty() {
            return Err(ViewError::Validation("envName must not be empty".into()));
        }
        if self.created_by.trim().is_empty() {
            return Err(ViewError::Validation("createdBy must not be empty".into()));
        }
        if self.slug.is_empty()
            || !self
                .slug
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(ViewError::Validation(format!(
                "slug '{}' must be non-empty and use only a-z, 0-9, '-' or '_'",
                self.slug
            )));
        }
        Ok(())
    }
}

pub fn create_environment(storage: &Storage, new: NewEnvironment) -> Result<Environment> {
    new.validate()?;
    let env = Environment {
        id: Uuid::new_v4(),
        env_name: new.env_name,
        slug: new.slug,
        description: new.description,
        created_by: new.created_by,
        created_at: Utc::now(),
    };
    storage.insert_environment(&env)?;
    info!(env_id = %env.id, slug = %env.slug, "Environment created");
    Ok(env)
}

pub fn get_environment(storage: &Storage, env_id: Uuid) -> Result<Environment> {
    storage
        .get_environment(env_id)?
        .ok_or_else(|| ViewError::NotFound(format!("Environment {}", env_id)))
}

pub fn list_environments(storage: &Storage) -> Result<Vec<Environment>> {
    storage.list_environments()
}
