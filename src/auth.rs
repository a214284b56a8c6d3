//! Environment access secrets: issuance, hashing, resolution and key lifecycle.
//!
//! Only a bcrypt hash of a secret is stored. Resolution narrows the active
//! keys by a short non-secret prefix and bcrypt-verifies each candidate.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bcrypt::{hash, verify};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{Result, ViewError};
use crate::models::{Environment, EnvironmentKey, KeyStatus};
use crate::storage::Storage;

const SECRET_BYTES: usize = 32;
pub const LOOKUP_PREFIX_LEN: usize = 8;

/// Returned exactly once, at issuance.
#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuedKey {
    pub secret: String,
    pub key_id: Uuid,
    pub env_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// URL-safe secret carrying 32 bytes of OS entropy.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn hash_secret(secret: &str, cost: u32) -> Result<String> {
    Ok(hash(secret, cost)?)
}

pub fn verify_secret(secret: &str, hashed: &str) -> Result<bool> {
    Ok(verify(secret, hashed)?)
}

fn lookup_prefix(secret: &str) -> Option<&str> {
    secret.get(..LOOKUP_PREFIX_LEN)
}

/// Create a key for `env_id` and hand back its plaintext secret.
pub fn issue_key(storage: &Storage, env_id: Uuid, created_by: &str, cost: u32) -> Result<IssuedKey> {
    let env = storage
        .get_environment(env_id)?
        .ok_or_else(|| ViewError::NotFound(format!("Environment {}", env_id)))?;

    let secret = generate_secret();
    let prefix = lookup_prefix(&secret)
        .ok_or_else(|| ViewError::Internal("generated secret too short".to_string()))?
        .to_string();

    let key = EnvironmentKey {
        id: Uuid::new_v4(),
        env_id: env.id,
        hashed_secret: hash_secret(&secret, cost)?,
        lookup_prefix: prefix,
        status: KeyStatus::Active,
        created_by: created_by.to_string(),
        created_at: Utc::now(),
    };
    storage.insert_key(&key)?;
    info!(env_id = %env.id, key_id = %key.id, created_by, "Issued environment key");

    Ok(IssuedKey {
        secret,
        key_id: key.id,
        env_id: env.id,
        created_at: key.created_at,
    })
}

/// Map a presented secret to the environment owning the matching active key.
pub fn resolve_secret(storage: &Storage, secret: &str) -> Result<Environment> {
    let prefix = lookup_prefix(secret).ok_or(ViewError::Unauthorized)?;

    for key in storage.active_keys_with_prefix(prefix)? {
        // A malformed stored hash should not lock everyone else out
        let matched = verify_secret(secret, &key.hashed_secret).unwrap_or_else(|e| {
            warn!(key_id = %key.id, error = %e, "Unverifiable key hash");
            false
        });
        if matched {
            debug!(key_id = %key.id, env_id = %key.env_id, "Secret resolved");
            return storage
                .get_environment(key.env_id)?
                .ok_or(ViewError::Unauthorized);
        }
    }

    Err(ViewError::Unauthorized)
}

pub fn set_key_status(storage: &Storage, key_id: Uuid, status: KeyStatus) -> Result<EnvironmentKey> {
    let key = storage.update_key_status(key_id, status)?;
    info!(key_id = %key.id, status = %key.status, "Key status changed");
    Ok(key)
}

pub fn list_keys(storage: &Storage, env_id: Uuid) -> Result<Vec<EnvironmentKey>> {
    if storage.get_environment(env_id)?.is_none() {
        return Err(ViewError::NotFound(format!("Environment {}", env_id)));
    }
    storage.keys_for_env(env_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environments::{create_environment, NewEnvironment};

    const TEST_COST: u32 = 4;

    fn setup() -> (Storage, Environment) {
        let storage = Storage::temporary().expect("Failed to open storage");
        let env = create_environment(
            &storage,
            NewEnvironment {
                env_name: "Production".to_string(),
                slug: "prod".to_string(),
                description: None,
                created_by: "tester".to_string(),
            },
        )
        .unwrap();
        (storage, env)
    }

    #[test]
    fn test_generated_secret_is_url_safe() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 43);
        assert!(secret
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(secret, generate_secret());
    }

    #[test]
    fn test_issue_then_resolve_round_trip() {
        let (storage, env) = setup();
        let issued = issue_key(&storage, env.id, "tester", TEST_COST).unwrap();

        let resolved = resolve_secret(&storage, &issued.secret).unwrap();
        assert_eq!(resolved.id, env.id);

        // Plaintext is never persisted
        let stored = storage.get_key(issued.key_id).unwrap().unwrap();
        assert_ne!(stored.hashed_secret, issued.secret);
        assert!(!stored.hashed_secret.contains(&issued.secret));
    }

    #[test]
    fn test_resolve_rejects_other_strings() {
        let (storage, env) = setup();
        let issued = issue_key(&storage, env.id, "tester", TEST_COST).unwrap();

        for bad in ["", "short", "definitely-not-the-secret-value-0000000000"] {
            assert!(matches!(resolve_secret(&storage, bad), Err(ViewError::Unauthorized)));
        }
        // Same prefix, different tail
        let forged = format!("{}XXXXXXXX", &issued.secret[..LOOKUP_PREFIX_LEN]);
        assert!(matches!(resolve_secret(&storage, &forged), Err(ViewError::Unauthorized)));
    }

    #[test]
    fn test_issue_for_missing_environment() {
        let (storage, _) = setup();
        let err = issue_key(&storage, Uuid::new_v4(), "tester", TEST_COST).unwrap_err();
        assert!(matches!(err, ViewError::NotFound(_)));
    }

    #[test]
    fn test_paused_key_does_not_resolve_until_reactivated() {
        let (storage, env) = setup();
        let issued = issue_key(&storage, env.id, "tester", TEST_COST).unwrap();

        set_key_status(&storage, issued.key_id, KeyStatus::Inactive).unwrap();
        assert!(matches!(
            resolve_secret(&storage, &issued.secret),
            Err(ViewError::Unauthorized)
        ));

        set_key_status(&storage, issued.key_id, KeyStatus::Active).unwrap();
        assert_eq!(resolve_secret(&storage, &issued.secret).unwrap().id, env.id);
    }

    #[test]
    fn test_revoked_key_rejects_further_transitions() {
        let (storage, env) = setup();
        let issued = issue_key(&storage, env.id, "tester", TEST_COST).unwrap();

        set_key_status(&storage, issued.key_id, KeyStatus::Revoked).unwrap();
        for next in [KeyStatus::Active, KeyStatus::Inactive, KeyStatus::Revoked] {
            let err = set_key_status(&storage, issued.key_id, next).unwrap_err();
            assert!(matches!(err, ViewError::InvalidTransition { .. }));
        }
        assert!(matches!(
            resolve_secret(&storage, &issued.secret),
            Err(ViewError::Unauthorized)
        ));
    }

    #[test]
    fn test_list_keys_is_scoped_to_environment() {
        let (storage, env) = setup();
        issue_key(&storage, env.id, "a", TEST_COST).unwrap();
        issue_key(&storage, env.id, "b", TEST_COST).unwrap();
        let keys = list_keys(&storage, env.id).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| k.env_id == env.id));
        assert!(matches!(
            list_keys(&storage, Uuid::new_v4()),
            Err(ViewError::NotFound(_))
        ));
    }
}
