//! Bulk import of views from an upstream API.
//!
//! Full-replace semantics: the target environment's views are cleared, then
//! every fetched view is rebuilt and activated. There is no rollback; a
//! failed view is logged and the rest continue.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::{Result, ViewError};
use crate::models::{ViewDraft, ViewStatus};
use crate::storage::Storage;
use crate::views::{clear_views, create_view_from_draft};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub cleared: usize,
    pub views_processed: usize,
    pub failed_view_ids: Vec<i64>,
}

async fn fetch_view(
    client: reqwest::Client,
    url: String,
    token: Option<String>,
) -> Result<ViewDraft> {
    let mut request = client.get(&url).timeout(FETCH_TIMEOUT);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let draft = request.send().await?.error_for_status()?.json::<ViewDraft>().await?;
    Ok(draft)
}

/// Fetch all ids concurrently; failures are logged and left out.
pub async fn fetch_views(
    client: &reqwest::Client,
    url_template: &str,
    token: Option<&str>,
    view_ids: &[i64],
) -> Vec<ViewDraft> {
    let mut tasks = JoinSet::new();
    for view_id in view_ids {
        let url = url_template.replace("{view_id}", &view_id.to_string());
        let fetch = fetch_view(client.clone(), url, token.map(str::to_string));
        let view_id = *view_id;
        tasks.spawn(async move { (view_id, fetch.await) });
    }

    let mut drafts = vec![];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(draft))) => drafts.push(draft),
            Ok((view_id, Err(e))) => warn!(view_id, error = %e, "Failed to fetch upstream view"),
            Err(e) => error!(error = %e, "Fetch task panicked"),
        }
    }
    // Join order is completion order; keep the rebuild deterministic
    drafts.sort_by_key(|d| d.id);
    drafts
}

/// Clear the environment's views and rebuild them from `drafts`, active.
pub fn rebuild_environment(storage: &Storage, env_id: Uuid, drafts: &[ViewDraft]) -> Result<ImportReport> {
    if storage.get_environment(env_id)?.is_none() {
        return Err(ViewError::NotFound(format!("Environment {}", env_id)));
    }

    let mut report = ImportReport {
        cleared: clear_views(storage, env_id)?,
        ..ImportReport::default()
    };

    for draft in drafts {
        let mut draft = draft.clone();
        draft.status = Some(ViewStatus::Active.to_string());
        match create_view_from_draft(storage, env_id, &draft) {
            Ok(_) => report.views_processed += 1,
            Err(e) => {
                warn!(view_id = draft.id, error = %e, "Skipping view during import");
                report.failed_view_ids.push(draft.id);
            }
        }
    }

    info!(
        env_id = %env_id,
        cleared = report.cleared,
        processed = report.views_processed,
        failed = report.failed_view_ids.len(),
        "Import finished"
    );
    Ok(report)
}

/// Fetch from the configured source and rebuild `env_id`.
pub async fn sync_from_source(
    storage: Storage,
    config: Arc<ServerConfig>,
    env_id: Uuid,
) -> Result<ImportReport> {
    let url = config
        .source_api_url
        .clone()
        .ok_or_else(|| ViewError::Validation("SOURCE_API_URL is not configured".into()))?;

    info!(env_id = %env_id, views = config.source_view_ids.len(), "Starting view synchronization");
    let client = reqwest::Client::new();
    let drafts = fetch_views(
        &client,
        &url,
        config.source_api_token.as_deref(),
        &config.source_view_ids,
    )
    .await;

    if drafts.is_empty() {
        return Err(ViewError::Validation("no views fetched from source".into()));
    }

    tokio::task::spawn_blocking(move || rebuild_environment(&storage, env_id, &drafts)).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environments::{create_environment, NewEnvironment};
    use crate::models::{MenuDraft, SubMenuDraft};
    use crate::views::{create_view, list_views};

    fn draft(id: i64, name: &str, sub: &str) -> ViewDraft {
        ViewDraft {
            id,
            name: name.to_string(),
            status: None,
            menus: vec![MenuDraft {
                name: "OVERVIEW".to_string(),
                label: Some("Overview".to_string()),
                icon: None,
                order: Some(1),
                entities: vec![SubMenuDraft {
                    name: sub.to_string(),
                    label: None,
                    link: Some(sub.to_lowercase()),
                    icon: None,
                    order: Some(1),
                    visible: Some(true),
                }],
            }],
        }
    }

    #[test]
    fn test_rebuild_replaces_existing_views() {
        let storage = Storage::temporary().unwrap();
        let env = create_environment(
            &storage,
            NewEnvironment {
                env_name: "Production".into(),
                slug: "production".into(),
                description: None,
                created_by: "importer".into(),
            },
        )
        .unwrap();
        create_view(&storage, env.id, 99, "STALE", vec![], None).unwrap();

        let bad = ViewDraft { id: 3, name: " ".into(), status: None, menus: vec![] };
        let drafts = vec![draft(1, "DEFAULT_VIEW", "HOME"), draft(2, "ADMIN", "USERS"), bad];
        let report = rebuild_environment(&storage, env.id, &drafts).unwrap();

        assert_eq!(report.cleared, 1);
        assert_eq!(report.views_processed, 2);
        assert_eq!(report.failed_view_ids, vec![3]);

        let views = list_views(&storage, env.id).unwrap();
        assert_eq!(views.len(), 2);
        assert!(views.iter().all(|v| v.status == ViewStatus::Active));
        // Shared menu deduplicated across imported views
        assert_eq!(storage.list_menus().unwrap().len(), 1);

        // Running again is a full replace, not an append
        let again = rebuild_environment(&storage, env.id, &drafts).unwrap();
        assert_eq!(again.cleared, 2);
        assert_eq!(list_views(&storage, env.id).unwrap().len(), 2);
    }

    #[test]
    fn test_rebuild_unknown_environment() {
        let storage = Storage::temporary().unwrap();
        assert!(matches!(
            rebuild_environment(&storage, Uuid::new_v4(), &[]),
            Err(ViewError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_requires_source_url() {
        let storage = Storage::temporary().unwrap();
        let config = Arc::new(ServerConfig::default());
        let err = sync_from_source(storage, config, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ViewError::Validation(_)));
    }
}
