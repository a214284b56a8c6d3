//! Secret-gated read path: resolve the secret, find the active view in the
//! resolved environment, expand it.

use tracing::debug;

use crate::auth::resolve_secret;
use crate::error::{Result, ViewError};
use crate::expand::{expand, ExpandedView};
use crate::models::{View, ViewStatus};
use crate::storage::Storage;

/// Match order: tenant-scoped integer id first, then exact name. Among
/// several active candidates the most recently created wins.
fn find_active_view(storage: &Storage, env_id: uuid::Uuid, identifier: &str) -> Result<Option<View>> {
    let active: Vec<View> = storage
        .views_for_env(env_id)?
        .into_iter()
        .filter(|v| v.status == ViewStatus::Active)
        .collect();

    if let Ok(numeric) = identifier.parse::<i64>() {
        if let Some(view) = active.iter().rev().find(|v| v.view_id == numeric) {
            return Ok(Some(view.clone()));
        }
    }
    Ok(active.into_iter().rev().find(|v| v.name == identifier))
}

/// Absent, inactive and foreign views all produce the same `NotFound`.
pub fn get_secured_view(storage: &Storage, identifier: &str, secret: &str) -> Result<ExpandedView> {
    let env = resolve_secret(storage, secret)?;
    let view = find_active_view(storage, env.id, identifier)?.ok_or_else(|| {
        debug!(env_id = %env.id, identifier, "No active view for identifier");
        ViewError::NotFound("View".to_string())
    })?;
    expand(storage, &view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{issue_key, set_key_status};
    use crate::catalog::{find_or_create_menu, find_or_create_submenu};
    use crate::environments::{create_environment, NewEnvironment};
    use crate::models::{KeyStatus, MenuMapping, SubMenuMapping};
    use crate::views::{activate_view, create_view};
    use uuid::Uuid;

    const TEST_COST: u32 = 4;

    fn env(storage: &Storage, slug: &str) -> Uuid {
        create_environment(
            storage,
            NewEnvironment {
                env_name: slug.to_string(),
                slug: slug.to_string(),
                description: None,
                created_by: "tester".to_string(),
            },
        )
        .unwrap()
        .id
    }

    fn menus(storage: &Storage) -> Vec<MenuMapping> {
        let menu = find_or_create_menu(storage, "OVERVIEW", None, None).unwrap();
        let sub = find_or_create_submenu(storage, "HOME", None, Some("home"), None, None).unwrap();
        vec![MenuMapping {
            menu_id: menu.id,
            order: Some(1),
            sub_menus: vec![SubMenuMapping { sub_menu_id: sub.id, order: Some(1), visible: Some(false) }],
        }]
    }

    #[test]
    fn test_secured_read_by_id_and_name() {
        let storage = Storage::temporary().unwrap();
        let env_id = env(&storage, "prod");
        let secret = issue_key(&storage, env_id, "tester", TEST_COST).unwrap().secret;
        let view = create_view(&storage, env_id, 42, "DEFAULT_VIEW", menus(&storage), Some(ViewStatus::Active)).unwrap();

        let by_id = get_secured_view(&storage, "42", &secret).unwrap();
        assert_eq!(by_id.id, view.id);
        assert!(!by_id.menus[0].entities[0].visible);

        let by_name = get_secured_view(&storage, "DEFAULT_VIEW", &secret).unwrap();
        assert_eq!(by_name, by_id);
    }

    #[test]
    fn test_bad_secret_is_unauthorized() {
        let storage = Storage::temporary().unwrap();
        let env_id = env(&storage, "prod");
        create_view(&storage, env_id, 1, "MAIN", vec![], Some(ViewStatus::Active)).unwrap();
        assert!(matches!(
            get_secured_view(&storage, "1", "not-a-real-secret"),
            Err(ViewError::Unauthorized)
        ));
    }

    #[test]
    fn test_inactive_draft_and_foreign_views_look_identical() {
        let storage = Storage::temporary().unwrap();
        let mine = env(&storage, "mine");
        let theirs = env(&storage, "theirs");
        let secret = issue_key(&storage, mine, "tester", TEST_COST).unwrap().secret;

        create_view(&storage, mine, 1, "DRAFT", vec![], None).unwrap();
        let paused = create_view(&storage, mine, 2, "PAUSED", vec![], Some(ViewStatus::Active)).unwrap();
        crate::views::deactivate_view(&storage, paused.id).unwrap();
        create_view(&storage, theirs, 3, "FOREIGN", vec![], Some(ViewStatus::Active)).unwrap();

        for identifier in ["1", "DRAFT", "2", "PAUSED", "3", "FOREIGN", "999"] {
            let err = get_secured_view(&storage, identifier, &secret).unwrap_err();
            assert!(matches!(&err, ViewError::NotFound(what) if what == "View"), "{identifier}: {err}");
        }
    }

    #[test]
    fn test_numeric_id_falls_back_to_name() {
        let storage = Storage::temporary().unwrap();
        let env_id = env(&storage, "prod");
        let secret = issue_key(&storage, env_id, "tester", TEST_COST).unwrap().secret;
        let named = create_view(&storage, env_id, 5, "2024", vec![], Some(ViewStatus::Active)).unwrap();

        assert_eq!(get_secured_view(&storage, "2024", &secret).unwrap().id, named.id);
    }

    #[test]
    fn test_follows_activation_and_key_status() {
        let storage = Storage::temporary().unwrap();
        let env_id = env(&storage, "prod");
        let issued = issue_key(&storage, env_id, "tester", TEST_COST).unwrap();
        let first = create_view(&storage, env_id, 1, "MAIN", vec![], Some(ViewStatus::Active)).unwrap();
        let second = create_view(&storage, env_id, 1, "MAIN", vec![], None).unwrap();

        assert_eq!(get_secured_view(&storage, "MAIN", &issued.secret).unwrap().id, first.id);
        activate_view(&storage, second.id).unwrap();
        assert_eq!(get_secured_view(&storage, "MAIN", &issued.secret).unwrap().id, second.id);

        set_key_status(&storage, issued.key_id, KeyStatus::Revoked).unwrap();
        assert!(matches!(
            get_secured_view(&storage, "MAIN", &issued.secret),
            Err(ViewError::Unauthorized)
        ));
    }
}
