//! View composition and the activation protocol.
//!
//! A view is an ordered list of catalog references owned by one environment.
//! At most one view per (environment, name) is active; activation demotes the
//! siblings and promotes the target in a single transaction while holding
//! the scope lock.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::catalog::{find_or_create_menu, find_or_create_submenu};
use crate::error::{Result, ViewError};
use crate::models::{MenuMapping, SubMenuMapping, View, ViewDraft, ViewStatus};
use crate::storage::Storage;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CopyReport {
    pub copied_view_ids: Vec<Uuid>,
    pub copied: usize,
    pub skipped_env_ids: Vec<Uuid>,
}

/// Persist a new view after checking every catalog reference exists.
pub fn create_view(
    storage: &Storage,
    env_id: Uuid,
    view_id: i64,
    name: &str,
    menus: Vec<MenuMapping>,
    initial_status: Option<ViewStatus>,
) -> Result<View> {
    if name.trim().is_empty() {
        return Err(ViewError::Validation("view name must not be empty".into()));
    }
    if view_id < 0 {
        return Err(ViewError::Validation(format!("view id {} must not be negative", view_id)));
    }
    if storage.get_environment(env_id)?.is_none() {
        return Err(ViewError::NotFound(format!("Environment {}", env_id)));
    }
    for menu in &menus {
        if storage.get_menu(menu.menu_id)?.is_none() {
            return Err(ViewError::DanglingReference { kind: "menu", id: menu.menu_id });
        }
        for sub in &menu.sub_menus {
            if storage.get_submenu(sub.sub_menu_id)?.is_none() {
                return Err(ViewError::DanglingReference { kind: "submenu", id: sub.sub_menu_id });
            }
        }
    }

    let target = initial_status.unwrap_or_default();
    if target != ViewStatus::Draft && !ViewStatus::Draft.can_transition_to(target) {
        return Err(ViewError::InvalidTransition {
            from: ViewStatus::Draft.to_string(),
            to: target.to_string(),
        });
    }

    let view = View {
        id: Uuid::new_v4(),
        env_id,
        view_id,
        name: name.to_string(),
        menus,
        status: ViewStatus::Draft,
        created_at: Utc::now(),
    };
    storage.insert_view(&view)?;
    info!(view = %view.id, env_id = %env_id, name = %view.name, "View created");

    if target == ViewStatus::Active {
        return activate_view(storage, view.id);
    }
    Ok(view)
}

/// Build a view from a nested tree, upserting catalog entries by name.
pub fn create_view_from_draft(storage: &Storage, env_id: Uuid, draft: &ViewDraft) -> Result<View> {
    // Checked before the catalog side effects
    let initial_status = draft.validate()?;
    if storage.get_environment(env_id)?.is_none() {
        return Err(ViewError::NotFound(format!("Environment {}", env_id)));
    }

    let mut menus = Vec::with_capacity(draft.menus.len());
    for menu in &draft.menus {
        let master = find_or_create_menu(storage, &menu.name, menu.label.as_deref(), menu.icon.as_deref())?;

        let mut sub_menus = Vec::with_capacity(menu.entities.len());
        for entity in &menu.entities {
            let sub = find_or_create_submenu(
                storage,
                &entity.name,
                entity.label.as_deref(),
                entity.link.as_deref(),
                entity.icon.as_deref(),
                entity.visible,
            )?;
            sub_menus.push(SubMenuMapping {
                sub_menu_id: sub.id,
                order: entity.order,
                visible: entity.visible,
            });
        }

        menus.push(MenuMapping {
            menu_id: master.id,
            order: menu.order,
            sub_menus,
        });
    }

    create_view(storage, env_id, draft.id, &draft.name, menus, initial_status)
}

pub fn get_view(storage: &Storage, id: Uuid) -> Result<View> {
    storage
        .get_view(id)?
        .ok_or_else(|| ViewError::NotFound(format!("View {}", id)))
}

pub fn list_views(storage: &Storage, env_id: Uuid) -> Result<Vec<View>> {
    if storage.get_environment(env_id)?.is_none() {
        return Err(ViewError::NotFound(format!("Environment {}", env_id)));
    }
    storage.views_for_env(env_id)
}

/// Deep-copy a view's mappings into a fresh draft per existing target env.
pub fn copy_view(storage: &Storage, source_id: Uuid, target_env_ids: &[Uuid]) -> Result<CopyReport> {
    let source = get_view(storage, source_id)?;
    let mut report = CopyReport {
        copied_view_ids: vec![],
        copied: 0,
        skipped_env_ids: vec![],
    };

    for env_id in target_env_ids {
        if storage.get_environment(*env_id)?.is_none() {
            warn!(env_id = %env_id, source = %source.id, "Copy target environment missing, skipped");
            report.skipped_env_ids.push(*env_id);
            continue;
        }
        let copy = View {
            id: Uuid::new_v4(),
            env_id: *env_id,
            view_id: source.view_id,
            name: source.name.clone(),
            menus: source.menus.clone(),
            status: ViewStatus::Draft,
            created_at: Utc::now(),
        };
        storage.insert_view(&copy)?;
        report.copied_view_ids.push(copy.id);
    }
    report.copied = report.copied_view_ids.len();

    info!(source = %source.id, copied = report.copied, "View copied");
    Ok(report)
}

/// Make `id` the only active view within its (environment, name) scope.
pub fn activate_view(storage: &Storage, id: Uuid) -> Result<View> {
    let current = get_view(storage, id)?;
    let _scope = storage.scope_lock(current.env_id, &current.name);

    // Re-read under the lock; the status may have moved since
    let mut target = get_view(storage, id)?;
    if !target.status.can_transition_to(ViewStatus::Active) {
        return Err(ViewError::InvalidTransition {
            from: target.status.to_string(),
            to: ViewStatus::Active.to_string(),
        });
    }

    let mut updates = vec![];
    for mut sibling in storage.views_for_env(target.env_id)? {
        if sibling.id != target.id && sibling.name == target.name && sibling.status == ViewStatus::Active {
            sibling.status = ViewStatus::Inactive;
            updates.push(sibling);
        }
    }
    let demoted = updates.len();

    target.status = ViewStatus::Active;
    updates.push(target.clone());
    storage.put_views(&updates)?;

    info!(view = %target.id, env_id = %target.env_id, name = %target.name, demoted, "View activated");
    Ok(target)
}

pub fn deactivate_view(storage: &Storage, id: Uuid) -> Result<View> {
    let current = get_view(storage, id)?;
    let _scope = storage.scope_lock(current.env_id, &current.name);

    let mut target = get_view(storage, id)?;
    if !target.status.can_transition_to(ViewStatus::Inactive) {
        return Err(ViewError::InvalidTransition {
            from: target.status.to_string(),
            to: ViewStatus::Inactive.to_string(),
        });
    }
    target.status = ViewStatus::Inactive;
    storage.put_views(std::slice::from_ref(&target))?;

    info!(view = %target.id, "View deactivated");
    Ok(target)
}

/// Remove every view of an environment (clear step of a full rebuild).
/// Each removal holds the view's scope lock so it cannot interleave with an
/// activation of the same scope.
pub fn clear_views(storage: &Storage, env_id: Uuid) -> Result<usize> {
    let views = storage.views_for_env(env_id)?;
    for view in &views {
        let _scope = storage.scope_lock(view.env_id, &view.name);
        storage.remove_view(view)?;
    }
    Ok(views.len())
}
