//! Master catalog of menus and submenus shared by every environment.
//!
//! Entries are deduplicated by name. Views hold weak references by id, so
//! reads go through [`CatalogReader`] and absence is an ordinary `None`.

use chrono::Utc;
use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{Result, ViewError};
use crate::models::{MenuMaster, SubMenuMaster};
use crate::storage::Storage;

/// Read access to catalog entries by id.
pub trait CatalogReader {
    fn menu(&self, id: Uuid) -> Result<Option<MenuMaster>>;
    fn submenu(&self, id: Uuid) -> Result<Option<SubMenuMaster>>;
}

impl CatalogReader for Storage {
    fn menu(&self, id: Uuid) -> Result<Option<MenuMaster>> {
        self.get_menu(id)
    }

    fn submenu(&self, id: Uuid) -> Result<Option<SubMenuMaster>> {
        self.get_submenu(id)
    }
}

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct CatalogListing {
    pub menus: Vec<MenuMaster>,
    pub submenus: Vec<SubMenuMaster>,
}

fn require_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ViewError::Validation("catalog name must not be empty".into()));
    }
    Ok(())
}

/// Idempotent upsert keyed by `name`. Attributes of an existing entry win.
pub fn find_or_create_menu(
    storage: &Storage,
    name: &str,
    label: Option<&str>,
    icon: Option<&str>,
) -> Result<MenuMaster> {
    require_name(name)?;
    storage.find_or_create_menu(MenuMaster {
        id: Uuid::new_v4(),
        name: name.to_string(),
        label: label.unwrap_or(name).to_string(),
        icon: icon.map(str::to_string),
        created_at: Utc::now(),
    })
}

pub fn find_or_create_submenu(
    storage: &Storage,
    name: &str,
    label: Option<&str>,
    link: Option<&str>,
    icon: Option<&str>,
    visible: Option<bool>,
) -> Result<SubMenuMaster> {
    require_name(name)?;
    storage.find_or_create_submenu(SubMenuMaster {
        id: Uuid::new_v4(),
        name: name.to_string(),
        label: label.unwrap_or(name).to_string(),
        link: link.map(str::to_string),
        icon: icon.map(str::to_string),
        visible: visible.unwrap_or(true),
        created_at: Utc::now(),
    })
}

pub fn get_menu_by_name(storage: &Storage, name: &str) -> Result<Option<MenuMaster>> {
    storage.get_menu_by_name(name)
}

pub fn get_submenu_by_name(storage: &Storage, name: &str) -> Result<Option<SubMenuMaster>> {
    storage.get_submenu_by_name(name)
}

pub fn list_catalog(storage: &Storage) -> Result<CatalogListing> {
    Ok(CatalogListing {
        menus: storage.list_menus()?,
        submenus: storage.list_submenus()?,
    })
}

/// Remove a menu no view references any more.
pub fn delete_menu(storage: &Storage, id: Uuid) -> Result<()> {
    let menu = storage
        .get_menu(id)?
        .ok_or_else(|| ViewError::NotFound(format!("Menu {}", id)))?;
    if let Some(view) = storage.all_views()?.iter().find(|v| v.references_menu(id)) {
        return Err(ViewError::Conflict {
            field: "menu",
            detail: format!("menu '{}' is referenced by view {}", menu.name, view.id),
        });
    }
    storage.remove_menu(&menu)?;
    info!(menu_id = %id, name = %menu.name, "Menu removed from catalog");
    Ok(())
}

pub fn delete_submenu(storage: &Storage, id: Uuid) -> Result<()> {
    let submenu = storage
        .get_submenu(id)?
        .ok_or_else(|| ViewError::NotFound(format!("Submenu {}", id)))?;
    if let Some(view) = storage.all_views()?.iter().find(|v| v.references_sub_menu(id)) {
        return Err(ViewError::Conflict {
            field: "submenu",
            detail: format!("submenu '{}' is referenced by view {}", submenu.name, view.id),
        });
    }
    storage.remove_submenu(&submenu)?;
    info!(submenu_id = %id, name = %submenu.name, "Submenu removed from catalog");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environments::{create_environment, NewEnvironment};
    use crate::models::{MenuMapping, SubMenuMapping};
    use crate::views::create_view;

    #[test]
    fn test_upsert_keeps_first_attributes() {
        let storage = Storage::temporary().unwrap();
        let first = find_or_create_submenu(&storage, "HOME", Some("Home"), Some("new-home"), None, None).unwrap();
        let again = find_or_create_submenu(&storage, "HOME", Some("Other"), None, None, Some(false)).unwrap();
        assert_eq!(first, again);
        assert!(again.visible);
        assert_eq!(get_submenu_by_name(&storage, "HOME").unwrap().unwrap().id, first.id);
    }

    #[test]
    fn test_label_defaults_to_name() {
        let storage = Storage::temporary().unwrap();
        let menu = find_or_create_menu(&storage, "OVERVIEW", None, None).unwrap();
        assert_eq!(menu.label, "OVERVIEW");
        assert!(get_menu_by_name(&storage, "MISSING").unwrap().is_none());
    }

    #[test]
    fn test_empty_name_rejected() {
        let storage = Storage::temporary().unwrap();
        assert!(matches!(
            find_or_create_menu(&storage, "  ", None, None),
            Err(ViewError::Validation(_))
        ));
    }

    #[test]
    fn test_referenced_entries_are_not_deleted() {
        let storage = Storage::temporary().unwrap();
        let env = create_environment(
            &storage,
            NewEnvironment {
                env_name: "Dev".into(),
                slug: "dev".into(),
                description: None,
                created_by: "tester".into(),
            },
        )
        .unwrap();
        let menu = find_or_create_menu(&storage, "OVERVIEW", None, None).unwrap();
        let sub = find_or_create_submenu(&storage, "HOME", None, None, None, None).unwrap();
        let unused = find_or_create_menu(&storage, "UNUSED", None, None).unwrap();

        create_view(
            &storage,
            env.id,
            1,
            "MAIN",
            vec![MenuMapping {
                menu_id: menu.id,
                order: Some(1),
                sub_menus: vec![SubMenuMapping { sub_menu_id: sub.id, order: None, visible: None }],
            }],
            None,
        )
        .unwrap();

        assert!(matches!(delete_menu(&storage, menu.id), Err(ViewError::Conflict { .. })));
        assert!(matches!(delete_submenu(&storage, sub.id), Err(ViewError::Conflict { .. })));

        delete_menu(&storage, unused.id).unwrap();
        assert!(get_menu_by_name(&storage, "UNUSED").unwrap().is_none());
        assert_eq!(list_catalog(&storage).unwrap().menus.len(), 1);
    }
}
