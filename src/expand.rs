//! Expansion engine: denormalizes a stored view into a self-contained tree.
//!
//! Ordering: mappings sort by `order` ascending; mappings without an order
//! come after every numbered one and keep their stored relative position.
//! References the catalog can no longer resolve are skipped silently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::catalog::CatalogReader;
use crate::error::{Result, ViewError};
use crate::models::{MenuMaster, SubMenuMaster, View, ViewStatus};
use crate::storage::Storage;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExpandedSubMenu {
    pub id: Uuid,
    pub name: String,
    pub label: String,
    pub link: Option<String>,
    pub icon: Option<String>,
    pub visible: bool,
    pub created_at: DateTime<Utc>,
    pub order: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExpandedMenu {
    pub id: Uuid,
    pub name: String,
    pub label: String,
    pub icon: Option<String>,
    pub created_at: DateTime<Utc>,
    pub order: Option<i64>,
    pub entities: Vec<ExpandedSubMenu>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExpandedView {
    pub id: Uuid,
    pub env_id: Uuid,
    pub view_id: i64,
    pub name: String,
    pub status: ViewStatus,
    pub menus: Vec<ExpandedMenu>,
}

impl ExpandedSubMenu {
    /// Catalog fields first, then the mapping's order and visibility override.
    fn overlay(master: SubMenuMaster, order: Option<i64>, visible: Option<bool>) -> Self {
        Self {
            id: master.id,
            name: master.name,
            label: master.label,
            link: master.link,
            icon: master.icon,
            visible: visible.unwrap_or(master.visible),
            created_at: master.created_at,
            order,
        }
    }
}

impl ExpandedMenu {
    fn overlay(master: MenuMaster, order: Option<i64>) -> Self {
        Self {
            id: master.id,
            name: master.name,
            label: master.label,
            icon: master.icon,
            created_at: master.created_at,
            order,
            entities: vec![],
        }
    }
}

/// Stable sort with absent orders last.
fn sorted_by_order<T>(items: &[T], order: impl Fn(&T) -> Option<i64>) -> Vec<&T> {
    let mut sorted: Vec<&T> = items.iter().collect();
    sorted.sort_by_key(|item| {
        let o = order(item);
        (o.is_none(), o)
    });
    sorted
}

/// Expand `view` against the catalog. Fails only if the catalog itself errors.
pub fn expand<C: CatalogReader + ?Sized>(catalog: &C, view: &View) -> Result<ExpandedView> {
    let mut menus = Vec::with_capacity(view.menus.len());

    for mapping in sorted_by_order(&view.menus, |m| m.order) {
        let Some(master) = catalog.menu(mapping.menu_id)? else {
            debug!(view = %view.id, menu_id = %mapping.menu_id, "Skipping dangling menu reference");
            continue;
        };
        let mut menu = ExpandedMenu::overlay(master, mapping.order);

        for sub in sorted_by_order(&mapping.sub_menus, |s| s.order) {
            match catalog.submenu(sub.sub_menu_id)? {
                Some(master) => menu
                    .entities
                    .push(ExpandedSubMenu::overlay(master, sub.order, sub.visible)),
                None => debug!(
                    view = %view.id,
                    sub_menu_id = %sub.sub_menu_id,
                    "Skipping dangling submenu reference"
                ),
            }
        }
        menus.push(menu);
    }

    Ok(ExpandedView {
        id: view.id,
        env_id: view.env_id,
        view_id: view.view_id,
        name: view.name.clone(),
        status: view.status,
        menus,
    })
}

/// Load a view by id and expand it.
pub fn expand_view(storage: &Storage, id: Uuid) -> Result<ExpandedView> {
    let view = storage
        .get_view(id)?
        .ok_or_else(|| ViewError::NotFound(format!("View {}", id)))?;
    expand(storage, &view)
}
