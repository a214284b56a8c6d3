//! Records persisted in Sled and the payloads that create them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ViewError;

/// Tenant owning its own views and access keys.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: Uuid,
    pub env_name: String,
    pub slug: String,
    pub description: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Inactive,
    Revoked,
}

impl KeyStatus {
    /// Revocation is terminal; every other move is allowed.
    pub fn can_transition_to(self, _next: KeyStatus) -> bool {
        self != KeyStatus::Revoked
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyStatus::Active => "active",
            KeyStatus::Inactive => "inactive",
            KeyStatus::Revoked => "revoked",
        };
        f.write_str(s)
    }
}

/// Stored credential. Only the bcrypt hash of the secret is kept, plus a
/// short non-secret prefix used to narrow the verification scan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentKey {
    pub id: Uuid,
    pub env_id: Uuid,
    pub hashed_secret: String,
    pub lookup_prefix: String,
    pub status: KeyStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Key metadata safe to hand out to clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeySummary {
    pub id: Uuid,
    pub env_id: Uuid,
    pub status: KeyStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl From<&EnvironmentKey> for KeySummary {
    fn from(key: &EnvironmentKey) -> Self {
        Self {
            id: key.id,
            env_id: key.env_id,
            status: key.status,
            created_by: key.created_by.clone(),
            created_at: key.created_at,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MenuMaster {
    pub id: Uuid,
    pub name: String,
    pub label: String,
    pub icon: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubMenuMaster {
    pub id: Uuid,
    pub name: String,
    pub label: String,
    pub link: Option<String>,
    pub icon: Option<String>,
    pub visible: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ViewStatus {
    #[default]
    Draft,
    Active,
    Inactive,
}

impl ViewStatus {
    /// `draft -> active`, `active <-> inactive`. Repeating the current
    /// active/inactive status is accepted as a no-op.
    pub fn can_transition_to(self, next: ViewStatus) -> bool {
        matches!(
            (self, next),
            (ViewStatus::Draft, ViewStatus::Active)
                | (ViewStatus::Active, ViewStatus::Inactive)
                | (ViewStatus::Inactive, ViewStatus::Active)
                | (ViewStatus::Active, ViewStatus::Active)
                | (ViewStatus::Inactive, ViewStatus::Inactive)
        )
    }
}

impl fmt::Display for ViewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViewStatus::Draft => "draft",
            ViewStatus::Active => "active",
            ViewStatus::Inactive => "inactive",
        };
        f.write_str(s)
    }
}

impl FromStr for ViewStatus {
    type Err = ViewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ViewStatus::Draft),
            "active" => Ok(ViewStatus::Active),
            "inactive" => Ok(ViewStatus::Inactive),
            other => Err(ViewError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubMenuMapping {
    pub sub_menu_id: Uuid,
    pub order: Option<i64>,
    /// Per-view override of the catalog's default visibility.
    pub visible: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MenuMapping {
    pub menu_id: Uuid,
    pub order: Option<i64>,
    #[serde(default)]
    pub sub_menus: Vec<SubMenuMapping>,
}

/// A tenant-scoped navigation document referencing the master catalog.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub id: Uuid,
    pub env_id: Uuid,
    /// Tenant-scoped small integer, not globally unique.
    pub view_id: i64,
    pub name: String,
    pub menus: Vec<MenuMapping>,
    pub status: ViewStatus,
    pub created_at: DateTime<Utc>,
}

impl View {
    pub fn references_menu(&self, menu_id: Uuid) -> bool {
        self.menus.iter().any(|m| m.menu_id == menu_id)
    }

    pub fn references_sub_menu(&self, sub_menu_id: Uuid) -> bool {
        self.menus
            .iter()
            .flat_map(|m| m.sub_menus.iter())
            .any(|s| s.sub_menu_id == sub_menu_id)
    }
}

/// Listing row for `GET /views/env/{envId}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ViewSummary {
    pub id: Uuid,
    pub view_id: i64,
    pub name: String,
    pub status: ViewStatus,
    pub menu_count: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&View> for ViewSummary {
    fn from(view: &View) -> Self {
        Self {
            id: view.id,
            view_id: view.view_id,
            name: view.name.clone(),
            status: view.status,
            menu_count: view.menus.len(),
            created_at: view.created_at,
        }
    }
}

// --- Nested view tree as submitted by clients and the importer ---
// Catalog entries are addressed by name; extra upstream fields are ignored.

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct SubMenuDraft {
    pub name: String,
    pub label: Option<String>,
    pub link: Option<String>,
    pub icon: Option<String>,
    pub order: Option<i64>,
    pub visible: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct MenuDraft {
    pub name: String,
    pub label: Option<String>,
    pub icon: Option<String>,
    pub order: Option<i64>,
    #[serde(default)]
    pub entities: Vec<SubMenuDraft>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct ViewDraft {
    /// Tenant-scoped view id.
    pub id: i64,
    pub name: String,
    pub status: Option<String>,
    #[serde(default)]
    pub menus: Vec<MenuDraft>,
}

impl ViewDraft {
    /// Check the whole tree up front and return the requested initial status.
    /// Nothing is written, so a rejected draft leaves the catalog untouched.
    pub fn validate(&self) -> Result<Option<ViewStatus>, ViewError> {
        if self.name.trim().is_empty() {
            return Err(ViewError::Validation("view name must not be empty".into()));
        }
        if self.id < 0 {
            return Err(ViewError::Validation(format!("view id {} must not be negative", self.id)));
        }
        let status = self.status.as_deref().map(str::parse::<ViewStatus>).transpose()?;
        if let Some(target) = status {
            if target != ViewStatus::Draft && !ViewStatus::Draft.can_transition_to(target) {
                return Err(ViewError::InvalidTransition {
                    from: ViewStatus::Draft.to_string(),
                    to: target.to_string(),
                });
            }
        }
        for menu in &self.menus {
            if menu.name.trim().is_empty() {
                return Err(ViewError::Validation("menu name must not be empty".into()));
            }
            if menu.entities.iter().any(|e| e.name.trim().is_empty()) {
                return Err(ViewError::Validation(format!(
                    "submenu name under menu '{}' must not be empty",
                    menu.name
                )));
            }
        }
        Ok(status)
    }
}
