//! Sled-backed persistence for environments, keys, the master catalog and views.
//!
//! Every record is a JSON document (Serde) keyed by its UUID bytes. Secondary
//! trees act as indexes:
//! - `env_slugs`: slug -> env id (unique)
//! - `key_prefixes`: lookup prefix ++ key id -> empty
//! - `menu_names` / `submenu_names`: catalog name -> entry id (unique)
//! - `env_views`: env id ++ view id -> empty
//!
//! Unique indexes are maintained inside multi-tree transactions, so the index
//! is the source of truth when two writers race on the same name or slug.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::{Db, Transactional, Tree};
use uuid::Uuid;

use crate::error::{Result, ViewError};
use crate::models::{Environment, EnvironmentKey, KeyStatus, MenuMaster, SubMenuMaster, View};

const ACTIVATION_LOCK_STRIPES: usize = 64;

/// Catalog records share the name-keyed find-or-create path.
pub trait CatalogEntry: Serialize + DeserializeOwned + Clone {
    const KIND: &'static str;
    fn id(&self) -> Uuid;
    fn name(&self) -> &str;
}

impl CatalogEntry for MenuMaster {
    const KIND: &'static str = "menu";
    fn id(&self) -> Uuid {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
}

impl CatalogEntry for SubMenuMaster {
    const KIND: &'static str = "submenu";
    fn id(&self) -> Uuid {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Clone)] // Sled handles are cheap to clone; lock stripes are shared
pub struct Storage {
    db: Db,
    envs: Tree,
    env_slugs: Tree,
    keys: Tree,
    key_prefixes: Tree,
    menus: Tree,
    menu_names: Tree,
    submenus: Tree,
    submenu_names: Tree,
    views: Tree,
    env_views: Tree,
    activation_locks: Arc<Vec<Mutex<()>>>,
}

impl Storage {
    /// Open or create the Sled database at the given path.
    pub fn open(path: &str) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory database removed on drop (tests, dry runs).
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        let activation_locks = (0..ACTIVATION_LOCK_STRIPES).map(|_| Mutex::new(())).collect();
        Ok(Self {
            envs: db.open_tree("envs")?,
            env_slugs: db.open_tree("env_slugs")?,
            keys: db.open_tree("env_keys")?,
            key_prefixes: db.open_tree("key_prefixes")?,
            menus: db.open_tree("menus")?,
            menu_names: db.open_tree("menu_names")?,
            submenus: db.open_tree("submenus")?,
            submenu_names: db.open_tree("submenu_names")?,
            views: db.open_tree("views")?,
            env_views: db.open_tree("env_views")?,
            activation_locks: Arc::new(activation_locks),
            db,
        })
    }

    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    // --- Environments ---

    /// Insert a new environment; a taken slug aborts with `Conflict`.
    pub fn insert_environment(&self, env: &Environment) -> Result<()> {
        let encoded = serde_json::to_vec(env)?;
        (&self.envs, &self.env_slugs).transaction(
            |(envs, slugs)| -> ConflictableTransactionResult<(), ViewError> {
                if slugs.get(env.slug.as_bytes())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(ViewError::Conflict {
                        field: "slug",
                        detail: format!("environment with slug '{}' already exists", env.slug),
                    }));
                }
                slugs.insert(env.slug.as_bytes().to_vec(), env.id.as_bytes().to_vec())?;
                envs.insert(env.id.as_bytes().to_vec(), encoded.clone())?;
                Ok(())
            },
        )?;
        Ok(())
    }

    pub fn get_environment(&self, id: Uuid) -> Result<Option<Environment>> {
        get_json(&self.envs, id.as_bytes())
    }

    pub fn get_environment_by_slug(&self, slug: &str) -> Result<Option<Environment>> {
        match self.env_slugs.get(slug.as_bytes())? {
            Some(id) => get_json(&self.envs, &id),
            None => Ok(None),
        }
    }

    pub fn list_environments(&self) -> Result<Vec<Environment>> {
        let mut envs: Vec<Environment> = scan_json(&self.envs)?;
        envs.sort_by_key(|e| e.created_at);
        Ok(envs)
    }

    // --- Environment keys ---

    pub fn insert_key(&self, key: &EnvironmentKey) -> Result<()> {
        let encoded = serde_json::to_vec(key)?;
        let index_key = prefix_index_key(&key.lookup_prefix, key.id);
        (&self.keys, &self.key_prefixes).transaction(
            |(keys, prefixes)| -> ConflictableTransactionResult<(), ViewError> {
                keys.insert(key.id.as_bytes().to_vec(), encoded.clone())?;
                prefixes.insert(index_key.clone(), Vec::<u8>::new())?;
                Ok(())
            },
        )?;
        Ok(())
    }

    pub fn get_key(&self, id: Uuid) -> Result<Option<EnvironmentKey>> {
        get_json(&self.keys, id.as_bytes())
    }

    pub fn keys_for_env(&self, env_id: Uuid) -> Result<Vec<EnvironmentKey>> {
        let mut keys: Vec<EnvironmentKey> = scan_json(&self.keys)?;
        keys.retain(|k| k.env_id == env_id);
        keys.sort_by_key(|k| k.created_at);
        Ok(keys)
    }

    /// Active keys whose secret starts with `prefix`.
    pub fn active_keys_with_prefix(&self, prefix: &str) -> Result<Vec<EnvironmentKey>> {
        let mut candidates = vec![];
        for item in self.key_prefixes.scan_prefix(prefix.as_bytes()) {
            let (index_key, _) = item?;
            let id = Uuid::from_slice(&index_key[prefix.len()..])
                .map_err(|e| ViewError::Internal(format!("corrupt key prefix index: {}", e)))?;
            if let Some(key) = self.get_key(id)? {
                if key.status == KeyStatus::Active {
                    candidates.push(key);
                }
            }
        }
        Ok(candidates)
    }

    /// Compare-and-swap status change. A concurrent writer forces a re-read,
    /// so a key revoked in between is never brought back.
    pub fn update_key_status(&self, id: Uuid, next: KeyStatus) -> Result<EnvironmentKey> {
        loop {
            let current = self
                .keys
                .get(id.as_bytes())?
                .ok_or_else(|| ViewError::NotFound(format!("Key {}", id)))?;
            let mut key: EnvironmentKey = serde_json::from_slice(&current)?;
            if !key.status.can_transition_to(next) {
                return Err(ViewError::InvalidTransition {
                    from: key.status.to_string(),
                    to: next.to_string(),
                });
            }
            key.status = next;
            let updated = serde_json::to_vec(&key)?;
            match self
                .keys
                .compare_and_swap(id.as_bytes(), Some(&current), Some(updated))?
            {
                Ok(()) => return Ok(key),
                Err(_) => continue,
            }
        }
    }

    // --- Master catalog ---

    pub fn find_or_create_menu(&self, candidate: MenuMaster) -> Result<MenuMaster> {
        find_or_create(&self.menus, &self.menu_names, candidate)
    }

    pub fn find_or_create_submenu(&self, candidate: SubMenuMaster) -> Result<SubMenuMaster> {
        find_or_create(&self.submenus, &self.submenu_names, candidate)
    }

    pub fn get_menu(&self, id: Uuid) -> Result<Option<MenuMaster>> {
        get_json(&self.menus, id.as_bytes())
    }

    pub fn get_submenu(&self, id: Uuid) -> Result<Option<SubMenuMaster>> {
        get_json(&self.submenus, id.as_bytes())
    }

    pub fn get_menu_by_name(&self, name: &str) -> Result<Option<MenuMaster>> {
        match self.menu_names.get(name.as_bytes())? {
            Some(id) => get_json(&self.menus, &id),
            None => Ok(None),
        }
    }

    pub fn get_submenu_by_name(&self, name: &str) -> Result<Option<SubMenuMaster>> {
        match self.submenu_names.get(name.as_bytes())? {
            Some(id) => get_json(&self.submenus, &id),
            None => Ok(None),
        }
    }

    pub fn list_menus(&self) -> Result<Vec<MenuMaster>> {
        let mut menus: Vec<MenuMaster> = scan_json(&self.menus)?;
        menus.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(menus)
    }

    pub fn list_submenus(&self) -> Result<Vec<SubMenuMaster>> {
        let mut submenus: Vec<SubMenuMaster> = scan_json(&self.submenus)?;
        submenus.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(submenus)
    }

    /// Remove a catalog record and its name index. Callers check references.
    pub fn remove_menu(&self, entry: &MenuMaster) -> Result<()> {
        remove_entry(&self.menus, &self.menu_names, entry)
    }

    pub fn remove_submenu(&self, entry: &SubMenuMaster) -> Result<()> {
        remove_entry(&self.submenus, &self.submenu_names, entry)
    }

    // --- Views ---

    pub fn insert_view(&self, view: &View) -> Result<()> {
        let encoded = serde_json::to_vec(view)?;
        let index_key = env_view_key(view.env_id, view.id);
        (&self.views, &self.env_views).transaction(
            |(views, env_views)| -> ConflictableTransactionResult<(), ViewError> {
                views.insert(view.id.as_bytes().to_vec(), encoded.clone())?;
                env_views.insert(index_key.clone(), Vec::<u8>::new())?;
                Ok(())
            },
        )?;
        Ok(())
    }

    pub fn get_view(&self, id: Uuid) -> Result<Option<View>> {
        get_json(&self.views, id.as_bytes())
    }

    /// Views owned by an environment, oldest first.
    pub fn views_for_env(&self, env_id: Uuid) -> Result<Vec<View>> {
        let mut views = vec![];
        for item in self.env_views.scan_prefix(env_id.as_bytes()) {
            let (index_key, _) = item?;
            let id = Uuid::from_slice(&index_key[16..])
                .map_err(|e| ViewError::Internal(format!("corrupt env view index: {}", e)))?;
            if let Some(view) = self.get_view(id)? {
                views.push(view);
            }
        }
        views.sort_by_key(|v| v.created_at);
        Ok(views)
    }

    pub fn all_views(&self) -> Result<Vec<View>> {
        scan_json(&self.views)
    }

    /// Overwrite several existing views atomically. A view whose index entry
    /// is gone (removed concurrently) aborts the whole write with `NotFound`.
    pub fn put_views(&self, views: &[View]) -> Result<()> {
        let mut encoded = Vec::with_capacity(views.len());
        for view in views {
            encoded.push((view.id, env_view_key(view.env_id, view.id), serde_json::to_vec(view)?));
        }
        (&self.views, &self.env_views).transaction(
            |(views, env_views)| -> ConflictableTransactionResult<(), ViewError> {
                for (id, index_key, doc) in &encoded {
                    if env_views.get(index_key)?.is_none() {
                        return Err(ConflictableTransactionError::Abort(ViewError::NotFound(
                            format!("View {}", id),
                        )));
                    }
                    views.insert(id.as_bytes().to_vec(), doc.clone())?;
                }
                Ok(())
            },
        )?;
        Ok(())
    }

    pub fn remove_view(&self, view: &View) -> Result<()> {
        let index_key = env_view_key(view.env_id, view.id);
        (&self.views, &self.env_views).transaction(
            |(views, env_views)| -> ConflictableTransactionResult<(), ViewError> {
                views.remove(view.id.as_bytes().to_vec())?;
                env_views.remove(index_key.clone())?;
                Ok(())
            },
        )?;
        Ok(())
    }

    /// Serializes activation within one (environment, view name) scope.
    pub fn scope_lock(&self, env_id: Uuid, name: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        env_id.hash(&mut hasher);
        name.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.activation_locks.len();
        // The guarded data is (), so a poisoned lock carries no broken state
        self.activation_locks[stripe]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn get_json<T: DeserializeOwned>(tree: &Tree, key: &[u8]) -> Result<Option<T>> {
    match tree.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn scan_json<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>> {
    let mut records = vec![];
    for item in tree.iter() {
        let (_, value) = item?;
        records.push(serde_json::from_slice(&value)?);
    }
    Ok(records)
}

fn prefix_index_key(prefix: &str, key_id: Uuid) -> Vec<u8> {
    let mut index_key = prefix.as_bytes().to_vec();
    index_key.extend_from_slice(key_id.as_bytes());
    index_key
}

fn env_view_key(env_id: Uuid, view_id: Uuid) -> Vec<u8> {
    let mut index_key = env_id.as_bytes().to_vec();
    index_key.extend_from_slice(view_id.as_bytes());
    index_key
}

/// Name-keyed upsert. The name index and the record are written in one
/// transaction; a writer that loses the race re-runs and finds the winner.
fn find_or_create<T: CatalogEntry>(records: &Tree, names: &Tree, candidate: T) -> Result<T> {
    let encoded = serde_json::to_vec(&candidate)?;
    let id = candidate.id().as_bytes().to_vec();
    let name = candidate.name().as_bytes().to_vec();

    let existing = (records, names).transaction(
        |(records, names)| -> ConflictableTransactionResult<Option<Vec<u8>>, ViewError> {
            if let Some(existing_id) = names.get(&name)? {
                if let Some(existing) = records.get(&existing_id)? {
                    return Ok(Some(existing.to_vec()));
                }
            }
            names.insert(name.clone(), id.clone())?;
            records.insert(id.clone(), encoded.clone())?;
            Ok(None)
        },
    )?;

    match existing {
        Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        None => {
            tracing::info!(kind = T::KIND, name = candidate.name(), id = %candidate.id(), "Catalog entry created");
            Ok(candidate)
        }
    }
}

fn remove_entry<T: CatalogEntry>(records: &Tree, names: &Tree, entry: &T) -> Result<()> {
    let id = entry.id().as_bytes().to_vec();
    let name = entry.name().as_bytes().to_vec();
    (records, names).transaction(
        |(records, names)| -> ConflictableTransactionResult<(), ViewError> {
            records.remove(id.clone())?;
            names.remove(name.clone())?;
            Ok(())
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ViewStatus;
    use chrono::Utc;

    fn env(slug: &str) -> Environment {
        Environment {
            id: Uuid::new_v4(),
            env_name: format!("{} env", slug),
            slug: slug.to_string(),
            description: None,
            created_by: "tester".to_string(),
            created_at: Utc::now(),
        }
    }

    fn menu(name: &str) -> MenuMaster {
        MenuMaster {
            id: Uuid::new_v4(),
            name: name.to_string(),
            label: name.to_string(),
            icon: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_duplicate_slug_is_conflict() {
        let storage = Storage::temporary().expect("Failed to open storage");
        let first = env("prod");
        storage.insert_environment(&first).unwrap();

        let err = storage.insert_environment(&env("prod")).unwrap_err();
        assert!(matches!(err, ViewError::Conflict { field: "slug", .. }));

        // The original record is untouched
        let by_slug = storage.get_environment_by_slug("prod").unwrap().unwrap();
        assert_eq!(by_slug.id, first.id);
        assert_eq!(storage.list_environments().unwrap().len(), 1);
    }

    #[test]
    fn test_find_or_create_menu_is_idempotent() {
        let storage = Storage::temporary().unwrap();
        let first = storage.find_or_create_menu(menu("OVERVIEW")).unwrap();
        let second = storage.find_or_create_menu(menu("OVERVIEW")).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(storage.list_menus().unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_find_or_create_yields_one_entry() {
        let storage = Storage::temporary().unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let storage = storage.clone();
                std::thread::spawn(move || storage.find_or_create_menu(menu("RACE")).unwrap().id)
            })
            .collect();
        let ids: Vec<Uuid> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(storage.list_menus().unwrap().len(), 1);
    }

    #[test]
    fn test_views_for_env_uses_index() {
        let storage = Storage::temporary().unwrap();
        let a = env("a");
        let b = env("b");
        storage.insert_environment(&a).unwrap();
        storage.insert_environment(&b).unwrap();

        let view = View {
            id: Uuid::new_v4(),
            env_id: a.id,
            view_id: 1,
            name: "MAIN".to_string(),
            menus: vec![],
            status: ViewStatus::Draft,
            created_at: Utc::now(),
        };
        storage.insert_view(&view).unwrap();

        assert_eq!(storage.views_for_env(a.id).unwrap(), vec![view.clone()]);
        assert!(storage.views_for_env(b.id).unwrap().is_empty());

        storage.remove_view(&view).unwrap();
        assert!(storage.views_for_env(a.id).unwrap().is_empty());
        assert!(storage.get_view(view.id).unwrap().is_none());
    }

    #[test]
    fn test_put_views_does_not_resurrect_removed_view() {
        let storage = Storage::temporary().unwrap();
        let a = env("a");
        storage.insert_environment(&a).unwrap();

        let make = |name: &str| View {
            id: Uuid::new_v4(),
            env_id: a.id,
            view_id: 1,
            name: name.to_string(),
            menus: vec![],
            status: ViewStatus::Draft,
            created_at: Utc::now(),
        };
        let kept = make("MAIN");
        let removed = make("MAIN");
        storage.insert_view(&kept).unwrap();
        storage.insert_view(&removed).unwrap();
        storage.remove_view(&removed).unwrap();

        let mut promoted = kept.clone();
        promoted.status = ViewStatus::Active;
        let mut stale = removed.clone();
        stale.status = ViewStatus::Active;

        let err = storage.put_views(&[promoted.clone(), stale]).unwrap_err();
        assert!(matches!(err, ViewError::NotFound(_)));
        // Nothing from the aborted write landed
        assert!(storage.get_view(removed.id).unwrap().is_none());
        assert_eq!(storage.get_view(kept.id).unwrap().unwrap().status, ViewStatus::Draft);
        assert_eq!(storage.all_views().unwrap().len(), 1);

        storage.put_views(&[promoted]).unwrap();
        assert_eq!(storage.get_view(kept.id).unwrap().unwrap().status, ViewStatus::Active);
    }
}
