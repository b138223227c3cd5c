//! Process-wide configuration cache: every [`Block`] this process has seen,
//! indexed both by store name (the form callers usually want) and by UUID
//! (the form the wire protocol actually keys on), plus a per-store content
//! hash kept in step with whatever was last added.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::block::{Block, ItemConfig};
use crate::error::Error;
use crate::hash::generate_hash;
use crate::Result;

#[derive(Default)]
struct Inner {
    by_store: HashMap<String, Block>,
    by_uuid: HashMap<Uuid, String>,
    hashes: HashMap<String, String>,
}

static CACHE: Lazy<Mutex<Inner>> = Lazy::new(|| Mutex::new(Inner::default()));

/// Add (or replace) the cached block for a store, recomputing its content
/// hash. When `persist` is set the block is also written to the client
/// cache file on disk so a future process can pick up where this one left
/// off without a fresh discovery round.
pub fn add(store: &str, block: Block, persist: bool) -> Result<()> {
    let hash = generate_hash(&block.items)?;

    {
        let mut inner = CACHE.lock();
        inner.by_uuid.insert(block.uuid, store.to_string());
        inner.hashes.insert(store.to_string(), hash);
        inner.by_store.insert(store.to_string(), block.clone());
    }

    if persist {
        crate::file::save_client(&block)?;
    }

    Ok(())
}

pub fn get(store: &str) -> Option<Block> {
    CACHE.lock().by_store.get(store).cloned()
}

pub fn get_by_uuid(uuid: &Uuid) -> Option<Block> {
    let inner = CACHE.lock();
    let store = inner.by_uuid.get(uuid)?;
    inner.by_store.get(store).cloned()
}

pub fn get_hash(store: &str) -> Option<String> {
    CACHE.lock().hashes.get(store).cloned()
}

pub fn list(store: &str) -> Vec<String> {
    CACHE
        .lock()
        .by_store
        .get(store)
        .map(|b| b.keys().map(str::to_string).collect())
        .unwrap_or_default()
}

pub fn remove(store: &str) -> Option<Block> {
    let mut inner = CACHE.lock();
    inner.hashes.remove(store);
    let block = inner.by_store.remove(store)?;
    inner.by_uuid.remove(&block.uuid);
    Some(block)
}

/// Load a store's block from disk, preferring the daemon's own config when
/// an alias is known locally, falling back to the client cache keyed by
/// UUID. Returns [`Error::ConfigurationMissing`] when neither is present.
pub fn load(store: &str, alias: &str, uuid: Option<&Uuid>) -> Result<Block> {
    if let Some(block) = get(store) {
        return Ok(block);
    }

    if let Ok(block) = crate::file::load_daemon(store, alias) {
        if !block.items.is_empty() {
            return Ok(block);
        }
    }

    if let Some(uuid) = uuid {
        if let Ok(block) = crate::file::load_client(store, uuid) {
            return Ok(block);
        }
    }

    Err(Error::ConfigurationMissing(store.to_string()))
}

/// Normalize item keys to lowercase and rebuild the per-key index for a
/// store, matching the historical `_rebuild` step that runs after any
/// mutation to a block's item set.
pub fn rebuild(store: &str) {
    let mut inner = CACHE.lock();
    if let Some(block) = inner.by_store.get_mut(store) {
        let items: std::collections::BTreeMap<String, ItemConfig> = block
            .items
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect();
        block.items = items;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_store(tag: &str) -> String {
        format!("teststore-{tag}-{}", Uuid::new_v4())
    }

    #[test]
    fn add_then_get_round_trips() {
        let store = unique_store("add-get");
        let mut block = Block::new(Uuid::new_v4(), &store);
        block.insert_item("temp", ItemConfig::default());
        add(&store, block.clone(), false).unwrap();

        let fetched = get(&store).unwrap();
        assert_eq!(fetched.uuid, block.uuid);
        assert!(get_hash(&store).is_some());
    }

    #[test]
    fn get_by_uuid_resolves_through_store_index() {
        let store = unique_store("by-uuid");
        let block = Block::new(Uuid::new_v4(), &store);
        add(&store, block.clone(), false).unwrap();

        let fetched = get_by_uuid(&block.uuid).unwrap();
        assert_eq!(fetched.store, store);
    }

    #[test]
    fn remove_clears_both_indices() {
        let store = unique_store("remove");
        let block = Block::new(Uuid::new_v4(), &store);
        add(&store, block.clone(), false).unwrap();
        remove(&store);

        assert!(get(&store).is_none());
        assert!(get_by_uuid(&block.uuid).is_none());
    }
}
