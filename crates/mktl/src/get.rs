//! The `get()` entry point: resolve a `"store"` or `"store.key"` spec to a
//! cached [`Store`] or [`Item`], consulting the in-memory configuration
//! cache, the on-disk client cache, and network discovery in that order --
//! and remembering whatever it finds so later lookups short-circuit.

use std::collections::HashMap;
use std::sync::Arc;

use mktl_config::Block;
use mktl_core::{Message, MsgType, Payload, Value};
use mktl_item::{Item, Store};
use mktl_net::RequestSession;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::{Error, Result};

/// Every [`Store`] this process has resolved through [`get`], keyed by
/// (lowercased) store name. Ensures repeated calls to `get()` hand back the
/// same instance rather than building a fresh registry each time.
static STORE_CACHE: Lazy<Mutex<HashMap<String, Arc<Store>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Shared outbound request connections, keyed by (host, port). The
/// historical implementation opened a fresh socket per item; this keeps one
/// connection per remote daemon and lets every item/refresh call on that
/// daemon share it.
static CONNECTION_CACHE: Lazy<Mutex<HashMap<(String, u16), Arc<RequestSession>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// What [`get`] resolved a spec to.
pub enum Resolved {
    Store(Arc<Store>),
    Item(Arc<Item>),
}

impl Resolved {
    pub fn into_store(self) -> Option<Arc<Store>> {
        match self {
            Resolved::Store(s) => Some(s),
            Resolved::Item(_) => None,
        }
    }

    pub fn into_item(self) -> Option<Arc<Item>> {
        match self {
            Resolved::Item(i) => Some(i),
            Resolved::Store(_) => None,
        }
    }
}

/// Clear a cached [`Store`] instance, returning it if one was present.
pub fn clear(store: &str) -> Option<Arc<Store>> {
    STORE_CACHE.lock().remove(&store.to_lowercase())
}

/// Resolve `spec` ("store" or "store.key") to a [`Store`] or [`Item`],
/// building and caching whatever isn't already known. Both the store and
/// key names are case-insensitive.
pub async fn get(spec: &str) -> Result<Resolved> {
    if spec.is_empty() {
        return Err(Error::MissingStore);
    }

    let (store_name, key) = split_spec(spec);

    if let Some(store) = STORE_CACHE.lock().get(&store_name).cloned() {
        return resolve_in_store(store, key.as_deref()).await;
    }

    let block = resolve_block(&store_name).await?;
    let store = Store::new(&store_name);
    STORE_CACHE.lock().insert(store_name.clone(), store.clone());
    let _ = block;

    resolve_in_store(store, key.as_deref()).await
}

fn split_spec(spec: &str) -> (String, Option<String>) {
    match spec.split_once('.') {
        Some((store, key)) => (store.to_lowercase(), Some(key.to_string())),
        None => (spec.to_lowercase(), None),
    }
}

async fn resolve_in_store(store: Arc<Store>, key: Option<&str>) -> Result<Resolved> {
    let Some(key) = key else {
        return Ok(Resolved::Store(store));
    };

    if let Some(item) = store.get(key) {
        return Ok(Resolved::Item(item));
    }

    let block = mktl_config::cache::get(&store.name).ok_or_else(|| Error::NoConfiguration(store.name.clone()))?;
    if !block.items.contains_key(&key.to_lowercase()) {
        return Err(Error::UnknownItem(store.name.clone(), key.to_string()));
    }

    // Select the highest stratum that has both a REP and a PUB port, same
    // walk `refresh_block` does over the provenance chain.
    let mut provenance = block.provenance.clone();
    provenance.reverse();
    let stratum = provenance
        .iter()
        .find(|s| s.pub_port.is_some())
        .ok_or_else(|| Error::NoConfiguration(store.name.clone()))?;
    let pub_port = stratum.pub_port.expect("filtered above");
    let request = connection_for(&stratum.hostname, stratum.rep).await?;

    let key_owned = key.to_string();
    let item = Item::new_client(store.name.clone(), key_owned.clone(), block.provenance.clone(), request, stratum.hostname.clone(), pub_port);
    Ok(Resolved::Item(store.get_or_create(&key_owned, || item)))
}

async fn connection_for(host: &str, port: u16) -> Result<Arc<RequestSession>> {
    let cache_key = (host.to_string(), port);
    if let Some(session) = CONNECTION_CACHE.lock().get(&cache_key).cloned() {
        return Ok(session);
    }

    let session = Arc::new(RequestSession::connect(host, port).await?);
    CONNECTION_CACHE.lock().insert(cache_key, session.clone());
    Ok(session)
}

/// Resolve a store's configuration block: in-memory cache, then the
/// on-disk client cache (refreshed against its provenance chain), then a
/// network discovery broadcast as a last resort.
async fn resolve_block(store: &str) -> Result<Block> {
    if let Some(block) = mktl_config::cache::get(store) {
        return Ok(block);
    }

    if let Some(block) = load_and_refresh(store).await {
        return Ok(block);
    }

    discover_block(store).await
}

/// Prime the cache with every block already on disk for this store, then
/// walk each one's provenance chain (highest stratum first) asking for an
/// updated hash, fetching a fresh CONFIG only when it disagrees. Mirrors
/// the historical `refresh()` helper.
async fn load_and_refresh(store: &str) -> Option<Block> {
    let candidates = mktl_config::file::load_client_dir(store).ok()?;
    if candidates.is_empty() {
        return None;
    }

    for block in &candidates {
        let _ = mktl_config::cache::add(store, block.clone(), false);
    }
    for block in &candidates {
        refresh_block(store, block).await;
    }

    mktl_config::cache::get(store)
}

async fn refresh_block(store: &str, block: &Block) {
    let Ok(local_hash) = mktl_config::generate_hash(&block.items) else { return };

    let mut provenance = block.provenance.clone();
    provenance.reverse();

    for stratum in provenance {
        let Ok(session) = connection_for(&stratum.hostname, stratum.rep).await else {
            continue;
        };

        let hash_req = Message::request(MsgType::Hash, store.to_string(), Payload::new(Value::Null, 0.0));
        let Ok(hash_rep) = session.send_and_wait(hash_req).await else {
            continue;
        };
        if hash_rep.env.payload.is_error() {
            continue;
        }
        let Value::Map(hashes) = &hash_rep.env.payload.value else {
            continue;
        };
        let Some(Value::String(remote_hash)) = hashes.get(&block.uuid.to_string()) else {
            continue;
        };
        if *remote_hash == local_hash {
            continue;
        }

        let config_req = Message::request(MsgType::Config, store.to_string(), Payload::new(Value::Null, 0.0));
        let Ok(config_rep) = session.send_and_wait(config_req).await else {
            continue;
        };
        if config_rep.env.payload.is_error() {
            continue;
        }
        match serde_json::to_value(&config_rep.env.payload.value).and_then(serde_json::from_value::<Block>) {
            Ok(new_block) => {
                let _ = mktl_config::cache::add(store, new_block, true);
                break;
            }
            Err(e) => warn!(store, error = %e, "failed to parse refreshed configuration"),
        }
    }
}

/// Last resort: broadcast a discovery call and ask the first responder for
/// this store's CONFIG directly.
async fn discover_block(store: &str) -> Result<Block> {
    let guides = mktl_discovery::registry::search(mktl_discovery::DEFAULT_DISCOVERY_PORT, true).await?;
    let Some((host, port)) = guides.into_iter().next() else {
        return Err(Error::NoConfiguration(store.to_string()));
    };

    let session = connection_for(&host, port).await?;
    let req = Message::request(MsgType::Config, store.to_string(), Payload::new(Value::Null, now()));
    let rep = session.send_and_wait(req).await?;

    if let Some(err) = &rep.env.payload.error {
        warn!(store, kind = %err.kind, text = %err.text, "discovery CONFIG request failed");
        return Err(Error::NoConfiguration(store.to_string()));
    }

    let json = serde_json::to_value(&rep.env.payload.value)?;
    let block: Block = serde_json::from_value(json)?;
    mktl_config::cache::add(store, block.clone(), true)?;
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn with_home() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        std::env::set_var("MKTL_HOME", tmp.path());
        tmp
    }

    #[test]
    fn split_spec_handles_dotted_and_bare_forms() {
        assert_eq!(split_spec("MYSTORE.Temp"), ("mystore".to_string(), Some("Temp".to_string())));
        assert_eq!(split_spec("mystore"), ("mystore".to_string(), None));
    }

    #[tokio::test]
    async fn get_returns_cached_store_without_touching_disk_or_network() {
        let _tmp = with_home();
        let store = format!("teststore-{}", Uuid::new_v4());

        let mut block = Block::new(Uuid::new_v4(), &store);
        block.insert_item("temp", mktl_config::ItemConfig::default());
        mktl_config::cache::add(&store, block, false).unwrap();

        let resolved = get(&store).await.unwrap();
        assert!(resolved.into_store().is_some());
        assert!(STORE_CACHE.lock().contains_key(&store));
    }

    #[tokio::test]
    async fn get_rejects_empty_spec() {
        let err = get("").await.unwrap_err();
        assert!(matches!(err, Error::MissingStore));
    }
}
