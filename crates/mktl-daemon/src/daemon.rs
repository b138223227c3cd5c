//! `Daemon`: assembles everything a store's authoritative process needs --
//! configuration, listener ports, the item registry, persistence, and
//! discovery -- in the order the historical implementation relies on
//! (ports can't bind before the UUID is known, provenance can't be built
//! before the ports are bound, and so on).
//!
//! A concrete daemon customizes behavior with [`DaemonHooks`] rather than
//! subclassing: `setup` runs once the store/config/ports are in place but
//! before missing default items are filled in or values are restored;
//! `setup_final` runs after everything is ready but before the daemon
//! announces itself on the network.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use mktl_config::{Block, ProvenanceStratum};
use mktl_core::{Message, MsgType, Payload, Value};
use mktl_discovery::P2pServer;
use mktl_item::{Item, Store};
use mktl_net::{Handler, PublishSession, RequestServer};
use mktl_persist::Flusher;
use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

fn now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Hooks for customizing a daemon's item set without subclassing. The
/// default implementation takes no action in either hook.
pub trait DaemonHooks: Send + Sync {
    /// Called once the store/config/ports are established but before
    /// missing keys are filled with default caching items. Add custom
    /// [`Item`] subclasses here via [`Daemon::add_item`].
    fn setup(&self, _daemon: &Arc<Daemon>) {}

    /// Called after every item (custom and default) exists and persisted
    /// values have been restored, but before the daemon goes on the air.
    fn setup_final(&self, _daemon: &Arc<Daemon>) {}
}

/// A hooks implementation that does nothing in either phase, for daemons
/// with no custom item classes.
pub struct DefaultHooks;
impl DaemonHooks for DefaultHooks {}

type DispatchSlot = Arc<Mutex<Option<Weak<Daemon>>>>;

pub struct Daemon {
    pub store: Arc<Store>,
    pub uuid: Uuid,
    pub provenance: Vec<ProvenanceStratum>,
    pub rep: Arc<RequestServer>,
    pub pub_: Arc<PublishSession>,
    config: Mutex<Block>,
    known_keys: Mutex<HashSet<String>>,
    flusher: Mutex<Option<Arc<Flusher>>>,
    discovery: Mutex<Option<P2pServer>>,
}

impl Daemon {
    /// Bring up a daemon for `store`, loading its item definitions from the
    /// `alias` configuration file. `address` is the interface to bind the
    /// REP/PUB listeners on ("0.0.0.0" for all interfaces); `discovery_port`
    /// is the well-known UDP port discovery calls arrive on.
    pub async fn start(
        store: &str,
        alias: &str,
        address: &str,
        discovery_port: u16,
        hooks: Arc<dyn DaemonHooks>,
    ) -> Result<Arc<Self>> {
        let block = mktl_config::file::load_daemon(store, alias)?;
        mktl_config::cache::add(store, block.clone(), false)?;
        let uuid = block.uuid;
        let known_keys: HashSet<String> = block.keys().map(str::to_string).collect();

        let (cached_rep, cached_pub) = mktl_config::port::load(store, &uuid)?;
        let avoid = mktl_config::port::used()?;

        let pub_ = Arc::new(bind_pub(address, cached_pub, &avoid).await?);

        let dispatch: DispatchSlot = Arc::new(Mutex::new(None));
        let handler: Handler = {
            let dispatch = dispatch.clone();
            Arc::new(move |req: Message| -> Pin<Box<dyn Future<Output = Message> + Send>> {
                let dispatch = dispatch.clone();
                Box::pin(async move {
                    let daemon = dispatch.lock().as_ref().and_then(Weak::upgrade);
                    match daemon {
                        Some(daemon) => daemon.handle_request(req).await,
                        None => Message::error_reply_for(&req.env, "RuntimeError", "daemon not yet ready"),
                    }
                })
            })
        };
        let rep = Arc::new(bind_rep(address, cached_rep, &avoid, handler).await?);

        mktl_config::port::save(store, &uuid, Some(rep.port), Some(pub_.port))?;

        let hostname = hostname::get()
            .map_err(Error::Hostname)?
            .to_string_lossy()
            .into_owned();
        let provenance = vec![ProvenanceStratum::new(0, hostname, rep.port, Some(pub_.port))];

        let mut block = block;
        block.provenance = provenance.clone();
        mktl_config::cache::add(store, block.clone(), false)?;

        let daemon = Arc::new(Self {
            store: Store::new(store),
            uuid,
            provenance,
            rep,
            pub_,
            config: Mutex::new(block),
            known_keys: Mutex::new(known_keys),
            flusher: Mutex::new(None),
            discovery: Mutex::new(None),
        });
        *dispatch.lock() = Some(Arc::downgrade(&daemon));

        hooks.setup(&daemon);
        daemon.setup_missing()?;
        daemon.restore_persisted()?;

        let flusher = Arc::new(Flusher::start(store, uuid)?);
        for key in daemon.store.keys() {
            if let Some(item) = daemon.store.get(&key) {
                item.set_persistence(flusher.clone());
            }
        }
        *daemon.flusher.lock() = Some(flusher);

        hooks.setup_final(&daemon);

        let discovery = P2pServer::start(daemon.rep.port, discovery_port).await?;
        *daemon.discovery.lock() = Some(discovery);

        match mktl_discovery::udp::search(discovery_port, true).await {
            Ok(guides) => daemon.publish_config(&guides),
            Err(e) => warn!(error = %e, "startup discovery sweep failed"),
        }

        info!(store, uuid = %daemon.uuid, rep_port = daemon.rep.port, pub_port = daemon.pub_.port, "daemon ready");
        Ok(daemon)
    }

    /// Register an authoritative item for one of this daemon's declared
    /// keys. Fails if the key was never declared in the configuration, or
    /// already has an item registered.
    pub fn add_item(&self, key: &str, item: Arc<Item>) -> Result<()> {
        let lower = key.to_lowercase();
        if !self.known_keys.lock().contains(&lower) {
            return Err(Error::UnknownKey(lower));
        }
        self.store.insert_new(&lower, item).map_err(|_| Error::DuplicateItem(lower))
    }

    fn setup_missing(self: &Arc<Self>) -> Result<()> {
        let keys: Vec<String> = self.known_keys.lock().iter().cloned().collect();
        let config = self.config.lock().clone();
        for key in keys {
            if self.store.get(&key).is_some() {
                continue;
            }
            let item = Item::new_authoritative(self.store.name.as_str(), key.as_str(), self.provenance.clone(), self.pub_.clone());
            if let Some(labels) = config.items.get(&key).and_then(enumerator_labels) {
                item.set_enumerators(labels.clone());
                let validator_key = key.clone();
                item.set_validator(move |value| {
                    let Some(i) = value.as_i64() else {
                        return Err(mktl_item::Error::Validation {
                            key: validator_key.clone(),
                            reason: "value is not an enumerator index".to_string(),
                        });
                    };
                    if labels.contains_key(&i.to_string()) {
                        Ok(())
                    } else {
                        Err(mktl_item::Error::Validation {
                            key: validator_key.clone(),
                            reason: format!("{i} is not a recognized enumerator"),
                        })
                    }
                });
            }
            self.add_item(&key, item)?;
        }
        Ok(())
    }

    fn restore_persisted(&self) -> Result<()> {
        let loaded = mktl_persist::load(&self.store.name, &self.uuid)?;
        for (key, (value, time, _bulk)) in loaded {
            match self.store.get(&key) {
                Some(item) => {
                    if let Err(e) = item.req_set(value, time) {
                        warn!(key, error = %e, "failed to restore persisted value");
                    }
                }
                None => warn!(key, "persisted value for unknown item, skipping"),
            }
        }
        Ok(())
    }

    fn publish_config(&self, targets: &[(String, u16)]) {
        let config = self.config.lock().clone();
        let Ok(json) = serde_json::to_value(&config) else { return };
        let Ok(value) = serde_json::from_value::<Value>(json) else { return };
        let message = Message::request(MsgType::Config, self.store.name.clone(), Payload::new(value, now()));

        for (host, port) in targets {
            let host = host.clone();
            let port = *port;
            let message = message.clone();
            tokio::spawn(async move {
                if let Ok(session) = mktl_net::RequestSession::connect(&host, port).await {
                    let _ = session.send(message).await;
                }
            });
        }
    }

    async fn handle_request(self: &Arc<Self>, req: Message) -> Message {
        match self.dispatch(&req).await {
            Ok(payload) => Message::reply_for(&req.env, payload),
            Err(e) => Message::error_reply_for(&req.env, e.kind(), e.to_string()),
        }
    }

    async fn dispatch(self: &Arc<Self>, req: &Message) -> Result<Payload> {
        let target = req.env.key.as_str();

        match req.env.msg_type {
            MsgType::Hash => Ok(self.req_hash(target)),
            MsgType::Config => self.req_config(target),
            MsgType::Get => self.req_get(target, req.env.payload.refresh).await,
            MsgType::Set => self.req_set(target, req.env.payload.value.clone(), req.env.payload.time).await,
            other => Err(Error::UnhandledType(other.as_str().to_string())),
        }
    }

    /// Hashes are keyed by the configuration block's UUID, not by store
    /// name, so a caller comparing against a specific cached block's
    /// provenance can look its hash up directly.
    fn req_hash(&self, target: &str) -> Payload {
        let mut map = std::collections::BTreeMap::new();
        let store_name = if target.is_empty() { self.store.name.as_str() } else { target };
        if let Some(hash) = mktl_config::cache::get_hash(store_name) {
            map.insert(self.uuid.to_string(), Value::String(hash));
        }
        Payload::new(Value::Map(map), now())
    }

    fn req_config(&self, target: &str) -> Result<Payload> {
        let block = if target.is_empty() || target == self.store.name {
            self.config.lock().clone()
        } else {
            mktl_config::cache::get(target).ok_or_else(|| Error::UnknownKey(target.to_string()))?
        };

        let json = serde_json::to_value(&block)?;
        let value: Value = serde_json::from_value(json)?;
        Ok(Payload::new(value, now()))
    }

    fn split_target<'a>(&self, target: &'a str, kind: &'static str) -> Result<&'a str> {
        if target.is_empty() {
            return Err(Error::MissingTarget(kind));
        }
        let (store, key) = target.split_once('.').ok_or(Error::MissingTarget(kind))?;
        if store != self.store.name {
            return Err(Error::WrongStore {
                target: target.to_string(),
                store: self.store.name.clone(),
            });
        }
        Ok(key)
    }

    async fn req_get(&self, target: &str, refresh: bool) -> Result<Payload> {
        let key = self.split_target(target, "GET")?;
        let item = self.store.get(key).ok_or_else(|| Error::UnknownKey(key.to_string()))?;
        Ok(item.req_get(refresh))
    }

    async fn req_set(&self, target: &str, value: Value, time: f64) -> Result<Payload> {
        let key = self.split_target(target, "SET")?;
        let item = self.store.get(key).ok_or_else(|| Error::UnknownKey(key.to_string()))?;
        Ok(item.req_set(value, time)?)
    }
}

/// Pull `{index: label}` enumerator labels out of a per-item config's
/// `enum` field, if one was declared.
fn enumerator_labels(config: &mktl_config::ItemConfig) -> Option<std::collections::BTreeMap<String, String>> {
    let Value::Map(raw) = config.get("enum")? else { return None };
    let labels: std::collections::BTreeMap<String, String> = raw
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect();
    (!labels.is_empty()).then_some(labels)
}

async fn bind_pub(address: &str, preferred: Option<u16>, avoid: &HashSet<u16>) -> Result<PublishSession> {
    if let Some(port) = preferred {
        if let Ok(session) = PublishSession::bind(address, Some(port), avoid).await {
            return Ok(session);
        }
    }
    Ok(PublishSession::bind(address, None, avoid).await?)
}

async fn bind_rep(address: &str, preferred: Option<u16>, avoid: &HashSet<u16>, handler: Handler) -> Result<RequestServer> {
    if let Some(port) = preferred {
        if let Ok(server) = RequestServer::bind(address, Some(port), avoid, handler.clone()).await {
            return Ok(server);
        }
    }
    Ok(RequestServer::bind(address, None, avoid, handler).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_home() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        std::env::set_var("MKTL_HOME", tmp.path());
        tmp
    }

    async fn write_config(store: &str, alias: &str) {
        let mut block = Block::new(Uuid::new_v4(), store);
        block.insert_item("temp", mktl_config::ItemConfig::default().with_field("datatype", "float"));
        mktl_config::file::save_daemon(&block, alias).unwrap();
        let uuid_path = mktl_config::file::daemon_uuid_path(store, alias).unwrap();
        std::fs::create_dir_all(uuid_path.parent().unwrap()).unwrap();
        std::fs::write(uuid_path, block.uuid.to_string()).unwrap();
    }

    #[tokio::test]
    async fn daemon_fills_in_default_items_for_declared_keys() {
        let _tmp = with_home();
        let store = format!("teststore-{}", Uuid::new_v4());
        write_config(&store, "default").await;

        let daemon = Daemon::start(&store, "default", "127.0.0.1", 0, Arc::new(DefaultHooks))
            .await
            .unwrap();

        assert!(daemon.store.contains("temp"));
    }

    #[tokio::test]
    async fn get_request_round_trips_through_rep_server() {
        let _tmp = with_home();
        let store = format!("teststore-{}", Uuid::new_v4());
        write_config(&store, "default").await;

        let daemon = Daemon::start(&store, "default", "127.0.0.1", 0, Arc::new(DefaultHooks))
            .await
            .unwrap();

        let item = daemon.store.get("temp").unwrap();
        item.publish(Value::Float(21.5), now(), false).unwrap();

        let client = mktl_net::RequestSession::connect("127.0.0.1", daemon.rep.port).await.unwrap();
        let req = Message::request(MsgType::Get, format!("{store}.temp"), Payload::new(Value::Null, 0.0));
        let rep = client.send_and_wait(req).await.unwrap();

        assert_eq!(rep.env.payload.value, Value::Float(21.5));
    }
}
