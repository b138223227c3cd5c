//! `Item`: the unit of addressable state in a store. Every item knows
//! whether it is authoritative (this process is the daemon originating the
//! value) or a client-side cache of a value published elsewhere, and
//! carries the machinery -- subscription state, callbacks, optional
//! polling -- needed to keep that cache current.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mktl_config::ProvenanceStratum;
use mktl_core::{Message, MsgType, Payload, Value};
use mktl_net::{PublishSession, RequestSession, SubscribeSession};
use mktl_persist::Flusher;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::poller::{Poller, PollTarget};
use crate::updater::Updater;
use crate::weakref::{Callback, WeakCallback};

/// Subscription lifecycle for a client-side item: it starts out with no
/// live connection, moves to `Priming` once a subscribe connection is
/// established but the initial value hasn't arrived yet, then `Subscribed`
/// once a first update has landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ItemState {
    Unsubscribed = 0,
    Priming = 1,
    Subscribed = 2,
}

impl ItemState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ItemState::Priming,
            2 => ItemState::Subscribed,
            _ => ItemState::Unsubscribed,
        }
    }
}

fn now() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// Default, enumerator-agnostic rendering of a value for [`Item::formatted`].
fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// How this process relates to an item's authoritative value.
pub enum Authority {
    /// This process is the daemon originating the value; publishes go out
    /// over `publish`.
    Daemon { publish: Arc<PublishSession> },
    /// The authoritative daemon lives elsewhere, reachable at `rep_host:rep_port`
    /// for request/response and `pub_host:pub_port` for subscribing.
    Client {
        request: Arc<RequestSession>,
        pub_host: String,
        pub_port: u16,
        subscribe: Mutex<Option<SubscribeSession>>,
    },
}

pub struct Item {
    pub store: String,
    pub key: String,
    pub provenance: Vec<ProvenanceStratum>,
    authority: Authority,
    state: AtomicU8,
    value: RwLock<Option<(Value, f64)>>,
    callbacks: Mutex<Vec<WeakCallback>>,
    poller: Mutex<Option<Poller>>,
    poll_target: Mutex<Option<Arc<PollTarget>>>,
    updater: Mutex<Option<Updater>>,
    validator: Mutex<Option<Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>>>,
    /// Daemon-side hook producing a fresh reading (e.g. from hardware),
    /// consulted by [`Item::req_poll`]. Items with no refresher just report
    /// whatever is already cached.
    refresher: Mutex<Option<Arc<dyn Fn() -> Value + Send + Sync>>>,
    /// Background flusher this item's authoritative publishes are mirrored
    /// to, if persistence has been wired in for this daemon.
    persist: Mutex<Option<Arc<Flusher>>>,
    enumerators: Mutex<Option<std::collections::BTreeMap<String, String>>>,
}

impl Item {
    pub fn new_authoritative(
        store: impl Into<String>,
        key: impl Into<String>,
        provenance: Vec<ProvenanceStratum>,
        publish: Arc<PublishSession>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store: store.into(),
            key: key.into().to_lowercase(),
            provenance,
            authority: Authority::Daemon { publish },
            state: AtomicU8::new(ItemState::Subscribed as u8),
            value: RwLock::new(None),
            callbacks: Mutex::new(Vec::new()),
            poller: Mutex::new(None),
            poll_target: Mutex::new(None),
            updater: Mutex::new(None),
            validator: Mutex::new(None),
            refresher: Mutex::new(None),
            persist: Mutex::new(None),
            enumerators: Mutex::new(None),
        })
    }

    pub fn new_client(
        store: impl Into<String>,
        key: impl Into<String>,
        provenance: Vec<ProvenanceStratum>,
        request: Arc<RequestSession>,
        pub_host: impl Into<String>,
        pub_port: u16,
    ) -> Arc<Self> {
        Arc::new(Self {
            store: store.into(),
            key: key.into().to_lowercase(),
            provenance,
            authority: Authority::Client {
                request,
                pub_host: pub_host.into(),
                pub_port,
                subscribe: Mutex::new(None),
            },
            state: AtomicU8::new(ItemState::Unsubscribed as u8),
            value: RwLock::new(None),
            callbacks: Mutex::new(Vec::new()),
            poller: Mutex::new(None),
            poll_target: Mutex::new(None),
            updater: Mutex::new(None),
            validator: Mutex::new(None),
            refresher: Mutex::new(None),
            persist: Mutex::new(None),
            enumerators: Mutex::new(None),
        })
    }

    pub fn is_authoritative(&self) -> bool {
        matches!(self.authority, Authority::Daemon { .. })
    }

    pub fn state(&self) -> ItemState {
        ItemState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn target(&self) -> String {
        format!("{}.{}", self.store, self.key)
    }

    /// Currently cached value, if any has ever been observed.
    pub fn value(&self) -> Option<(Value, f64)> {
        self.value.read().clone()
    }

    pub fn to_payload(&self) -> Payload {
        match self.value() {
            Some((value, time)) => Payload::new(value, time),
            None => Payload::new(Value::Null, now()),
        }
    }

    /// Validate a candidate value before it is accepted. The default
    /// accepts everything; daemon setup can install a validator with
    /// [`Item::set_validator`] to reject out-of-range or unrecognized
    /// values before they are ever published.
    pub fn validate(&self, value: &Value) -> Result<()> {
        match self.validator.lock().as_ref() {
            Some(f) => f(value),
            None => Ok(()),
        }
    }

    /// Install a validator invoked by every `set`/`req_set` before the new
    /// value is published. Typically wired up during `DaemonHooks::setup`.
    pub fn set_validator(&self, validator: impl Fn(&Value) -> Result<()> + Send + Sync + 'static) {
        *self.validator.lock() = Some(Arc::new(validator));
    }

    /// Install a hook producing a fresh reading (e.g. from hardware) for
    /// [`Item::req_poll`]. Items with no refresher installed report
    /// whatever is already cached when polled or refreshed.
    pub fn set_refresher(&self, refresher: impl Fn() -> Value + Send + Sync + 'static) {
        *self.refresher.lock() = Some(Arc::new(refresher));
    }

    /// Wire this item's authoritative publishes into a background
    /// persistence flusher, so every value it ever publishes survives a
    /// daemon restart.
    pub fn set_persistence(&self, flusher: Arc<Flusher>) {
        *self.persist.lock() = Some(flusher);
    }

    /// Install the enumerator labels (integer value, as a string key, to
    /// display label) a config declared for this item, enabling
    /// [`Item::formatted`]/[`Item::set_formatted`] to translate between
    /// them. A no-op for items with no enumerators.
    pub fn set_enumerators(&self, labels: std::collections::BTreeMap<String, String>) {
        *self.enumerators.lock() = Some(labels);
    }

    /// The human-readable representation of the current value: the
    /// matching enumerator label when one is configured and the value is
    /// integral, otherwise a plain string rendering.
    pub fn formatted(&self) -> String {
        let value = self.value().map(|(v, _)| v).unwrap_or(Value::Null);

        if let Some(labels) = self.enumerators.lock().as_ref() {
            if let Some(i) = value.as_i64() {
                if let Some(label) = labels.get(&i.to_string()) {
                    return label.clone();
                }
            }
        }

        value_to_string(&value)
    }

    /// Set a new value by its enumerator label (case-insensitive), falling
    /// back to treating `label` as a plain string value when this item has
    /// no enumerators configured. Fails with [`Error::Validation`] when the
    /// label doesn't match any configured enumerator.
    pub async fn set_formatted(&self, label: &str) -> Result<()> {
        let enumerators = self.enumerators.lock().clone();
        let Some(labels) = enumerators else {
            return self.set(Value::String(label.to_string())).await;
        };

        for (index, name) in &labels {
            if name.eq_ignore_ascii_case(label) {
                let value = index.parse::<i64>().map(Value::Int).unwrap_or_else(|_| Value::String(name.clone()));
                return self.set(value).await;
            }
        }

        Err(Error::Validation {
            key: self.key.clone(),
            reason: format!("'{label}' is not a recognized enumerator"),
        })
    }

    /// Get the current value, optionally forcing a refresh against the
    /// authoritative source rather than returning a cached copy.
    pub async fn get(self: &Arc<Self>, refresh: bool) -> Result<(Value, f64)> {
        if self.is_authoritative() {
            return self.value().ok_or_else(|| Error::Validation {
                key: self.key.clone(),
                reason: "no value has ever been set".to_string(),
            });
        }

        if !refresh {
            if let Some(v) = self.value() {
                return Ok(v);
            }
        }

        self.req_refresh().await
    }

    /// Force a GET round trip against the authoritative daemon, updating the
    /// local cache with whatever comes back.
    pub async fn req_refresh(self: &Arc<Self>) -> Result<(Value, f64)> {
        let Authority::Client { request, .. } = &self.authority else {
            return self.value().ok_or_else(|| Error::Validation {
                key: self.key.clone(),
                reason: "no value has ever been set".to_string(),
            });
        };

        let req = Message::request(MsgType::Get, self.target(), Payload::refresh_request(now()));
        let rep = request.send_and_wait(req).await?;

        if let Some(err) = &rep.env.payload.error {
            return Err(Error::Remote {
                kind: err.kind.clone(),
                text: err.text.clone(),
            });
        }

        let value = rep.env.payload.value.clone();
        let time = rep.env.payload.time;
        self.update(value.clone(), time);
        Ok((value, time))
    }

    /// Issue a SET request against the authoritative daemon (client-side
    /// items only; the daemon-side handler lives in `req_set`).
    pub async fn set(&self, value: Value) -> Result<()> {
        self.validate(&value)?;

        let Authority::Client { request, .. } = &self.authority else {
            return Err(Error::NotAuthoritative(self.key.clone()));
        };

        let req = Message::request(MsgType::Set, self.target(), Payload::new(value, now()));
        let rep = request.send_and_wait(req).await?;

        if let Some(err) = &rep.env.payload.error {
            return Err(Error::Remote {
                kind: err.kind.clone(),
                text: err.text.clone(),
            });
        }

        Ok(())
    }

    /// Daemon-side handler for an inbound GET request. When `refresh` is
    /// set, read a fresh value via [`Item::req_poll`] before replying;
    /// items with no refresher installed just report whatever is cached.
    pub fn req_get(&self, refresh: bool) -> Payload {
        if refresh {
            if let Err(e) = self.req_poll() {
                debug!(key = %self.key, error = %e, "refreshing GET failed");
            }
        }
        self.to_payload()
    }

    /// Daemon-side hook used both by a refreshing GET and by this item's
    /// poller: read a fresh value via the installed refresher and publish
    /// it. A no-op for items with no refresher installed.
    pub fn req_poll(&self) -> Result<()> {
        if !self.is_authoritative() {
            return Err(Error::NotAuthoritative(self.key.clone()));
        }
        let refresher = self.refresher.lock().clone();
        let Some(f) = refresher else { return Ok(()) };
        self.publish(f(), now(), false)
    }

    /// Daemon-side handler for an inbound SET request: validate, apply, and
    /// broadcast the new value. Also used to replay persisted values at
    /// startup, where the "request" is a value the daemon is setting on its
    /// own behalf.
    pub fn req_set(&self, value: Value, time: f64) -> Result<Payload> {
        if !self.is_authoritative() {
            return Err(Error::NotAuthoritative(self.key.clone()));
        }

        self.validate(&value)?;
        self.publish(value, time, false)?;
        Ok(self.to_payload())
    }

    /// Publish a new authoritative value. A no-op unless `repeat` is set
    /// and the value is unchanged from what's already cached -- matches the
    /// historical behavior of suppressing redundant broadcasts.
    pub fn publish(&self, value: Value, time: f64, repeat: bool) -> Result<()> {
        let Authority::Daemon { publish } = &self.authority else {
            return Err(Error::NotAuthoritative(self.key.clone()));
        };

        let unchanged = self.value.read().as_ref().map(|(v, _)| v == &value).unwrap_or(false);
        if unchanged && !repeat {
            return Ok(());
        }

        self.update(value.clone(), time);
        if let Some(flusher) = self.persist.lock().as_ref() {
            flusher.push(self.key.clone(), Payload::new(value.clone(), time), None);
        }
        publish.publish(Message::broadcast(self.target(), Payload::new(value, time)));
        Ok(())
    }

    /// Write the new value into the cache and propagate it to every live
    /// callback, pruning any that have been dropped.
    fn update(&self, value: Value, time: f64) {
        *self.value.write() = Some((value.clone(), time));
        self.state.store(ItemState::Subscribed as u8, Ordering::SeqCst);
        self.propagate(&value, time);
    }

    fn propagate(&self, value: &Value, time: f64) {
        let mut callbacks = self.callbacks.lock();
        callbacks.retain(|cb| cb.call(value, time));
    }

    /// Register an update callback, returning the weak handle stored so
    /// the caller can check whether it's still registered. Auto-subscribes
    /// a client item that hasn't connected yet.
    pub fn register(self: &Arc<Self>, callback: &Arc<Callback>) -> WeakCallback {
        let weak = WeakCallback::new(callback);
        self.callbacks.lock().push(weak.clone());

        if !self.is_authoritative() && self.state() == ItemState::Unsubscribed {
            let item = self.clone();
            tokio::spawn(async move {
                if let Err(e) = item.subscribe(true).await {
                    warn!(key = %item.key, error = %e, "auto-subscribe failed");
                }
            });
        }

        weak
    }

    /// Establish (or re-use) a live subscription to the authoritative
    /// daemon's publish socket. `prime` additionally forces an immediate
    /// GET so the cache isn't empty while waiting for the next publish.
    pub async fn subscribe(self: &Arc<Self>, prime: bool) -> Result<()> {
        let Authority::Client {
            pub_host,
            pub_port,
            subscribe,
            ..
        } = &self.authority
        else {
            return Ok(());
        };

        if self.state() != ItemState::Unsubscribed {
            return Ok(());
        }

        self.state.store(ItemState::Priming as u8, Ordering::SeqCst);

        let topic = self.target();
        let mut session = SubscribeSession::connect(pub_host, *pub_port, vec![topic]).await?;

        let item = self.clone();
        let updater = Updater::start(move |value, time| item.update(value, time));

        {
            let mut guard = subscribe.lock();
            *guard = None;
        }

        tokio::spawn(async move {
            while let Some(msg) = session.recv().await {
                updater.push(msg.env.payload.value, msg.env.payload.time);
            }
        });

        if prime {
            self.req_refresh().await?;
        }

        Ok(())
    }

    /// Start (or reschedule) polling this item's `get(refresh=true)` on a
    /// fixed interval. The poller only holds a weak reference to the item,
    /// so it stops on its own once the item is dropped.
    pub fn poll(self: &Arc<Self>, period: Duration) {
        let weak = Arc::downgrade(self);
        let target: Arc<PollTarget> = Arc::new(move || {
            let Some(item) = weak.upgrade() else { return };
            if item.is_authoritative() {
                if let Err(e) = item.req_poll() {
                    debug!(key = %item.key, error = %e, "poll failed");
                }
                return;
            }
            tokio::spawn(async move {
                if let Err(e) = item.req_refresh().await {
                    debug!(key = %item.key, error = %e, "poll refresh failed");
                }
            });
        });

        let mut poller = self.poller.lock();
        match poller.as_ref() {
            Some(p) => p.set_period(period),
            None => *poller = Some(Poller::start(Arc::downgrade(&target), period)),
        }
        *self.poll_target.lock() = Some(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn authoritative_publish_updates_cache_and_suppresses_repeats() {
        let publish = Arc::new(PublishSession::bind("127.0.0.1", None, &HashSet::new()).await.unwrap());
        let item = Item::new_authoritative("store", "TEMP", vec![], publish);

        item.publish(Value::Int(1), 10.0, false).unwrap();
        assert_eq!(item.value(), Some((Value::Int(1), 10.0)));

        // Same value, repeat=false: no-op, but also shouldn't error.
        item.publish(Value::Int(1), 11.0, false).unwrap();
        assert_eq!(item.value(), Some((Value::Int(1), 10.0)));

        item.publish(Value::Int(2), 12.0, false).unwrap();
        assert_eq!(item.value(), Some((Value::Int(2), 12.0)));
    }

    #[tokio::test]
    async fn formatted_uses_enumerator_labels_when_configured() {
        let publish = Arc::new(PublishSession::bind("127.0.0.1", None, &HashSet::new()).await.unwrap());
        let item = Item::new_authoritative("store", "state", vec![], publish);
        item.set_enumerators(std::collections::BTreeMap::from([
            ("0".to_string(), "Zero".to_string()),
            ("1".to_string(), "One".to_string()),
        ]));

        item.publish(Value::Int(0), now(), false).unwrap();
        assert_eq!(item.formatted(), "Zero");

        item.publish(Value::Int(1), now(), true).unwrap();
        assert_eq!(item.formatted(), "One");
    }

    #[tokio::test]
    async fn formatted_falls_back_to_plain_rendering_without_enumerators() {
        let publish = Arc::new(PublishSession::bind("127.0.0.1", None, &HashSet::new()).await.unwrap());
        let item = Item::new_authoritative("store", "temp", vec![], publish);
        item.publish(Value::Float(21.5), now(), false).unwrap();
        assert_eq!(item.formatted(), "21.5");
    }

    #[tokio::test]
    async fn client_item_get_fetches_from_the_authoritative_daemon() {
        // A client item with an empty cache falls through to a GET round
        // trip rather than returning stale/missing data.
        let request_server_handler: mktl_net::Handler =
            Arc::new(|req| Box::pin(async move { Message::reply_for(&req.env, Payload::new(Value::Null, 0.0)) }));
        let rep_server = mktl_net::RequestServer::bind("127.0.0.1", None, &HashSet::new(), request_server_handler)
            .await
            .unwrap();
        let session = Arc::new(RequestSession::connect("127.0.0.1", rep_server.port).await.unwrap());

        let item = Item::new_client("store", "temp", vec![], session, "127.0.0.1", 1);
        let result = item.get(false).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn item_key_is_lowercased() {
        let publish = PublishSession::bind("127.0.0.1", None, &HashSet::new()).await.unwrap();
        let item = Item::new_authoritative("store", "TEMP", vec![], Arc::new(publish));
        assert_eq!(item.key, "temp");
    }

    #[tokio::test]
    async fn set_validator_rejects_invalid_values() {
        let publish = Arc::new(PublishSession::bind("127.0.0.1", None, &HashSet::new()).await.unwrap());
        let item = Item::new_authoritative("store", "mode", vec![], publish);
        item.set_validator(|v| match v.as_i64() {
            Some(0) | Some(1) => Ok(()),
            _ => Err(Error::Validation {
                key: "mode".to_string(),
                reason: "must be 0 or 1".to_string(),
            }),
        });

        assert!(item.req_set(Value::Int(1), now()).is_ok());
        assert!(item.req_set(Value::Int(2), now()).is_err());
        assert_eq!(item.value().map(|(v, _)| v), Some(Value::Int(1)));
    }

    #[tokio::test]
    async fn req_poll_reads_via_refresher_and_publishes() {
        let publish = Arc::new(PublishSession::bind("127.0.0.1", None, &HashSet::new()).await.unwrap());
        let item = Item::new_authoritative("store", "temp", vec![], publish);
        let reading = Arc::new(Mutex::new(Value::Int(1)));
        let refresher_reading = reading.clone();
        item.set_refresher(move || refresher_reading.lock().clone());

        item.req_poll().unwrap();
        assert_eq!(item.value().map(|(v, _)| v), Some(Value::Int(1)));

        *reading.lock() = Value::Int(2);
        item.req_poll().unwrap();
        assert_eq!(item.value().map(|(v, _)| v), Some(Value::Int(2)));
    }

    #[tokio::test]
    async fn req_poll_without_refresher_is_a_no_op() {
        let publish = Arc::new(PublishSession::bind("127.0.0.1", None, &HashSet::new()).await.unwrap());
        let item = Item::new_authoritative("store", "temp", vec![], publish);
        item.publish(Value::Int(5), now(), false).unwrap();

        item.req_poll().unwrap();
        assert_eq!(item.value().map(|(v, _)| v), Some(Value::Int(5)));
    }

    #[tokio::test]
    async fn publish_pushes_to_persistence_flusher() {
        let tmp = tempfile::tempdir().unwrap();
        std::env::set_var("MKTL_HOME", tmp.path());
        let uuid = uuid::Uuid::new_v4();

        let publish = Arc::new(PublishSession::bind("127.0.0.1", None, &HashSet::new()).await.unwrap());
        let item = Item::new_authoritative("mystore", "temp", vec![], publish);
        let flusher = Arc::new(mktl_persist::Flusher::start("mystore", uuid).unwrap());
        item.set_persistence(flusher.clone());

        item.publish(Value::Int(7), now(), false).unwrap();
        flusher.flush();
        std::thread::sleep(std::time::Duration::from_millis(50));

        let loaded = mktl_persist::load("mystore", &uuid).unwrap();
        let (value, _time, _bulk) = loaded.get("temp").unwrap();
        assert_eq!(*value, Value::Int(7));
    }
}
