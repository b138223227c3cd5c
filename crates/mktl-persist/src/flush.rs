//! Background persistence: a single thread per daemon UUID coalesces
//! writes over a five second window before touching disk, so a rapidly
//! changing item doesn't generate a write per update. Scalar values are
//! stored as one JSON file per key; bulk values additionally get a
//! `bulk:<key>` companion file holding the raw bytes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use mktl_core::{Payload, Value};
use tracing::warn;
use uuid::Uuid;

use crate::error::Error;
use crate::Result;

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

enum Cmd {
    Push { key: String, payload: Payload, bulk: Option<Vec<u8>> },
    Flush,
    Shutdown,
}

/// Handle to a running persistence thread for one daemon UUID. Dropping it
/// flushes any pending writes before the thread exits.
pub struct Flusher {
    tx: Sender<Cmd>,
    thread: Option<JoinHandle<()>>,
}

pub fn persist_dir(store: &str, uuid: &Uuid) -> Result<PathBuf> {
    let _ = store;
    Ok(mktl_config::file::directory()?.join("daemon").join("persist").join(uuid.to_string()))
}

impl Flusher {
    pub fn start(store: impl Into<String>, uuid: Uuid) -> Result<Self> {
        let store = store.into();
        let base = persist_dir(&store, &uuid)?;
        std::fs::create_dir_all(&base).map_err(|source| Error::Io { path: base.clone(), source })?;

        let (tx, rx) = mpsc::channel::<Cmd>();

        let thread = std::thread::spawn(move || {
            let mut pending: HashMap<String, (Payload, Option<Vec<u8>>)> = HashMap::new();

            loop {
                match rx.recv_timeout(FLUSH_INTERVAL) {
                    Ok(Cmd::Push { key, payload, bulk }) => {
                        pending.insert(key, (payload, bulk));
                    }
                    Ok(Cmd::Flush) => {
                        flush_pending(&base, &mut pending);
                    }
                    Ok(Cmd::Shutdown) => {
                        flush_pending(&base, &mut pending);
                        break;
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        flush_pending(&base, &mut pending);
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    pub fn push(&self, key: impl Into<String>, payload: Payload, bulk: Option<Vec<u8>>) {
        let _ = self.tx.send(Cmd::Push {
            key: key.into(),
            payload,
            bulk,
        });
    }

    /// Force an out-of-band flush without waiting for the coalescing window.
    pub fn flush(&self) {
        let _ = self.tx.send(Cmd::Flush);
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        let _ = self.tx.send(Cmd::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn flush_pending(base: &Path, pending: &mut HashMap<String, (Payload, Option<Vec<u8>>)>) {
    for (key, (payload, bulk)) in pending.drain() {
        if let Err(e) = write_one(base, &key, &payload, bulk.as_deref()) {
            warn!(key, error = %e, "failed to persist item value");
        }
    }
}

fn write_one(base: &Path, key: &str, payload: &Payload, bulk: Option<&[u8]>) -> Result<()> {
    let scalar_path = base.join(key);
    let raw = serde_json::to_vec(payload).map_err(|source| Error::Json {
        path: scalar_path.clone(),
        source,
    })?;
    std::fs::write(&scalar_path, raw).map_err(|source| Error::Io {
        path: scalar_path.clone(),
        source,
    })?;

    if let Some(bytes) = bulk {
        let bulk_path = base.join(format!("bulk:{key}"));
        std::fs::write(&bulk_path, bytes).map_err(|source| Error::Io {
            path: bulk_path.clone(),
            source,
        })?;
    }

    Ok(())
}

/// Load every persisted value for a daemon UUID, for replay into the
/// corresponding items via `req_set` at startup.
pub fn load(store: &str, uuid: &Uuid) -> Result<HashMap<String, (Value, f64, Option<Vec<u8>>)>> {
    let base = persist_dir(store, uuid)?;
    let mut out = HashMap::new();

    let entries = match std::fs::read_dir(&base) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(source) => return Err(Error::Io { path: base, source }),
    };

    for entry in entries {
        let entry = entry.map_err(|source| Error::Io { path: base.clone(), source })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("bulk:") {
            continue;
        }

        let raw = std::fs::read_to_string(entry.path()).map_err(|source| Error::Io {
            path: entry.path(),
            source,
        })?;
        let payload: Payload = serde_json::from_str(&raw).map_err(|source| Error::Json {
            path: entry.path(),
            source,
        })?;

        let bulk_path = base.join(format!("bulk:{name}"));
        let bulk = std::fs::read(&bulk_path).ok();

        out.insert(name, (payload.value, payload.time, bulk));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_home(dir: &Path) {
        std::env::set_var("MKTL_HOME", dir);
    }

    #[test]
    fn flusher_coalesces_and_writes_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        with_home(tmp.path());

        let uuid = Uuid::new_v4();
        {
            let flusher = Flusher::start("mystore", uuid).unwrap();
            flusher.push("temp", Payload::new(Value::Int(1), 1.0), None);
            flusher.push("temp", Payload::new(Value::Int(2), 2.0), None);
            flusher.flush();
            std::thread::sleep(Duration::from_millis(50));
        } // Drop flushes anything left pending.

        let loaded = load("mystore", &uuid).unwrap();
        let (value, _time, _bulk) = loaded.get("temp").unwrap();
        assert_eq!(*value, Value::Int(2));
    }

    #[test]
    fn load_pairs_bulk_companion_file() {
        let tmp = tempfile::tempdir().unwrap();
        with_home(tmp.path());

        let uuid = Uuid::new_v4();
        {
            let flusher = Flusher::start("mystore", uuid).unwrap();
            flusher.push("image", Payload::new(Value::Null, 1.0), Some(vec![1, 2, 3]));
            flusher.flush();
            std::thread::sleep(Duration::from_millis(50));
        }

        let loaded = load("mystore", &uuid).unwrap();
        let (_value, _time, bulk) = loaded.get("image").unwrap();
        assert_eq!(bulk.as_deref(), Some(&[1u8, 2, 3][..]));
    }
}
