//! On-disk layout for the configuration store.
//!
//! ```text
//! <directory>/daemon/store/<store>/<alias>.json   item definitions, as authored
//! <directory>/daemon/store/<store>/<alias>.uuid   this daemon's minted identity
//! <directory>/client/cache/<store>/<uuid>.json    full block, as last seen on the wire
//! ```
//!
//! `<directory>` is `$MKTL_HOME`, falling back to `$HOME/.mktl`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use uuid::Uuid;

use crate::block::{Block, ItemConfig};
use crate::error::Error;
use crate::Result;

static DIRECTORY: OnceCell<PathBuf> = OnceCell::new();

/// Root directory for all mKTL configuration state on this host.
pub fn directory() -> Result<&'static Path> {
    DIRECTORY
        .get_or_try_init(|| {
            if let Ok(home) = std::env::var("MKTL_HOME") {
                return Ok(PathBuf::from(home));
            }
            let home = std::env::var("HOME").map_err(|_| Error::NoHome)?;
            Ok(PathBuf::from(home).join(".mktl"))
        })
        .map(|p| p.as_path())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| Error::Io {
            path: parent.to_path_buf(),
            source,
        })?;
        set_dir_mode(parent)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_dir_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o775)).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(not(unix))]
fn set_dir_mode(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_file_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o664)).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path) -> Result<()> {
    Ok(())
}

pub fn daemon_config_path(store: &str, alias: &str) -> Result<PathBuf> {
    Ok(directory()?.join("daemon").join("store").join(store).join(format!("{alias}.json")))
}

pub fn daemon_uuid_path(store: &str, alias: &str) -> Result<PathBuf> {
    Ok(directory()?.join("daemon").join("store").join(store).join(format!("{alias}.uuid")))
}

pub fn client_cache_path(store: &str, uuid: &Uuid) -> Result<PathBuf> {
    Ok(directory()?.join("client").join("cache").join(store).join(format!("{uuid}.json")))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let raw = serde_json::to_string_pretty(value).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, raw).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    set_file_mode(path)
}

/// Load (or mint) the persistent identity for a daemon's configuration
/// alias, and the item definitions that go with it.
pub fn load_daemon(store: &str, alias: &str) -> Result<Block> {
    let config_path = daemon_config_path(store, alias)?;
    let uuid_path = daemon_uuid_path(store, alias)?;

    let items: BTreeMap<String, ItemConfig> = if config_path.exists() {
        read_json(&config_path)?
    } else {
        BTreeMap::new()
    };

    let uuid = if uuid_path.exists() {
        let raw = std::fs::read_to_string(&uuid_path).map_err(|source| Error::Io {
            path: uuid_path.clone(),
            source,
        })?;
        Uuid::parse_str(raw.trim()).unwrap_or_else(|_| Uuid::new_v4())
    } else {
        let fresh = Uuid::new_v4();
        ensure_parent(&uuid_path)?;
        std::fs::write(&uuid_path, fresh.to_string()).map_err(|source| Error::Io {
            path: uuid_path.clone(),
            source,
        })?;
        set_file_mode(&uuid_path)?;
        fresh
    };

    let mut block = Block::new(uuid, store);
    block.items = items;
    Ok(block)
}

pub fn save_daemon(block: &Block, alias: &str) -> Result<()> {
    let config_path = daemon_config_path(&block.store, alias)?;
    write_json(&config_path, &block.items)
}

pub fn load_client(store: &str, uuid: &Uuid) -> Result<Block> {
    let path = client_cache_path(store, uuid)?;
    read_json(&path)
}

/// Load every cached block for `store`, regardless of UUID.
///
/// Used when a store hasn't been seen before and no UUID is known yet;
/// mirrors `Config.load()`'s no-`specific`-argument form, which scans the
/// whole `client/cache/<store>/` directory rather than one known file.
pub fn load_client_dir(store: &str) -> Result<Vec<Block>> {
    let dir = directory()?.join("client").join("cache").join(store);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(&dir).map_err(|source| Error::Io {
        path: dir.clone(),
        source,
    })?;

    let mut blocks = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| Error::Io {
            path: dir.clone(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        blocks.push(read_json(&path)?);
    }
    Ok(blocks)
}

pub fn save_client(block: &Block) -> Result<()> {
    let path = client_cache_path(&block.store, &block.uuid)?;
    write_json(&path, block)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_mktl_home<R>(f: impl FnOnce(&Path) -> R) -> R {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("MKTL_HOME", dir.path());
        // The directory() cache is process-global and memoized once; tests
        // that need a fresh value run in their own process via `cargo test`'s
        // default one-thread-per-test isolation is not guaranteed, so these
        // tests only exercise the path-building helpers, not the OnceCell.
        f(dir.path())
    }

    #[test]
    fn daemon_paths_are_namespaced_by_store_and_alias() {
        with_mktl_home(|_dir| {
            let cfg = daemon_config_path("mystore", "default").unwrap();
            assert!(cfg.ends_with("daemon/store/mystore/default.json"));
            let uuid_path = daemon_uuid_path("mystore", "default").unwrap();
            assert!(uuid_path.ends_with("daemon/store/mystore/default.uuid"));
        });
    }

    #[test]
    fn client_cache_path_is_namespaced_by_store_and_uuid() {
        with_mktl_home(|_dir| {
            let uuid = Uuid::nil();
            let path = client_cache_path("mystore", &uuid).unwrap();
            assert!(path.ends_with(format!("client/cache/mystore/{uuid}.json")));
        });
    }

    #[test]
    fn load_client_dir_returns_empty_for_unknown_store() {
        with_mktl_home(|_dir| {
            let blocks = load_client_dir("nosuchstore").unwrap();
            assert!(blocks.is_empty());
        });
    }

    #[test]
    fn load_client_dir_collects_every_cached_uuid() {
        with_mktl_home(|_dir| {
            let a = Block::new(Uuid::new_v4(), "mystore");
            let b = Block::new(Uuid::new_v4(), "mystore");
            save_client(&a).unwrap();
            save_client(&b).unwrap();

            let mut blocks = load_client_dir("mystore").unwrap();
            blocks.sort_by_key(|blk| blk.uuid);
            let mut expected = vec![a.uuid, b.uuid];
            expected.sort();
            assert_eq!(blocks.into_iter().map(|blk| blk.uuid).collect::<Vec<_>>(), expected);
        });
    }
}
