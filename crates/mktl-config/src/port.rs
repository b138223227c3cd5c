//! Cached listener ports: a daemon that restarts tries to reclaim the same
//! REP/PUB ports it used last time, rather than getting reassigned new ones
//! every time it comes back up.

use std::collections::HashSet;
use std::path::PathBuf;

use uuid::Uuid;

use crate::error::Error;
use crate::Result;

fn port_dir(store: &str) -> Result<PathBuf> {
    Ok(crate::file::directory()?.join("daemon").join("port").join(store))
}

fn read_port(path: &std::path::Path) -> Option<u16> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn write_port(path: &std::path::Path, port: u16) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| Error::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, format!("{port}\n")).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Return the `(rep, pub)` ports last used by this `(store, uuid)` pair, if
/// any were ever cached. Either slot may be `None` independently.
pub fn load(store: &str, uuid: &Uuid) -> Result<(Option<u16>, Option<u16>)> {
    let dir = port_dir(store)?;
    let rep = read_port(&dir.join(format!("{uuid}.req")));
    let pub_ = read_port(&dir.join(format!("{uuid}.pub")));
    Ok((rep, pub_))
}

/// Persist whichever of `rep`/`pub_` are provided for future restarts.
pub fn save(store: &str, uuid: &Uuid, rep: Option<u16>, pub_: Option<u16>) -> Result<()> {
    let dir = port_dir(store)?;
    if let Some(rep) = rep {
        write_port(&dir.join(format!("{uuid}.req")), rep)?;
    }
    if let Some(pub_) = pub_ {
        write_port(&dir.join(format!("{uuid}.pub")), pub_)?;
    }
    Ok(())
}

/// Every port number previously cached for any store on this host, so a
/// fresh bind can steer clear of a peer daemon's reclaimed port even before
/// the OS would report the conflict.
pub fn used() -> Result<HashSet<u16>> {
    let base = crate::file::directory()?.join("daemon").join("port");
    let mut ports = HashSet::new();
    collect(&base, &mut ports);
    Ok(ports)
}

fn collect(dir: &std::path::Path, out: &mut HashSet<u16>) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(&path, out);
        } else if let Some(port) = read_port(&path) {
            out.insert(port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        std::env::set_var("MKTL_HOME", tmp.path());

        let store = format!("teststore-{}", Uuid::new_v4());
        let uuid = Uuid::new_v4();
        save(&store, &uuid, Some(10080), Some(10081)).unwrap();

        let (rep, pub_) = load(&store, &uuid).unwrap();
        assert_eq!(rep, Some(10080));
        assert_eq!(pub_, Some(10081));
    }

    #[test]
    fn load_missing_cache_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        std::env::set_var("MKTL_HOME", tmp.path());

        let (rep, pub_) = load("neverseen", &Uuid::new_v4()).unwrap();
        assert_eq!(rep, None);
        assert_eq!(pub_, None);
    }
}
