//! Registry-mode discovery: a host can keep a manually curated
//! `client/brokers` file and a `client/brokers.cache` file of previously
//! discovered hosts, and consult them directly instead of relying solely on
//! broadcast discovery (which doesn't cross subnet boundaries).

use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::warn;

use crate::udp::{self, DiscoveryError};

fn brokers_path() -> Result<PathBuf, DiscoveryError> {
    let dir = mktl_config::file::directory().map_err(|e| DiscoveryError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
    Ok(dir.join("client").join("brokers"))
}

fn parse_broker_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .filter_map(|line| {
            let stripped = line.split('#').next().unwrap_or("").trim();
            (!stripped.is_empty()).then(|| stripped.to_string())
        })
        .collect()
}

/// Read both the manually curated and cached broker lists, in that order.
fn preload() -> Vec<String> {
    let Ok(manual) = brokers_path() else { return Vec::new() };
    let cached = {
        let mut p = manual.clone();
        let mut name = p.file_name().unwrap().to_os_string();
        name.push(".cache");
        p.set_file_name(name);
        p
    };

    let mut entries = Vec::new();
    for path in [manual, cached] {
        match std::fs::read_to_string(&path) {
            Ok(raw) => entries.extend(parse_broker_lines(&raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed reading broker list"),
        }
    }
    entries
}

/// Append newly found hosts to `client/brokers.cache`, deduplicated and
/// sorted. Only the host is remembered, not the port -- a fresh discovery
/// call against the cached host is still required to learn its current REP
/// port.
fn remember(found: &[(String, u16)]) -> Result<(), DiscoveryError> {
    let manual = brokers_path()?;
    let mut cached = manual.clone();
    let mut name = cached.file_name().unwrap().to_os_string();
    name.push(".cache");
    cached.set_file_name(name);

    if let Some(parent) = cached.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut lines: BTreeSet<String> = match std::fs::read_to_string(&cached) {
        Ok(raw) => raw.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
        Err(e) => return Err(e.into()),
    };

    for (host, _port) in found {
        lines.insert(host.clone());
    }

    let body = lines.into_iter().collect::<Vec<_>>().join("\n") + "\n";
    std::fs::write(&cached, body)?;
    Ok(())
}

/// Discover peers by combining cached/manual broker hosts with a broadcast
/// sweep, recording anything newly found for next time.
pub async fn search(port: u16, wait: bool) -> Result<Vec<(String, u16)>, DiscoveryError> {
    let mut found = Vec::new();

    for host in preload() {
        match udp::probe(&host, port, wait).await {
            Ok(mut hits) => found.append(&mut hits),
            Err(e) => warn!(host, error = %e, "direct discovery probe failed"),
        }
    }

    found.extend(udp::search(port, wait).await?);

    if !found.is_empty() {
        remember(&found)?;
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_broker_lines_strips_comments_and_blanks() {
        let raw = "host-a\n# a comment\nhost-b # trailing comment\n\n   \n";
        let lines = parse_broker_lines(raw);
        assert_eq!(lines, vec!["host-a".to_string(), "host-b".to_string()]);
    }
}
