//! Provenance chains record the path a piece of configuration traveled:
//! stratum 0 is the authoritative daemon, each subsequent stratum a relay
//! or cache that republished it. Matching two chains is how a client
//! decides whether its cached copy of a store's configuration still traces
//! back to the same authority.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceStratum {
    pub stratum: u32,
    pub hostname: String,
    pub rep: u16,
    #[serde(rename = "pub", default, skip_serializing_if = "Option::is_none")]
    pub pub_port: Option<u16>,
}

impl ProvenanceStratum {
    pub fn new(stratum: u32, hostname: impl Into<String>, rep: u16, pub_port: Option<u16>) -> Self {
        Self {
            stratum,
            hostname: hostname.into(),
            rep,
            pub_port,
        }
    }
}

/// Compare two provenance chains. They match if every stratum that both
/// chains have in common (walking from stratum 0 forward) is identical --
/// at least one stratum must be present to match at all, and the chains are
/// allowed to differ in length past the point where the shorter one ends.
pub fn match_provenance(a: &[ProvenanceStratum], b: &[ProvenanceStratum]) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }

    let shared = a.len().min(b.len());
    for i in 0..shared {
        if a[i] != b[i] {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stratum(n: u32, host: &str) -> ProvenanceStratum {
        ProvenanceStratum::new(n, host, 10080, Some(10081))
    }

    #[test]
    fn identical_chains_match() {
        let a = vec![stratum(0, "host-a")];
        let b = vec![stratum(0, "host-a")];
        assert!(match_provenance(&a, &b));
    }

    #[test]
    fn shorter_chain_matches_prefix() {
        let a = vec![stratum(0, "host-a"), stratum(1, "relay-b")];
        let b = vec![stratum(0, "host-a")];
        assert!(match_provenance(&a, &b));
    }

    #[test]
    fn divergent_stratum_fails() {
        let a = vec![stratum(0, "host-a")];
        let b = vec![stratum(0, "host-b")];
        assert!(!match_provenance(&a, &b));
    }

    #[test]
    fn empty_chains_never_match() {
        assert!(!match_provenance(&[], &[]));
        assert!(!match_provenance(&[stratum(0, "host-a")], &[]));
    }
}
