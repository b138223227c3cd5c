//! Peer discovery: UDP broadcast ("direct" mode) and a registry-file backed
//! variant that additionally remembers and re-probes previously seen hosts.

pub mod registry;
pub mod udp;

pub use udp::{DiscoveryError, P2pServer, CALL, DEFAULT_DISCOVERY_PORT, RESPONSE_PREFIX};
