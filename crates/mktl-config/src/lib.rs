//! The mKTL configuration store: blocks of item metadata keyed by a
//! daemon-minted UUID, a process-wide cache of every block seen so far, a
//! provenance chain recording how each block was learned, and a
//! deterministic content hash used to short-circuit re-fetching configuration
//! that hasn't changed.

pub mod block;
pub mod cache;
pub mod error;
pub mod file;
pub mod hash;
pub mod port;
pub mod provenance;

pub use block::{Block, ItemConfig};
pub use error::Error;
pub use hash::generate_hash;
pub use provenance::{match_provenance, ProvenanceStratum};

pub type Result<T> = std::result::Result<T, Error>;
