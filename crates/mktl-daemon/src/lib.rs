//! Daemon-side assembly: load a store's configuration, bind its REP/PUB
//! listeners (reusing previously cached ports when possible), fill in its
//! item registry, restore persisted values, and announce it on the local
//! network. See [`Daemon::start`] for the full sequence.

pub mod daemon;
pub mod error;

pub use daemon::{DaemonHooks, DefaultHooks};
pub use error::Error;

/// The assembled daemon. Re-exported at the crate root since it's the
/// primary type consumers construct.
pub use daemon::Daemon;

pub type Result<T> = std::result::Result<T, Error>;
