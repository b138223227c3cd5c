//! Background persistence of authoritative item values. Each daemon runs
//! one [`flush::Flusher`] thread per daemon UUID, coalescing writes so a
//! rapidly changing item doesn't cause a write per update, and reads back
//! what was persisted at startup via [`flush::load`].

pub mod error;
pub mod flush;

pub use error::Error;
pub use flush::{load, persist_dir, Flusher};

pub type Result<T> = std::result::Result<T, Error>;
