//! The client-facing facade for mKTL: [`get`] is the one entry point most
//! callers need, resolving a `"store"` or `"store.key"` spec to a cached
//! [`Store`] or [`Item`] instance without the caller ever having to think
//! about configuration caching, provenance refresh, or discovery.

pub mod error;
pub mod get;

pub use error::Error;
pub use get::{clear, get, Resolved};

pub use mktl_item::{Authority, Item, ItemState, Store};

pub type Result<T> = std::result::Result<T, Error>;
