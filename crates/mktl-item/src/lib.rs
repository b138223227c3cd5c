//! The item layer: addressable state (`Item`), its lazy registry (`Store`),
//! background polling (`Poller`), decoupled callback dispatch (`Updater`),
//! and the weak-reference helper callbacks are registered through.

pub mod error;
pub mod item;
pub mod poller;
pub mod store;
pub mod updater;
pub mod weakref;

pub use error::Error;
pub use item::{Authority, Item, ItemState};
pub use poller::Poller;
pub use store::Store;
pub use updater::Updater;
pub use weakref::WeakCallback;

pub type Result<T> = std::result::Result<T, Error>;
