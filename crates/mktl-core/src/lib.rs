//! Core wire types shared by every mKTL crate: the tagged [`Value`] union,
//! [`Payload`], [`Envelope`], and [`Message`]. Nothing in this crate knows
//! about sockets, threads, or the filesystem -- it is pure data modeling.

pub mod envelope;
pub mod error;
pub mod message;
pub mod payload;
pub mod value;

pub use envelope::{Envelope, MsgType, WIRE_VERSION};
pub use error::{Error, Result};
pub use message::Message;
pub use payload::{Payload, PayloadError};
pub use value::{BulkDescriptor, Value};
