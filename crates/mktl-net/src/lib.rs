//! Transport-neutral wire framing, port binding, and the request/response and
//! publish/subscribe session layers for mKTL.
//!
//! This crate deliberately says nothing about which concrete network
//! transport carries the bytes -- the historical implementation used
//! ZeroMQ, but the protocol itself is an ordered tuple of frames over a
//! reliable byte stream, which is what [`framing`] and [`transport`]
//! provide here on top of plain TCP.

pub mod framing;
pub mod session;
pub mod transport;

pub use framing::{Frame, FrameCodec, FramingError};
pub use session::{Handler, PendingRequest, PublishSession, RequestServer, RequestSession, SubscribeSession};
pub use transport::{TransportError, MAXIMUM_PORT, MINIMUM_PORT};
