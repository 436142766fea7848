//! Core types for the mirroring pipeline.
//!
//! - [`Frame`] is one complete protocol value as captured from the wire
//! - [`ConnectionId`] identifies a client flow (client address and port)
//! - [`CapturedPacket`] is the decoded packet record a packet source produces
//!
//! ```rust
//! use respmirror::types::{CapturedPacket, ConnectionId};
//!
//! let packet = CapturedPacket::tcp(
//!     "10.0.0.5:51221".parse().unwrap(),
//!     "10.0.0.1:6379".parse().unwrap(),
//!     &b"*1\r\n$4\r\nPING\r\n"[..],
//! );
//! let id: ConnectionId = packet.connection_id().unwrap();
//! assert_eq!(id.to_string(), "10.0.0.5:51221");
//! ```

mod frame;
mod packet;

pub use frame::{Frame, FrameKind};
pub use packet::{CapturedPacket, ConnectionId, TcpFlags};
