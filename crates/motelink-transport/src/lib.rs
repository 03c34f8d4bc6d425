//! Message-preserving packet channels for motelink.
//!
//! The controller speaks two L2CAP channels: a control channel carrying
//! outbound reports and an interrupt channel carrying inbound reports. Both
//! are `SOCK_SEQPACKET` sockets, so one `recv` yields exactly one report.
//!
//! This is the lowest layer of motelink. Establishing the Bluetooth link is
//! left to the caller: hand an already-connected descriptor to
//! [`ReportStream::from_fd`], or use [`SeqPacketListener`] / [`SeqPacketListener::connect`]
//! for Unix-socket bridges and [`ReportStream::pair`] for in-process peers.

pub mod error;
pub mod seqpacket;
pub mod traits;

pub use error::{Result, TransportError};
pub use seqpacket::SeqPacketListener;
pub use traits::{PacketChannel, ReportStream};
