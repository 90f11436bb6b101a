//! Wire protocol for scry remote replay sessions.
//!
//! Every message on the wire is a frame: a 4-byte little-endian packet
//! type, a 4-byte little-endian payload length, then the payload bytes.
//! Payloads are built and parsed with the rewindable cursor in [`wire`];
//! whole capture files travel as chunked frame sequences (see [`frame`]).

mod frame;
mod packet;
mod wire;

pub use frame::{FILE_CHUNK, MAX_PAYLOAD, recv_file, recv_packet, send_file, send_packet};
pub use packet::{CaptureOptions, ControlPacket, PROXY_FIRST, Status};
pub use wire::{WireReader, WireWriter};
