//! Packet-type space and in-band status codes.

use std::io;

use crate::wire::{WireReader, WireWriter};

/// First packet type owned by the replay-call surface. Everything at or
/// above this value is forwarded to the proxy call bridge; everything
/// below is a session control packet.
pub const PROXY_FIRST: i32 = 0x1000;

/// Session control packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ControlPacket {
    /// Bare acknowledgement, carries no payload.
    Noop = 0,
    /// Request / reply: enumerate the replay drivers the host supports.
    DriverList = 1,
    /// Peer asserts a host-local file may be deleted at session end.
    TakeOwnership = 2,
    /// Chunked transfer of a capture file to the host.
    CopyCapture = 3,
    /// Open a previously transferred or host-local capture.
    OpenCapture = 4,
    /// Periodic load-progress report while an open is in flight.
    OpenProgress = 5,
    /// Terminal reply to [`ControlPacket::OpenCapture`].
    Opened = 6,
    /// Shut down the open driver and return the session to idle.
    CloseCapture = 7,
    /// Launch a process with capture injection on the host.
    ExecuteAndInject = 8,
}

/// One past the last control packet value.
const CONTROL_COUNT: i32 = ControlPacket::ExecuteAndInject as i32 + 1;

// Control packets and proxy calls must never share a type value.
const _: () = assert!(CONTROL_COUNT <= PROXY_FIRST);

impl ControlPacket {
    /// Maps a wire value back to a control packet, if it is one.
    pub fn from_wire(ty: i32) -> Option<Self> {
        match ty {
            0 => Some(Self::Noop),
            1 => Some(Self::DriverList),
            2 => Some(Self::TakeOwnership),
            3 => Some(Self::CopyCapture),
            4 => Some(Self::OpenCapture),
            5 => Some(Self::OpenProgress),
            6 => Some(Self::Opened),
            7 => Some(Self::CloseCapture),
            8 => Some(Self::ExecuteAndInject),
            _ => None,
        }
    }
}

/// Typed result carried in-band in replies. Capability faults travel as
/// one of these; transport faults never do — a dead connection is
/// detected by the framing layer instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    /// Operation succeeded.
    Success = 0,
    /// Unclassified failure.
    UnknownError = 1,
    /// Logical misuse, e.g. opening over an already-open driver.
    InternalError = 2,
    /// The named capture file does not exist on the host.
    FileNotFound = 3,
    /// Process launch or injection failed.
    InjectionFailed = 4,
    /// The capture needs a driver the host does not support.
    ApiUnsupported = 5,
    /// The driver exists but failed to initialise the capture.
    ApiInitFailed = 6,
    /// The connection died or the peer broke protocol.
    NetworkIoFailed = 7,
}

impl Status {
    /// Decodes a status from a payload; unknown values degrade to
    /// [`Status::UnknownError`] rather than failing the session.
    pub fn read(r: &mut WireReader<'_>) -> io::Result<Self> {
        Ok(match r.read_i32()? {
            0 => Self::Success,
            2 => Self::InternalError,
            3 => Self::FileNotFound,
            4 => Self::InjectionFailed,
            5 => Self::ApiUnsupported,
            6 => Self::ApiInitFailed,
            7 => Self::NetworkIoFailed,
            _ => Self::UnknownError,
        })
    }

    /// Encodes the status into a payload.
    pub fn write(self, w: &mut WireWriter) {
        w.write_i32(self as i32);
    }
}

/// Capture settings forwarded with an execute-and-inject request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureOptions {
    /// Let the captured app control vsync.
    pub allow_vsync: bool,
    /// Let the captured app go fullscreen.
    pub allow_fullscreen: bool,
    /// Enable API validation during capture.
    pub api_validation: bool,
    /// Record callstacks alongside captured calls.
    pub capture_callstacks: bool,
    /// Inject into child processes as well.
    pub hook_into_children: bool,
    /// Reference all live resources in every capture.
    pub ref_all_resources: bool,
    /// Capture from all command queues, not just the presenting one.
    pub capture_all_cmd_lists: bool,
    /// Seconds to stall at startup waiting for a debugger.
    pub delay_for_debugger: u32,
}

impl CaptureOptions {
    /// Encodes the record into a payload.
    pub fn write(&self, w: &mut WireWriter) {
        w.write_bool(self.allow_vsync);
        w.write_bool(self.allow_fullscreen);
        w.write_bool(self.api_validation);
        w.write_bool(self.capture_callstacks);
        w.write_bool(self.hook_into_children);
        w.write_bool(self.ref_all_resources);
        w.write_bool(self.capture_all_cmd_lists);
        w.write_u32(self.delay_for_debugger);
    }

    /// Decodes the record from a payload.
    pub fn read(r: &mut WireReader<'_>) -> io::Result<Self> {
        Ok(Self {
            allow_vsync: r.read_bool()?,
            allow_fullscreen: r.read_bool()?,
            api_validation: r.read_bool()?,
            capture_callstacks: r.read_bool()?,
            hook_into_children: r.read_bool()?,
            ref_all_resources: r.read_bool()?,
            capture_all_cmd_lists: r.read_bool()?,
            delay_for_debugger: r.read_u32()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_values_stay_below_proxy_range() {
        for ty in 0..CONTROL_COUNT {
            let pkt = ControlPacket::from_wire(ty).expect("contiguous control range");
            assert_eq!(pkt as i32, ty);
            assert!(ty < PROXY_FIRST);
        }
        assert!(ControlPacket::from_wire(PROXY_FIRST).is_none());
        assert!(ControlPacket::from_wire(CONTROL_COUNT).is_none());
    }

    #[test]
    fn status_roundtrip_and_unknown_degrade() {
        let all = [
            Status::Success,
            Status::UnknownError,
            Status::InternalError,
            Status::FileNotFound,
            Status::InjectionFailed,
            Status::ApiUnsupported,
            Status::ApiInitFailed,
            Status::NetworkIoFailed,
        ];
        for status in all {
            let mut w = WireWriter::new();
            status.write(&mut w);
            let mut r = WireReader::new(w.as_bytes());
            assert_eq!(Status::read(&mut r).unwrap(), status);
        }

        let mut w = WireWriter::new();
        w.write_i32(9999);
        let mut r = WireReader::new(w.as_bytes());
        assert_eq!(Status::read(&mut r).unwrap(), Status::UnknownError);
    }

    #[test]
    fn capture_options_roundtrip() {
        let opts = CaptureOptions {
            allow_vsync: true,
            api_validation: true,
            capture_all_cmd_lists: true,
            delay_for_debugger: 30,
            ..CaptureOptions::default()
        };
        let mut w = WireWriter::new();
        opts.write(&mut w);
        let mut r = WireReader::new(w.as_bytes());
        assert_eq!(CaptureOptions::read(&mut r).unwrap(), opts);
    }
}
