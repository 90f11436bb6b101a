//! Client-side connection state: one socket, one outstanding request.
//!
//! Transport faults are sticky. The first send/receive failure kills
//! the connection and every later operation fails fast, so a half-read
//! stream can never be misinterpreted as fresh replies.

use std::io;
use std::net::TcpStream;
use std::path::Path;

use scry_proto::{recv_packet, send_file, send_packet};

use crate::error::{Error, Result};

/// The client's exclusive handle on the session socket.
#[derive(Debug)]
pub(crate) struct Conn {
    stream: Option<TcpStream>,
}

impl Conn {
    pub(crate) fn new(stream: TcpStream) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    /// Degenerate local-only mode: every remote operation fails with
    /// [`Error::Offline`].
    pub(crate) fn offline() -> Self {
        Self { stream: None }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.stream.is_some()
    }

    /// Declares the connection dead and drops the socket.
    pub(crate) fn kill(&mut self) {
        self.stream = None;
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(Error::Offline)
    }

    /// Sends one frame; a transport fault kills the connection.
    pub(crate) fn send(&mut self, ty: i32, payload: &[u8]) -> Result<()> {
        let result = send_packet(self.stream()?, ty, payload);
        if result.is_err() {
            self.kill();
        }
        Ok(result?)
    }

    /// Receives one frame; disconnect and transport faults both kill
    /// the connection.
    pub(crate) fn recv(&mut self) -> Result<(i32, Vec<u8>)> {
        match recv_packet(self.stream()?) {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => {
                self.kill();
                Err(Error::Io(io::ErrorKind::UnexpectedEof.into()))
            }
            Err(e) => {
                self.kill();
                Err(Error::Io(e))
            }
        }
    }

    /// Request/reply: sends `ty`, blocks for exactly one frame, and
    /// requires the reply to carry `reply_ty`. A mismatched type means
    /// request/reply pairing is lost, which poisons the connection.
    pub(crate) fn roundtrip(&mut self, ty: i32, payload: &[u8], reply_ty: i32) -> Result<Vec<u8>> {
        self.send(ty, payload)?;
        let (got, reply) = self.recv()?;
        if got != reply_ty {
            self.kill();
            return Err(Error::Protocol("reply type does not match request"));
        }
        Ok(reply)
    }

    /// Streams a capture file as chunked frames of `ty`.
    pub(crate) fn send_capture(
        &mut self,
        ty: i32,
        path: &Path,
        progress: &mut dyn FnMut(f32),
    ) -> Result<()> {
        let result = send_file(self.stream()?, ty, path, progress);
        if result.is_err() {
            self.kill();
        }
        Ok(result?)
    }
}
