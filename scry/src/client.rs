//! Session client: the analysis front end's handle on a replay host.
//!
//! One connection, one outstanding request. Capability faults come back
//! as [`Error::Driver`] with a typed status; every transport or
//! protocol fault surfaces as a network failure and poisons the
//! connection, deliberately without distinguishing the cause.

use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use scry_proto::{CaptureOptions, ControlPacket, Status, WireReader, WireWriter};
use tracing::{debug, info};

use crate::bridge::RemoteDriver;
use crate::conn::Conn;
use crate::drivers::{Catalogue, DriverKind};
use crate::error::{Error, Result};

/// The well-known replay host port, used when the caller passes 0.
pub const DEFAULT_PORT: u16 = 39920;

/// A client session with a replay host.
#[derive(Debug)]
pub struct RemoteClient {
    conn: Arc<Mutex<Conn>>,
    local: Catalogue,
}

impl RemoteClient {
    /// Connects to a replay host. `port` 0 selects [`DEFAULT_PORT`]; a
    /// `host` of `"-"` creates the client in offline mode, where only
    /// local enumeration works.
    ///
    /// `local_proxies` lists the replay drivers available on *this*
    /// machine; [`RemoteClient::open_capture`] takes an index into it.
    pub fn connect(host: &str, port: u16, local_proxies: Catalogue) -> Result<Self> {
        let conn = if host == "-" {
            debug!("operating without a network connection");
            Conn::offline()
        } else {
            let port = if port == 0 { DEFAULT_PORT } else { port };
            let stream = TcpStream::connect((host, port))?;
            stream.set_nodelay(true)?;
            info!(host, port, "connected to replay host");
            Conn::new(stream)
        };

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            local: local_proxies,
        })
    }

    /// Whether the connection is (still) usable.
    pub fn connected(&self) -> bool {
        self.conn.lock().is_ok_and(|c| c.is_alive())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Conn>> {
        self.conn
            .lock()
            .map_err(|_| Error::Protocol("connection mutex poisoned"))
    }

    /// Names of the replay drivers available locally as proxies.
    pub fn local_proxies(&self) -> Vec<String> {
        self.local.iter().map(|(_, name)| name.to_owned()).collect()
    }

    /// Asks the host which capture kinds it can replay.
    pub fn remote_supported_replays(&self) -> Result<Vec<String>> {
        let reply =
            self.lock()?
                .roundtrip(ControlPacket::DriverList as i32, &[], ControlPacket::DriverList as i32)?;

        let mut r = WireReader::new(&reply);
        let count = r.read_u32()?;
        let mut names = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let _kind = DriverKind::from_wire(r.read_u32()?);
            names.push(r.read_str()?);
        }
        Ok(names)
    }

    /// Launches a process with capture injection on the host. Returns
    /// the opaque process identifier; 0 signals failure (including a
    /// host configured with `noexec`).
    pub fn execute_and_inject(
        &self,
        app: &str,
        working_dir: &str,
        cmd_line: &str,
        capture_file: &str,
        opts: &CaptureOptions,
    ) -> Result<u32> {
        let mut args = WireWriter::new();
        args.write_str(app);
        args.write_str(working_dir);
        args.write_str(cmd_line);
        args.write_str(capture_file);
        opts.write(&mut args);

        let reply = self.lock()?.roundtrip(
            ControlPacket::ExecuteAndInject as i32,
            args.as_bytes(),
            ControlPacket::ExecuteAndInject as i32,
        )?;
        let mut r = WireReader::new(&reply);
        Ok(r.read_u32()?)
    }

    /// Copies a capture file to the host. Returns the host-side path,
    /// which the host deletes at session end.
    pub fn copy_capture(&self, path: &Path, mut progress: impl FnMut(f32)) -> Result<PathBuf> {
        let ty = ControlPacket::CopyCapture as i32;
        let mut conn = self.lock()?;
        // Announce the transfer, then stream the chunks.
        conn.send(ty, &[])?;
        conn.send_capture(ty, path, &mut progress)?;

        let (got, reply) = conn.recv()?;
        if got != ty {
            conn.kill();
            return Err(Error::Protocol("reply type does not match request"));
        }
        let mut r = WireReader::new(&reply);
        Ok(PathBuf::from(r.read_str()?))
    }

    /// Tells the host it now owns (and may delete) a capture file that
    /// already lives on its filesystem.
    pub fn take_ownership(&self, path: &str) -> Result<()> {
        let mut args = WireWriter::new();
        args.write_str(path);
        self.lock()?.roundtrip(
            ControlPacket::TakeOwnership as i32,
            args.as_bytes(),
            ControlPacket::TakeOwnership as i32,
        )?;
        Ok(())
    }

    /// Opens a capture on the host and returns a driver stub that
    /// forwards every introspection call to it.
    ///
    /// `proxy_index` indexes [`RemoteClient::local_proxies`];
    /// `progress` receives fractions while the host loads the capture,
    /// ending at 1.0 on success.
    pub fn open_capture(
        &self,
        proxy_index: usize,
        path: &str,
        mut progress: impl FnMut(f32),
    ) -> Result<RemoteDriver> {
        // Caller contract, checked before touching the network.
        if self.local.get(proxy_index).is_none() {
            return Err(Error::Driver(Status::InternalError));
        }

        let mut args = WireWriter::new();
        args.write_str(path);

        let status = {
            let mut conn = self.lock()?;
            conn.send(ControlPacket::OpenCapture as i32, args.as_bytes())?;

            // Progress packets until the terminal Opened; anything else
            // here means the request/reply stream is corrupt.
            loop {
                let (ty, payload) = conn.recv()?;
                let mut r = WireReader::new(&payload);
                match ControlPacket::from_wire(ty) {
                    Some(ControlPacket::OpenProgress) => progress(r.read_f32()?),
                    Some(ControlPacket::Opened) => break Status::read(&mut r)?,
                    _ => {
                        conn.kill();
                        return Err(Error::Protocol("unexpected packet while opening capture"));
                    }
                }
            }
        };

        if status != Status::Success {
            return Err(Error::Driver(status));
        }

        info!(path, "capture ready on replay host");
        Ok(RemoteDriver::new(Arc::clone(&self.conn)))
    }

    /// Closes the open capture: the host shuts its driver down and the
    /// stub is consumed.
    pub fn close_capture(&self, driver: RemoteDriver) -> Result<()> {
        drop(driver);
        self.lock()?.roundtrip(
            ControlPacket::CloseCapture as i32,
            &[],
            ControlPacket::Noop as i32,
        )?;
        Ok(())
    }

    /// Ends the session and drops the connection.
    pub fn shutdown(self) {
        if let Ok(mut conn) = self.conn.lock() {
            conn.kill();
        }
    }
}
