//! Replay host server: accept loop, trust gate, and the per-connection
//! session state machine.
//!
//! One session runs at a time. Inside a session the peer drives the
//! state machine with control packets (enumerate, transfer, open,
//! close, execute); once a capture is open, any packet in the proxy
//! range is forwarded to the call bridge. Transport and protocol faults
//! end the session; capability faults are reported in-band and the
//! session continues.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use scry_proto::{
    CaptureOptions, ControlPacket, PROXY_FIRST, Status, WireReader, WireWriter, recv_file,
    recv_packet, send_packet,
};
use tracing::{debug, error, info, warn};

use crate::drivers::{ReplayDriver, ReplayHost};
use crate::progress::ProgressCell;
use crate::trust::ServerConfig;

/// Interval between progress packets during a blocking open.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// A bound replay host server.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    host: Box<dyn ReplayHost>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listener", &self.listener)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Binds the listening socket. `port` 0 asks the OS for a free
    /// port; see [`Server::local_addr`].
    pub fn bind(
        addr: &str,
        port: u16,
        config: ServerConfig,
        host: impl ReplayHost + 'static,
    ) -> crate::Result<Self> {
        let listener = TcpListener::bind((addr, port))?;
        listener.set_nonblocking(true)?;

        for range in &config.ranges {
            info!(
                "allowing connections from {}/{}",
                Ipv4Addr::from(range.ip),
                Ipv4Addr::from(range.mask)
            );
        }
        if config.allow_execution {
            info!("allowing execution commands");
        } else {
            info!("blocking execution commands");
        }

        Ok(Self {
            listener,
            config,
            host: Box::new(host),
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts and serves sessions until `stop` is raised or the accept
    /// layer faults. Untrusted peers are dropped before any read.
    pub fn serve(&self, stop: &AtomicBool) {
        info!("replay host ready for requests");

        while !stop.load(Ordering::Relaxed) {
            let (stream, addr) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(self.config.poll_interval);
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "error in accept, shutting down server");
                    return;
                }
            };

            let Some(peer) = peer_v4(addr) else {
                info!(%addr, "non-IPv4 peer, closing connection");
                continue;
            };
            if !self.config.trusted(peer) {
                info!(%peer, "doesn't match any trusted range, closing connection");
                continue;
            }

            info!(%peer, "connection received");
            let mut session = Session {
                host: self.host.as_ref(),
                config: &self.config,
                driver: None,
                temp_files: Vec::new(),
            };
            match session.run(stream, stop) {
                Ok(()) => debug!(%peer, "session ended cleanly"),
                Err(e) => info!(%peer, error = %e, "session ended"),
            }
            session.teardown();
            info!(%peer, "closed replay connection, ready for new connection");
        }
    }
}

/// The peer's IPv4 source address, unwrapping v4-mapped v6.
fn peer_v4(addr: SocketAddr) -> Option<Ipv4Addr> {
    match addr.ip() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(ip) => ip.to_ipv4_mapped(),
    }
}

/// Per-connection state: the open driver (if any) and the capture files
/// to delete at teardown.
struct Session<'s> {
    host: &'s dyn ReplayHost,
    config: &'s ServerConfig,
    driver: Option<Box<dyn ReplayDriver>>,
    temp_files: Vec<PathBuf>,
}

/// Outcome of one bounded receive poll.
enum Polled {
    Packet(i32, Vec<u8>),
    Disconnected,
    Stopped,
}

impl Session<'_> {
    /// Runs the control loop until disconnect, stop signal, or a fault.
    fn run(&mut self, mut stream: TcpStream, stop: &AtomicBool) -> io::Result<()> {
        loop {
            let (ty, payload) = match self.poll_packet(&mut stream, stop)? {
                Polled::Packet(ty, payload) => (ty, payload),
                Polled::Disconnected | Polled::Stopped => return Ok(()),
            };

            if ty >= PROXY_FIRST {
                // Proxy calls are only legal while a capture is open.
                let Some(driver) = self.driver.as_mut() else {
                    return Err(protocol_err("proxy call received with no open capture"));
                };
                crate::bridge::Bridge::new(driver.as_mut()).tick(&mut stream, ty, &payload)?;
                continue;
            }

            let mut args = WireReader::new(&payload);
            match ControlPacket::from_wire(ty) {
                Some(ControlPacket::DriverList) => self.enumerate_drivers(&mut stream)?,
                Some(ControlPacket::TakeOwnership) => {
                    let path = args.read_str()?;
                    info!(path, "taking ownership of capture");
                    self.temp_files.push(PathBuf::from(path));
                    send_packet(&mut stream, ControlPacket::TakeOwnership as i32, &[])?;
                }
                Some(ControlPacket::CopyCapture) => self.copy_capture(&mut stream)?,
                Some(ControlPacket::OpenCapture) => {
                    let path = args.read_str()?;
                    self.open_capture(&mut stream, &path)?;
                }
                Some(ControlPacket::CloseCapture) => {
                    if let Some(mut driver) = self.driver.take() {
                        info!("closing capture");
                        driver.shutdown();
                    }
                    send_packet(&mut stream, ControlPacket::Noop as i32, &[])?;
                }
                Some(ControlPacket::ExecuteAndInject) => {
                    self.execute_and_inject(&mut stream, &mut args)?;
                }
                // Reply-direction or meaningless types from a peer are a
                // protocol violation, never silently ignored.
                Some(_) | None => {
                    return Err(protocol_err("unexpected packet type for session state"));
                }
            }
        }
    }

    /// Waits for the next frame, observing the stop flag at the
    /// configured poll interval instead of blocking indefinitely.
    fn poll_packet(&self, stream: &mut TcpStream, stop: &AtomicBool) -> io::Result<Polled> {
        stream.set_read_timeout(Some(self.config.poll_interval))?;
        let mut probe = [0u8; 1];
        loop {
            if stop.load(Ordering::Relaxed) {
                return Ok(Polled::Stopped);
            }
            match stream.peek(&mut probe) {
                Ok(0) => return Ok(Polled::Disconnected),
                Ok(_) => break,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e),
            }
        }

        // Data is waiting; read the whole frame blocking.
        stream.set_read_timeout(None)?;
        match recv_packet(stream)? {
            Some((ty, payload)) => Ok(Polled::Packet(ty, payload)),
            None => Ok(Polled::Disconnected),
        }
    }

    /// Replies with the driver catalogue: count, then kind+name pairs.
    fn enumerate_drivers(&self, stream: &mut TcpStream) -> io::Result<()> {
        let catalogue = self.host.catalogue();
        let mut reply = WireWriter::new();
        reply.write_u32(catalogue.len() as u32);
        for (kind, name) in catalogue.iter() {
            reply.write_u32(kind as u32);
            reply.write_str(name);
        }
        send_packet(stream, ControlPacket::DriverList as i32, reply.as_bytes())
    }

    /// Receives a capture into a fresh temp path and replies with that
    /// path. A failed transfer is protocol-fatal.
    fn copy_capture(&mut self, stream: &mut TcpStream) -> io::Result<()> {
        let dest = tempfile::Builder::new()
            .prefix("scry-remotecopy-")
            .suffix(".scap")
            .tempfile()?
            .into_temp_path()
            .keep()
            .map_err(|e| e.error)?;

        info!(dest = %dest.display(), "copying capture to local path");
        recv_file(
            stream,
            ControlPacket::CopyCapture as i32,
            &dest,
            &mut |_| {},
        )?;
        info!("capture received");

        let mut reply = WireWriter::new();
        reply.write_str(&dest.to_string_lossy());
        self.temp_files.push(dest);
        send_packet(stream, ControlPacket::CopyCapture as i32, reply.as_bytes())
    }

    /// Handles open-capture: probe the kind, run the blocking load with
    /// the progress ticker alive, reply with the terminal status.
    fn open_capture(&mut self, stream: &mut TcpStream, path: &str) -> io::Result<()> {
        // Opening over a live driver is a logical error; never replace
        // it silently.
        if self.driver.is_some() {
            warn!("open-capture while a capture is already open");
            return reply_opened(stream, Status::InternalError);
        }

        let kind = match self.host.probe(path.as_ref()) {
            Ok(kind) => kind,
            Err(status) => {
                warn!(path, ?status, "couldn't probe capture");
                return reply_opened(stream, status);
            }
        };

        if !self.host.catalogue().iter().any(|(k, _)| k == kind) {
            warn!(%kind, "capture needs a driver this host doesn't support");
            return reply_opened(stream, Status::ApiUnsupported);
        }

        info!(path, %kind, "opening capture");
        let progress = Arc::new(ProgressCell::new());
        let ticker = Ticker::start(stream.try_clone()?, Arc::clone(&progress));

        // May block for the whole capture load; the ticker keeps the
        // peer informed meanwhile.
        let result = self.host.open_capture(kind, path.as_ref(), &progress);

        // The ticker must be fully joined before the terminal reply, so
        // a late progress packet can never trail the Opened packet.
        let peer_alive = ticker.stop();
        if !peer_alive {
            if let Ok(mut driver) = result {
                driver.shutdown();
            }
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "peer vanished during capture open",
            ));
        }

        match result {
            Ok(driver) => {
                info!("capture open on replay host");
                // Terminal progress so the peer's last fraction is 1.0.
                let mut tick = WireWriter::new();
                tick.write_f32(1.0);
                send_packet(stream, ControlPacket::OpenProgress as i32, tick.as_bytes())?;
                self.driver = Some(driver);
                reply_opened(stream, Status::Success)
            }
            Err(status) => {
                error!(?status, %kind, "failed to open capture");
                reply_opened(stream, status)
            }
        }
    }

    /// Handles execute-and-inject, honouring the `noexec` directive.
    fn execute_and_inject(
        &self,
        stream: &mut TcpStream,
        args: &mut WireReader<'_>,
    ) -> io::Result<()> {
        let app = args.read_str()?;
        let working_dir = args.read_str()?;
        let cmd_line = args.read_str()?;
        let capture_file = args.read_str()?;
        let opts = CaptureOptions::read(args)?;

        let ident = if self.config.allow_execution {
            self.host
                .launch(&app, &working_dir, &cmd_line, &capture_file, &opts)
        } else {
            warn!(app, "refusing execute-and-inject: execution is disabled");
            0
        };

        let mut reply = WireWriter::new();
        reply.write_u32(ident);
        send_packet(
            stream,
            ControlPacket::ExecuteAndInject as i32,
            reply.as_bytes(),
        )
    }

    /// Session-end cleanup, run on every exit path: shut the driver
    /// down and delete every temp file claimed during the session.
    fn teardown(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            driver.shutdown();
        }
        for path in self.temp_files.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "couldn't delete session temp file");
            }
        }
    }
}

fn reply_opened(stream: &mut TcpStream, status: Status) -> io::Result<()> {
    let mut reply = WireWriter::new();
    status.write(&mut reply);
    send_packet(stream, ControlPacket::Opened as i32, reply.as_bytes())
}

fn protocol_err(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// The progress ticker: a second task alive only for the open-capture
/// window, sending the shared fraction to the peer every 100 ms.
struct Ticker {
    stop: Arc<AtomicBool>,
    dead: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Ticker {
    fn start(mut stream: TcpStream, progress: Arc<ProgressCell>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let dead = Arc::new(AtomicBool::new(false));

        let handle = {
            let stop = Arc::clone(&stop);
            let dead = Arc::clone(&dead);
            std::thread::spawn(move || {
                let mut ser = WireWriter::new();
                while !stop.load(Ordering::Relaxed) {
                    ser.rewind();
                    ser.write_f32(progress.get());
                    if send_packet(
                        &mut stream,
                        ControlPacket::OpenProgress as i32,
                        ser.as_bytes(),
                    )
                    .is_err()
                    {
                        dead.store(true, Ordering::Relaxed);
                        break;
                    }
                    // Sleep in short slices so the stop signal is
                    // observed well under one tick.
                    let deadline = Instant::now() + TICK_INTERVAL;
                    while Instant::now() < deadline && !stop.load(Ordering::Relaxed) {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                }
            })
        };

        Self { stop, dead, handle }
    }

    /// Cooperative stop plus join. Returns whether the connection was
    /// still usable when the ticker exited.
    fn stop(self) -> bool {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.handle.join();
        !self.dead.load(Ordering::Relaxed)
    }
}
