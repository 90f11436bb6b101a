//! Remote replay sessions for GPU captures.
//!
//! A capture recorded on one machine can be opened and inspected from
//! another that lacks the matching driver or hardware: the replay host
//! runs [`Server`], the analysis side connects with [`RemoteClient`],
//! transfers the capture, opens it remotely, and then drives the
//! resulting [`RemoteDriver`] exactly as it would a local one — every
//! introspection call is forwarded over the wire and answered in order.
//!
//! # Quick start — replay host
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//!
//! use scry::{Registry, Server, ServerConfig};
//!
//! let config = ServerConfig::load("scry-remote.conf".as_ref());
//! let host = Registry::new();
//! let server = Server::bind("0.0.0.0", 0, config, host).expect("bind failed");
//!
//! let stop = AtomicBool::new(false);
//! server.serve(&stop);
//! ```

mod bridge;
mod client;
mod conn;
mod drivers;
mod error;
mod progress;
mod server;
mod trust;

pub use bridge::RemoteDriver;
pub use client::{DEFAULT_PORT, RemoteClient};
pub use drivers::{
    ApiProperties, CAPTURE_MAGIC, Catalogue, DriverFactory, DriverKind, EventSummary, Launcher,
    Registry, ReplayDriver, ReplayHost, ResourceDesc,
};
pub use error::{Error, Result};
pub use progress::ProgressCell;
pub use scry_proto::{CaptureOptions, Status};
pub use server::Server;
pub use trust::{ServerConfig, TrustRange};
