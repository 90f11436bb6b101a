//! Error types for scry sessions.

use scry_proto::Status;

/// Alias for `Result<T, scry::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by session operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The connection failed or the peer broke framing. Deliberately
    /// coarse: callers cannot usefully distinguish the underlying cause
    /// and must treat the connection as dead either way.
    #[error("network I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent a well-formed frame that violates the session
    /// protocol (wrong type for the current state, bad reply pairing).
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    /// A typed capability fault reported in-band by the host. The
    /// connection remains usable.
    #[error("replay host reported {0:?}")]
    Driver(Status),

    /// The client was created in offline mode ("-" host) and the
    /// operation needs a live connection.
    #[error("no remote connection")]
    Offline,
}

impl Error {
    /// The in-band status equivalent of this error, as surfaced to
    /// front-end callers.
    pub fn status(&self) -> Status {
        match self {
            Self::Io(_) | Self::Protocol(_) | Self::Offline => Status::NetworkIoFailed,
            Self::Driver(status) => *status,
        }
    }
}
