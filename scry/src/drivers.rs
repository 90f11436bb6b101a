//! Replay driver catalogue and the capability surface the bridge
//! forwards.
//!
//! The concrete GPU work — loading a capture, re-issuing its commands,
//! reading results back — lives behind [`ReplayDriver`] and
//! [`ReplayHost`]; this crate only moves those calls across the wire.
//! [`Registry`] is the standard host implementation: backends register
//! a factory per driver kind at startup.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use scry_proto::CaptureOptions;
use tracing::warn;

use crate::progress::ProgressCell;

/// Magic bytes opening every capture container.
pub const CAPTURE_MAGIC: &[u8; 8] = b"SCRYCAP1";

/// The graphics API a capture was recorded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
#[non_exhaustive]
pub enum DriverKind {
    /// Unrecognised or corrupt capture.
    Unknown = 0,
    /// Vulkan capture.
    Vulkan = 1,
    /// OpenGL capture.
    OpenGl = 2,
    /// Direct3D 11 capture.
    D3d11 = 3,
    /// Direct3D 12 capture.
    D3d12 = 4,
}

impl DriverKind {
    /// Maps a wire value back to a kind; unknown values collapse to
    /// [`DriverKind::Unknown`].
    pub fn from_wire(v: u32) -> Self {
        match v {
            1 => Self::Vulkan,
            2 => Self::OpenGl,
            3 => Self::D3d11,
            4 => Self::D3d12,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::Vulkan => "Vulkan",
            Self::OpenGl => "OpenGL",
            Self::D3d11 => "D3D11",
            Self::D3d12 => "D3D12",
        };
        f.write_str(name)
    }
}

/// Stable ordered mapping from driver kind to human-readable name.
/// Built once at startup and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    entries: Vec<(DriverKind, String)>,
}

impl Catalogue {
    /// Builds a catalogue; entries are sorted by kind so the order is
    /// stable regardless of registration order.
    pub fn new(entries: impl IntoIterator<Item = (DriverKind, String)>) -> Self {
        let sorted: BTreeMap<DriverKind, String> = entries.into_iter().collect();
        Self {
            entries: sorted.into_iter().collect(),
        }
    }

    /// Number of drivers listed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no drivers are listed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry at `index`, in catalogue order.
    pub fn get(&self, index: usize) -> Option<(DriverKind, &str)> {
        self.entries.get(index).map(|(k, n)| (*k, n.as_str()))
    }

    /// Iterates entries in catalogue order.
    pub fn iter(&self) -> impl Iterator<Item = (DriverKind, &str)> {
        self.entries.iter().map(|(k, n)| (*k, n.as_str()))
    }
}

/// Summary facts about an opened capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiProperties {
    /// Name of the captured API.
    pub api_name: String,
    /// Number of recorded events.
    pub event_count: u32,
    /// Number of draw-type events.
    pub draw_count: u32,
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSummary {
    /// Position in the capture's event stream.
    pub event_id: u32,
    /// Display name of the call.
    pub name: String,
}

/// One GPU resource referenced by the capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDesc {
    /// Stable resource identifier.
    pub id: u64,
    /// Debug name, possibly empty.
    pub name: String,
    /// Size of the resource's backing storage.
    pub byte_size: u64,
}

/// The introspection surface a replay driver answers, local or remote.
///
/// Callers other than `open_capture` may assume a capture is loaded;
/// calling into a driver after [`ReplayDriver::shutdown`] is a contract
/// violation.
pub trait ReplayDriver: Send {
    /// Facts about the captured API and event stream.
    fn api_properties(&mut self) -> crate::Result<ApiProperties>;

    /// The recorded events, in stream order.
    fn events(&mut self) -> crate::Result<Vec<EventSummary>>;

    /// Resources referenced by the capture.
    fn resources(&mut self) -> crate::Result<Vec<ResourceDesc>>;

    /// Raw contents of one resource at the current event. This is the
    /// large-payload path; replies may be many megabytes.
    fn resource_data(&mut self, id: u64) -> crate::Result<Vec<u8>>;

    /// Replays up to the given event and leaves state there.
    fn set_frame_event(&mut self, event_id: u32) -> crate::Result<()>;

    /// Releases the capture. Idempotent.
    fn shutdown(&mut self);
}

/// Host-side collaborators the server consumes: driver enumeration,
/// capture probing, blocking driver construction, process launch.
pub trait ReplayHost: Send + Sync {
    /// Drivers this host can replay with.
    fn catalogue(&self) -> &Catalogue;

    /// Inspects a capture's declared driver kind without loading it.
    fn probe(&self, path: &Path) -> std::result::Result<DriverKind, scry_proto::Status>;

    /// Loads a capture. May block for the whole load; reports fractions
    /// through `progress` while it does.
    fn open_capture(
        &self,
        kind: DriverKind,
        path: &Path,
        progress: &ProgressCell,
    ) -> std::result::Result<Box<dyn ReplayDriver>, scry_proto::Status>;

    /// Launches a process with capture injection. Returns an opaque
    /// process identifier, 0 on failure.
    fn launch(
        &self,
        app: &str,
        working_dir: &str,
        cmd_line: &str,
        capture_file: &str,
        opts: &CaptureOptions,
    ) -> u32;
}

/// Factory producing a driver for one capture file.
pub type DriverFactory = Box<
    dyn Fn(&Path, &ProgressCell) -> std::result::Result<Box<dyn ReplayDriver>, scry_proto::Status>
        + Send
        + Sync,
>;

/// Launch-and-inject hook.
pub type Launcher =
    Box<dyn Fn(&str, &str, &str, &str, &CaptureOptions) -> u32 + Send + Sync>;

/// Standard [`ReplayHost`]: driver factories registered per kind, a
/// capture-container probe, and an optional launch hook.
pub struct Registry {
    factories: BTreeMap<DriverKind, (String, DriverFactory)>,
    catalogue: Catalogue,
    launcher: Option<Launcher>,
}

impl fmt::Debug for Registry {
    // The boxed factories aren't Debug; list what they provide instead.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("catalogue", &self.catalogue)
            .field("has_launcher", &self.launcher.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates an empty registry: no drivers, no launcher. The server
    /// still serves enumeration, transfer and trust filtering.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            catalogue: Catalogue::default(),
            launcher: None,
        }
    }

    /// Registers a driver backend for `kind`, replacing any previous
    /// registration for the same kind.
    pub fn register(&mut self, kind: DriverKind, name: impl Into<String>, factory: DriverFactory) {
        self.factories.insert(kind, (name.into(), factory));
        self.catalogue = Catalogue::new(
            self.factories
                .iter()
                .map(|(k, (name, _))| (*k, name.clone())),
        );
    }

    /// Installs the process launch-and-inject hook.
    pub fn set_launcher(&mut self, launcher: Launcher) {
        self.launcher = Some(launcher);
    }
}

impl ReplayHost for Registry {
    fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    fn probe(&self, path: &Path) -> std::result::Result<DriverKind, scry_proto::Status> {
        let mut file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(_) => return Err(scry_proto::Status::FileNotFound),
        };
        let mut header = [0u8; 12];
        if file.read_exact(&mut header).is_err() || &header[..8] != CAPTURE_MAGIC {
            // Not a capture container; no driver will claim it.
            return Ok(DriverKind::Unknown);
        }
        let kind = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        Ok(DriverKind::from_wire(kind))
    }

    fn open_capture(
        &self,
        kind: DriverKind,
        path: &Path,
        progress: &ProgressCell,
    ) -> std::result::Result<Box<dyn ReplayDriver>, scry_proto::Status> {
        match self.factories.get(&kind) {
            Some((_, factory)) => factory(path, progress),
            None => Err(scry_proto::Status::ApiUnsupported),
        }
    }

    fn launch(
        &self,
        app: &str,
        working_dir: &str,
        cmd_line: &str,
        capture_file: &str,
        opts: &CaptureOptions,
    ) -> u32 {
        match &self.launcher {
            Some(launch) => launch(app, working_dir, cmd_line, capture_file, opts),
            None => {
                warn!(app, "no launcher installed on this host");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_order_is_stable() {
        let cat = Catalogue::new([
            (DriverKind::D3d11, "D3D11".to_owned()),
            (DriverKind::Vulkan, "Vulkan".to_owned()),
        ]);
        let kinds: Vec<_> = cat.iter().map(|(k, _)| k).collect();
        assert_eq!(kinds, vec![DriverKind::Vulkan, DriverKind::D3d11]);
        assert_eq!(cat.get(0), Some((DriverKind::Vulkan, "Vulkan")));
        assert_eq!(cat.get(2), None);
    }

    #[test]
    fn probe_reads_container_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.scap");
        let mut bytes = CAPTURE_MAGIC.to_vec();
        bytes.extend_from_slice(&(DriverKind::Vulkan as u32).to_le_bytes());
        bytes.extend_from_slice(b"opaque capture body");
        std::fs::write(&path, bytes).unwrap();

        let registry = Registry::new();
        assert_eq!(registry.probe(&path).unwrap(), DriverKind::Vulkan);
    }

    #[test]
    fn probe_rejects_missing_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new();

        assert_eq!(
            registry.probe(&dir.path().join("nope.scap")).unwrap_err(),
            scry_proto::Status::FileNotFound
        );

        let garbage = dir.path().join("garbage.bin");
        std::fs::write(&garbage, b"not a capture at all").unwrap();
        assert_eq!(registry.probe(&garbage).unwrap(), DriverKind::Unknown);
    }

    #[test]
    fn unregistered_kind_is_unsupported() {
        let registry = Registry::new();
        let progress = ProgressCell::new();
        let result = registry.open_capture(DriverKind::Vulkan, Path::new("x"), &progress);
        assert_eq!(result.err(), Some(scry_proto::Status::ApiUnsupported));
    }

    #[test]
    fn launch_without_launcher_fails_with_zero_ident() {
        let registry = Registry::new();
        let ident = registry.launch("app", "", "", "out.scap", &CaptureOptions::default());
        assert_eq!(ident, 0);
    }
}
