//! Source-address trust filtering and server configuration.
//!
//! Trust is by network source address only: a peer is allowed to open a
//! session iff its IPv4 address falls inside a configured range, with
//! localhost always allowed. The configuration file is one directive
//! per line: `allow <CIDR>` adds a range, `noexec` disables the
//! execute-and-inject control path, `#` lines are comments.

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

/// An allowed source-network range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustRange {
    /// Network address bits.
    pub ip: u32,
    /// Netmask; set bits select the network part.
    pub mask: u32,
}

impl TrustRange {
    /// The implicit 127.0.0.1/32 range that is always trusted.
    pub const LOCALHOST: Self = Self {
        ip: u32::from_be_bytes([127, 0, 0, 1]),
        mask: u32::MAX,
    };

    /// Parses CIDR notation (`a.b.c.d/prefix`).
    pub fn parse_cidr(text: &str) -> Option<Self> {
        let (addr, prefix) = text.trim().split_once('/')?;
        let addr: Ipv4Addr = addr.parse().ok()?;
        let prefix: u32 = prefix.parse().ok()?;
        if prefix > 32 {
            return None;
        }
        let mask = if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix)
        };
        Some(Self {
            ip: u32::from(addr),
            mask,
        })
    }

    /// Whether `addr` falls inside this range.
    pub fn matches(&self, addr: Ipv4Addr) -> bool {
        (u32::from(addr) & self.mask) == (self.ip & self.mask)
    }
}

/// Replay host configuration, from `ServerConfig::load` or defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Source ranges allowed to open sessions (localhost is implicit).
    pub ranges: Vec<TrustRange>,
    /// Whether execute-and-inject requests are honoured.
    pub allow_execution: bool,
    /// Sleep between accept/receive polls; also bounds how quickly the
    /// stop signal is observed.
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ranges: default_ranges(),
            allow_execution: true,
            poll_interval: Duration::from_millis(5),
        }
    }
}

/// The standard private-network ranges, used when no `allow` directive
/// is configured.
fn default_ranges() -> Vec<TrustRange> {
    vec![
        TrustRange {
            ip: u32::from_be_bytes([10, 0, 0, 0]),
            mask: 0xff00_0000,
        },
        TrustRange {
            ip: u32::from_be_bytes([172, 16, 0, 0]),
            mask: 0xfff0_0000,
        },
        TrustRange {
            ip: u32::from_be_bytes([192, 168, 0, 0]),
            mask: 0xffff_0000,
        },
    ]
}

impl ServerConfig {
    /// Loads configuration from a file. A missing or unreadable file
    /// yields the defaults; malformed lines are skipped individually so
    /// one typo never takes the server down.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) => {
                info!(path = %path.display(), error = %e, "no trust config, using default private ranges");
                Self::default()
            }
        }
    }

    /// Parses configuration text. See the module docs for the format.
    pub fn parse(text: &str) -> Self {
        let mut ranges = Vec::new();
        let mut allow_execution = true;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(cidr) = line.strip_prefix("allow ") {
                match TrustRange::parse_cidr(cidr) {
                    Some(range) => ranges.push(range),
                    None => warn!(line, "couldn't parse trust range, skipping"),
                }
            } else if line == "noexec" {
                allow_execution = false;
            } else {
                warn!(line, "unrecognised config directive, skipping");
            }
        }

        if ranges.is_empty() {
            info!("no trust ranges configured, using default private ranges");
            ranges = default_ranges();
        }

        Self {
            ranges,
            allow_execution,
            ..Self::default()
        }
    }

    /// Whether a peer at `addr` may open a session. Localhost is always
    /// trusted regardless of configured ranges.
    pub fn trusted(&self, addr: Ipv4Addr) -> bool {
        TrustRange::LOCALHOST.matches(addr) || self.ranges.iter().any(|r| r.matches(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_always_trusted() {
        // Even a config whose ranges exclude loopback entirely.
        let config = ServerConfig::parse("allow 10.1.2.0/24\n");
        assert!(config.trusted(Ipv4Addr::new(127, 0, 0, 1)));
        assert!(config.trusted(Ipv4Addr::new(10, 1, 2, 200)));
        assert!(!config.trusted(Ipv4Addr::new(10, 1, 3, 1)));
        assert!(!config.trusted(Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn mask_match_property_sampled() {
        // (A & mask) == (ip & mask) across a spread of the address space.
        let range = TrustRange::parse_cidr("172.16.0.0/12").unwrap();
        let mut addr: u32 = 0;
        loop {
            let a = Ipv4Addr::from(addr);
            let expected = (addr & range.mask) == (range.ip & range.mask);
            assert_eq!(range.matches(a), expected, "addr {a}");
            let (next, overflow) = addr.overflowing_add(0x0001_0867);
            if overflow {
                break;
            }
            addr = next;
        }
    }

    #[test]
    fn cidr_parsing() {
        let range = TrustRange::parse_cidr("192.168.0.0/16").unwrap();
        assert_eq!(range.mask, 0xffff_0000);
        assert!(range.matches(Ipv4Addr::new(192, 168, 44, 9)));
        assert!(!range.matches(Ipv4Addr::new(192, 169, 0, 1)));

        // /0 matches everything, /32 exactly one host.
        let all = TrustRange::parse_cidr("0.0.0.0/0").unwrap();
        assert!(all.matches(Ipv4Addr::new(203, 0, 113, 7)));
        let host = TrustRange::parse_cidr("10.0.0.5/32").unwrap();
        assert!(host.matches(Ipv4Addr::new(10, 0, 0, 5)));
        assert!(!host.matches(Ipv4Addr::new(10, 0, 0, 6)));

        assert!(TrustRange::parse_cidr("10.0.0.0/33").is_none());
        assert!(TrustRange::parse_cidr("10.0.0.0").is_none());
        assert!(TrustRange::parse_cidr("not an ip/8").is_none());
    }

    #[test]
    fn config_skips_bad_lines_and_honours_noexec() {
        let config = ServerConfig::parse(
            "# comment\n\
             \n\
             allow 10.0.0.0/8\n\
             allow bogus/99\n\
             frobnicate the bits\n\
             noexec\n\
             allow 192.168.1.0/24\n",
        );
        assert_eq!(config.ranges.len(), 2);
        assert!(!config.allow_execution);
    }

    #[test]
    fn empty_config_falls_back_to_private_ranges() {
        let config = ServerConfig::parse("# nothing but comments\nnoexec\n");
        assert!(!config.allow_execution);
        assert!(config.trusted(Ipv4Addr::new(10, 200, 3, 4)));
        assert!(config.trusted(Ipv4Addr::new(172, 31, 255, 1)));
        assert!(config.trusted(Ipv4Addr::new(192, 168, 0, 99)));
        assert!(!config.trusted(Ipv4Addr::new(172, 32, 0, 1)));
        assert!(!config.trusted(Ipv4Addr::new(1, 2, 3, 4)));
    }
}
