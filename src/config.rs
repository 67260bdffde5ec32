use std::net::{IpAddr, Ipv6Addr};
use std::time::Duration;

use crate::error::ProbeError;
use crate::transport::AddressFamily;

/// Smallest payload that still leaves room after the 8-byte signature.
pub const MIN_PAYLOAD_SIZE: usize = 16;
pub const MAX_PAYLOAD_SIZE: usize = 65500;

/// Ledger capacity reserved when neither a count nor a deadline bounds the run.
pub const DEFAULT_LEDGER_CAPACITY: usize = 64;

/// Upper bound on the up-front reservation; longer runs grow the ledger as
/// they go.
pub const MAX_LEDGER_PRESIZE: usize = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Startup line, one line per reply, closing statistics.
    #[default]
    Verbose,
    /// Startup line and closing statistics only.
    Quiet,
    Silent,
}

impl Verbosity {
    pub fn prints_summary(self) -> bool {
        matches!(self, Verbosity::Verbose | Verbosity::Quiet)
    }

    pub fn prints_replies(self) -> bool {
        self == Verbosity::Verbose
    }
}

/// Engine configuration. Checked once by [`ProbeConfig::validate`] when the
/// engine starts and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    pub destination: Option<IpAddr>,
    pub verbosity: Verbosity,
    pub interval: Duration,
    /// Data bytes per probe, not counting ICMP and IP headers.
    pub payload_size: usize,
    /// Probes to send; zero means no limit.
    pub count: u64,
    pub source: Option<IpAddr>,
    /// Linger used when no RTT sample exists once the last probe is out.
    pub timeout: Duration,
    pub traffic_class: u8,
    /// Loose source route for IPv6 probes.
    pub waypoints: Vec<Ipv6Addr>,
    /// Stop the run this long after start.
    pub deadline: Option<Duration>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            destination: None,
            verbosity: Verbosity::Verbose,
            interval: Duration::from_secs(1),
            payload_size: 56,
            count: 0,
            source: None,
            timeout: Duration::from_secs(1),
            traffic_class: 0,
            waypoints: Vec::new(),
            deadline: None,
        }
    }
}

impl ProbeConfig {
    pub fn new(destination: IpAddr) -> Self {
        Self {
            destination: Some(destination),
            ..Self::default()
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.count > 0
    }

    /// Validate every option and return the destination to probe.
    pub fn validate(&self) -> Result<IpAddr, ProbeError> {
        let destination = self.destination.ok_or(ProbeError::MissingDestination)?;
        let family = AddressFamily::of(&destination);

        if self.payload_size < MIN_PAYLOAD_SIZE {
            return Err(ProbeError::PayloadTooSmall {
                size: self.payload_size,
                min: MIN_PAYLOAD_SIZE,
            });
        }
        if self.payload_size > MAX_PAYLOAD_SIZE {
            return Err(ProbeError::PayloadTooLarge {
                size: self.payload_size,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        if self.interval.is_zero() {
            return Err(ProbeError::ZeroInterval);
        }
        if self.timeout.is_zero() {
            return Err(ProbeError::ZeroTimeout);
        }
        if !self.waypoints.is_empty() && family != AddressFamily::V6 {
            return Err(ProbeError::WaypointsRequireIpv6);
        }
        if let Some(source) = self.source {
            if AddressFamily::of(&source) != family {
                return Err(ProbeError::SourceFamilyMismatch { address: source });
            }
        }

        Ok(destination)
    }

    /// How many ledger records to reserve up front.
    pub fn ledger_capacity(&self) -> usize {
        let wanted = if self.is_bounded() {
            u128::from(self.count)
        } else {
            match self.deadline {
                Some(deadline) => deadline.as_nanos() / self.interval.as_nanos().max(1) + 1,
                None => return DEFAULT_LEDGER_CAPACITY,
            }
        };
        usize::try_from(wanted).map_or(MAX_LEDGER_PRESIZE, |n| n.min(MAX_LEDGER_PRESIZE))
    }
}
