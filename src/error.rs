use std::io;
use std::net::IpAddr;

use thiserror::Error;

use crate::transport::AddressFamily;

/// Fatal conditions raised while configuring or starting the engine.
///
/// Nothing after a successful start produces one of these; per-probe
/// failures are logged and surface through the report instead.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("destination address must be set before starting")]
    MissingDestination,

    #[error("payload size {size} is below the minimum of {min} bytes")]
    PayloadTooSmall { size: usize, min: usize },

    #[error("payload size {size} exceeds the maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("probe interval must be greater than zero")]
    ZeroInterval,

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("waypoints can only be used with an IPv6 destination")]
    WaypointsRequireIpv6,

    #[error("source address {address} does not match the destination address family")]
    SourceFamilyMismatch { address: IpAddr },

    #[error("failed to open {family} transport")]
    TransportUnavailable {
        family: AddressFamily,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind source address {address}")]
    Bind {
        address: IpAddr,
        #[source]
        source: io::Error,
    },

    #[error("engine was already started")]
    AlreadyStarted,
}
