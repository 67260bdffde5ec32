use std::net::IpAddr;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use crate::icmp::DropReason;
use crate::stats::Report;

/// What went out with a `Tx` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeDescriptor {
    pub destination: IpAddr,
    /// Bytes handed to the transport.
    pub bytes: usize,
    pub waypoints: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeEvent {
    /// The transport accepted a probe.
    Tx { sequence: u64, probe: ProbeDescriptor },
    /// First reply for a probe.
    Rtt { sequence: u64, rtt: Duration },
    Drop { reason: DropReason, source: IpAddr },
    /// Published once, when the engine stops.
    Report(Report),
}

/// Subscriber for engine events.
pub trait EventSink {
    fn publish(&mut self, event: ProbeEvent);
}

impl EventSink for Vec<ProbeEvent> {
    fn publish(&mut self, event: ProbeEvent) {
        self.push(event);
    }
}

impl EventSink for UnboundedSender<ProbeEvent> {
    fn publish(&mut self, event: ProbeEvent) {
        if self.send(event).is_err() {
            log::debug!("event subscriber went away");
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&mut self, _event: ProbeEvent) {}
}
