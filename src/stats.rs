use std::fmt::Write as _;
use std::net::IpAddr;
use std::time::Duration;

use crate::icmp::InboundReply;
use crate::transport::AddressFamily;

/// Online round-trip statistics over millisecond samples.
///
/// Mean and variance use Welford's update so long runs do not lose precision
/// to a growing sum of squares.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningStats {
    count: u64,
    min: f64,
    max: f64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, sample_ms: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = sample_ms;
            self.max = sample_ms;
        } else {
            self.min = self.min.min(sample_ms);
            self.max = self.max.max(sample_ms);
        }

        let delta = sample_ms - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (sample_ms - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Population standard deviation; zero with fewer than two samples.
    pub fn stddev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / self.count as f64).sqrt()
    }

    pub fn summary(&self) -> Option<RttSummary> {
        (self.count > 0).then(|| RttSummary {
            min: self.min,
            avg: self.mean,
            max: self.max,
            stddev: self.stddev(),
        })
    }
}

/// Round-trip figures in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttSummary {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    pub stddev: f64,
}

/// Final summary of a run, published once when the engine stops.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub destination: IpAddr,
    /// Probes the transport accepted.
    pub transmitted: u64,
    pub received: u64,
    pub duplicates: u64,
    pub loss_percent: u64,
    pub duration: Duration,
    /// `None` when no reply was ever matched.
    pub rtt: Option<RttSummary>,
}

impl Report {
    pub fn new(
        destination: IpAddr,
        transmitted: u64,
        received: u64,
        duplicates: u64,
        duration: Duration,
        rtt: Option<RttSummary>,
    ) -> Self {
        Self {
            destination,
            transmitted,
            received,
            duplicates,
            loss_percent: loss_percent(transmitted, received),
            duration,
            rtt,
        }
    }

    pub fn format_summary(&self) -> String {
        let mut summary = format!(
            "\n--- {} ping statistics ---\n{} packets transmitted, {} received, ",
            self.destination, self.transmitted, self.received
        );

        if self.duplicates > 0 {
            let _ = write!(summary, "{} duplicates, ", self.duplicates);
        }

        let _ = writeln!(
            summary,
            "{}% packet loss, time {}ms",
            self.loss_percent,
            self.duration.as_millis()
        );

        if let Some(rtt) = &self.rtt {
            let _ = writeln!(
                summary,
                "rtt min/avg/max/mdev = {:.3}/{:.3}/{:.3}/{:.3} ms",
                rtt.min, rtt.avg, rtt.max, rtt.stddev
            );
        }

        summary
    }
}

/// Lost share of transmitted probes, truncated to a whole percent so that
/// 99.9% never shows up as 100%.
pub fn loss_percent(transmitted: u64, received: u64) -> u64 {
    if transmitted == 0 {
        return 0;
    }
    transmitted.saturating_sub(received) * 100 / transmitted
}

pub fn format_header(destination: IpAddr, payload_size: usize) -> String {
    let family = AddressFamily::of(&destination);
    format!(
        "PING {} - {} bytes of data; {} bytes including ICMP and {} headers.",
        destination,
        payload_size,
        payload_size + family.header_overhead(),
        family
    )
}

pub fn format_reply(reply: &InboundReply, sequence: u16, rtt: Duration, mark_duplicate: bool) -> String {
    let mut line = format!("{} bytes from {}: icmp_seq={}", reply.bytes, reply.source, sequence);
    if let Some(ttl) = reply.hop_limit {
        let _ = write!(line, " ttl={}", ttl);
    }
    let _ = write!(line, " time={} ms", format_ms(rtt));
    if mark_duplicate {
        line.push_str(" (DUP!)");
    }
    line
}

pub fn format_ms(duration: Duration) -> String {
    format!("{:.3}", duration_ms(duration))
}

pub fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
