use std::io::{self, Write};
use std::net::IpAddr;
use std::time::Duration;

use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::icmp::{IcmpPacket, InboundReply, PROBE_TAG, routing_header};
use crate::ledger::{Ledger, SendStatus};
use crate::matcher::{MatchOutcome, ReplyMatcher};
use crate::observer::{EventSink, ProbeDescriptor, ProbeEvent};
use crate::signature::Signature;
use crate::stats::{self, Report, RunningStats};
use crate::timer::{TimerId, Timers};
use crate::transport::{AddressFamily, Protocol, Transport, is_multi_destination};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    /// Every probe is out; waiting out the linger before reporting.
    Stopping,
    Stopped,
}

/// Callbacks the engine asks its driver to schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineTimer {
    Send,
    Stop,
}

/// Where this engine lives; the signature is derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub host_id: u32,
    pub slot: u32,
}

impl Identity {
    pub fn signature(self) -> Signature {
        Signature::from_identity(self.host_id, self.slot)
    }
}

/// The echo-probe engine.
///
/// Every entry point takes the driver's [`Timers`] so the engine can read
/// the clock and arm or cancel its callbacks. The driver must route fired
/// [`EngineTimer`]s to [`ProbeEngine::on_timer`] and decoded replies to
/// [`ProbeEngine::on_reply`].
pub struct ProbeEngine<T: Transport, S: EventSink> {
    config: ProbeConfig,
    identity: Identity,
    transport: T,
    sink: S,
    console: Box<dyn Write>,
    state: EngineState,
    destination: Option<IpAddr>,
    multi_destination: bool,
    signature: Signature,
    ledger: Ledger,
    stats: RunningStats,
    matcher: ReplyMatcher,
    started_at: Duration,
    next_send: Option<TimerId>,
    linger_stop: Option<TimerId>,
    deadline_stop: Option<TimerId>,
    report: Option<Report>,
}

impl<T: Transport, S: EventSink> ProbeEngine<T, S> {
    pub fn new(config: ProbeConfig, identity: Identity, transport: T, sink: S) -> Self {
        Self {
            config,
            identity,
            transport,
            sink,
            console: Box::new(io::stdout()),
            state: EngineState::Idle,
            destination: None,
            multi_destination: false,
            signature: Signature::default(),
            ledger: Ledger::new(),
            stats: RunningStats::new(),
            matcher: ReplyMatcher::default(),
            started_at: Duration::ZERO,
            next_send: None,
            linger_stop: None,
            deadline_stop: None,
            report: None,
        }
    }

    /// Send the console text somewhere other than stdout.
    pub fn with_console(mut self, console: Box<dyn Write>) -> Self {
        self.console = console;
        self
    }

    pub fn start(&mut self, timers: &mut impl Timers<EngineTimer>) -> Result<(), ProbeError> {
        if self.state != EngineState::Idle {
            return Err(ProbeError::AlreadyStarted);
        }

        let destination = self.config.validate()?;
        let family = AddressFamily::of(&destination);

        self.signature = self.identity.signature();
        self.matcher = ReplyMatcher::new(self.signature);
        self.multi_destination = is_multi_destination(&destination);

        self.transport
            .open(family)
            .map_err(|source| ProbeError::TransportUnavailable { family, source })?;

        if let Some(address) = self.config.source {
            if let Err(source) = self.transport.bind(address) {
                self.transport.close();
                return Err(ProbeError::Bind { address, source });
            }
        }

        if family == AddressFamily::V4 && self.config.traffic_class != 0 {
            if let Err(e) = self.transport.set_traffic_class(self.config.traffic_class) {
                log::warn!("could not set traffic class {}: {}", self.config.traffic_class, e);
            }
        }

        self.ledger.reserve(self.config.ledger_capacity());
        self.destination = Some(destination);
        self.started_at = timers.now();
        self.state = EngineState::Running;

        log::info!(
            "probing {} with signature {} every {:?}",
            destination,
            self.signature,
            self.config.interval
        );
        if self.config.verbosity.prints_summary() {
            let header = stats::format_header(destination, self.config.payload_size);
            self.print(&header);
        }

        if let Some(deadline) = self.config.deadline {
            self.deadline_stop = Some(timers.schedule(deadline, EngineTimer::Stop));
        }

        self.send(timers);
        Ok(())
    }

    pub fn on_timer(&mut self, timer: EngineTimer, timers: &mut impl Timers<EngineTimer>) {
        match timer {
            EngineTimer::Send => {
                self.next_send = None;
                if self.state == EngineState::Running {
                    self.send(timers);
                }
            }
            EngineTimer::Stop => self.stop(timers),
        }
    }

    fn send(&mut self, timers: &mut impl Timers<EngineTimer>) {
        let Some(destination) = self.destination else {
            return;
        };
        let family = AddressFamily::of(&destination);
        let sequence = self.ledger.next_sequence();
        // Only the low 16 bits fit in the echo header; the ledger maps them back.
        let wire = sequence as u16;

        let payload = self.signature.payload(self.config.payload_size);
        let mut packet = IcmpPacket::new_echo_request(PROBE_TAG, wire, payload, family).to_bytes();

        let routed = family == AddressFamily::V6 && !self.config.waypoints.is_empty();
        let result = if routed {
            self.send_routed(&mut packet, destination)
        } else {
            self.transport.send_to(&packet, destination)
        };

        let now = timers.now();
        match result {
            Ok(sent) if sent > 0 => {
                self.ledger.append(now, SendStatus::Sent);
                log::debug!("sent probe {} ({} bytes) to {}", sequence, packet.len(), destination);
                self.sink.publish(ProbeEvent::Tx {
                    sequence,
                    probe: ProbeDescriptor {
                        destination,
                        bytes: packet.len(),
                        waypoints: if routed { self.config.waypoints.len() } else { 0 },
                    },
                });
            }
            Ok(_) => {
                self.ledger.append(now, SendStatus::NotSent);
                log::warn!("probe {} to {} was not accepted by the transport", sequence, destination);
            }
            Err(e) => {
                self.ledger.append(now, SendStatus::NotSent);
                log::warn!("probe {} to {} failed: {}", sequence, destination, e);
            }
        }

        let attempts = self.ledger.next_sequence();
        let count = self.config.count;

        if count == 0 || attempts < count {
            self.next_send = Some(timers.schedule(self.config.interval, EngineTimer::Send));
        }

        if count > 0 && attempts == count {
            let linger = self.linger();
            log::debug!("all {} probes sent, stopping in {:?}", count, linger);
            self.linger_stop = Some(timers.schedule(linger, EngineTimer::Stop));
            self.state = EngineState::Stopping;
        }
    }

    /// Send one packet with a loose source route. The receive path selector
    /// is put back to ICMPv6 whatever the outcome.
    fn send_routed(&mut self, packet: &mut Vec<u8>, destination: IpAddr) -> io::Result<usize> {
        let mut routed = routing_header(&self.config.waypoints)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        routed.append(packet);
        *packet = routed;

        let result = self
            .transport
            .set_protocol(Protocol::Ipv6Routing)
            .and_then(|()| self.transport.send_to(packet, destination));

        if let Err(e) = self.transport.set_protocol(Protocol::Icmpv6) {
            log::warn!("could not restore ICMPv6 receive protocol: {}", e);
        }
        result
    }

    fn linger(&self) -> Duration {
        match self.stats.max() {
            Some(max_ms) => Duration::from_secs_f64(2.0 * max_ms / 1000.0),
            None => self.config.timeout,
        }
    }

    pub fn on_reply(&mut self, reply: &InboundReply, timers: &mut impl Timers<EngineTimer>) {
        if !matches!(self.state, EngineState::Running | EngineState::Stopping) {
            log::debug!("ignoring reply from {} while {:?}", reply.source, self.state);
            return;
        }

        let now = timers.now();
        let outcome = self.matcher.classify(reply, now, &mut self.ledger, &mut self.stats);

        match outcome {
            MatchOutcome::Matched { sequence, wire, rtt } => {
                self.sink.publish(ProbeEvent::Rtt { sequence, rtt });
                if self.config.verbosity.prints_replies() {
                    let line = stats::format_reply(reply, wire, rtt, false);
                    self.print(&line);
                }
            }
            MatchOutcome::Duplicate { sequence, wire, rtt } => {
                log::debug!("duplicate reply for probe {} from {}", sequence, reply.source);
                if self.config.verbosity.prints_replies() {
                    let line = stats::format_reply(reply, wire, rtt, !self.multi_destination);
                    self.print(&line);
                }
            }
            MatchOutcome::Dropped { reason } => {
                log::info!("{} from {}", reason, reply.source);
                self.sink.publish(ProbeEvent::Drop {
                    reason,
                    source: reply.source,
                });
            }
            MatchOutcome::Ignored { reason } => {
                log::debug!("ignored message from {}: {:?}", reply.source, reason);
            }
        }

        let count = self.config.count;
        if !self.multi_destination && count > 0 && self.matcher.received() == count {
            log::debug!("every probe answered, stopping early");
            self.stop(timers);
        }
    }

    /// Stop probing and publish the report. Only the first call has any
    /// effect.
    pub fn stop(&mut self, timers: &mut impl Timers<EngineTimer>) {
        if self.report.is_some() {
            return;
        }

        for pending in [
            self.next_send.take(),
            self.linger_stop.take(),
            self.deadline_stop.take(),
        ]
        .into_iter()
        .flatten()
        {
            timers.cancel(pending);
        }

        self.transport.close();
        self.state = EngineState::Stopped;

        let destination = self
            .destination
            .or(self.config.destination)
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));
        let report = Report::new(
            destination,
            self.ledger.transmitted(),
            self.matcher.received(),
            self.matcher.duplicates(),
            timers.now().saturating_sub(self.started_at),
            self.stats.summary(),
        );

        if self.config.verbosity.prints_summary() {
            let summary = report.format_summary();
            self.print_raw(&summary);
        }

        log::info!(
            "finished: {} transmitted, {} received, {}% loss",
            report.transmitted,
            report.received,
            report.loss_percent
        );
        self.sink.publish(ProbeEvent::Report(report.clone()));
        self.report = Some(report);
    }

    fn print(&mut self, line: &str) {
        if let Err(e) = writeln!(self.console, "{}", line) {
            log::debug!("console write failed: {}", e);
        }
    }

    fn print_raw(&mut self, text: &str) {
        if let Err(e) = self.console.write_all(text.as_bytes()).and_then(|()| self.console.flush()) {
            log::debug!("console write failed: {}", e);
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_stopped(&self) -> bool {
        self.state == EngineState::Stopped
    }

    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn stats(&self) -> &RunningStats {
        &self.stats
    }

    pub fn received(&self) -> u64 {
        self.matcher.received()
    }

    pub fn duplicates(&self) -> u64 {
        self.matcher.duplicates()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Verbosity;
    use crate::icmp::{ReplyKind, decode_reply, packet::fixtures};
    use crate::timer::EventQueue;
    use crate::transport::mock::RecordingTransport;
    use std::cell::RefCell;
    use std::rc::Rc;

    const IDENTITY: Identity = Identity { host_id: 7, slot: 1 };

    type TestEngine = ProbeEngine<RecordingTransport, Vec<ProbeEvent>>;

    /// Console writer the test can read back.
    #[derive(Clone, Default)]
    struct SharedConsole(Rc<RefCell<Vec<u8>>>);

    impl SharedConsole {
        fn text(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    impl Write for SharedConsole {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Everything the simulated loop can deliver.
    #[derive(Debug)]
    enum SimEvent {
        Engine(EngineTimer),
        Reply(InboundReply),
    }

    impl From<EngineTimer> for SimEvent {
        fn from(timer: EngineTimer) -> Self {
            SimEvent::Engine(timer)
        }
    }

    fn config(destination: &str, count: u64) -> ProbeConfig {
        ProbeConfig {
            count,
            verbosity: Verbosity::Silent,
            ..ProbeConfig::new(destination.parse().unwrap())
        }
    }

    fn engine(config: ProbeConfig) -> TestEngine {
        ProbeEngine::new(config, IDENTITY, RecordingTransport::new(), Vec::<ProbeEvent>::new())
            .with_console(Box::new(io::sink()))
    }

    /// Run the loop until nothing is pending. `respond` sees every probe the
    /// transport accepted and returns (delay, reply) pairs to deliver.
    fn run(
        engine: &mut TestEngine,
        queue: &mut EventQueue<SimEvent>,
        mut respond: impl FnMut(u64, &[u8], IpAddr) -> Vec<(Duration, InboundReply)>,
    ) {
        let mut answered = 0;
        loop {
            while answered < engine.transport().sent.len() {
                let (packet, destination, _) = engine.transport().sent[answered].clone();
                for (delay, reply) in respond(answered as u64, &packet, destination) {
                    queue.push(delay, SimEvent::Reply(reply));
                }
                answered += 1;
            }
            match queue.pop() {
                Some((_, SimEvent::Engine(timer))) => engine.on_timer(timer, queue),
                Some((_, SimEvent::Reply(reply))) => engine.on_reply(&reply, queue),
                None => break,
            }
        }
    }

    fn reply_to(packet: &[u8], source: IpAddr) -> InboundReply {
        let datagram = fixtures::ipv4_datagram(&fixtures::echo_reply_for(packet), 64);
        decode_reply(&datagram, source).unwrap()
    }

    fn reports(engine: &TestEngine) -> Vec<&Report> {
        engine
            .sink()
            .iter()
            .filter_map(|event| match event {
                ProbeEvent::Report(report) => Some(report),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_bounded_run_with_all_replies() {
        let mut engine = engine(config("10.0.0.2", 4));
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();

        run(&mut engine, &mut queue, |_, packet, dst| {
            vec![(Duration::from_millis(10), reply_to(packet, dst))]
        });

        assert!(engine.is_stopped());
        let report = engine.report().unwrap();
        assert_eq!(report.transmitted, 4);
        assert_eq!(report.received, 4);
        assert_eq!(report.loss_percent, 0);
        // Unicast stops as soon as the last reply lands.
        assert_eq!(report.duration, Duration::from_millis(3010));
        let rtt = report.rtt.unwrap();
        assert!((rtt.max - 10.0).abs() < 1e-9);
        assert_eq!(rtt.stddev, 0.0);
        assert_eq!(reports(&engine).len(), 1);
        assert_eq!(engine.transport().closed, 1);
    }

    #[test]
    fn test_probe_layout_and_send_times() {
        let mut engine = engine(config("10.0.0.2", 3));
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();
        run(&mut engine, &mut queue, |_, _, _| Vec::new());

        let sent = &engine.transport().sent;
        assert_eq!(sent.len(), 3);
        for (i, (packet, dst, _)) in sent.iter().enumerate() {
            let probe = IcmpPacket::from_bytes(packet).unwrap();
            assert_eq!(probe.identifier, PROBE_TAG);
            assert_eq!(probe.sequence, i as u16);
            assert_eq!(probe.payload.len(), 56);
            assert_eq!(Signature::read_from(&probe.payload), Some(IDENTITY.signature()));
            assert!(probe.payload[8..].iter().all(|b| *b == 0));
            assert_eq!(*dst, "10.0.0.2".parse::<IpAddr>().unwrap());
        }

        let times: Vec<_> = engine.ledger().iter().map(|r| r.send_time).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(times[2], Duration::from_secs(2));

        let txs = engine.sink().iter().filter(|e| matches!(e, ProbeEvent::Tx { .. })).count();
        assert_eq!(txs, 3);
    }

    #[test]
    fn test_duplicates_leave_stats_alone() {
        let mut engine = engine(config("10.0.0.2", 2));
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();

        run(&mut engine, &mut queue, |seq, packet, dst| {
            let reply = reply_to(packet, dst);
            if seq == 0 {
                vec![
                    (Duration::from_millis(5), reply.clone()),
                    (Duration::from_millis(300), reply),
                ]
            } else {
                vec![(Duration::from_millis(7), reply)]
            }
        });

        let report = engine.report().unwrap();
        assert_eq!(report.received, 2);
        assert_eq!(report.duplicates, 1);
        let rtt = report.rtt.unwrap();
        assert!((rtt.max - 7.0).abs() < 1e-9);
        assert!((rtt.min - 5.0).abs() < 1e-9);

        let rtts = engine.sink().iter().filter(|e| matches!(e, ProbeEvent::Rtt { .. })).count();
        assert_eq!(rtts, 2);
    }

    #[test]
    fn test_linger_after_last_probe_uses_max_rtt() {
        // Multicast never stops early, so the linger timer decides.
        let mut engine = engine(config("224.0.0.1", 5));
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();

        run(&mut engine, &mut queue, |seq, packet, dst| {
            let rtt = if seq == 2 { 40 } else { 10 };
            vec![(Duration::from_millis(rtt), reply_to(packet, dst))]
        });

        let report = engine.report().unwrap();
        assert_eq!(report.received, 5);
        // Probe #5 leaves at 4s; linger is 2 x 40ms.
        assert_eq!(report.duration, Duration::from_millis(4080));
    }

    #[test]
    fn test_linger_keeps_sub_millisecond_precision() {
        let mut engine = engine(config("224.0.0.1", 2));
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();

        run(&mut engine, &mut queue, |seq, packet, dst| {
            if seq == 0 {
                vec![(Duration::from_micros(40_700), reply_to(packet, dst))]
            } else {
                Vec::new()
            }
        });

        // Probe #2 leaves at 1s; linger is 2 x 40.7ms.
        let duration = engine.report().unwrap().duration;
        assert!(duration > Duration::from_micros(1_081_399), "{:?}", duration);
        assert!(duration < Duration::from_micros(1_081_401), "{:?}", duration);
    }

    #[test]
    fn test_linger_without_samples_uses_timeout() {
        let mut config = config("10.0.0.2", 5);
        config.timeout = Duration::from_millis(1500);
        let mut engine = engine(config);
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();

        run(&mut engine, &mut queue, |_, _, _| Vec::new());

        let report = engine.report().unwrap();
        assert_eq!(report.transmitted, 5);
        assert_eq!(report.received, 0);
        assert_eq!(report.loss_percent, 100);
        assert!(report.rtt.is_none());
        assert_eq!(report.duration, Duration::from_millis(5500));
    }

    #[test]
    fn test_partial_loss_truncates() {
        let mut engine = engine(config("224.0.0.1", 3));
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();

        run(&mut engine, &mut queue, |seq, packet, dst| {
            if seq == 1 {
                Vec::new()
            } else {
                vec![(Duration::from_millis(2), reply_to(packet, dst))]
            }
        });

        let report = engine.report().unwrap();
        assert_eq!((report.transmitted, report.received), (3, 2));
        assert_eq!(report.loss_percent, 33);
    }

    #[test]
    fn test_stop_twice_reports_once() {
        let mut engine = engine(config("10.0.0.2", 0));
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();
        assert_eq!(engine.state(), EngineState::Running);

        engine.stop(&mut queue);
        engine.stop(&mut queue);

        assert_eq!(reports(&engine).len(), 1);
        assert_eq!(engine.transport().closed, 1);
        // The pending send was cancelled, so nothing is left to fire.
        assert!(queue.is_empty());
    }

    #[test]
    fn test_external_stop_cancels_linger() {
        let mut engine = engine(config("10.0.0.2", 1));
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();
        assert_eq!(engine.state(), EngineState::Stopping);
        assert_eq!(queue.len(), 1);

        engine.stop(&mut queue);
        assert!(queue.is_empty());
        run(&mut engine, &mut queue, |_, _, _| Vec::new());
        assert_eq!(reports(&engine).len(), 1);
    }

    #[test]
    fn test_deadline_stops_unbounded_run() {
        let mut config = config("10.0.0.2", 0);
        config.deadline = Some(Duration::from_millis(2500));
        let mut engine = engine(config);
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();
        assert!(engine.ledger().capacity() >= 3);

        run(&mut engine, &mut queue, |_, packet, dst| {
            vec![(Duration::from_millis(1), reply_to(packet, dst))]
        });

        let report = engine.report().unwrap();
        assert_eq!(report.transmitted, 3);
        assert_eq!(report.received, 3);
        assert_eq!(report.duration, Duration::from_millis(2500));
    }

    #[test]
    fn test_huge_count_starts_without_reserving_it_all() {
        let mut engine = engine(config("10.0.0.2", u64::MAX));
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();

        assert_eq!(engine.ledger().len(), 1);
        assert!(engine.ledger().capacity() <= 2 * crate::config::MAX_LEDGER_PRESIZE);
        engine.stop(&mut queue);
        assert_eq!(engine.report().unwrap().transmitted, 1);
    }

    #[test]
    fn test_small_payload_fails_before_sending() {
        let mut config = config("10.0.0.2", 1);
        config.payload_size = 8;
        let mut engine = engine(config);
        let mut queue: EventQueue<SimEvent> = EventQueue::new();

        assert!(matches!(
            engine.start(&mut queue),
            Err(ProbeError::PayloadTooSmall { size: 8, .. })
        ));
        assert!(engine.transport().opened.is_none());
        assert!(engine.transport().sent.is_empty());
        assert!(queue.is_empty());
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_missing_destination_is_fatal() {
        let config = ProbeConfig { verbosity: Verbosity::Silent, ..ProbeConfig::default() };
        let mut engine = engine(config);
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        assert!(matches!(engine.start(&mut queue), Err(ProbeError::MissingDestination)));
    }

    #[test]
    fn test_transport_and_bind_failures_are_fatal() {
        let mut queue: EventQueue<SimEvent> = EventQueue::new();

        let transport = RecordingTransport::failing_open();
        let mut engine = ProbeEngine::new(config("10.0.0.2", 1), IDENTITY, transport, Vec::<ProbeEvent>::new());
        assert!(matches!(
            engine.start(&mut queue),
            Err(ProbeError::TransportUnavailable { family: AddressFamily::V4, .. })
        ));

        let mut config = config("10.0.0.2", 1);
        config.source = Some("10.0.0.1".parse().unwrap());
        let transport = RecordingTransport::failing_bind();
        let mut engine = ProbeEngine::new(config, IDENTITY, transport, Vec::<ProbeEvent>::new());
        assert!(matches!(engine.start(&mut queue), Err(ProbeError::Bind { .. })));
        assert!(engine.transport().sent.is_empty());
        assert_eq!(engine.transport().closed, 1);
    }

    #[test]
    fn test_start_binds_source_and_sets_tos() {
        let mut config = config("10.0.0.2", 1);
        config.source = Some("10.0.0.1".parse().unwrap());
        config.traffic_class = 0xb8;
        let mut engine = engine(config);
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();

        assert_eq!(engine.transport().opened, Some(AddressFamily::V4));
        assert_eq!(engine.transport().bound, Some("10.0.0.1".parse().unwrap()));
        assert_eq!(engine.transport().traffic_class, Some(0xb8));
        assert!(matches!(engine.start(&mut queue), Err(ProbeError::AlreadyStarted)));
    }

    #[test]
    fn test_failed_send_keeps_sequences_aligned() {
        let transport = RecordingTransport::failing_attempts(&[1]);
        let mut engine = ProbeEngine::new(config("224.0.0.1", 3), IDENTITY, transport, Vec::<ProbeEvent>::new())
            .with_console(Box::new(io::sink()));
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();

        run(&mut engine, &mut queue, |_, packet, dst| {
            vec![(Duration::from_millis(4), reply_to(packet, dst))]
        });

        let statuses: Vec<_> = engine.ledger().iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![SendStatus::Sent, SendStatus::NotSent, SendStatus::Sent]);

        // The probe that did go out as sequence 2 is matched to record 2.
        let acked: Vec<_> = engine.ledger().iter().map(|r| r.acknowledged).collect();
        assert_eq!(acked, vec![true, false, true]);

        let report = engine.report().unwrap();
        assert_eq!(report.transmitted, 2);
        assert_eq!(report.received, 2);
        assert_eq!(report.loss_percent, 0);

        let tx_sequences: Vec<_> = engine
            .sink()
            .iter()
            .filter_map(|e| match e {
                ProbeEvent::Tx { sequence, .. } => Some(*sequence),
                _ => None,
            })
            .collect();
        assert_eq!(tx_sequences, vec![0, 2]);
    }

    #[test]
    fn test_every_send_failing_reports_zero_loss() {
        let transport = RecordingTransport::failing_attempts(&[0, 1]);
        let mut engine = ProbeEngine::new(config("10.0.0.2", 2), IDENTITY, transport, Vec::<ProbeEvent>::new())
            .with_console(Box::new(io::sink()));
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();
        run(&mut engine, &mut queue, |_, _, _| Vec::new());

        let report = engine.report().unwrap();
        assert_eq!(report.transmitted, 0);
        assert_eq!(report.loss_percent, 0);
        assert_eq!(engine.ledger().len(), 2);
    }

    #[test]
    fn test_waypoint_send_restores_protocol() {
        let mut config = config("2001:db8::2", 1);
        config.waypoints = vec!["2001:db8::a".parse().unwrap(), "2001:db8::b".parse().unwrap()];
        let mut engine = engine(config);
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();

        let transport = engine.transport();
        assert_eq!(transport.protocols, vec![Protocol::Ipv6Routing, Protocol::Icmpv6]);
        let (packet, _, protocol) = &transport.sent[0];
        assert_eq!(*protocol, Protocol::Ipv6Routing);
        assert_eq!(&packet[..4], &[58, 4, 0, 2]);
        assert_eq!(packet.len(), 40 + 8 + 56);

        match engine.sink().first() {
            Some(ProbeEvent::Tx { probe, .. }) => assert_eq!(probe.waypoints, 2),
            other => panic!("expected Tx, got {:?}", other),
        }
    }

    #[test]
    fn test_drop_notifications_are_published() {
        let mut engine = engine(config("10.0.0.2", 0));
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();

        let reply = InboundReply {
            source: "192.0.2.254".parse().unwrap(),
            hop_limit: Some(250),
            bytes: 36,
            kind: ReplyKind::TimeExceeded { code: 0 },
        };
        engine.on_reply(&reply, &mut queue);
        engine.stop(&mut queue);

        assert!(engine.sink().contains(&ProbeEvent::Drop {
            reason: crate::icmp::DropReason::TimeExceeded { code: 0 },
            source: "192.0.2.254".parse().unwrap(),
        }));
        assert_eq!(engine.ledger().iter().filter(|r| r.acknowledged).count(), 0);
        assert_eq!(engine.stats().count(), 0);
    }

    #[test]
    fn test_short_reply_changes_nothing() {
        let mut engine = engine(config("10.0.0.2", 0));
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();

        let reply = InboundReply {
            source: "10.0.0.2".parse().unwrap(),
            hop_limit: Some(64),
            bytes: 14,
            kind: ReplyKind::EchoReply {
                identifier: PROBE_TAG,
                sequence: 0,
                payload: vec![0; 6],
            },
        };
        engine.on_reply(&reply, &mut queue);

        assert_eq!(engine.received(), 0);
        assert_eq!(engine.duplicates(), 0);
        assert_eq!(engine.stats().count(), 0);
        assert!(!engine.ledger().get(0).unwrap().acknowledged);
    }

    #[test]
    fn test_console_text() {
        let console = SharedConsole::default();
        let mut config = config("10.0.0.2", 2);
        config.verbosity = Verbosity::Verbose;
        let mut engine = ProbeEngine::new(config, IDENTITY, RecordingTransport::new(), Vec::<ProbeEvent>::new())
            .with_console(Box::new(console.clone()));
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();

        run(&mut engine, &mut queue, |seq, packet, dst| {
            let reply = reply_to(packet, dst);
            if seq == 0 {
                vec![(Duration::from_millis(3), reply.clone()), (Duration::from_millis(6), reply)]
            } else {
                vec![(Duration::from_millis(3), reply)]
            }
        });

        let text = console.text();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines[0],
            "PING 10.0.0.2 - 56 bytes of data; 84 bytes including ICMP and IPv4 headers."
        );
        assert_eq!(lines[1], "64 bytes from 10.0.0.2: icmp_seq=0 ttl=64 time=3.000 ms");
        assert_eq!(lines[2], "64 bytes from 10.0.0.2: icmp_seq=0 ttl=64 time=6.000 ms (DUP!)");
        assert_eq!(lines[3], "64 bytes from 10.0.0.2: icmp_seq=1 ttl=64 time=3.000 ms");
        assert!(text.contains("--- 10.0.0.2 ping statistics ---"));
        assert!(text.contains("2 packets transmitted, 2 received, 1 duplicates, 0% packet loss, time 1003ms"));
        assert!(text.contains("rtt min/avg/max/mdev = 3.000/3.000/3.000/0.000 ms"));
    }

    #[test]
    fn test_quiet_and_silent_console() {
        for (verbosity, expect_header, expect_replies) in [
            (Verbosity::Quiet, true, false),
            (Verbosity::Silent, false, false),
        ] {
            let console = SharedConsole::default();
            let mut config = config("10.0.0.2", 1);
            config.verbosity = verbosity;
            let mut engine = ProbeEngine::new(config, IDENTITY, RecordingTransport::new(), Vec::<ProbeEvent>::new())
                .with_console(Box::new(console.clone()));
            let mut queue: EventQueue<SimEvent> = EventQueue::new();
            engine.start(&mut queue).unwrap();
            run(&mut engine, &mut queue, |_, packet, dst| {
                vec![(Duration::from_millis(1), reply_to(packet, dst))]
            });

            let text = console.text();
            assert_eq!(text.contains("PING 10.0.0.2"), expect_header);
            assert_eq!(text.contains("ping statistics"), expect_header);
            assert_eq!(text.contains("bytes from"), expect_replies);
        }
    }

    #[test]
    fn test_multicast_duplicates_are_not_flagged() {
        let console = SharedConsole::default();
        let mut config = config("224.0.0.1", 1);
        config.verbosity = Verbosity::Verbose;
        let mut engine = ProbeEngine::new(config, IDENTITY, RecordingTransport::new(), Vec::<ProbeEvent>::new())
            .with_console(Box::new(console.clone()));
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();

        run(&mut engine, &mut queue, |_, packet, _| {
            vec![
                (Duration::from_millis(1), reply_to(packet, "10.0.0.5".parse().unwrap())),
                (Duration::from_millis(2), reply_to(packet, "10.0.0.6".parse().unwrap())),
            ]
        });

        let text = console.text();
        assert!(!text.contains("(DUP!)"));
        assert!(text.contains("bytes from 10.0.0.6"));
        assert_eq!(engine.report().unwrap().duplicates, 1);
    }

    #[test]
    fn test_replies_after_stop_are_ignored() {
        let mut engine = engine(config("224.0.0.1", 1));
        let mut queue: EventQueue<SimEvent> = EventQueue::new();
        engine.start(&mut queue).unwrap();
        let (packet, dst, _) = engine.transport().sent[0].clone();
        engine.stop(&mut queue);

        engine.on_reply(&reply_to(&packet, dst), &mut queue);
        assert_eq!(engine.received(), 0);
        assert_eq!(engine.report().unwrap().received, 0);
    }
}
