use std::time::Duration;

use crate::icmp::{DropReason, InboundReply, PROBE_TAG, ReplyKind};
use crate::ledger::{Ledger, SendStatus};
use crate::signature::Signature;
use crate::stats::{RunningStats, duration_ms};

/// Why an inbound message left all state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    ForeignTag,
    ShortPayload,
    ForeignSignature,
    UnknownSequence,
    NeverSent,
    Unrecognized { icmp_type: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// First reply for a probe; statistics were updated.
    Matched { sequence: u64, wire: u16, rtt: Duration },
    /// Repeat reply for an acknowledged probe; statistics were not touched.
    Duplicate { sequence: u64, wire: u16, rtt: Duration },
    Dropped { reason: DropReason },
    Ignored { reason: IgnoreReason },
}

/// Correlates inbound replies with the ledger.
#[derive(Debug, Default)]
pub struct ReplyMatcher {
    signature: Signature,
    received: u64,
    duplicates: u64,
}

impl ReplyMatcher {
    pub fn new(signature: Signature) -> Self {
        Self {
            signature,
            received: 0,
            duplicates: 0,
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    pub fn classify(
        &mut self,
        reply: &InboundReply,
        now: Duration,
        ledger: &mut Ledger,
        stats: &mut RunningStats,
    ) -> MatchOutcome {
        match &reply.kind {
            ReplyKind::EchoReply {
                identifier,
                sequence,
                payload,
            } => self.match_echo(*identifier, *sequence, payload, now, ledger, stats),
            ReplyKind::DestinationUnreachable { code } => MatchOutcome::Dropped {
                reason: DropReason::DestinationUnreachable { code: *code },
            },
            ReplyKind::TimeExceeded { code } => MatchOutcome::Dropped {
                reason: DropReason::TimeExceeded { code: *code },
            },
            ReplyKind::Unrecognized { icmp_type } => MatchOutcome::Ignored {
                reason: IgnoreReason::Unrecognized { icmp_type: *icmp_type },
            },
        }
    }

    fn match_echo(
        &mut self,
        identifier: u16,
        wire: u16,
        payload: &[u8],
        now: Duration,
        ledger: &mut Ledger,
        stats: &mut RunningStats,
    ) -> MatchOutcome {
        if identifier != PROBE_TAG {
            return ignored(IgnoreReason::ForeignTag);
        }

        let Some(signature) = Signature::read_from(payload) else {
            return ignored(IgnoreReason::ShortPayload);
        };
        if signature != self.signature {
            return ignored(IgnoreReason::ForeignSignature);
        }

        let Some(record) = ledger.resolve(wire).and_then(|seq| ledger.get_mut(seq)) else {
            return ignored(IgnoreReason::UnknownSequence);
        };
        if record.status == SendStatus::NotSent {
            return ignored(IgnoreReason::NeverSent);
        }

        let sequence = record.sequence;
        let rtt = now.saturating_sub(record.send_time);

        if record.acknowledged {
            self.duplicates += 1;
            return MatchOutcome::Duplicate { sequence, wire, rtt };
        }

        record.acknowledged = true;
        self.received += 1;
        stats.update(duration_ms(rtt));
        MatchOutcome::Matched { sequence, wire, rtt }
    }
}

fn ignored(reason: IgnoreReason) -> MatchOutcome {
    MatchOutcome::Ignored { reason }
}
