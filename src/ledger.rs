use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    /// The transport refused the probe. The record only keeps the ledger
    /// index aligned with the sequence number.
    NotSent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRecord {
    pub sequence: u64,
    pub send_time: Duration,
    pub status: SendStatus,
    pub acknowledged: bool,
}

/// Append-only record of every probe attempt; `records[i].sequence == i`.
#[derive(Debug, Default)]
pub struct Ledger {
    records: Vec<ProbeRecord>,
    transmitted: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.records.reserve(additional);
    }

    pub fn capacity(&self) -> usize {
        self.records.capacity()
    }

    /// Record an attempt and return its sequence number.
    pub fn append(&mut self, send_time: Duration, status: SendStatus) -> u64 {
        if let Some(last) = self.records.last() {
            debug_assert!(send_time >= last.send_time, "send times must not go backwards");
        }

        let sequence = self.next_sequence();
        self.records.push(ProbeRecord {
            sequence,
            send_time,
            status,
            acknowledged: false,
        });
        if status == SendStatus::Sent {
            self.transmitted += 1;
        }
        sequence
    }

    /// Sequence number the next attempt will get.
    pub fn next_sequence(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn get(&self, sequence: u64) -> Option<&ProbeRecord> {
        usize::try_from(sequence).ok().and_then(|i| self.records.get(i))
    }

    pub fn get_mut(&mut self, sequence: u64) -> Option<&mut ProbeRecord> {
        usize::try_from(sequence).ok().and_then(|i| self.records.get_mut(i))
    }

    /// Map a 16-bit wire sequence to the newest attempt carrying it.
    pub fn resolve(&self, wire: u16) -> Option<u64> {
        let last = self.next_sequence().checked_sub(1)?;
        let candidate = (last & !0xffff) | wire as u64;
        if candidate <= last {
            Some(candidate)
        } else {
            candidate.checked_sub(0x1_0000)
        }
    }

    /// Attempts the transport accepted.
    pub fn transmitted(&self) -> u64 {
        self.transmitted
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProbeRecord> {
        self.records.iter()
    }
}
