use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// Number of payload bytes occupied by an embedded signature.
pub const SIGNATURE_LEN: usize = 8;

/// Per-instance tag carried in the first eight payload bytes of every probe.
///
/// Several engines pinging the same multicast group all see each other's
/// replies; the signature is how each one picks out its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Signature(u64);

impl Signature {
    /// Host id in the upper half, slot index in the lower half.
    pub fn from_identity(host_id: u32, slot: u32) -> Self {
        Self(((host_id as u64) << 32) + slot as u64)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Build a zero-filled probe payload of `size` bytes with the signature
    /// written little-endian at the front.
    pub fn payload(self, size: usize) -> Vec<u8> {
        let mut payload = vec![0u8; size.max(SIGNATURE_LEN)];
        LittleEndian::write_u64(&mut payload[..SIGNATURE_LEN], self.0);
        payload
    }

    /// Returns `None` when the payload is too short to carry a signature.
    pub fn read_from(payload: &[u8]) -> Option<Self> {
        if payload.len() < SIGNATURE_LEN {
            return None;
        }
        Some(Self(LittleEndian::read_u64(&payload[..SIGNATURE_LEN])))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}
