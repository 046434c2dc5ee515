//! Advertise message written by client connections before first use

use std::io::Write;

use uuid::Uuid;

/// Magic bytes opening a V1 advertise message
pub const ADVERTISE_MAGIC_V1: &[u8; 8] = b"ADVR_V1\0";

/// Encoded size of a V1 advertise message
pub const ADVERTISE_V1_LEN: usize = 8 + 16 + 8 + 2;

/// Identifies this process to the peer a client connection reaches.
///
/// Layout (little-endian):
/// - magic `ADVR_V1\0` (8 bytes)
/// - instance cookie (16 bytes)
/// - process id (u64)
/// - reserved (u16, zero)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertiseMessage {
    pub cookie: Uuid,
    pub pid: u64,
}

impl AdvertiseMessage {
    pub fn new(cookie: Uuid, pid: u64) -> Self {
        Self { cookie, pid }
    }

    /// Message for the current process with a fresh cookie
    pub fn for_current_process() -> Self {
        Self::new(Uuid::new_v4(), u64::from(std::process::id()))
    }

    pub fn encode(&self) -> [u8; ADVERTISE_V1_LEN] {
        let mut buf = [0u8; ADVERTISE_V1_LEN];
        buf[..8].copy_from_slice(ADVERTISE_MAGIC_V1);
        buf[8..24].copy_from_slice(self.cookie.as_bytes());
        buf[24..32].copy_from_slice(&self.pid.to_le_bytes());
        // bytes 32..34 reserved
        buf
    }

    /// Parse an encoded message; `None` if the magic or length is wrong
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < ADVERTISE_V1_LEN || &bytes[..8] != ADVERTISE_MAGIC_V1 {
            return None;
        }
        let cookie = Uuid::from_slice(&bytes[8..24]).ok()?;
        let pid = u64::from_le_bytes(bytes[24..32].try_into().ok()?);
        Some(Self { cookie, pid })
    }

    /// Write the whole message to `stream`
    pub fn send<W: Write>(&self, stream: &mut W) -> std::io::Result<()> {
        stream.write_all(&self.encode())?;
        stream.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_fixed_layout() {
        let cookie = Uuid::from_bytes([7; 16]);
        let bytes = AdvertiseMessage::new(cookie, 0x0102).encode();

        assert_eq!(bytes.len(), 34);
        assert_eq!(&bytes[..8], b"ADVR_V1\0");
        assert_eq!(&bytes[8..24], &[7; 16]);
        assert_eq!(&bytes[24..32], &[0x02, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&bytes[32..], &[0, 0]);
    }

    #[test]
    fn send_writes_whole_message() {
        let msg = AdvertiseMessage::for_current_process();
        let mut out = Vec::new();
        msg.send(&mut out).unwrap();

        assert_eq!(AdvertiseMessage::decode(&out), Some(msg));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = AdvertiseMessage::for_current_process().encode();
        bytes[0] = b'X';
        assert_eq!(AdvertiseMessage::decode(&bytes), None);
        assert_eq!(AdvertiseMessage::decode(b"ADVR_V1\0"), None);
    }
}
