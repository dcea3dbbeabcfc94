//! Boundary to the network/sharing layer.
//!
//! The core hands bounded byte packets to a [`PacketSink`] and receives
//! inbound ranges through the render pipeline's `write_from_network`. It
//! assumes nothing about the transport beyond "each call delivers a
//! contiguous byte range in the order captured".

/// Largest payload the capture drain will put in a single packet. Sized to
/// stay under the UDP fragmentation threshold.
pub const MAX_PACKET_BYTES: usize = 1452;

/// One outbound chunk of captured audio, handed to the transport exactly
/// once and never retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: Vec<u8>,
}

impl Packet {
    /// Copy `bytes` into a packet. Callers keep payloads within the
    /// configured bound; the constructor only checks in debug builds.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() <= MAX_PACKET_BYTES);
        Self {
            data: bytes.to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Push interface of the transport collaborator.
///
/// Called from the drain path; implementations must not block for long, and
/// they own the packet from the moment the call returns.
pub trait PacketSink: Send + Sync {
    fn send(&self, packet: Packet);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Sink that concatenates everything it receives, used across the
    /// pipeline tests.
    pub(crate) struct CollectingSink {
        pub packets: Mutex<Vec<Packet>>,
    }

    impl CollectingSink {
        pub fn new() -> Self {
            Self {
                packets: Mutex::new(Vec::new()),
            }
        }
    }

    impl PacketSink for CollectingSink {
        fn send(&self, packet: Packet) {
            self.packets.lock().push(packet);
        }
    }

    #[test]
    fn packet_round_trip() {
        let packet = Packet::from_bytes(&[1, 2, 3]);
        assert_eq!(packet.len(), 3);
        assert!(!packet.is_empty());
        assert_eq!(packet.as_bytes(), &[1, 2, 3]);
        assert_eq!(packet.into_bytes(), vec![1, 2, 3]);
    }

    #[test]
    fn sink_receives_in_order() {
        let sink = CollectingSink::new();
        sink.send(Packet::from_bytes(&[1]));
        sink.send(Packet::from_bytes(&[2]));

        let packets = sink.packets.lock();
        assert_eq!(packets[0].as_bytes(), &[1]);
        assert_eq!(packets[1].as_bytes(), &[2]);
    }
}
