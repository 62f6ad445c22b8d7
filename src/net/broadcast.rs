use std::{
    io,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    time::{Duration, Instant},
};

use crate::{
    error::BroadcastError,
    net::registry::{ENDPOINT_CAPACITY, EndpointSlot, EndpointSlots},
    types::LandmarkSet,
};

/// Six little-endian f32 values: left eye xyz, then right eye xyz.
pub const PACKET_LEN: usize = 24;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(5);

/// How long a failed lookup is remembered before the slot is resolved again.
pub const RESOLVE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

pub fn encode_packet(landmarks: &LandmarkSet) -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    for (chunk, value) in packet.chunks_exact_mut(4).zip(landmarks.eyes()) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
    packet
}

pub fn decode_packet(data: &[u8]) -> Option<[f32; 6]> {
    if data.len() != PACKET_LEN {
        return None;
    }
    let mut values = [0.0f32; 6];
    for (value, chunk) in values.iter_mut().zip(data.chunks_exact(4)) {
        *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Some(values)
}

/// Result of one fan-out: one entry per registry slot, in slot order.
#[derive(Debug)]
pub struct BroadcastReport {
    pub outcomes: Vec<Result<SocketAddr, BroadcastError>>,
}

impl BroadcastReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &BroadcastError)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(index, outcome)| outcome.as_ref().err().map(|err| (index, err)))
    }
}

#[derive(Default)]
struct SocketPool {
    v4: Option<UdpSocket>,
    v6: Option<UdpSocket>,
}

impl SocketPool {
    fn for_addr(
        &mut self,
        addr: &SocketAddr,
        timeout: Duration,
    ) -> Result<&UdpSocket, BroadcastError> {
        let (slot, bind_addr) = match addr {
            SocketAddr::V4(_) => (&mut self.v4, "0.0.0.0:0"),
            SocketAddr::V6(_) => (&mut self.v6, "[::]:0"),
        };
        if slot.is_none() {
            let socket = UdpSocket::bind(bind_addr).map_err(BroadcastError::SocketCreation)?;
            socket
                .set_write_timeout(Some(timeout))
                .map_err(BroadcastError::SocketCreation)?;
            *slot = Some(socket);
        }
        slot.as_ref()
            .ok_or_else(|| BroadcastError::SocketCreation(io::Error::other("socket unavailable")))
    }
}

/// Lookup result for one slot, valid while the slot's content is unchanged.
enum Resolution {
    Resolved(SocketAddr),
    Failed { reason: String, retry_at: Instant },
}

/// Fire-and-forget UDP fan-out to every registry slot.
pub struct PacketBroadcaster {
    send_timeout: Duration,
    resolve_retry: Duration,
    sockets: SocketPool,
    resolved: [Option<(EndpointSlot, Resolution)>; ENDPOINT_CAPACITY],
    last_failure: [Option<String>; ENDPOINT_CAPACITY],
    lookups: u64,
}

impl Default for PacketBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_TIMEOUT)
    }
}

impl PacketBroadcaster {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            send_timeout: send_timeout.max(Duration::from_millis(1)),
            resolve_retry: RESOLVE_RETRY_INTERVAL,
            sockets: SocketPool::default(),
            resolved: Default::default(),
            last_failure: Default::default(),
            lookups: 0,
        }
    }

    /// Sends the eye packet to each slot independently. A failing slot is
    /// recorded in the report and never stops the remaining sends.
    pub fn broadcast(&mut self, slots: &EndpointSlots, landmarks: &LandmarkSet) -> BroadcastReport {
        let packet = encode_packet(landmarks);
        let mut outcomes = Vec::with_capacity(ENDPOINT_CAPACITY);

        for (index, slot) in slots.iter().enumerate() {
            let outcome = self.send_to_slot(index, slot, &packet);
            self.note_outcome(index, slot, &outcome);
            outcomes.push(outcome);
        }

        BroadcastReport { outcomes }
    }

    fn send_to_slot(
        &mut self,
        index: usize,
        slot: &EndpointSlot,
        packet: &[u8; PACKET_LEN],
    ) -> Result<SocketAddr, BroadcastError> {
        let addr = self.resolve_cached(index, slot)?;
        let socket = self.sockets.for_addr(&addr, self.send_timeout)?;
        let sent = socket
            .send_to(packet, addr)
            .map_err(|source| BroadcastError::Send { addr, source })?;
        if sent != PACKET_LEN {
            return Err(BroadcastError::ShortWrite {
                addr,
                sent,
                expected: PACKET_LEN,
            });
        }
        log::trace!("sent {sent} bytes to slot {index} ({addr})");
        Ok(addr)
    }

    /// Resolves at most once per slot content, and at most once per retry
    /// interval while the lookup keeps failing. Lookups block, so a bad host
    /// must not be looked up again on every tick.
    fn resolve_cached(
        &mut self,
        index: usize,
        slot: &EndpointSlot,
    ) -> Result<SocketAddr, BroadcastError> {
        if slot.is_empty() {
            self.resolved[index] = None;
            return Err(BroadcastError::EmptySlot);
        }
        if let Some((cached_slot, resolution)) = &self.resolved[index] {
            if cached_slot == slot {
                match resolution {
                    Resolution::Resolved(addr) => return Ok(*addr),
                    Resolution::Failed { reason, retry_at } if Instant::now() < *retry_at => {
                        return Err(resolution_error(slot, reason.clone()));
                    }
                    Resolution::Failed { .. } => {}
                }
            }
        }

        self.lookups += 1;
        let outcome = resolve(slot);
        let resolution = match &outcome {
            Ok(addr) => Resolution::Resolved(*addr),
            Err(BroadcastError::AddressResolution { reason, .. }) => Resolution::Failed {
                reason: reason.clone(),
                retry_at: Instant::now() + self.resolve_retry,
            },
            Err(_) => {
                self.resolved[index] = None;
                return outcome;
            }
        };
        self.resolved[index] = Some((slot.clone(), resolution));
        outcome
    }

    fn note_outcome(
        &mut self,
        index: usize,
        slot: &EndpointSlot,
        outcome: &Result<SocketAddr, BroadcastError>,
    ) {
        match outcome {
            Ok(addr) => {
                if self.last_failure[index].take().is_some() {
                    log::info!("endpoint slot {index} reachable again at {addr}");
                }
            }
            Err(BroadcastError::EmptySlot) => {
                self.last_failure[index] = None;
            }
            Err(err) => {
                let message = err.to_string();
                if self.last_failure[index].as_deref() != Some(message.as_str()) {
                    log::warn!(
                        "endpoint slot {index} ({}:{}) skipped: {message}",
                        slot.host,
                        slot.port
                    );
                    self.last_failure[index] = Some(message);
                }
            }
        }
    }
}

pub fn resolve(slot: &EndpointSlot) -> Result<SocketAddr, BroadcastError> {
    if slot.is_empty() {
        return Err(BroadcastError::EmptySlot);
    }
    let host = slot.host.trim();
    let port: u16 = slot.port.trim().parse().map_err(|_| {
        resolution_error(slot, "port is not a number in 0..=65535".to_string())
    })?;
    let candidates: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|err| resolution_error(slot, err.to_string()))?
        .collect();

    candidates
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| resolution_error(slot, "no addresses found".to_string()))
}

fn resolution_error(slot: &EndpointSlot, reason: String) -> BroadcastError {
    BroadcastError::AddressResolution {
        host: slot.host.trim().to_string(),
        port: slot.port.trim().to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point3;

    fn sample_landmarks() -> LandmarkSet {
        LandmarkSet {
            left_eye: Point3::new(1.5, -2.0, 30.25),
            right_eye: Point3::new(4.0, -2.0, 30.25),
            right_elbow: Point3::new(99.0, 99.0, 99.0),
            right_hand: Point3::new(77.0, 77.0, 77.0),
            reserved: [Point3::ZERO; 2],
        }
    }

    fn receiver() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        socket
    }

    #[test]
    fn packet_carries_only_the_eyes_little_endian() {
        let packet = encode_packet(&sample_landmarks());
        assert_eq!(packet.len(), PACKET_LEN);
        assert_eq!(&packet[0..4], &1.5f32.to_le_bytes());
        assert_eq!(&packet[20..24], &30.25f32.to_le_bytes());
        assert_eq!(
            decode_packet(&packet),
            Some([1.5, -2.0, 30.25, 4.0, -2.0, 30.25])
        );
    }

    #[test]
    fn resolve_reports_empty_and_bad_port() {
        assert!(matches!(
            resolve(&EndpointSlot::default()),
            Err(BroadcastError::EmptySlot)
        ));
        assert!(matches!(
            resolve(&EndpointSlot::new("127.0.0.1", "99999")),
            Err(BroadcastError::AddressResolution { .. })
        ));
        assert_eq!(
            resolve(&EndpointSlot::new(" 127.0.0.1 ", "4000")).unwrap(),
            "127.0.0.1:4000".parse().unwrap()
        );
    }

    #[test]
    fn failing_slots_do_not_block_the_others() {
        let first = receiver();
        let second = receiver();
        let mut slots: EndpointSlots = Default::default();
        slots[0] = EndpointSlot::new("127.0.0.1", first.local_addr().unwrap().port().to_string());
        slots[1] = EndpointSlot::new("127.0.0.1", "not-a-port");
        slots[3] = EndpointSlot::new("no such host.invalid", "9000");
        slots[5] = EndpointSlot::new("127.0.0.1", second.local_addr().unwrap().port().to_string());

        let mut broadcaster = PacketBroadcaster::default();
        let report = broadcaster.broadcast(&slots, &sample_landmarks());

        assert_eq!(report.outcomes.len(), ENDPOINT_CAPACITY);
        assert_eq!(report.delivered(), 2);
        let failed: Vec<usize> = report.failures().map(|(index, _)| index).collect();
        assert_eq!(failed, vec![1, 2, 3, 4]);
        assert!(matches!(report.outcomes[2], Err(BroadcastError::EmptySlot)));

        let mut buf = [0u8; 64];
        for socket in [&first, &second] {
            let (len, _) = socket.recv_from(&mut buf).unwrap();
            assert_eq!(len, PACKET_LEN);
            assert_eq!(decode_packet(&buf[..len]).unwrap(), sample_landmarks().eyes());
        }
    }

    #[test]
    fn cached_resolution_follows_slot_changes() {
        let first = receiver();
        let second = receiver();
        let mut slots: EndpointSlots = Default::default();
        slots[0] = EndpointSlot::new("127.0.0.1", first.local_addr().unwrap().port().to_string());

        let mut broadcaster = PacketBroadcaster::default();
        broadcaster.broadcast(&slots, &sample_landmarks());
        slots[0].port = second.local_addr().unwrap().port().to_string();
        let report = broadcaster.broadcast(&slots, &sample_landmarks());

        assert_eq!(
            report.outcomes[0].as_ref().unwrap(),
            &second.local_addr().unwrap()
        );
        let mut buf = [0u8; 64];
        assert_eq!(second.recv_from(&mut buf).unwrap().0, PACKET_LEN);
    }

    #[test]
    fn failed_lookup_is_not_repeated_inside_the_retry_interval() {
        let mut slots: EndpointSlots = Default::default();
        slots[2] = EndpointSlot::new("no-such-host.invalid", "9000");
        slots[4] = EndpointSlot::new("127.0.0.1", "not-a-port");

        let mut broadcaster = PacketBroadcaster::default();
        let first = broadcaster.broadcast(&slots, &sample_landmarks());
        assert_eq!(broadcaster.lookups, 2);
        let second = broadcaster.broadcast(&slots, &sample_landmarks());
        assert_eq!(broadcaster.lookups, 2);

        for report in [&first, &second] {
            let failed: Vec<usize> = report.failures().map(|(index, _)| index).collect();
            assert_eq!(failed, vec![2, 4]);
            assert!(matches!(
                report.outcomes[2],
                Err(BroadcastError::AddressResolution { .. })
            ));
        }
        assert_eq!(
            first.outcomes[4].as_ref().unwrap_err().to_string(),
            second.outcomes[4].as_ref().unwrap_err().to_string()
        );
    }

    #[test]
    fn failed_lookup_is_retried_after_the_interval_or_on_change() {
        let target = receiver();
        let mut slots: EndpointSlots = Default::default();
        slots[0] = EndpointSlot::new("127.0.0.1", "not-a-port");

        let mut broadcaster = PacketBroadcaster {
            resolve_retry: Duration::ZERO,
            ..PacketBroadcaster::default()
        };
        broadcaster.broadcast(&slots, &sample_landmarks());
        broadcaster.broadcast(&slots, &sample_landmarks());
        assert_eq!(broadcaster.lookups, 2);

        broadcaster.resolve_retry = Duration::from_secs(60);
        broadcaster.broadcast(&slots, &sample_landmarks());
        assert_eq!(broadcaster.lookups, 3);
        broadcaster.broadcast(&slots, &sample_landmarks());
        assert_eq!(broadcaster.lookups, 3);

        // New content is looked up at once, whatever the interval.
        slots[0].port = target.local_addr().unwrap().port().to_string();
        let report = broadcaster.broadcast(&slots, &sample_landmarks());
        assert_eq!(broadcaster.lookups, 4);
        assert_eq!(report.delivered(), 1);
        let mut buf = [0u8; 64];
        assert_eq!(target.recv_from(&mut buf).unwrap().0, PACKET_LEN);
    }
}
