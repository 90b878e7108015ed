//! Encrypted, roaming-aware datagram endpoint.
//!
//! A `Connection` owns one nonblocking UDP socket and a session key.
//! Datagrams that fail authentication, carry the wrong direction, or
//! are otherwise malformed vanish without feedback. The peer address
//! is whatever source address the last authenticated datagram came
//! from; there is no other address-change policy, which is what lets a
//! client roam across networks and NAT rebinds mid-session.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};

use bytes::{Buf, BufMut, BytesMut};
use tracing::{debug, info};

use crate::constants::{
    AEAD_TAG_LEN, PACKET_HEADER_LEN, SEND_INTERVAL_MAX, SEND_INTERVAL_MIN, WIRE_NONCE_LEN,
};
use crate::crypto::{Direction, NonceSource, SessionKey, WireNonce, decrypt, encrypt};
use crate::error::{Error, Result};
use crate::timing::{RttEstimator, TIMESTAMP_NONE, timestamp, timestamp16, timestamp_diff};

/// Largest datagram we will ever read.
const RECV_BUF_LEN: usize = 65536;

/// Timestamp of the peer's most recent packet, kept so our next send
/// can echo it (aged by our local holding time).
#[derive(Debug, Clone, Copy)]
struct SavedTimestamp {
    value: u16,
    received_at: u64,
}

/// Traffic counters for one endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionStats {
    /// Total bytes shipped, wire overhead included.
    pub bytes_sent: u64,
    /// Total bytes accepted after authentication.
    pub bytes_received: u64,
    /// Datagrams shipped.
    pub datagrams_sent: u64,
    /// Datagrams accepted after authentication.
    pub datagrams_received: u64,
}

/// One side's encrypted datagram endpoint.
#[derive(Debug)]
pub struct Connection {
    socket: UdpSocket,
    remote_addr: Option<SocketAddr>,
    key: SessionKey,
    direction: Direction,
    nonces: NonceSource,
    rtt: RttEstimator,
    saved_timestamp: Option<SavedTimestamp>,
    attached: bool,
    last_heard: Option<u64>,
    stats: ConnectionStats,
}

impl Connection {
    /// Server side: bind a local address, mint a fresh session key, and
    /// wait for the client to appear.
    pub fn server(bind_addr: impl ToSocketAddrs) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            remote_addr: None,
            key: SessionKey::generate(),
            direction: Direction::ToClient,
            nonces: NonceSource::new(Direction::ToClient),
            rtt: RttEstimator::new(),
            saved_timestamp: None,
            attached: false,
            last_heard: None,
            stats: ConnectionStats::default(),
        })
    }

    /// Client side: dial the server with the key carried over the
    /// bootstrap channel.
    pub fn client(server_addr: impl ToSocketAddrs, key: SessionKey) -> Result<Self> {
        let remote = server_addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::protocol("server address resolved to nothing"))?;
        let bind: SocketAddr = if remote.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            remote_addr: Some(remote),
            key,
            direction: Direction::ToServer,
            nonces: NonceSource::new(Direction::ToServer),
            rtt: RttEstimator::new(),
            saved_timestamp: None,
            attached: false,
            last_heard: None,
            stats: ConnectionStats::default(),
        })
    }

    /// Encrypt and ship one payload. Best effort: datagrams may vanish.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        let remote = self.remote_addr.ok_or(Error::NotAttached)?;

        let mut plaintext = BytesMut::with_capacity(PACKET_HEADER_LEN + payload.len());
        plaintext.put_u8(self.direction.as_byte());
        plaintext.put_u16(timestamp16());
        plaintext.put_u16(self.timestamp_reply());
        plaintext.put_slice(payload);

        let nonce = self.nonces.next();
        let ciphertext = encrypt(&self.key, nonce, &plaintext)?;

        let mut wire = BytesMut::with_capacity(WIRE_NONCE_LEN + ciphertext.len());
        wire.put_slice(&nonce.to_bytes());
        wire.put_slice(&ciphertext);

        self.socket.send_to(&wire, remote)?;
        self.stats.bytes_sent += wire.len() as u64;
        self.stats.datagrams_sent += 1;
        Ok(())
    }

    /// Pull the next authenticated payload, if any datagram is waiting.
    ///
    /// Returns `Ok(None)` when the socket has nothing for us, including
    /// when everything that arrived failed authentication and was
    /// silently discarded.
    pub fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = [0u8; RECV_BUF_LEN];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buf) {
                Ok(pair) => pair,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e.into()),
            };

            if let Some(payload) = self.accept_datagram(&buf[..len], from) {
                return Ok(Some(payload));
            }
            // Bad datagram: drop silently, keep draining the socket.
        }
    }

    /// Authenticate one datagram; `None` means drop.
    fn accept_datagram(&mut self, wire: &[u8], from: SocketAddr) -> Option<Vec<u8>> {
        if wire.len() < WIRE_NONCE_LEN + AEAD_TAG_LEN + PACKET_HEADER_LEN {
            return None;
        }

        let nonce = WireNonce::from_bytes(wire)?;
        if nonce.direction() != self.direction.opposite() {
            return None;
        }

        let plaintext = decrypt(&self.key, nonce, &wire[WIRE_NONCE_LEN..])?;
        let mut reader: &[u8] = &plaintext;
        if reader.remaining() < PACKET_HEADER_LEN {
            return None;
        }
        if Direction::from_byte(reader.get_u8())? != self.direction.opposite() {
            return None;
        }

        let now = timestamp();
        let their_timestamp = reader.get_u16();
        let their_reply = reader.get_u16();

        self.saved_timestamp = Some(SavedTimestamp {
            value: their_timestamp,
            received_at: now,
        });
        if their_reply != TIMESTAMP_NONE {
            self.rtt
                .observe(timestamp_diff(timestamp16(), their_reply) as f64);
        }

        // Roaming: the authenticated source address is the peer now.
        if self.remote_addr != Some(from) {
            info!(target: "stm_core::connection", %from, "peer address changed");
            self.remote_addr = Some(from);
        }
        if !self.attached {
            debug!(target: "stm_core::connection", %from, "peer attached");
            self.attached = true;
        }

        self.last_heard = Some(now);
        self.stats.bytes_received += wire.len() as u64;
        self.stats.datagrams_received += 1;
        Some(reader.to_vec())
    }

    /// Timestamp echo for the next outbound packet, aged by how long we
    /// have been holding it.
    fn timestamp_reply(&self) -> u16 {
        match self.saved_timestamp {
            Some(saved) => {
                let held = (timestamp() - saved.received_at) % 65536;
                saved.value.wrapping_add(held as u16)
            }
            None => TIMESTAMP_NONE,
        }
    }

    /// File descriptor for the host poll loop.
    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Local port (the one the server advertises at bootstrap).
    pub fn port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Session key as base64 for the bootstrap channel.
    pub fn key(&self) -> String {
        self.key.to_base64()
    }

    /// Whether we have heard an authenticated packet from the peer.
    pub fn attached(&self) -> bool {
        self.attached
    }

    /// Whether we know an address to send to at all.
    pub fn peer_known(&self) -> bool {
        self.remote_addr.is_some()
    }

    /// Local clock (ms) when the last authenticated packet arrived.
    pub fn last_heard(&self) -> Option<u64> {
        self.last_heard
    }

    /// Smoothed RTT in milliseconds, once measured.
    pub fn srtt(&self) -> Option<f64> {
        self.rtt.estimate().map(|e| e.smoothed)
    }

    /// Adaptive send interval: half the smoothed RTT, aiming for two
    /// state frames in flight per round trip, held to the protocol
    /// bounds. Before any measurement, the floor.
    pub fn send_interval(&self) -> u64 {
        match self.rtt.estimate() {
            Some(e) => ((e.smoothed / 2.0).ceil() as u64).clamp(SEND_INTERVAL_MIN, SEND_INTERVAL_MAX),
            None => SEND_INTERVAL_MIN,
        }
    }

    /// Traffic counters.
    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    #[cfg(test)]
    pub(crate) fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SESSION_KEY_LEN;

    fn pair() -> (Connection, Connection) {
        let server = Connection::server("127.0.0.1:0").unwrap();
        let key = SessionKey::from_base64(&server.key()).unwrap();
        let addr = ("127.0.0.1", server.port().unwrap());
        let client = Connection::client(addr, key).unwrap();
        (server, client)
    }

    fn recv_spin(conn: &mut Connection) -> Option<Vec<u8>> {
        for _ in 0..50 {
            if let Some(payload) = conn.recv().unwrap() {
                return Some(payload);
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        None
    }

    #[test]
    fn payload_crosses_loopback() {
        let (mut server, mut client) = pair();
        client.send(b"hello server").unwrap();
        assert_eq!(recv_spin(&mut server).unwrap(), b"hello server");
        assert!(server.attached());

        server.send(b"hello client").unwrap();
        assert_eq!(recv_spin(&mut client).unwrap(), b"hello client");
    }

    #[test]
    fn server_cannot_send_before_attach() {
        let (mut server, _client) = pair();
        assert!(matches!(server.send(b"x"), Err(Error::NotAttached)));
    }

    #[test]
    fn wrong_key_is_dropped_silently() {
        let (mut server, _client) = pair();
        let imposter_key = SessionKey::from_bytes([0xEE; SESSION_KEY_LEN]);
        let addr = ("127.0.0.1", server.port().unwrap());
        let mut imposter = Connection::client(addr, imposter_key).unwrap();
        imposter.send(b"let me in").unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(server.recv().unwrap().is_none());
        assert!(!server.attached());
    }

    #[test]
    fn own_direction_packets_are_dropped() {
        // A reflected packet (our own direction bit) must not decrypt
        // into an accepted payload on our side.
        let (server, mut client) = pair();
        let key = SessionKey::from_base64(&server.key()).unwrap();
        let addr = ("127.0.0.1", server.port().unwrap());
        let mut second_client = Connection::client(addr, key).unwrap();

        // Aim one client at the other.
        second_client.remote_addr = Some(
            ("127.0.0.1", client.port().unwrap())
                .to_socket_addrs()
                .unwrap()
                .next()
                .unwrap(),
        );
        second_client.send(b"reflected").unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(client.recv().unwrap().is_none());
    }

    #[test]
    fn roaming_adopts_new_authenticated_source() {
        let (mut server, mut client) = pair();
        client.send(b"first home").unwrap();
        recv_spin(&mut server).unwrap();
        let first_addr = server.remote_addr().unwrap();

        // The client pops up from a different source port (same key,
        // nonces keep counting).
        let key = SessionKey::from_base64(&server.key()).unwrap();
        let addr = ("127.0.0.1", server.port().unwrap());
        let mut roamed = Connection::client(addr, key).unwrap();
        // Skip past the original client's nonces to avoid reuse.
        for _ in 0..100 {
            roamed.nonces.next();
        }
        roamed.send(b"new home").unwrap();
        recv_spin(&mut server).unwrap();

        let second_addr = server.remote_addr().unwrap();
        assert_ne!(first_addr, second_addr);

        // Replies now go to the new address.
        server.send(b"follow me").unwrap();
        assert_eq!(recv_spin(&mut roamed).unwrap(), b"follow me");
    }

    #[test]
    fn rtt_measured_from_timestamp_echo() {
        let (mut server, mut client) = pair();
        client.send(b"ping").unwrap();
        recv_spin(&mut server).unwrap();
        server.send(b"pong").unwrap();
        recv_spin(&mut client).unwrap();

        // Client saw its own timestamp echoed back.
        assert!(client.srtt().is_some());
        assert!(client.srtt().unwrap() < 1000.0);
    }

    #[test]
    fn send_interval_is_half_srtt_within_bounds() {
        let (_server, mut client) = pair();
        assert_eq!(client.send_interval(), SEND_INTERVAL_MIN);

        client.rtt.observe(100.0);
        assert_eq!(client.send_interval(), 50);

        client.rtt.observe(1.0);
        assert!(client.send_interval() >= SEND_INTERVAL_MIN);

        let (_server2, mut slow) = pair();
        slow.rtt.observe(4000.0);
        assert_eq!(slow.send_interval(), SEND_INTERVAL_MAX);
    }

    #[test]
    fn stats_count_traffic() {
        let (mut server, mut client) = pair();
        client.send(b"counted").unwrap();
        recv_spin(&mut server).unwrap();

        assert_eq!(client.stats().datagrams_sent, 1);
        assert_eq!(server.stats().datagrams_received, 1);
        assert!(server.stats().bytes_received > 0);
    }
}
