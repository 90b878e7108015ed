//! The state-synchronization transport.
//!
//! A [`Transport`] pairs a [`TransportSender`] for our own state with a
//! receive buffer for the remote's, over one encrypted roaming
//! [`Connection`]. Each endpoint converges the other: we ship diffs of
//! `MyState`, they ship diffs of `RemoteState`, and acknowledgment
//! numbers ride along in both directions.

mod connection;
mod fragment;
mod sender;

pub use connection::{Connection, ConnectionStats};
pub use fragment::{Fragment, FragmentAssembly, Fragmenter};
pub use sender::TransportSender;

use std::net::ToSocketAddrs;
use std::os::fd::RawFd;

use tracing::{debug, trace};

use crate::config::TransportConfig;
use crate::constants::SHUTDOWN_NUM;
use crate::crypto::SessionKey;
use crate::error::Result;
use crate::protocol::Instruction;
use crate::sync::{SyncState, TimestampedState};
use crate::timing::timestamp;

/// A two-way state-synchronization endpoint.
pub struct Transport<MyState: SyncState, RemoteState: SyncState> {
    connection: Connection,
    sender: TransportSender<MyState>,

    /// Remote states we hold as diff bases; non-empty, ascending `num`.
    received_states: Vec<TimestampedState<RemoteState>>,
    /// The remote state the user last observed via `get_remote_diff`.
    last_receiver_state: RemoteState,
    fragments: FragmentAssembly,
    /// The remote's latest view of our acks, straight off the wire.
    sent_state_late_acked: u64,
    verbose: bool,
}

impl<MyState: SyncState, RemoteState: SyncState> Transport<MyState, RemoteState> {
    /// Server side: bind, mint a key, and wait for the client.
    pub fn server(
        initial_state: MyState,
        initial_remote: RemoteState,
        bind_addr: impl ToSocketAddrs,
        config: TransportConfig,
    ) -> Result<Self> {
        let connection = Connection::server(bind_addr)?;
        Ok(Self::with_connection(initial_state, initial_remote, connection, config))
    }

    /// Client side: dial the server with the bootstrap key.
    pub fn client(
        initial_state: MyState,
        initial_remote: RemoteState,
        server_addr: impl ToSocketAddrs,
        key: &str,
        config: TransportConfig,
    ) -> Result<Self> {
        let key = SessionKey::from_base64(key)?;
        let connection = Connection::client(server_addr, key)?;
        Ok(Self::with_connection(initial_state, initial_remote, connection, config))
    }

    fn with_connection(
        initial_state: MyState,
        initial_remote: RemoteState,
        connection: Connection,
        config: TransportConfig,
    ) -> Self {
        let verbose = config.verbose;
        Self {
            connection,
            received_states: vec![TimestampedState::new(timestamp(), 0, initial_remote.clone())],
            last_receiver_state: initial_remote,
            fragments: FragmentAssembly::new(),
            sent_state_late_acked: 0,
            sender: TransportSender::new(initial_state, config),
            verbose,
        }
    }

    /// Send data or an ack if one is due.
    pub fn tick(&mut self) -> Result<()> {
        self.sender.tick(&mut self.connection)
    }

    /// Milliseconds until the next scheduled transport event.
    pub fn wait_time(&self) -> u64 {
        self.sender.wait_time()
    }

    /// Drain and process every datagram waiting on the socket.
    pub fn recv(&mut self) -> Result<()> {
        while let Some(payload) = self.connection.recv()? {
            let Ok(frag) = Fragment::from_bytes(&payload) else {
                continue; // malformed: drop silently
            };
            if let Some(encoded) = self.fragments.add_fragment(frag) {
                match Instruction::decode(&encoded) {
                    Ok(inst) => self.process_instruction(inst),
                    Err(e) => {
                        trace!(target: "stm_core::transport", error = %e, "undecodable instruction dropped");
                    }
                }
            }
        }
        Ok(())
    }

    fn process_instruction(&mut self, inst: Instruction) {
        let now = timestamp();

        // Acks ride on every packet, including duplicates.
        self.sender.process_acknowledgment_through(inst.ack_num);
        self.sent_state_late_acked = inst.ack_num;

        if self.verbose {
            debug!(
                target: "stm_core::transport",
                old_num = inst.old_num,
                new_num = inst.new_num,
                ack_num = inst.ack_num,
                diff_len = inst.diff.len(),
                "recv"
            );
        }

        if inst.new_num == SHUTDOWN_NUM {
            self.sender.note_counterparty_shutdown();
            return;
        }

        // Already have this state or a newer one: duplicate or stale.
        let latest = self.latest_received().num;
        if inst.new_num <= latest {
            return;
        }

        // A diff against a state we no longer (or never) hold cannot be
        // applied; the sender will re-base once our acks reach it.
        let Some(base) = self.received_states.iter().find(|s| s.num == inst.old_num) else {
            trace!(
                target: "stm_core::transport",
                old_num = inst.old_num,
                "diff against unknown state dropped"
            );
            return;
        };

        let new_state = match base.state.apply_diff(&inst.diff) {
            Ok(state) => state,
            Err(e) => {
                trace!(target: "stm_core::transport", error = %e, "unappliable diff dropped");
                return;
            }
        };

        self.process_throwaway_until(inst.throwaway_num);
        self.received_states
            .push(TimestampedState::new(now, inst.new_num, new_state));
        self.sender.set_ack_num(inst.new_num);
        self.sender.set_data_ack_pending();
    }

    /// Discard received states the sender will never diff from again.
    fn process_throwaway_until(&mut self, throwaway_num: u64) {
        while self.received_states.len() > 1 && self.received_states[0].num < throwaway_num {
            self.received_states.remove(0);
        }
    }

    fn latest_received(&self) -> &TimestampedState<RemoteState> {
        self.received_states.last().expect("receive buffer non-empty")
    }

    /// Diff between the remote state the user last saw and the newest
    /// one we hold; advances the observation point.
    pub fn get_remote_diff(&mut self) -> Vec<u8> {
        let diff = self
            .latest_received()
            .state
            .diff_from(&self.last_receiver_state);

        // Cut the oldest held state out of every newer encoding.
        let oldest = self.received_states[0].state.clone();
        for held in self.received_states.iter_mut().rev() {
            held.state.subtract(&oldest);
        }
        self.last_receiver_state = self.received_states[self.received_states.len() - 1]
            .state
            .clone();
        diff
    }

    // -- shutdown surface ---------------------------------------------------

    /// Begin the shutdown handshake. Changing the current state after
    /// this is illegal.
    pub fn start_shutdown(&mut self) {
        self.sender.start_shutdown();
    }

    /// Whether `start_shutdown` has been called locally.
    pub fn shutdown_in_progress(&self) -> bool {
        self.sender.shutdown_in_progress()
    }

    /// Whether the peer acknowledged our shutdown.
    pub fn shutdown_acknowledged(&self) -> bool {
        self.sender.shutdown_acknowledged()
    }

    /// Whether shutdown retries ran out without an acknowledgment.
    pub fn shutdown_ack_timed_out(&self) -> bool {
        self.sender.shutdown_ack_timed_out()
    }

    /// Whether the peer has requested shutdown and we have mirrored it.
    pub fn counterparty_shutdown_ack_sent(&self) -> bool {
        self.sender.counterparty_shutdown_ack_sent()
    }

    // -- connection surface -------------------------------------------------

    /// Whether an authenticated packet has arrived from the peer.
    pub fn attached(&self) -> bool {
        self.connection.attached()
    }

    /// Socket file descriptor for the host poll loop.
    pub fn fd(&self) -> RawFd {
        self.connection.fd()
    }

    /// Local UDP port.
    pub fn port(&self) -> Result<u16> {
        self.connection.port()
    }

    /// Session key as base64 for the bootstrap channel.
    pub fn get_key(&self) -> String {
        self.connection.key()
    }

    /// Local clock (ms) when the peer was last heard.
    pub fn last_heard(&self) -> Option<u64> {
        self.connection.last_heard()
    }

    /// Smoothed RTT in milliseconds, once measured.
    pub fn srtt(&self) -> Option<f64> {
        self.connection.srtt()
    }

    /// Traffic counters.
    pub fn stats(&self) -> ConnectionStats {
        self.connection.stats()
    }

    // -- state surface ------------------------------------------------------

    /// The local state being shipped to the peer.
    pub fn get_current_state(&self) -> &MyState {
        self.sender.get_current_state()
    }

    /// Replace the local state to ship. Illegal after `start_shutdown`.
    pub fn set_current_state(&mut self, state: MyState) {
        self.sender.set_current_state(state);
    }

    /// Number of the newest remote state received.
    pub fn get_remote_state_num(&self) -> u64 {
        self.latest_received().num
    }

    /// The newest remote state received, with its arrival bookkeeping.
    pub fn get_latest_remote_state(&self) -> &TimestampedState<RemoteState> {
        self.latest_received()
    }

    /// Newest of our states the peer acknowledged (via our sender).
    pub fn get_sent_state_acked(&self) -> u64 {
        self.sender.get_sent_state_acked()
    }

    /// Newest state number we have offered the peer.
    pub fn get_sent_state_last(&self) -> u64 {
        self.sender.get_sent_state_last()
    }

    /// The ack number on the most recent packet from the peer.
    pub fn get_sent_state_late_acked(&self) -> u64 {
        self.sent_state_late_acked
    }

    /// Current pacing interval in milliseconds.
    pub fn send_interval(&self) -> u64 {
        self.sender.send_interval()
    }

    /// Extra artificial delay before data sends, for long-link testing.
    pub fn set_send_delay(&mut self, delay_ms: u64) {
        self.sender.set_send_delay(delay_ms);
    }

    /// Enable per-packet tracing on both halves.
    pub fn set_verbose(&mut self) {
        self.verbose = true;
        self.sender.set_verbose();
    }
}
