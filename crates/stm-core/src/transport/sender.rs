//! Sender half of the state-synchronization engine.
//!
//! The sender keeps a short history of recent states. Index 0 is
//! always the newest state the remote has acknowledged (the diff
//! base); the last element tracks `current_state`. Every data send
//! offers the diff from that base to the current state, so a lost
//! datagram costs nothing but time: the next send re-offers the same
//! transition until an ack moves the base forward.

use std::collections::VecDeque;

use rand::Rng;
use tracing::{debug, trace};

use crate::config::TransportConfig;
use crate::constants::{
    ACK_DELAY, ACK_INTERVAL, AEAD_TAG_LEN, CHAFF_MAX_LEN, FRAGMENT_HEADER_LEN, PACKET_HEADER_LEN,
    SHUTDOWN_NUM, SHUTDOWN_RETRIES, WIRE_NONCE_LEN,
};
use crate::error::Result;
use crate::protocol::Instruction;
use crate::sync::{SyncState, TimestampedState};
use crate::timing::timestamp;

use super::connection::Connection;
use super::fragment::Fragmenter;

/// Progress of the local shutdown handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownState {
    None,
    Requested,
    Acked,
}

/// One side's state-shipping engine.
#[derive(Debug)]
pub struct TransportSender<S: SyncState> {
    current_state: S,
    /// Non-empty; strictly increasing `num`; front is the acked diff base.
    sent_states: VecDeque<TimestampedState<S>>,
    fragmenter: Fragmenter,
    config: TransportConfig,

    next_send_time: u64,
    next_ack_time: u64,
    send_interval: u64,

    /// Newest peer state we have received; echoed in every packet.
    ack_num: u64,
    /// Received data is waiting for a prompt ack.
    pending_data_ack: bool,
    sent_state_acked: u64,

    shutdown: ShutdownState,
    shutdown_tries: u32,
    counterparty_shutdown: bool,
    counterparty_shutdown_ack_sent: bool,
}

impl<S: SyncState> TransportSender<S> {
    /// Start from an initial state both sides agree on (state number 0).
    pub fn new(initial_state: S, config: TransportConfig) -> Self {
        let now = timestamp();
        let mut sent_states = VecDeque::new();
        sent_states.push_back(TimestampedState::new(now, 0, initial_state.clone()));
        Self {
            current_state: initial_state,
            sent_states,
            fragmenter: Fragmenter::new(),
            send_interval: config.send_min_interval,
            config,
            next_send_time: now,
            next_ack_time: now + ACK_INTERVAL,
            ack_num: 0,
            pending_data_ack: false,
            sent_state_acked: 0,
            shutdown: ShutdownState::None,
            shutdown_tries: 0,
            counterparty_shutdown: false,
            counterparty_shutdown_ack_sent: false,
        }
    }

    /// The state we are converging the remote toward.
    pub fn get_current_state(&self) -> &S {
        &self.current_state
    }

    /// Replace the state to converge toward.
    ///
    /// Illegal after `start_shutdown`; a defensive no-op in release
    /// builds, an assertion failure in debug builds.
    pub fn set_current_state(&mut self, state: S) {
        debug_assert!(
            self.shutdown == ShutdownState::None,
            "set_current_state after start_shutdown"
        );
        if self.shutdown != ShutdownState::None {
            return;
        }
        self.current_state = state;
        self.current_state
            .subtract(&self.sent_states.front().expect("history non-empty").state);
    }

    /// Send data or an ack if one is due.
    pub fn tick(&mut self, connection: &mut Connection) -> Result<()> {
        self.send_interval = connection
            .send_interval()
            .clamp(self.config.send_min_interval, self.config.send_max_interval);

        if !connection.peer_known() {
            return Ok(());
        }

        let now = timestamp();
        if self.pending_data_ack && self.next_ack_time > now + ACK_DELAY {
            self.next_ack_time = now + ACK_DELAY;
        }

        let data_due = self.data_pending();
        if !data_due && now < self.next_ack_time {
            return Ok(());
        }

        if data_due && now >= self.next_send_time {
            self.send_to_receiver(connection)
        } else if now >= self.next_ack_time {
            self.send_empty_ack(connection)
        } else {
            Ok(())
        }
    }

    /// Milliseconds until the next scheduled send or ack.
    pub fn wait_time(&self) -> u64 {
        let now = timestamp();
        let mut ack_time = self.next_ack_time;
        if self.pending_data_ack {
            ack_time = ack_time.min(now + ACK_DELAY);
        }
        let mut next = ack_time;
        if self.data_pending() {
            next = next.min(self.next_send_time);
        }
        next.saturating_sub(now)
    }

    /// Whether there is an unacknowledged transition to offer.
    fn data_pending(&self) -> bool {
        match self.shutdown {
            ShutdownState::Requested => !self.shutdown_ack_timed_out(),
            ShutdownState::Acked => false,
            ShutdownState::None => {
                self.current_state != self.sent_states.front().expect("history non-empty").state
            }
        }
    }

    fn send_to_receiver(&mut self, connection: &mut Connection) -> Result<()> {
        let now = timestamp();

        let back = self.sent_states.back().expect("history non-empty");
        let new_num = if self.shutdown != ShutdownState::None {
            SHUTDOWN_NUM
        } else if self.current_state == back.state {
            back.num
        } else {
            back.num + 1
        };

        let diff = if self.shutdown != ShutdownState::None {
            Vec::new()
        } else {
            let base = self.sent_states.front().expect("history non-empty");
            self.current_state.diff_from(&base.state)
        };

        if new_num == self.sent_states.back().expect("history non-empty").num {
            self.sent_states.back_mut().expect("history non-empty").timestamp = now;
        } else {
            self.sent_states
                .push_back(TimestampedState::new(now, new_num, self.current_state.clone()));
        }

        self.send_in_fragments(connection, diff, new_num)?;

        if self.shutdown == ShutdownState::Requested {
            self.shutdown_tries += 1;
        }

        self.next_ack_time = now + ACK_INTERVAL;
        self.next_send_time = now + self.send_interval + self.config.send_delay;
        self.pending_data_ack = false;
        Ok(())
    }

    fn send_empty_ack(&mut self, connection: &mut Connection) -> Result<()> {
        let now = timestamp();
        let back_num = self.sent_states.back().expect("history non-empty").num;

        // Empty acks still mint a fresh state number. The receiver
        // records the (unchanged) contents under the new number, which
        // keeps both sides' histories naming identical contents.
        let new_num = if self.shutdown != ShutdownState::None {
            SHUTDOWN_NUM
        } else {
            back_num + 1
        };
        if new_num == back_num {
            self.sent_states.back_mut().expect("history non-empty").timestamp = now;
        } else {
            self.sent_states
                .push_back(TimestampedState::new(now, new_num, self.current_state.clone()));
        }

        self.send_in_fragments(connection, Vec::new(), new_num)?;

        self.next_ack_time = now + ACK_INTERVAL;
        self.pending_data_ack = false;
        Ok(())
    }

    fn send_in_fragments(
        &mut self,
        connection: &mut Connection,
        diff: Vec<u8>,
        new_num: u64,
    ) -> Result<()> {
        let base_num = self.sent_states.front().expect("history non-empty").num;
        let inst = Instruction {
            old_num: base_num,
            new_num,
            ack_num: self.ack_num,
            throwaway_num: base_num,
            diff,
        };

        let payload = inst.encode(&make_chaff());
        let max_body = self
            .config
            .mtu
            .saturating_sub(WIRE_NONCE_LEN + AEAD_TAG_LEN + PACKET_HEADER_LEN + FRAGMENT_HEADER_LEN)
            .max(1);

        let fragments = self.fragmenter.fragment(&payload, max_body);
        if self.config.verbose {
            debug!(
                target: "stm_core::sender",
                old_num = inst.old_num,
                new_num = inst.new_num,
                ack_num = inst.ack_num,
                diff_len = inst.diff.len(),
                fragments = fragments.len(),
                "send"
            );
        }
        for frag in fragments {
            connection.send(&frag.to_bytes())?;
        }

        if self.counterparty_shutdown && self.ack_num == SHUTDOWN_NUM {
            self.counterparty_shutdown_ack_sent = true;
        }
        Ok(())
    }

    /// The peer acknowledged everything through `ack_num`: advance the
    /// diff base and let go of older history.
    pub fn process_acknowledgment_through(&mut self, ack_num: u64) {
        if self.shutdown == ShutdownState::Requested && ack_num == SHUTDOWN_NUM {
            self.shutdown = ShutdownState::Acked;
        }

        let Some(pos) = self.sent_states.iter().position(|s| s.num == ack_num) else {
            return;
        };
        if pos == 0 {
            return; // duplicate ack
        }
        self.sent_state_acked = ack_num;
        self.sent_states.drain(..pos);
        self.rationalize_states();
        trace!(target: "stm_core::sender", ack_num, history = self.sent_states.len(), "acked");
    }

    /// Cut the acked base out of every held encoding.
    fn rationalize_states(&mut self) {
        let prefix = self.sent_states.front().expect("history non-empty").state.clone();
        self.current_state.subtract(&prefix);
        for held in self.sent_states.iter_mut() {
            held.state.subtract(&prefix);
        }
    }

    /// Record the newest peer state to acknowledge.
    pub fn set_ack_num(&mut self, num: u64) {
        self.ack_num = self.ack_num.max(num);
    }

    /// Received data wants a prompt (not idle-interval) ack.
    pub fn set_data_ack_pending(&mut self) {
        self.pending_data_ack = true;
    }

    /// The peer announced shutdown; mirror it in our acks.
    pub fn note_counterparty_shutdown(&mut self) {
        self.counterparty_shutdown = true;
        self.ack_num = SHUTDOWN_NUM;
        self.pending_data_ack = true;
    }

    /// Begin the shutdown handshake. Idempotent.
    pub fn start_shutdown(&mut self) {
        if self.shutdown == ShutdownState::None {
            self.shutdown = ShutdownState::Requested;
            self.shutdown_tries = 0;
            // Ship the offer as soon as pacing allows.
            self.next_send_time = timestamp();
        }
    }

    /// Whether `start_shutdown` has been called.
    pub fn shutdown_in_progress(&self) -> bool {
        self.shutdown != ShutdownState::None
    }

    /// Whether the peer has acknowledged our shutdown.
    pub fn shutdown_acknowledged(&self) -> bool {
        self.shutdown == ShutdownState::Acked
    }

    /// Whether the bounded shutdown retries ran out without an ack.
    pub fn shutdown_ack_timed_out(&self) -> bool {
        self.shutdown == ShutdownState::Requested && self.shutdown_tries >= SHUTDOWN_RETRIES
    }

    /// Whether the peer requested shutdown.
    pub fn counterparty_shutdown(&self) -> bool {
        self.counterparty_shutdown
    }

    /// Whether we have sent at least one ack mirroring the peer's shutdown.
    pub fn counterparty_shutdown_ack_sent(&self) -> bool {
        self.counterparty_shutdown_ack_sent
    }

    /// Newest of our states the peer has acknowledged.
    pub fn get_sent_state_acked(&self) -> u64 {
        self.sent_state_acked
    }

    /// Newest state number we have offered.
    pub fn get_sent_state_last(&self) -> u64 {
        self.sent_states.back().expect("history non-empty").num
    }

    /// Current pacing interval in milliseconds.
    pub fn send_interval(&self) -> u64 {
        self.send_interval
    }

    /// Extra artificial delay before data sends.
    pub fn set_send_delay(&mut self, delay_ms: u64) {
        self.config.send_delay = delay_ms;
    }

    /// Enable per-packet tracing.
    pub fn set_verbose(&mut self) {
        self.config.verbose = true;
    }
}

/// Random padding to mask payload sizes from traffic analysis.
fn make_chaff() -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let len = rng.gen_range(0..=CHAFF_MAX_LEN);
    let mut chaff = vec![0u8; len];
    rng.fill(&mut chaff[..]);
    chaff
}
