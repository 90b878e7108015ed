//! End-to-end state synchronization over loopback UDP.

use std::thread::sleep;
use std::time::{Duration, Instant};

use stm_core::config::TransportConfig;
use stm_core::error::Result;
use stm_core::sync::SyncState;
use stm_core::transport::Transport;

/// Whole-document state: the diff is simply the new contents. Keeps
/// equality assertions exact regardless of ack timing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Doc(String);

impl Doc {
    fn new(text: &str) -> Self {
        Doc(text.to_string())
    }
}

impl SyncState for Doc {
    fn diff_from(&self, old: &Self) -> Vec<u8> {
        if self == old {
            return Vec::new();
        }
        self.0.as_bytes().to_vec()
    }

    fn apply_diff(&self, diff: &[u8]) -> Result<Self> {
        if diff.is_empty() {
            return Ok(self.clone());
        }
        Ok(Doc(String::from_utf8_lossy(diff).into_owned()))
    }

    fn blank() -> Self {
        Doc::default()
    }
}

fn pair() -> (Transport<Doc, Doc>, Transport<Doc, Doc>) {
    let server = Transport::server(
        Doc::blank(),
        Doc::blank(),
        "127.0.0.1:0",
        TransportConfig::default(),
    )
    .unwrap();
    let key = server.get_key();
    let port = server.port().unwrap();
    let client = Transport::client(
        Doc::blank(),
        Doc::blank(),
        ("127.0.0.1", port),
        &key,
        TransportConfig::default(),
    )
    .unwrap();
    (server, client)
}

/// Drive both endpoints until `done` returns true or the deadline hits.
fn pump(
    server: &mut Transport<Doc, Doc>,
    client: &mut Transport<Doc, Doc>,
    deadline: Duration,
    mut done: impl FnMut(&Transport<Doc, Doc>, &Transport<Doc, Doc>) -> bool,
) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        client.tick().unwrap();
        server.recv().unwrap();
        server.tick().unwrap();
        client.recv().unwrap();
        if done(server, client) {
            return true;
        }
        sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn client_state_reaches_server() {
    let (mut server, mut client) = pair();
    client.set_current_state(Doc::new("echo hello"));

    let converged = pump(&mut server, &mut client, Duration::from_secs(5), |s, _| {
        s.get_latest_remote_state().state == Doc::new("echo hello")
    });
    assert!(converged, "server never saw the client's state");
    assert!(server.attached());
    assert!(client.attached());
}

#[test]
fn acks_flow_back_and_prune_history() {
    let (mut server, mut client) = pair();
    client.set_current_state(Doc::new("x"));

    let acked = pump(&mut server, &mut client, Duration::from_secs(5), |_, c| {
        c.get_sent_state_acked() >= 1
    });
    assert!(acked, "client never saw an acknowledgment");
    assert_eq!(client.get_sent_state_acked(), client.get_sent_state_last());
}

#[test]
fn remote_state_num_is_monotonic_across_updates() {
    let (mut server, mut client) = pair();

    let mut last_seen = 0;
    for text in ["a", "ab", "abc"] {
        client.set_current_state(Doc::new(text));
        let converged = pump(&mut server, &mut client, Duration::from_secs(5), |s, _| {
            s.get_latest_remote_state().state == Doc::new(text)
        });
        assert!(converged, "server never saw {:?}", text);

        let num = server.get_remote_state_num();
        assert!(num > last_seen, "remote state num regressed");
        last_seen = num;
    }
}

#[test]
fn remote_diff_surfaces_updates_once() {
    let (mut server, mut client) = pair();
    client.set_current_state(Doc::new("payload"));

    assert!(pump(&mut server, &mut client, Duration::from_secs(5), |s, _| {
        s.get_remote_state_num() >= 1
    }));

    let diff = server.get_remote_diff();
    assert_eq!(diff, b"payload");
    assert!(server.get_remote_diff().is_empty());
}

#[test]
fn both_directions_converge() {
    let (mut server, mut client) = pair();
    client.set_current_state(Doc::new("typed input"));
    server.set_current_state(Doc::new("terminal output"));

    let converged = pump(&mut server, &mut client, Duration::from_secs(5), |s, c| {
        s.get_latest_remote_state().state == Doc::new("typed input")
            && c.get_latest_remote_state().state == Doc::new("terminal output")
    });
    assert!(converged, "endpoints never converged both ways");
}

#[test]
fn shutdown_handshake_completes() {
    let (mut server, mut client) = pair();
    client.set_current_state(Doc::new("before shutdown"));
    assert!(pump(&mut server, &mut client, Duration::from_secs(5), |_, c| {
        c.get_sent_state_acked() >= 1
    }));

    client.start_shutdown();
    assert!(client.shutdown_in_progress());

    let done = pump(&mut server, &mut client, Duration::from_secs(5), |s, c| {
        c.shutdown_acknowledged() && s.counterparty_shutdown_ack_sent()
    });
    assert!(done, "shutdown handshake never completed");
    assert!(!client.shutdown_ack_timed_out());
}

#[test]
fn shutdown_times_out_against_a_dead_peer() {
    let (server, mut client) = pair();
    // The server never answers.
    drop(server);

    client.set_current_state(Doc::new("into the void"));
    client.start_shutdown();

    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(10) {
        client.tick().unwrap();
        client.recv().unwrap();
        if client.shutdown_ack_timed_out() {
            break;
        }
        sleep(Duration::from_millis(5));
    }
    assert!(client.shutdown_ack_timed_out());
    assert!(!client.shutdown_acknowledged());
}
