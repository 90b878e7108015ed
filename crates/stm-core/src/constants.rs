//! Protocol and configuration constants for stm.

// =============================================================================
// Wire Constants
// =============================================================================

/// Datagram budget for one fragment on the wire, header and tag included.
/// Conservative for mobile networks; below the IPv6 minimum link MTU.
pub const DEFAULT_MTU: usize = 1280;

/// Session key length in bytes.
pub const SESSION_KEY_LEN: usize = 32;

/// Wire nonce length (direction bit + 63-bit counter).
pub const WIRE_NONCE_LEN: usize = 8;

/// AEAD authentication tag length.
pub const AEAD_TAG_LEN: usize = 16;

/// Encrypted-payload prefix: direction(1) + timestamp(2) + timestamp_reply(2).
pub const PACKET_HEADER_LEN: usize = 5;

/// Fragment header: fragment_id(2) + index_and_final(2).
pub const FRAGMENT_HEADER_LEN: usize = 4;

/// Sentinel state number carried by shutdown packets.
pub const SHUTDOWN_NUM: u64 = u64::MAX;

// =============================================================================
// Timing Constants
// =============================================================================

/// Minimum interval between data sends (milliseconds).
pub const SEND_INTERVAL_MIN: u64 = 20;

/// Maximum interval between data sends (milliseconds).
pub const SEND_INTERVAL_MAX: u64 = 250;

/// Interval between keepalive acks on an idle connection (milliseconds).
pub const ACK_INTERVAL: u64 = 3000;

/// Maximum delay before acknowledging received data (milliseconds).
pub const ACK_DELAY: u64 = 100;

/// Data sends without a shutdown ack before giving up.
pub const SHUTDOWN_RETRIES: u32 = 16;

// =============================================================================
// Sender Constants
// =============================================================================

/// Upper bound on random chaff appended to each instruction.
pub const CHAFF_MAX_LEN: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervals_are_ordered() {
        assert!(SEND_INTERVAL_MIN < SEND_INTERVAL_MAX);
        assert!(SEND_INTERVAL_MAX < ACK_INTERVAL);
        assert!(ACK_DELAY < ACK_INTERVAL);
    }

    #[test]
    fn fragment_fits_in_mtu() {
        assert!(FRAGMENT_HEADER_LEN + PACKET_HEADER_LEN + WIRE_NONCE_LEN + AEAD_TAG_LEN < DEFAULT_MTU);
    }

    #[test]
    fn session_key_length() {
        assert_eq!(SESSION_KEY_LEN, 32);
    }
}
