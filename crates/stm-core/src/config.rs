//! Transport configuration.

use crate::constants::{DEFAULT_MTU, SEND_INTERVAL_MAX, SEND_INTERVAL_MIN};

/// Tunables for one transport endpoint.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Datagram budget for one fragment, wire overhead included.
    pub mtu: usize,
    /// Floor for the adaptive send interval (ms).
    pub send_min_interval: u64,
    /// Ceiling for the adaptive send interval (ms).
    pub send_max_interval: u64,
    /// Extra delay added before every data send (ms), for exercising
    /// long-latency behavior.
    pub send_delay: u64,
    /// Emit per-packet transport tracing at debug level.
    pub verbose: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            send_min_interval: SEND_INTERVAL_MIN,
            send_max_interval: SEND_INTERVAL_MAX,
            send_delay: 0,
            verbose: false,
        }
    }
}

impl TransportConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the datagram budget.
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the artificial send delay in milliseconds.
    pub fn with_send_delay(mut self, delay_ms: u64) -> Self {
        self.send_delay = delay_ms;
        self
    }

    /// Enable verbose transport tracing.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}
