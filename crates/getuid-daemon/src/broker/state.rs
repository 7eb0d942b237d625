//! Coalescing state of one broker loop.

use tokio::time::Instant;

/// Last token and when its round trip completed.
///
/// Owned by a single broker loop; never shared.
#[derive(Debug)]
pub struct BrokerState {
    last_token: String,
    last_production: Instant,
    has_produced: bool,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerState {
    pub fn new() -> Self {
        Self {
            last_token: String::new(),
            last_production: Instant::now(),
            has_produced: false,
        }
    }

    /// Whether a request that arrived at `arrival` needs its own round trip.
    ///
    /// A request that arrived before the last round trip completed was
    /// already waiting during it and shares its token.
    pub fn needs_fresh_read(&self, arrival: Instant) -> bool {
        !self.has_produced || arrival > self.last_production
    }

    /// Record a successful round trip completed at `at`.
    pub fn record(&mut self, token: String, at: Instant) {
        self.last_token = token;
        self.last_production = at;
        self.has_produced = true;
    }

    pub fn last_token(&self) -> &str {
        &self.last_token
    }

    pub const fn has_produced(&self) -> bool {
        self.has_produced
    }
}
