//! The broker's view of a token source generation.

use async_trait::async_trait;

use crate::subprocess::{GenerationExit, RoundTripError};

/// Something that yields one token per round trip and can die.
#[async_trait]
pub trait TokenSource: Send {
    /// Perform one round trip.
    async fn produce(&mut self) -> Result<String, RoundTripError>;

    /// Resolve when the source has exited. Must be cancel safe.
    async fn exited(&mut self) -> GenerationExit;
}
