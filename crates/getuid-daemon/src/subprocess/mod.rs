//! Supervision of the external token source.

pub mod command;
pub mod error;
pub mod generation;
pub mod policy;
pub mod supervisor;

pub use command::CommandSpec;
pub use error::{GenerationExit, RoundTripError, SubprocessError};
pub use generation::Generation;
pub use policy::RestartPolicy;
pub use supervisor::Supervisor;
