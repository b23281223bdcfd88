pub mod logging;

pub use tracing;

/// Process-wide control signals broadcast to long running tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Stop producing new work and wind down
    Shutdown,
}
