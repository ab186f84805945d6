use std::collections::TryReserveError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("rendering context unsupported: {0}")]
    Unsupported(String),
    #[error("surface already has a running simulation")]
    AlreadyInitialized,
    #[error("{width}x{height} field exceeds the {max} texel texture limit")]
    TooLarge {
        width: usize,
        height: usize,
        max: usize,
    },
    #[error("failed to allocate {width}x{height} field")]
    Allocation {
        width: usize,
        height: usize,
        #[source]
        source: TryReserveError,
    },
}
