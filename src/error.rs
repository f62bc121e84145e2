//! Error kinds surfaced by the allocator. `free`/`release` never fail;
//! only the `allocate` family returns `Result`.

use std::error::Error as StdError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("out of host memory (requested {requested} bytes on numa node {node})")]
    OutOfHostMemory { requested: usize, node: usize },

    #[error("memory registration failed")]
    RegistrationFailed(#[source] Box<dyn StdError + Send + Sync>),

    #[cfg(feature = "device")]
    #[error("out of device memory (requested {requested} bytes on device {device})")]
    OutOfDeviceMemory { requested: usize, device: u32 },

    #[error("invalid allocation size: {0}")]
    InvalidSize(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
