//! Receiver error type.

use gnss_core::types::RtkError;

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("caster returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("invalid caster address: {0}")]
    Address(String),

    #[error("mountpoint {0} is not in the sourcetable")]
    UnknownMount(String),

    #[error(transparent)]
    Core(#[from] RtkError),
}

pub type Result<T> = std::result::Result<T, ReceiverError>;
