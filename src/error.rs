use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error, aggregating the module error types.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    HostportModule(#[from] crate::hostport::error::HostportError),

    #[error(transparent)]
    IptablesModule(#[from] crate::iptables::error::IptablesError),
}
