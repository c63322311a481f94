use thiserror::Error;

use crate::protocol::ProtocolError;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("cannot open {port_name:?}: {source}")]
    TransportUnavailable {
        port_name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("serial write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
