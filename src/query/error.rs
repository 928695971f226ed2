use thiserror::Error;

use crate::client::transport::TransportError;
use crate::codec::CodecError;

/// Why a query produced no data. Cloned to every caller sharing the fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}
