use jsonrpsee::types::{error::CALL_EXECUTION_FAILED_CODE, ErrorObjectOwned};
use ractor::SpawnErr;
use serde::Serialize;
use strum::AsRefStr;
use thiserror::Error;

use crate::channel::{Channel, ChannelState};
use crate::primitives::Hash256;

#[derive(Error, Debug, AsRefStr)]
pub enum Error {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),
    #[error("Stale nonce, channel {} is already at nonce {}", .snapshot.id, .snapshot.nonce)]
    StaleNonce { snapshot: Box<Channel> },
    #[error("Invalid balance delta: {reason}")]
    InvalidBalanceDelta {
        reason: String,
        snapshot: Box<Channel>,
    },
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("External service error: {0}")]
    ExternalServiceError(String),
    #[error("Dispute window for channel {channel_id} closed at height {deadline}, current height is {height}")]
    DisputeWindowExpired {
        channel_id: Hash256,
        deadline: u64,
        height: u64,
    },
    #[error("Conditional update on channel {channel_id} for lock {secret_hash} expired: {reason}")]
    ConditionalUpdateExpired {
        channel_id: Hash256,
        secret_hash: Hash256,
        reason: String,
    },
    #[error("Unauthorized event delivery")]
    Unauthorized,
    #[error("InvalidParameter: {0}")]
    InvalidParameter(String),
    #[error("Channel {channel_id} is {state:?}, which does not accept this operation")]
    InvalidChannelState {
        channel_id: Hash256,
        state: ChannelState,
    },
    #[error("Channel {0} has a conditional update in flight")]
    ConditionalUpdateInFlight(Hash256),
    #[error("Secret does not match any pending lock: {0}")]
    SecretMismatch(Hash256),
    #[error("Database error: {0}")]
    DBInternalError(String),
    #[error("Failed to spawn actor: {0}")]
    SpawnErr(#[from] SpawnErr),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable name of the error.
    pub fn kind(&self) -> &str {
        self.as_ref()
    }

    /// The authoritative channel row, for errors that carry one.
    pub fn snapshot(&self) -> Option<&Channel> {
        match self {
            Error::StaleNonce { snapshot } | Error::InvalidBalanceDelta { snapshot, .. } => {
                Some(snapshot)
            }
            _ => None,
        }
    }

    pub fn stale_nonce(channel: &Channel) -> Self {
        Error::StaleNonce {
            snapshot: Box::new(channel.clone()),
        }
    }

    pub fn invalid_delta(channel: &Channel, reason: impl Into<String>) -> Self {
        Error::InvalidBalanceDelta {
            reason: reason.into(),
            snapshot: Box::new(channel.clone()),
        }
    }

    /// Failures worth retrying against an external collaborator.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ExternalServiceError(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::DBInternalError(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::DBInternalError(format!("codec error: {}", err))
    }
}

#[derive(Serialize)]
struct ErrorData<'a> {
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a Channel>,
}

impl From<Error> for ErrorObjectOwned {
    fn from(val: Error) -> Self {
        let data = ErrorData {
            kind: val.kind(),
            channel: val.snapshot(),
        };
        ErrorObjectOwned::owned(CALL_EXECUTION_FAILED_CODE, val.to_string(), Some(data))
    }
}
