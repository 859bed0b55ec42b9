use std::io;

use courier_codec::{PacketMalformedError, SendError};
use thiserror::Error;

use crate::{address::Address, client::ClientState, server::ServerState};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind { address: Address, source: io::Error },
    #[error("server in state {0:?} cannot be operated")]
    InvalidState(ServerState),
    #[error("no active connection for peer {0}")]
    UnknownPeer(Address),
    #[error(transparent)]
    Malformed(#[from] PacketMalformedError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("client in state {0:?} is not connected")]
    NotConnected(ClientState),
    #[error(transparent)]
    Malformed(#[from] PacketMalformedError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("request {0:?} is already subscribed")]
    AlreadySubscribed(String),
    #[error("request {0:?} is not subscribed")]
    NotSubscribed(String),
    #[error("handler does not match the one subscribed for {0:?}")]
    HandlerMismatch(String),
}

impl From<SendError> for ServerError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Malformed(err) => Self::Malformed(err),
            SendError::Io(err) => Self::Io(err),
        }
    }
}

impl From<SendError> for ClientError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Malformed(err) => Self::Malformed(err),
            SendError::Io(err) => Self::Io(err),
        }
    }
}
