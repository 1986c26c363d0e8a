//! Socket server error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SocketError>;

#[derive(Error, Debug)]
pub enum SocketError {
    #[error("a route for {0} already exists")]
    DuplicateRoute(String),

    #[error("an event listener for {0} already exists")]
    DuplicateEvent(String),

    #[error("invalid prefix {0:?}")]
    InvalidPrefix(String),

    #[error("server is already listening")]
    AlreadyListening,

    #[error("server is not listening")]
    NotListening,

    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] basalt_transport::TransportError),
}
