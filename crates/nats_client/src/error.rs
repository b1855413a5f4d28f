//! Error types for the message channel.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Broker unreachable after every dial attempt.
    #[error("Connection failed after {attempts} attempt(s): {message}")]
    Connection { attempts: u32, message: String },

    /// Stream or consumer declaration failed.
    #[error("Topology error: {0}")]
    Topology(String),

    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Ack error: {0}")]
    Ack(String),

    #[error("Receive error: {0}")]
    Receive(String),

    /// Operation called before the channel reached the required state.
    #[error("Channel not ready: {0}")]
    NotReady(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
