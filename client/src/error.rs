use std::time::Duration;

use thiserror::Error;

/// Failure of a single request to the entity API.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("response from {url} could not be decoded: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("invalid request URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Failure of the push channel. Cloned to every subscriber when terminal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream connection failed: {0}")]
    Connect(String),

    #[error("stream endpoint returned HTTP {0}")]
    Status(u16),

    #[error("stream read failed: {0}")]
    Read(String),

    #[error("stream closed by server")]
    Closed,

    #[error("stream reconnect limit reached after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<StreamError> },
}

/// A push message that could not be turned into a domain message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedMessage {
    #[error("unknown message kind `{0}`")]
    UnknownKind(String),

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("payload of {kind} carries no entity id")]
    MissingId { kind: String },
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("visualization surface is not initialized")]
    SurfaceNotInitialized,

    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: &'static str, after: Duration },

    #[error("visualization surface dropped its {0} signal")]
    SignalDropped(&'static str),
}

/// Startup failure of the live map.
#[derive(Debug, Error)]
pub enum MapError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}
