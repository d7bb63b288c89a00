use thiserror::Error;

/// Result type for receiver operations
pub type Result<T> = std::result::Result<T, AvrError>;

/// Errors that can occur when talking to a receiver
#[derive(Error, Debug)]
pub enum AvrError {
    /// I/O error on the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation requires a live connection
    #[error("not connected")]
    NotConnected,

    /// The target was shut down while the operation was in flight
    #[error("connection closed")]
    ConnectionClosed,

    /// A wait exceeded its deadline
    #[error("timeout")]
    Timeout,

    /// No shared variable with this id exists on the target
    #[error("unknown shared variable: {0}")]
    UnknownVar(String),

    /// Inbound wire data could not be decoded for a variable
    #[error("decode error for `{id}`: {payload:?}")]
    Decode {
        /// Variable id that claimed the data
        id: String,
        /// The raw payload that failed to decode
        payload: String,
    },

    /// A value of the wrong type was passed to `set`/`remote_set`
    #[error("value for `{id}` is not of type {expected}: {got}")]
    TypeMismatch {
        /// Variable id
        id: String,
        /// Expected type name
        expected: &'static str,
        /// Debug rendering of the offending value
        got: String,
    },

    /// Value outside the variable's declared range or options
    #[error("value for `{id}` out of domain: {detail}")]
    Domain {
        /// Variable id
        id: String,
        /// What was violated
        detail: String,
    },

    /// `remote_set` on a variable that cannot be written from this role
    #[error("`{0}` cannot be set remotely")]
    ReadOnly(String),

    /// Malformed `scheme://host:port` target address
    #[error("invalid target URI: {0}")]
    InvalidUri(String),

    /// No scheme implementation registered under this name
    #[error("unknown scheme: {0}")]
    UnknownScheme(String),
}
