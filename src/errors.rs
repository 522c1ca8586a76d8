use thiserror::Error;

/// Fault that resolves a pending operation unsuccessfully.
///
/// Either the broker reported an error tied to the originating request, or
/// the connection dropped while the request was outstanding.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestFault {
    /// Broker-reported error for a single correlated request.
    #[error("[reqId {req_id}] API error: {code}: {message}")]
    Api {
        req_id: i32,
        code: i32,
        message: String,
    },

    /// Reply arrived but its payload could not be interpreted.
    #[error("malformed reply: {0}")]
    BadReply(String),

    /// The connection dropped before the request completed.
    #[error("socket disconnect")]
    ConnectionClosed,
}

/// Broker-reported error event, broadcast to error subscribers.
///
/// Carries the originating request id (-1 for global events), the numeric
/// error code, the message text and the contract the request was for, when
/// one was registered.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("error {code}, reqId {req_id}: {message}")]
pub struct ApiError {
    pub req_id: i32,
    pub code: i32,
    pub message: String,
    pub contract: Option<crate::types::Contract>,
}

/// Main engine error type.
///
/// These are protocol faults: the inbound message could not be applied.
/// They abort processing of the single offending message and leave shared
/// state untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Tick code outside the closed classification tables.
    ///
    /// The set of wire tick codes is known at build time, so an unmapped
    /// code is an internal-consistency error rather than data to skip.
    #[error("unmapped {kind} tick code {code}")]
    UnmappedTick { kind: &'static str, code: i32 },

    /// A tick payload that should parse under the closed format rules did not.
    #[error("malformed {field} tick value: {value:?}")]
    MalformedTick { field: &'static str, value: String },

    /// Depth operation outside the closed insert/update/delete set.
    #[error("unmapped depth operation {operation}")]
    UnmappedDepthOperation { operation: i32 },

    /// Depth side outside the closed bid/ask set.
    #[error("unmapped depth side {side}")]
    UnmappedDepthSide { side: i32 },
}

pub type Result<T> = std::result::Result<T, Error>;
