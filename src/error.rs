//! Error types
//!
//! Each stage owns a typed error. Quote, trace, revert and submission errors are
//! local to one hop/path/trial/transaction and are swallowed at that scope;
//! transport errors escalate to the reconnect loops in `stream`.

use alloy::primitives::Address;
use thiserror::Error;

/// Pool pricing failures. Always non-fatal: the hop or path is skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuoteError {
    #[error("newton iteration did not converge")]
    NoConvergence,

    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic overflow")]
    Overflow,

    #[error("value out of bounds: {0}")]
    OutOfBounds(&'static str),

    #[error("tick crossing budget exceeded after {0} ticks")]
    TickBudgetExceeded(usize),

    #[error("pool does not trade {0} -> {1}")]
    UnsupportedPair(Address, Address),

    #[error("insufficient liquidity")]
    InsufficientLiquidity,

    #[error("state fetch failed: {0}")]
    Fetch(String),

    #[error("pool {0} is not loaded")]
    UnknownPool(Address),

    /// Tick word absent or stale in the cache. Cleared by loading the word and
    /// quoting again.
    #[error("tick word {1} of {0} not loaded")]
    MissingTickWord(Address, i16),
}

/// Upstream tracing failures. The transaction is dropped, never retried.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("trace unavailable: {0}")]
    Unavailable(String),

    #[error("trace returned no calls")]
    NoCalls,

    #[error("malformed call frame: {0}")]
    Malformed(String),

    #[error("no swap events found")]
    NoSwaps,
}

/// Fork execution failures.
#[derive(Error, Debug)]
pub enum SimulationError {
    /// The trial reverted. Callers record a zero-output trial and keep searching.
    #[error("execution reverted: {0}")]
    Revert(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("fork not initialised")]
    NotForked,

    #[error("simulation budget elapsed")]
    Timeout,

    #[error("abi decode failed: {0}")]
    Decode(String),
}

/// Failures surfaced by an `EvmEngine` implementation
pub type EngineError = SimulationError;

impl SimulationError {
    pub fn is_revert(&self) -> bool {
        matches!(self, SimulationError::Revert(_))
    }
}

/// Stream transport failures. Handled by reconnecting after a fixed delay.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("connection closed")]
    Closed,

    #[error("read timed out")]
    Timeout,

    #[error("unexpected message: {0}")]
    Protocol(String),
}

/// Relay submission failures. Logged and abandoned.
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("relay rejected request: {0}")]
    Rejected(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("attack gated out: {0}")]
    Gated(String),
}

impl From<reqwest::Error> for SubmissionError {
    fn from(err: reqwest::Error) -> Self {
        SubmissionError::Http(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
            other => TransportError::WebSocket(other.to_string()),
        }
    }
}
