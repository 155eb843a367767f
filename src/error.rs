//! Error taxonomy for the deCONZ serial protocol.

use thiserror::Error;

use crate::slip::FramingError;
use crate::types::Status;

/// Errors produced while decoding or driving the protocol.
///
/// Framing and checksum errors are strictly local: the ingest loop logs
/// them and keeps decoding, they never reach a caller. Device-reported
/// failures, timeouts, and transport closure surface on the per-request
/// waiter a caller is `await`ing.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// SLIP protocol violation; the offending frame was discarded.
    #[error("SLIP framing error: {0}")]
    Framing(#[from] FramingError),

    /// Trailing checksum did not match the computed value.
    #[error("checksum mismatch: expected {expected:04X}, got {actual:04X}")]
    Checksum { expected: u16, actual: u16 },

    /// Frame shorter than the minimum header + checksum size.
    #[error("frame too short: {0} bytes")]
    FrameTooShort(usize),

    /// Command id not present in the closed `CommandId` vocabulary.
    #[error("unknown command id: {0:#04X}")]
    UnknownCommand(u8),

    /// Payload shorter than a field declares, or a length prefix overruns
    /// the buffer.
    #[error("payload decode error: {0}")]
    Decode(String),

    /// Device replied with a non-SUCCESS status to a request.
    #[error("device returned error status: {0:?}")]
    Protocol(Status),

    /// Request deadline expired, or the sequence id was forcibly reused
    /// before a response arrived.
    #[error("request timed out")]
    Timeout,

    /// The transport was closed while a request was outstanding.
    #[error("transport closed")]
    Closed,

    /// Underlying serial I/O error.
    #[error("serial port error: {0}")]
    Io(#[from] std::io::Error),
}
