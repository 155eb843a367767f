//! deCONZ serial protocol driver for Dresden Elektronik Zigbee
//! coordinators (ConBee, ConBee II, RaspBee).
//!
//! Speaks the SLIP-framed command protocol over a single serial link:
//! frame encode/decode and checksums ([`frame`], [`slip`]), the command
//! and parameter vocabulary ([`commands`]), wire value types and the APS
//! data indication/request codecs ([`types`]), and the async connection
//! that ties it together ([`transport`]).

pub mod commands;
pub mod config;
pub mod error;
pub mod frame;
pub mod reader;
pub mod slip;
pub mod transport;
pub mod types;

pub use commands::{CommandId, NetworkParameter};
pub use config::ConnectConfig;
pub use error::ProtocolError;
pub use frame::Frame;
pub use slip::{FramingError, SlipDecoder, SlipEncoder};
pub use transport::{DeconzEvent, DeconzTransport, IncomingMessages};
pub use types::*;
